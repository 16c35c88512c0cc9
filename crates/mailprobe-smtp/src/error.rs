//! Error types for SMTP operations

use thiserror::Error;

/// Result type for SMTP operations
pub type SmtpResult<T> = Result<T, SmtpError>;

/// Errors that can occur during SMTP operations
#[derive(Debug, Error)]
pub enum SmtpError {
    /// Connection failed
    #[error("Failed to connect to SMTP server: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("SMTP authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The server refused the message after authentication
    #[error("Message rejected by SMTP server: {0}")]
    Rejected(String),

    /// Invalid email address
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Message building error
    #[error("Failed to build message: {0}")]
    MessageBuildError(String),

    /// TLS error
    #[error("TLS error: {0}")]
    TlsError(String),
}

impl SmtpError {
    /// Whether the server refused the credentials
    pub fn is_authentication(&self) -> bool {
        matches!(self, SmtpError::AuthenticationFailed(_))
    }
}
