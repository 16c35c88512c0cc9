//! Error types for IMAP operations

use thiserror::Error;

/// Result type for IMAP operations
pub type ImapResult<T> = Result<T, ImapError>;

/// Errors that can occur during IMAP operations
#[derive(Debug, Error)]
pub enum ImapError {
    /// Connection failed
    #[error("Failed to connect to IMAP server: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("IMAP authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The server refused to open the mailbox for this login
    #[error("Access to mailbox denied: {0}")]
    FolderAccessDenied(String),

    /// Server returned an error
    #[error("IMAP server error: {0}")]
    ServerError(String),

    /// TLS error
    #[error("TLS error: {0}")]
    TlsError(String),

    /// Session is not connected
    #[error("IMAP session is not connected")]
    NotConnected,
}

impl ImapError {
    /// Whether the failure is about credentials or permissions rather than
    /// reaching the server
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            ImapError::AuthenticationFailed(_) | ImapError::FolderAccessDenied(_)
        )
    }
}
