//! Error types for the auth module

use thiserror::Error;

/// Result type for auth operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors that can occur during authentication
#[derive(Debug, Error)]
pub enum AuthError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to start local callback server
    #[error("Failed to start callback server: {0}")]
    CallbackServerFailed(String),

    /// The redirect never delivered an authorization code
    #[error("Authorization code not obtained: {0}")]
    AuthorizationNotObtained(String),

    /// The authorization server ended the device flow with an error
    #[error("Authorization denied: {error} - {description}")]
    AuthorizationDenied {
        /// Error code (e.g. `access_denied`, `expired_token`)
        error: String,
        /// Raw error payload or description from the server
        description: String,
    },

    /// The device code expired before the user completed sign-in
    #[error("Authorization timed out after {0} seconds")]
    AuthorizationTimedOut(u64),

    /// Device code request failed
    #[error("Device code request failed: {0}")]
    DeviceCodeRequestFailed(String),

    /// Token exchange failed
    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    /// Network error
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl AuthError {
    /// Whether the user never granted access (no code, denial or timeout)
    pub fn is_authorization_not_obtained(&self) -> bool {
        matches!(
            self,
            AuthError::AuthorizationNotObtained(_)
                | AuthError::AuthorizationDenied { .. }
                | AuthError::AuthorizationTimedOut(_)
        )
    }
}
