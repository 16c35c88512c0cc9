//! Authentication module for mailprobe
//!
//! Obtains an OAuth2 access token through one of two flows:
//! 1. Authorization code flow - the user consents in a browser and the
//!    redirect is captured by a short-lived local listener
//! 2. Device authorization flow (RFC 8628) - for headless machines, the user
//!    enters a code on another device while we poll the token endpoint
//!
//! Tokens are handed back as plain strings. Nothing is cached or refreshed.

mod callback;
mod device;
mod error;
mod oauth2;

#[cfg(test)]
mod test_server;

pub use callback::CallbackListener;
pub use device::{poll_until_deadline, DeviceAuthorization, DeviceFlow, PollOutcome};
pub use error::{AuthError, AuthResult};
pub use oauth2::{normalize_scope, open_in_browser, AuthorizationCodeFlow, OAuth2Config};

/// Grant type sent when polling for a device code token
pub const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
