//! XOAUTH2 authenticator for async-imap

/// XOAUTH2 authenticator for async-imap
///
/// Implements the SASL XOAUTH2 mechanism. async-imap base64-encodes whatever
/// `process` returns, so the response is the raw SASL string.
#[derive(Debug, Clone)]
pub struct XOAuth2Authenticator {
    /// Login name
    user: String,
    /// OAuth2 access token
    access_token: String,
    /// Set once the initial response has been sent
    sent: bool,
}

impl XOAuth2Authenticator {
    /// Create a new XOAUTH2 authenticator
    pub fn new(user: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            access_token: access_token.into(),
            sent: false,
        }
    }

    /// Generate the XOAUTH2 authentication string
    ///
    /// Format: "user={user}\x01auth=Bearer {token}\x01\x01"
    fn auth_string(&self) -> String {
        format!(
            "user={}\x01auth=Bearer {}\x01\x01",
            self.user, self.access_token
        )
    }
}

impl async_imap::Authenticator for XOAuth2Authenticator {
    type Response = String;

    fn process(&mut self, _challenge: &[u8]) -> Self::Response {
        if self.sent {
            // A second challenge carries the JSON error; an empty reply lets
            // the server finish with a tagged NO
            return String::new();
        }
        self.sent = true;
        self.auth_string()
    }
}
