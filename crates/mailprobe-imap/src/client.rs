//! IMAP client implementation

use crate::{ImapError, ImapResult, XOAuth2Authenticator};
use async_imap::error::Error as ProtocolError;
use async_imap::Session;
use async_native_tls::TlsStream;
use async_std::net::TcpStream;
use tracing::{debug, info, warn};

// Type alias for our TLS stream
type ImapStream = TlsStream<TcpStream>;

/// What EXAMINE reported for a mailbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxStatus {
    /// Mailbox name as examined
    pub name: String,
    /// Number of messages in the mailbox
    pub exists: u32,
}

/// IMAP client holding at most one authenticated session
pub struct ImapClient {
    session: Option<Session<ImapStream>>,
    host: String,
    port: u16,
}

impl ImapClient {
    /// Create a new IMAP client
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            session: None,
            host: host.into(),
            port,
        }
    }

    /// Connect over TLS and authenticate using XOAUTH2
    pub async fn authenticate_xoauth2(&mut self, user: &str, access_token: &str) -> ImapResult<()> {
        info!("Connecting to {}:{}", self.host, self.port);

        let tcp_stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| ImapError::ConnectionFailed(format!("{}:{}: {}", self.host, self.port, e)))?;

        let tls_connector = async_native_tls::TlsConnector::new();
        let tls_stream = tls_connector
            .connect(&self.host, tcp_stream)
            .await
            .map_err(|e| ImapError::TlsError(format!("{}: {}", self.host, e)))?;

        debug!("TLS connection established");

        let client = async_imap::Client::new(tls_stream);

        info!("Authenticating with XOAUTH2 for {}", user);

        let auth = XOAuth2Authenticator::new(user, access_token);
        let session = client
            .authenticate("XOAUTH2", auth)
            .await
            .map_err(|(e, _)| classify_login_error(user, e))?;

        self.session = Some(session);
        info!("XOAUTH2 authentication successful");
        Ok(())
    }

    fn session_mut(&mut self) -> ImapResult<&mut Session<ImapStream>> {
        self.session.as_mut().ok_or(ImapError::NotConnected)
    }

    /// Open a mailbox read-only and report its message count
    pub async fn examine_folder(&mut self, folder: &str) -> ImapResult<MailboxStatus> {
        let session = self.session_mut()?;

        let mailbox = session
            .examine(folder)
            .await
            .map_err(|e| classify_examine_error(folder, e))?;

        debug!("Examined {} with {} messages", folder, mailbox.exists);

        Ok(MailboxStatus {
            name: folder.to_string(),
            exists: mailbox.exists,
        })
    }

    /// Log out and drop the session
    pub async fn logout(&mut self) -> ImapResult<()> {
        if let Some(mut session) = self.session.take() {
            session
                .logout()
                .await
                .map_err(|e| ImapError::ServerError(e.to_string()))?;
            debug!("Logged out from {}", self.host);
        }
        Ok(())
    }
}

impl Drop for ImapClient {
    fn drop(&mut self) {
        if self.session.is_some() {
            // The TLS stream closes with the session; the server sees a
            // dropped connection instead of LOGOUT
            warn!("IMAP session to {} dropped without logout", self.host);
        }
    }
}

fn classify_login_error(user: &str, err: ProtocolError) -> ImapError {
    match err {
        ProtocolError::No(text) | ProtocolError::Bad(text) => {
            ImapError::AuthenticationFailed(format!("{}: {}", user, text.trim()))
        }
        other => ImapError::ConnectionFailed(other.to_string()),
    }
}

fn classify_examine_error(folder: &str, err: ProtocolError) -> ImapError {
    match err {
        ProtocolError::No(text) | ProtocolError::Bad(text) => {
            ImapError::FolderAccessDenied(format!("{}: {}", folder, text.trim()))
        }
        other => ImapError::ConnectionFailed(other.to_string()),
    }
}
