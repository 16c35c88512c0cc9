//! Protocol checks behind a trait seam

use crate::{MailConfig, ServerConfig};
use async_trait::async_trait;
use mailprobe_imap::{ImapClient, ImapError, ImapResult, MailboxStatus};
use mailprobe_smtp::{OutgoingMessage, SmtpClient, SmtpResult};
use tracing::{info, warn};

/// Subject of the send-as diagnostic message
pub const SEND_AS_SUBJECT: &str = "mailprobe - Send As Test";

/// Mailbox opened by the shared mailbox read test
const INBOX: &str = "INBOX";

/// The network operations the connection tests need
#[async_trait]
pub trait MailProbe: Send + Sync {
    /// Authenticate to SMTP as `user` and close the session
    async fn smtp_connect(&self, user: &str, access_token: &str) -> SmtpResult<()>;

    /// Log in to IMAP as `login`, examine its inbox and log out
    async fn imap_read(&self, login: &str, access_token: &str) -> ImapResult<MailboxStatus>;

    /// Authenticate to SMTP as `user` and send `message`
    async fn smtp_send(&self, user: &str, access_token: &str, message: OutgoingMessage) -> SmtpResult<()>;
}

/// Probe that talks to the configured servers
pub struct LiveProbe {
    smtp: ServerConfig,
    imap: Option<ServerConfig>,
}

impl LiveProbe {
    /// Create a probe for the servers in `config`
    pub fn new(config: &MailConfig) -> Self {
        Self {
            smtp: config.smtp.clone(),
            imap: config.imap.clone(),
        }
    }

    fn smtp_client(&self) -> SmtpClient {
        SmtpClient::new(&self.smtp.host, self.smtp.port)
    }
}

#[async_trait]
impl MailProbe for LiveProbe {
    async fn smtp_connect(&self, user: &str, access_token: &str) -> SmtpResult<()> {
        self.smtp_client().test_connection_xoauth2(user, access_token).await
    }

    async fn imap_read(&self, login: &str, access_token: &str) -> ImapResult<MailboxStatus> {
        let server = self
            .imap
            .as_ref()
            .ok_or_else(|| ImapError::ConnectionFailed("no IMAP server configured".to_string()))?;
        info!("IMAP host {}:{}, login {}", server.host, server.port, login);

        let mut client = ImapClient::new(&server.host, server.port);
        client.authenticate_xoauth2(login, access_token).await?;

        let status = client.examine_folder(INBOX).await;
        if let Err(e) = client.logout().await {
            warn!("IMAP logout failed: {}", e);
        }
        status
    }

    async fn smtp_send(&self, user: &str, access_token: &str, message: OutgoingMessage) -> SmtpResult<()> {
        self.smtp_client().send_xoauth2(user, access_token, message).await
    }
}
