//! SMTP client implementation

use crate::{SmtpError, SmtpResult};
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::{Credentials, Mechanism},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{debug, info};

/// Reply codes servers use to refuse SASL credentials
const AUTH_REPLY_CODES: [&str; 5] = ["454", "530", "534", "535", "538"];

/// Email message to send
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// From address
    pub from: String,
    /// To addresses
    pub to: Vec<String>,
    /// Subject line
    pub subject: String,
    /// Plain text body
    pub text_body: String,
}

impl OutgoingMessage {
    /// Create a new message builder
    pub fn new(from: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: Vec::new(),
            subject: subject.into(),
            text_body: String::new(),
        }
    }

    /// Add a To recipient
    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to.push(address.into());
        self
    }

    /// Set the plain text body
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.text_body = body.into();
        self
    }
}

/// How the session is secured, derived from the port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSecurity {
    /// TLS from the first byte (SMTPS, port 465)
    Implicit,
    /// Plain connection upgraded with STARTTLS
    StartTls,
}

impl TransportSecurity {
    /// Pick the security mode for a submission port
    pub fn for_port(port: u16) -> Self {
        if port == 465 {
            TransportSecurity::Implicit
        } else {
            TransportSecurity::StartTls
        }
    }
}

/// SMTP client for connection tests and sending
pub struct SmtpClient {
    host: String,
    port: u16,
}

impl SmtpClient {
    /// Create a new SMTP client
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    fn transport(&self, email: &str, access_token: &str) -> SmtpResult<AsyncSmtpTransport<Tokio1Executor>> {
        let builder = match TransportSecurity::for_port(self.port) {
            TransportSecurity::Implicit => AsyncSmtpTransport::<Tokio1Executor>::relay(&self.host),
            TransportSecurity::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.host),
        }
        .map_err(|e| SmtpError::TlsError(format!("{}: {}", self.host, e)))?;

        // lettre's Xoauth2 mechanism expects the access token directly -
        // it constructs and encodes the XOAUTH2 string internally
        Ok(builder
            .port(self.port)
            .credentials(Credentials::new(email.to_string(), access_token.to_string()))
            .authentication(vec![Mechanism::Xoauth2])
            .build())
    }

    /// Open an authenticated session and close it again without sending
    pub async fn test_connection_xoauth2(&self, email: &str, access_token: &str) -> SmtpResult<()> {
        info!("Testing SMTP connection to {}:{} as {}", self.host, self.port, email);

        let transport = self.transport(email, access_token)?;
        let alive = transport
            .test_connection()
            .await
            .map_err(|e| self.classify_connect(e))?;

        if !alive {
            return Err(SmtpError::ConnectionFailed(format!(
                "{}:{} did not answer NOOP",
                self.host, self.port
            )));
        }

        info!("SMTP session established");
        Ok(())
    }

    /// Send a message using XOAUTH2 authentication
    pub async fn send_xoauth2(
        &self,
        email: &str,
        access_token: &str,
        message: OutgoingMessage,
    ) -> SmtpResult<()> {
        info!("Sending email via SMTP with XOAUTH2");

        let lettre_message = build_lettre_message(&message)?;
        let transport = self.transport(email, access_token)?;

        let response = transport
            .send(lettre_message)
            .await
            .map_err(|e| self.classify_send(e))?;
        debug!("Server response: {:?}", response.code());

        info!("Email sent successfully");
        Ok(())
    }

    fn classify_connect(&self, err: lettre::transport::smtp::Error) -> SmtpError {
        let code = err.status().map(|c| c.to_string());
        let message = format!("{}:{}: {}", self.host, self.port, err);

        if is_auth_rejection(code.as_deref(), &err.to_string()) {
            SmtpError::AuthenticationFailed(message)
        } else {
            SmtpError::ConnectionFailed(message)
        }
    }

    fn classify_send(&self, err: lettre::transport::smtp::Error) -> SmtpError {
        let code = err.status().map(|c| c.to_string());
        let message = format!("{}:{}: {}", self.host, self.port, err);

        if is_auth_rejection(code.as_deref(), &err.to_string()) {
            SmtpError::AuthenticationFailed(message)
        } else if code.is_some() {
            SmtpError::Rejected(message)
        } else {
            SmtpError::ConnectionFailed(message)
        }
    }
}

/// Whether an SMTP failure means the server refused the credentials
fn is_auth_rejection(code: Option<&str>, message: &str) -> bool {
    code.is_some_and(|c| AUTH_REPLY_CODES.contains(&c))
        || message.to_ascii_lowercase().contains("authentication")
}

fn parse_mailbox(address: &str) -> SmtpResult<Mailbox> {
    Ok(Mailbox::new(
        None,
        address
            .trim()
            .parse()
            .map_err(|e| SmtpError::InvalidAddress(format!("{}: {}", address, e)))?,
    ))
}

/// Build a lettre Message from OutgoingMessage
pub fn build_lettre_message(msg: &OutgoingMessage) -> SmtpResult<Message> {
    if msg.to.is_empty() {
        return Err(SmtpError::MessageBuildError("no recipients".to_string()));
    }

    let mut builder = Message::builder()
        .from(parse_mailbox(&msg.from)?)
        .subject(&msg.subject)
        .date_now();

    for to in &msg.to {
        builder = builder.to(parse_mailbox(to)?);
    }

    builder
        .header(ContentType::TEXT_PLAIN)
        .body(msg.text_body.clone())
        .map_err(|e| SmtpError::MessageBuildError(e.to_string()))
}
