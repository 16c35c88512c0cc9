//! Connection test sequencing
//!
//! Runs SMTP, then the shared mailbox read, then send-as. Each test only runs
//! when the one before it passed and its own inputs are configured; anything
//! not run is recorded as skipped with the reason.

use crate::probe::{MailProbe, SEND_AS_SUBJECT};
use crate::MailConfig;
use mailprobe_imap::ImapError;
use mailprobe_smtp::{OutgoingMessage, SmtpError};
use std::fmt;
use tracing::{debug, info, warn};

/// The individual connection tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    /// SMTP session as the primary user
    Smtp,
    /// IMAP read of the shared mailbox inbox
    SharedMailboxRead,
    /// SMTP send from the shared mailbox
    SendAs,
}

impl ProbeKind {
    /// Heading used in the console report
    pub fn title(&self) -> &'static str {
        match self {
            ProbeKind::Smtp => "SMTP Connection Test",
            ProbeKind::SharedMailboxRead => "Shared Mailbox Read Access Test (IMAP)",
            ProbeKind::SendAs => "Shared Mailbox Send As Test (SMTP)",
        }
    }
}

/// Why a test failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    SmtpAuth,
    SmtpConnectivity,
    ImapAuth,
    ImapConnectivity,
    SendAsAuth,
    SendAsRejected,
}

impl FailureKind {
    /// Remediation advice for this failure
    pub fn hint(&self, user: &str, mailbox: &str) -> String {
        match self {
            FailureKind::SmtpAuth => "The access token may be invalid, expired, or not have the correct scope (e.g. SMTP.Send).".to_string(),
            FailureKind::SmtpConnectivity => "Check the SMTP host, port and network connectivity.".to_string(),
            FailureKind::ImapAuth => format!(
                "Verify that {} has delegate permissions on the mailbox {}, and that the app has the IMAP.AccessAsUser.All permission.",
                user, mailbox
            ),
            FailureKind::ImapConnectivity => "Check the IMAP host, port and network connectivity.".to_string(),
            FailureKind::SendAsAuth => "The token may be valid but lack the Mail.Send.Shared scope or an equivalent.".to_string(),
            FailureKind::SendAsRejected => format!(
                "Verify that {} has Send As or Send on Behalf permission for {}, and that the app has the Mail.Send.Shared permission.",
                user, mailbox
            ),
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::SmtpAuth => "SMTP authentication failure",
            FailureKind::SmtpConnectivity => "SMTP connectivity failure",
            FailureKind::ImapAuth => "IMAP authentication failure",
            FailureKind::ImapConnectivity => "IMAP connectivity failure",
            FailureKind::SendAsAuth => "send-as authentication failure",
            FailureKind::SendAsRejected => "send-as rejected",
        };
        f.write_str(label)
    }
}

/// Result of one test
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStatus {
    /// Passed, with a short detail line
    Passed(String),
    /// Failed
    Failed {
        kind: FailureKind,
        reason: String,
        hint: String,
    },
    /// Not attempted
    Skipped(String),
}

/// One line of the report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub kind: ProbeKind,
    pub status: ProbeStatus,
}

impl ProbeOutcome {
    fn passed(kind: ProbeKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            status: ProbeStatus::Passed(detail.into()),
        }
    }

    fn skipped(kind: ProbeKind, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        debug!("Skipping {}: {}", kind.title(), reason);
        Self {
            kind,
            status: ProbeStatus::Skipped(reason),
        }
    }

    fn failed(kind: ProbeKind, failure: FailureKind, reason: String, hint: String) -> Self {
        warn!("{} failed ({}): {}", kind.title(), failure, reason);
        Self {
            kind,
            status: ProbeStatus::Failed {
                kind: failure,
                reason,
                hint,
            },
        }
    }

    /// Whether the test ran and passed
    pub fn is_passed(&self) -> bool {
        matches!(self.status, ProbeStatus::Passed(_))
    }
}

/// Outcomes in the order the tests were considered
#[derive(Debug, Clone, Default)]
pub struct ProbeReport {
    outcomes: Vec<ProbeOutcome>,
}

impl ProbeReport {
    pub fn outcomes(&self) -> &[ProbeOutcome] {
        &self.outcomes
    }

    pub fn get(&self, kind: ProbeKind) -> Option<&ProbeOutcome> {
        self.outcomes.iter().find(|outcome| outcome.kind == kind)
    }

    /// Whether `kind` ran and passed
    pub fn passed(&self, kind: ProbeKind) -> bool {
        self.get(kind).is_some_and(ProbeOutcome::is_passed)
    }

    /// Number of tests that ran and failed
    pub fn failures(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.status, ProbeStatus::Failed { .. }))
            .count()
    }
}

/// Runs the connection tests for one access token
pub struct ConnectionTester<'a, P: MailProbe + ?Sized> {
    probe: &'a P,
    config: &'a MailConfig,
}

impl<'a, P: MailProbe + ?Sized> ConnectionTester<'a, P> {
    pub fn new(probe: &'a P, config: &'a MailConfig) -> Self {
        Self { probe, config }
    }

    /// Run every applicable test and collect the outcomes
    pub async fn run(&self, access_token: &str) -> ProbeReport {
        let mut outcomes = Vec::with_capacity(3);

        let smtp = self.smtp_test(access_token).await;
        let smtp_passed = smtp.is_passed();
        outcomes.push(smtp);

        let shared = self.config.shared_mailbox.as_deref();

        let read = match shared {
            None => ProbeOutcome::skipped(
                ProbeKind::SharedMailboxRead,
                "mail.shared.mailbox.address is not set",
            ),
            Some(_) if !smtp_passed => ProbeOutcome::skipped(
                ProbeKind::SharedMailboxRead,
                "the SMTP connection test did not pass",
            ),
            Some(mailbox) => self.read_test(mailbox, access_token).await,
        };
        let read_passed = read.is_passed();
        outcomes.push(read);

        let recipients = self.config.test_recipients();
        let send_as = match shared {
            None => ProbeOutcome::skipped(ProbeKind::SendAs, "mail.shared.mailbox.address is not set"),
            Some(_) if !read_passed => ProbeOutcome::skipped(
                ProbeKind::SendAs,
                "the shared mailbox read test did not pass",
            ),
            Some(_) if recipients.is_empty() => {
                ProbeOutcome::skipped(ProbeKind::SendAs, "mail.test.recipient is not set")
            }
            Some(mailbox) => self.send_as_test(mailbox, recipients, access_token).await,
        };
        outcomes.push(send_as);

        ProbeReport { outcomes }
    }

    async fn smtp_test(&self, access_token: &str) -> ProbeOutcome {
        let user = &self.config.user;
        info!(
            "SMTP host {}:{}, user {}",
            self.config.smtp.host, self.config.smtp.port, user
        );

        match self.probe.smtp_connect(user, access_token).await {
            Ok(()) => ProbeOutcome::passed(ProbeKind::Smtp, "SMTP connection established"),
            Err(e) => {
                let failure = if e.is_authentication() {
                    FailureKind::SmtpAuth
                } else {
                    FailureKind::SmtpConnectivity
                };
                ProbeOutcome::failed(ProbeKind::Smtp, failure, e.to_string(), failure.hint(user, ""))
            }
        }
    }

    async fn read_test(&self, mailbox: &str, access_token: &str) -> ProbeOutcome {
        let user = &self.config.user;
        info!("Attempting IMAP connection to {} using the token of {}", mailbox, user);

        // Exchange Online opens a delegated mailbox when the login names it
        match self.probe.imap_read(mailbox, access_token).await {
            Ok(status) => ProbeOutcome::passed(
                ProbeKind::SharedMailboxRead,
                format!("{} opened read-only, {} message(s)", status.name, status.exists),
            ),
            Err(e) => {
                let failure = imap_failure(&e);
                ProbeOutcome::failed(
                    ProbeKind::SharedMailboxRead,
                    failure,
                    e.to_string(),
                    failure.hint(user, mailbox),
                )
            }
        }
    }

    async fn send_as_test(&self, mailbox: &str, recipients: Vec<String>, access_token: &str) -> ProbeOutcome {
        let user = &self.config.user;
        info!("Sending a test email from {} to {}", mailbox, recipients.join(", "));

        let message = recipients.iter().fold(
            OutgoingMessage::new(mailbox, SEND_AS_SUBJECT).text(format!(
                "This is a test email sent by mailprobe to verify 'Send As' permissions for user {} on behalf of {}.",
                user, mailbox
            )),
            |message, recipient| message.to(recipient.as_str()),
        );

        match self.probe.smtp_send(user, access_token, message).await {
            Ok(()) => ProbeOutcome::passed(
                ProbeKind::SendAs,
                format!("Email sent; check the inbox of {}", recipients.join(", ")),
            ),
            Err(e) => {
                let failure = send_as_failure(&e);
                ProbeOutcome::failed(ProbeKind::SendAs, failure, e.to_string(), failure.hint(user, mailbox))
            }
        }
    }
}

fn imap_failure(err: &ImapError) -> FailureKind {
    if err.is_authentication() {
        FailureKind::ImapAuth
    } else {
        FailureKind::ImapConnectivity
    }
}

fn send_as_failure(err: &SmtpError) -> FailureKind {
    if err.is_authentication() {
        FailureKind::SendAsAuth
    } else {
        FailureKind::SendAsRejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ServerConfig;
    use async_trait::async_trait;
    use mailprobe_imap::{ImapResult, MailboxStatus};
    use mailprobe_smtp::SmtpResult;
    use std::sync::Mutex;

    #[derive(Clone, Copy, Default)]
    enum Script {
        #[default]
        Pass,
        AuthFail,
        NetworkFail,
    }

    #[derive(Default)]
    struct FakeProbe {
        smtp: Script,
        imap: Script,
        send: Script,
        calls: Mutex<Vec<String>>,
        sent: Mutex<Vec<OutgoingMessage>>,
    }

    impl FakeProbe {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MailProbe for FakeProbe {
        async fn smtp_connect(&self, user: &str, access_token: &str) -> SmtpResult<()> {
            self.calls.lock().unwrap().push(format!("smtp {} {}", user, access_token));
            match self.smtp {
                Script::Pass => Ok(()),
                Script::AuthFail => Err(SmtpError::AuthenticationFailed("535 5.7.3".into())),
                Script::NetworkFail => Err(SmtpError::ConnectionFailed("connection refused".into())),
            }
        }

        async fn imap_read(&self, login: &str, access_token: &str) -> ImapResult<MailboxStatus> {
            self.calls.lock().unwrap().push(format!("imap {} {}", login, access_token));
            match self.imap {
                Script::Pass => Ok(MailboxStatus {
                    name: "INBOX".to_string(),
                    exists: 42,
                }),
                Script::AuthFail => Err(ImapError::AuthenticationFailed("AUTHENTICATE failed".into())),
                Script::NetworkFail => Err(ImapError::ConnectionFailed("timed out".into())),
            }
        }

        async fn smtp_send(&self, user: &str, access_token: &str, message: OutgoingMessage) -> SmtpResult<()> {
            self.calls.lock().unwrap().push(format!("send {} {}", user, access_token));
            self.sent.lock().unwrap().push(message);
            match self.send {
                Script::Pass => Ok(()),
                Script::AuthFail => Err(SmtpError::AuthenticationFailed("535 5.7.139".into())),
                Script::NetworkFail => Err(SmtpError::Rejected("554 5.2.0 SendAsDenied".into())),
            }
        }
    }

    fn config(shared: Option<&str>, recipient: Option<&str>) -> MailConfig {
        MailConfig {
            user: "alice@contoso.com".to_string(),
            shared_mailbox: shared.map(str::to_string),
            test_recipient: recipient.map(str::to_string),
            smtp: ServerConfig {
                host: "smtp.office365.com".to_string(),
                port: 587,
            },
            imap: shared.map(|_| ServerConfig {
                host: "outlook.office365.com".to_string(),
                port: 993,
            }),
        }
    }

    fn skip_reason(report: &ProbeReport, kind: ProbeKind) -> String {
        match &report.get(kind).unwrap().status {
            ProbeStatus::Skipped(reason) => reason.clone(),
            other => panic!("{:?} was not skipped: {:?}", kind, other),
        }
    }

    fn failure(report: &ProbeReport, kind: ProbeKind) -> (FailureKind, String) {
        match &report.get(kind).unwrap().status {
            ProbeStatus::Failed { kind, hint, .. } => (*kind, hint.clone()),
            other => panic!("{:?} did not fail: {:?}", kind, other),
        }
    }

    #[tokio::test]
    async fn test_smtp_only_without_shared_mailbox() {
        let probe = FakeProbe::default();
        let config = config(None, Some("bob@contoso.com"));

        let report = ConnectionTester::new(&probe, &config).run("AT1").await;

        assert_eq!(probe.calls(), vec!["smtp alice@contoso.com AT1"]);
        assert!(report.passed(ProbeKind::Smtp));
        assert_eq!(report.failures(), 0);
        assert!(skip_reason(&report, ProbeKind::SharedMailboxRead).contains("mail.shared.mailbox.address"));
        assert!(skip_reason(&report, ProbeKind::SendAs).contains("mail.shared.mailbox.address"));
    }

    #[tokio::test]
    async fn test_all_tests_pass() {
        let probe = FakeProbe::default();
        let config = config(Some("shared@contoso.com"), Some("bob@contoso.com, carol@contoso.com"));

        let report = ConnectionTester::new(&probe, &config).run("AT1").await;

        assert_eq!(
            probe.calls(),
            vec![
                "smtp alice@contoso.com AT1",
                "imap shared@contoso.com AT1",
                "send alice@contoso.com AT1"
            ]
        );
        assert!(report.outcomes().iter().all(ProbeOutcome::is_passed));
        assert_eq!(
            report.get(ProbeKind::SharedMailboxRead).unwrap().status,
            ProbeStatus::Passed("INBOX opened read-only, 42 message(s)".to_string())
        );

        let sent = probe.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].from, "shared@contoso.com");
        assert_eq!(sent[0].to, vec!["bob@contoso.com", "carol@contoso.com"]);
        assert_eq!(sent[0].subject, SEND_AS_SUBJECT);
        assert!(sent[0].text_body.contains("alice@contoso.com"));
        assert!(sent[0].text_body.contains("shared@contoso.com"));
    }

    #[tokio::test]
    async fn test_smtp_failure_skips_dependents() {
        let probe = FakeProbe {
            smtp: Script::AuthFail,
            ..Default::default()
        };
        let config = config(Some("shared@contoso.com"), Some("bob@contoso.com"));

        let report = ConnectionTester::new(&probe, &config).run("AT1").await;

        assert_eq!(probe.calls().len(), 1);
        let (kind, hint) = failure(&report, ProbeKind::Smtp);
        assert_eq!(kind, FailureKind::SmtpAuth);
        assert!(hint.contains("SMTP.Send"));
        assert!(skip_reason(&report, ProbeKind::SharedMailboxRead).contains("SMTP"));
        assert!(skip_reason(&report, ProbeKind::SendAs).contains("read test"));
        assert_eq!(report.failures(), 1);
    }

    #[tokio::test]
    async fn test_smtp_connectivity_failure() {
        let probe = FakeProbe {
            smtp: Script::NetworkFail,
            ..Default::default()
        };
        let config = config(None, None);

        let report = ConnectionTester::new(&probe, &config).run("AT1").await;
        assert_eq!(failure(&report, ProbeKind::Smtp).0, FailureKind::SmtpConnectivity);
    }

    #[tokio::test]
    async fn test_imap_failure_skips_send_as() {
        let probe = FakeProbe {
            imap: Script::AuthFail,
            ..Default::default()
        };
        let config = config(Some("shared@contoso.com"), Some("bob@contoso.com"));

        let report = ConnectionTester::new(&probe, &config).run("AT1").await;

        assert_eq!(probe.calls().len(), 2);
        let (kind, hint) = failure(&report, ProbeKind::SharedMailboxRead);
        assert_eq!(kind, FailureKind::ImapAuth);
        assert!(hint.contains("alice@contoso.com"));
        assert!(hint.contains("shared@contoso.com"));
        assert!(hint.contains("IMAP.AccessAsUser.All"));
        assert!(skip_reason(&report, ProbeKind::SendAs).contains("read test"));
    }

    #[tokio::test]
    async fn test_imap_connectivity_failure() {
        let probe = FakeProbe {
            imap: Script::NetworkFail,
            ..Default::default()
        };
        let config = config(Some("shared@contoso.com"), None);

        let report = ConnectionTester::new(&probe, &config).run("AT1").await;
        assert_eq!(failure(&report, ProbeKind::SharedMailboxRead).0, FailureKind::ImapConnectivity);
    }

    #[tokio::test]
    async fn test_blank_recipient_skips_send_as() {
        let probe = FakeProbe::default();
        let config = config(Some("shared@contoso.com"), Some(" , "));

        let report = ConnectionTester::new(&probe, &config).run("AT1").await;

        assert_eq!(probe.calls().len(), 2);
        assert!(report.passed(ProbeKind::SharedMailboxRead));
        assert!(skip_reason(&report, ProbeKind::SendAs).contains("mail.test.recipient"));
    }

    #[tokio::test]
    async fn test_send_as_failures_are_classified() {
        let config = config(Some("shared@contoso.com"), Some("bob@contoso.com"));

        let probe = FakeProbe {
            send: Script::AuthFail,
            ..Default::default()
        };
        let report = ConnectionTester::new(&probe, &config).run("AT1").await;
        let (kind, hint) = failure(&report, ProbeKind::SendAs);
        assert_eq!(kind, FailureKind::SendAsAuth);
        assert!(hint.contains("Mail.Send.Shared"));

        let probe = FakeProbe {
            send: Script::NetworkFail,
            ..Default::default()
        };
        let report = ConnectionTester::new(&probe, &config).run("AT1").await;
        let (kind, hint) = failure(&report, ProbeKind::SendAs);
        assert_eq!(kind, FailureKind::SendAsRejected);
        assert!(hint.contains("Send As or Send on Behalf"));
    }

    #[tokio::test]
    async fn test_tester_accepts_trait_objects() {
        let probe = FakeProbe::default();
        let dynamic: &dyn MailProbe = &probe;
        let config = config(None, None);

        let report = ConnectionTester::new(dynamic, &config).run("AT2").await;
        assert!(report.passed(ProbeKind::Smtp));
        assert_eq!(probe.calls(), vec!["smtp alice@contoso.com AT2"]);
    }
}
