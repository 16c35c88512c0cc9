//! Core logic for mailprobe
//!
//! Loads the properties file into typed settings and runs the connection
//! tests (SMTP, shared mailbox read over IMAP, send-as) with an access token.

mod config;
mod error;
mod probe;
mod sequencer;

pub use config::{keys, MailConfig, Properties, ServerConfig, Settings};
pub use error::{CoreError, CoreResult};
pub use probe::{LiveProbe, MailProbe, SEND_AS_SUBJECT};
pub use sequencer::{
    ConnectionTester, FailureKind, ProbeKind, ProbeOutcome, ProbeReport, ProbeStatus,
};
