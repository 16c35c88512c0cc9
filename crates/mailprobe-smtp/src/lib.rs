//! SMTP checks for mailprobe
//!
//! Opens XOAUTH2-authenticated sessions through lettre, either to confirm the
//! session establishes or to send a diagnostic message, and sorts failures
//! into authentication, rejection and connectivity problems.

mod client;
mod error;

pub use client::{build_lettre_message, OutgoingMessage, SmtpClient, TransportSecurity};
pub use error::{SmtpError, SmtpResult};
