//! IMAP checks for mailprobe
//!
//! Opens a TLS session, authenticates with XOAUTH2 and examines a mailbox
//! read-only to prove the token grants access to it.

mod client;
mod error;
mod oauth2;

pub use client::{ImapClient, MailboxStatus};
pub use error::{ImapError, ImapResult};
pub use oauth2::XOAuth2Authenticator;
