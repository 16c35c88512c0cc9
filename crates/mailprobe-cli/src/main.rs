//! mailprobe - OAuth2 connection tester for SMTP, IMAP and shared mailboxes
//!
//! Obtains an access token with the authorization code flow (`browser`) or
//! the device flow (`device`), then checks what the token can do.

mod report;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mailprobe_auth::AuthError;
use mailprobe_core::{ConnectionTester, LiveProbe, ProbeReport, Settings};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit status after Ctrl-C, as shells report SIGINT
const INTERRUPTED: u8 = 130;

#[derive(Debug, Parser)]
#[command(name = "mailprobe", version, about = "Check OAuth2 access to SMTP, IMAP and shared mailboxes")]
struct Cli {
    /// Properties file with the mailbox, server and OAuth2 settings
    #[arg(short, long, default_value = "mail.properties")]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,

    /// Print the whole access token instead of a preview
    #[arg(long)]
    show_token: bool,

    #[command(subcommand)]
    flow: Flow,
}

#[derive(Debug, Subcommand)]
enum Flow {
    /// Authorization code flow: sign in through a browser redirect
    Browser {
        /// Print the sign-in URL without launching a browser
        #[arg(long)]
        no_browser: bool,
    },
    /// Device authorization flow: enter a code on another device
    Device,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "mailprobe=debug" } else { "mailprobe=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    info!("Starting mailprobe");
    debug!("{:?}", cli);

    tokio::select! {
        code = run(&cli) => code,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nInterrupted.");
            ExitCode::from(INTERRUPTED)
        }
    }
}

async fn run(cli: &Cli) -> ExitCode {
    match execute(cli).await {
        Ok(report) => {
            report::print_report(&report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("\nError: {:#}", e);
            if let Some(hint) = failure_hint(&e) {
                eprintln!("{}", hint);
            }
            ExitCode::FAILURE
        }
    }
}

/// Advice for token acquisition failures
fn failure_hint(err: &anyhow::Error) -> Option<&'static str> {
    let auth = err.downcast_ref::<AuthError>()?;
    if auth.is_authorization_not_obtained() {
        Some("Authorization was not obtained. Sign in again and approve the requested permissions before the code expires.")
    } else if matches!(auth, AuthError::TokenExchangeFailed(_)) {
        Some("The token endpoint refused the request. Check the client id, client secret, redirect URI and token URL.")
    } else {
        None
    }
}

async fn execute(cli: &Cli) -> Result<ProbeReport> {
    println!("Attempting to read configuration from: {}", cli.config.display());
    let settings = Settings::load(&cli.config)?;
    let mail = settings.mail_config()?;
    println!("Successfully loaded properties.");

    let token = match cli.flow {
        Flow::Browser { no_browser } => browser_token(&settings, !no_browser).await,
        Flow::Device => device_token(&settings).await,
    }
    .context("Could not obtain access token")?;

    println!("Successfully obtained access token.");
    report::print_token(&token, cli.show_token);

    let probe = LiveProbe::new(&mail);
    Ok(ConnectionTester::new(&probe, &mail).run(&token).await)
}

async fn browser_token(settings: &Settings, launch_browser: bool) -> Result<String> {
    let flow = settings.authorization_code_flow()?;

    let code = flow
        .authorization_code(launch_browser, report::print_authorization_url)
        .await?;
    println!("Successfully obtained authorization code.");

    println!("\nExchanging authorization code for access token...");
    Ok(flow.exchange_code(&code).await?)
}

async fn device_token(settings: &Settings) -> Result<String> {
    let flow = settings.device_flow()?;

    let authorization = flow.request_device_authorization().await?;
    report::print_device_instructions(&authorization);

    Ok(flow.wait_for_token(&authorization).await?)
}
