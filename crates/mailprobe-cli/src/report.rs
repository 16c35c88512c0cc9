//! Console output: user action banners and the final summary

use mailprobe_auth::DeviceAuthorization;
use mailprobe_core::{ProbeOutcome, ProbeReport, ProbeStatus};
use url::Url;

const RULE: &str = "==================================================================";

/// Characters of the token shown without `--show-token`
const TOKEN_PREVIEW_CHARS: usize = 12;

pub fn print_authorization_url(url: &Url, browser_opened: bool) {
    println!("\n--- User Action Required ---");
    println!("Please open the following URL in your browser, log in, and grant permissions:");
    println!("\n{}\n", url);
    if browser_opened {
        println!("Your default browser should have opened for authentication.");
    } else {
        eprintln!("Could not open a browser automatically. Please copy/paste the URL manually.");
    }
    println!("Waiting for the redirect...");
}

pub fn print_device_instructions(authorization: &DeviceAuthorization) {
    println!("\n--- User Action Required ---");
    println!("1. On any device, open: {}", authorization.verification_uri);
    println!("2. Enter the code: {}", authorization.user_code);
    println!(
        "\nWaiting for you to sign in (code expires in {} seconds)...",
        authorization.expires_in
    );
}

pub fn print_token(token: &str, show_full: bool) {
    if show_full {
        println!("Access Token: {}", token);
    } else {
        println!("Access Token: {} (use --show-token to print it all)", token_preview(token));
    }
}

fn token_preview(token: &str) -> String {
    let count = token.chars().count();
    if count <= TOKEN_PREVIEW_CHARS {
        return format!("<{} characters>", count);
    }
    let head: String = token.chars().take(TOKEN_PREVIEW_CHARS).collect();
    format!("{}... ({} characters)", head, count)
}

fn outcome_lines(outcome: &ProbeOutcome) -> Vec<String> {
    let title = outcome.kind.title();
    match &outcome.status {
        ProbeStatus::Passed(detail) => vec![format!("PASS     {}: {}", title, detail)],
        ProbeStatus::Skipped(reason) => vec![format!("SKIPPED  {}: {}", title, reason)],
        ProbeStatus::Failed { kind, reason, hint } => vec![
            format!("FAIL     {}: {}", title, kind),
            format!("         {}", reason),
            format!("         {}", hint),
        ],
    }
}

pub fn print_report(report: &ProbeReport) {
    println!("\n{}", RULE);
    println!("Connection test summary");
    println!("{}", RULE);
    for outcome in report.outcomes() {
        for line in outcome_lines(outcome) {
            println!("{}", line);
        }
    }
    println!("{}", RULE);

    match report.failures() {
        0 => println!("All attempted tests passed."),
        n => println!("{} test(s) failed.", n),
    }
}
