//! Device Authorization Flow implementation (RFC 8628)
//!
//! The flow moves through `REQUESTING_CODE -> POLLING -> {SUCCESS | DENIED | TIMEOUT}`.
//! Polling runs against a deadline fixed when the loop starts, so slow token
//! requests cannot stretch the wait past `expires_in`.

use crate::oauth2::{ErrorResponse, TokenResponse};
use crate::{AuthError, AuthResult, OAuth2Config, DEVICE_CODE_GRANT};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};
use url::Url;

/// Device authorization response
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceAuthorization {
    /// Device code for polling
    pub device_code: String,
    /// User code to display to the user
    pub user_code: String,
    /// Verification URI where the user enters the code
    #[serde(alias = "verification_url")]
    pub verification_uri: String,
    /// Polling interval in seconds
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// Lifetime of the device code in seconds
    pub expires_in: u64,
    /// Human readable instructions, when the server provides them
    #[serde(default)]
    pub message: Option<String>,
}

const fn default_interval() -> u64 {
    5
}

/// Result of a single poll of the token endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The user signed in; carries the access token
    Authorized(String),
    /// `authorization_pending`: keep polling
    Pending,
    /// Any other error ends the flow
    Denied {
        /// Error code from the server
        error: String,
        /// Description or raw payload
        description: String,
    },
}

/// Device Authorization Flow for OAuth2
pub struct DeviceFlow {
    config: OAuth2Config,
    device_code_url: Url,
    http: Client,
}

impl DeviceFlow {
    /// Create a new device flow
    pub fn new(config: OAuth2Config, device_code_url: Url) -> Self {
        Self {
            config,
            device_code_url,
            http: Client::new(),
        }
    }

    /// Request a device code and user code from the authorization server
    pub async fn request_device_authorization(&self) -> AuthResult<DeviceAuthorization> {
        info!("Requesting device code from {}", self.device_code_url);

        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("scope", self.config.scope.as_str()),
        ];

        let response = self
            .http
            .post(self.device_code_url.clone())
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                AuthError::DeviceCodeRequestFailed(format!("{}: {}", self.device_code_url, e))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            AuthError::DeviceCodeRequestFailed(format!("{}: {}", self.device_code_url, e))
        })?;

        if !status.is_success() {
            return Err(AuthError::DeviceCodeRequestFailed(format!(
                "{} returned {}: {} (check the client id and the device code URL)",
                self.device_code_url, status, body
            )));
        }

        let authorization: DeviceAuthorization = serde_json::from_str(&body).map_err(|e| {
            AuthError::DeviceCodeRequestFailed(format!("malformed response ({}): {}", e, body))
        })?;

        if let Some(message) = &authorization.message {
            debug!("Device code message: {}", message);
        }
        debug!(
            "Device code issued: interval={}s, expires_in={}s",
            authorization.interval, authorization.expires_in
        );

        Ok(authorization)
    }

    /// Poll the token endpoint once
    pub async fn poll_token(&self, device_code: &str) -> AuthResult<PollOutcome> {
        let token_url = &self.config.token_url;

        let mut params = vec![
            ("grant_type", DEVICE_CODE_GRANT),
            ("client_id", self.config.client_id.as_str()),
            ("device_code", device_code),
        ];
        // Confidential app registrations reject the poll without it
        if let Some(secret) = self.config.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }

        let response = self
            .http
            .post(token_url.clone())
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::NetworkError(format!("{}: {}", token_url, e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::NetworkError(format!("{}: {}", token_url, e)))?;

        if status == StatusCode::OK {
            let token = TokenResponse::parse(&body).map_err(|e| {
                AuthError::TokenExchangeFailed(format!("malformed token response ({}): {}", e, body))
            })?;
            return Ok(PollOutcome::Authorized(token.access_token));
        }

        Ok(classify_poll_error(&body))
    }

    /// Poll until the user completes sign-in, the server refuses, or the
    /// device code expires
    pub async fn wait_for_token(&self, authorization: &DeviceAuthorization) -> AuthResult<String> {
        poll_until_deadline(authorization, || self.poll_token(&authorization.device_code)).await
    }
}

/// Interpret a non-200 token endpoint body
fn classify_poll_error(body: &str) -> PollOutcome {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(error) if error.error == "authorization_pending" => PollOutcome::Pending,
        Ok(error) => PollOutcome::Denied {
            description: if error.error_description.is_empty() {
                body.to_string()
            } else {
                error.error_description
            },
            error: error.error,
        },
        Err(_) => PollOutcome::Denied {
            error: "invalid_response".to_string(),
            description: body.to_string(),
        },
    }
}

/// Shortest wait between polls, whatever the server asks for
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Drive the polling loop for a device authorization
///
/// Each attempt waits `interval` (at least one second) first. An attempt is
/// only started if its wait ends within `expires_in` of the loop start.
pub async fn poll_until_deadline<F, Fut>(
    authorization: &DeviceAuthorization,
    mut poll: F,
) -> AuthResult<String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AuthResult<PollOutcome>>,
{
    let interval = Duration::from_secs(authorization.interval).max(MIN_POLL_INTERVAL);
    let deadline = Instant::now()
        .checked_add(Duration::from_secs(authorization.expires_in))
        .ok_or_else(|| {
            AuthError::DeviceCodeRequestFailed(format!(
                "expires_in of {} seconds is out of range",
                authorization.expires_in
            ))
        })?;
    let mut attempts = 0u32;

    while Instant::now()
        .checked_add(interval)
        .is_some_and(|next| next <= deadline)
    {
        sleep(interval).await;
        attempts += 1;

        match poll().await? {
            PollOutcome::Authorized(token) => {
                info!("Device authorization completed after {} poll(s)", attempts);
                return Ok(token);
            }
            PollOutcome::Pending => debug!("Authorization pending (attempt {})", attempts),
            PollOutcome::Denied { error, description } => {
                return Err(AuthError::AuthorizationDenied { error, description });
            }
        }
    }

    Err(AuthError::AuthorizationTimedOut(authorization.expires_in))
}
