//! OAuth2 authorization code flow
//!
//! Builds the consent URL, waits for the browser redirect on a local
//! listener and exchanges the authorization code at the token endpoint.

use crate::callback::CallbackListener;
use crate::{AuthError, AuthResult};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

/// OAuth2 client configuration shared by both flows
#[derive(Debug, Clone)]
pub struct OAuth2Config {
    /// OAuth2 client ID
    pub client_id: String,
    /// OAuth2 client secret, sent only when present
    pub client_secret: Option<String>,
    /// Token endpoint URL
    pub token_url: Url,
    /// Requested scopes, single-space separated
    pub scope: String,
}

impl OAuth2Config {
    /// Create a configuration for a public client
    pub fn new(client_id: impl Into<String>, token_url: Url, scope: &str) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            token_url,
            scope: normalize_scope(scope),
        }
    }

    /// Set the client secret. A blank secret leaves the client public.
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        self.client_secret = if secret.trim().is_empty() {
            None
        } else {
            Some(secret)
        };
        self
    }
}

/// Normalize a scope string: `+` counts as a separator and whitespace runs
/// collapse to a single space
pub fn normalize_scope(scope: &str) -> String {
    scope
        .replace('+', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Try to open a URL in the default browser
///
/// Returns false when no browser could be launched; callers still print the URL.
pub fn open_in_browser(url: &Url) -> bool {
    match opener::open_browser(url.as_str()) {
        Ok(()) => true,
        Err(e) => {
            warn!("Could not open browser: {}", e);
            false
        }
    }
}

/// Successful response from the token endpoint
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    pub(crate) fn parse(body: &str) -> Result<Self, serde_json::Error> {
        let response: Self = serde_json::from_str(body)?;
        debug!(
            "Token response: type={:?}, expires_in={:?}, scope={:?}",
            response.token_type, response.expires_in, response.scope
        );
        Ok(response)
    }
}

/// Error response from the token endpoint
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: String,
}

/// Manages an OAuth2 authorization code flow
pub struct AuthorizationCodeFlow {
    config: OAuth2Config,
    auth_url: Url,
    redirect_uri: String,
    http: Client,
}

impl AuthorizationCodeFlow {
    /// Create a new authorization code flow
    ///
    /// The redirect URI is kept verbatim: it must match the app registration
    /// byte for byte, both in the consent URL and in the code exchange.
    pub fn new(config: OAuth2Config, auth_url: Url, redirect_uri: impl Into<String>) -> Self {
        Self {
            config,
            auth_url,
            redirect_uri: redirect_uri.into(),
            http: Client::new(),
        }
    }

    /// The redirect URI registered for this client
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Build the authorization URL the user must visit
    pub fn authorization_url(&self) -> Url {
        let mut url = self.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.config.scope)
            .append_pair("access_type", "offline");
        url
    }

    /// Bind the local listener for the redirect URI
    pub async fn listen(&self) -> AuthResult<CallbackListener> {
        CallbackListener::bind(&self.redirect_uri).await
    }

    /// Run the browser part of the flow and return the authorization code
    ///
    /// The listener is bound before the URL is shown, so a fast redirect
    /// cannot arrive before anyone is listening. `present` receives the URL
    /// and whether a browser was launched for it.
    pub async fn authorization_code<F>(&self, launch_browser: bool, present: F) -> AuthResult<String>
    where
        F: FnOnce(&Url, bool),
    {
        let listener = self.listen().await?;
        let url = self.authorization_url();

        let opened = launch_browser && open_in_browser(&url);
        present(&url, opened);

        listener.wait().await
    }

    /// Exchange an authorization code for an access token
    pub async fn exchange_code(&self, code: &str) -> AuthResult<String> {
        let token_url = &self.config.token_url;
        info!("Exchanging authorization code at {}", token_url);

        let mut params = vec![("client_id", self.config.client_id.as_str())];
        if let Some(secret) = self.config.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }
        params.push(("code", code));
        params.push(("grant_type", "authorization_code"));
        params.push(("redirect_uri", self.redirect_uri.as_str()));

        let response = self
            .http
            .post(token_url.clone())
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::TokenExchangeFailed(format!("{}: {}", token_url, e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::TokenExchangeFailed(format!("{}: {}", token_url, e)))?;

        if !status.is_success() {
            return Err(AuthError::TokenExchangeFailed(format!(
                "{} returned {}: {}",
                token_url, status, body
            )));
        }

        let token = TokenResponse::parse(&body).map_err(|e| {
            AuthError::TokenExchangeFailed(format!("malformed token response ({}): {}", e, body))
        })?;

        info!("Access token obtained");
        Ok(token.access_token)
    }
}
