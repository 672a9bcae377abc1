//! OAuth 2.0 token endpoint client
//!
//! Builds the RFC 6749 form bodies for the authorization-code and
//! refresh-token grants and posts them over `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, warn};

use super::traits::TokenExchanger;
use super::types::{OAuthErrorBody, ProviderConfig, TokenResponse};

/// Token endpoint failures.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Network, TLS or timeout failure.
    #[error("token endpoint request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx response.
    #[error("token endpoint returned {status}: {detail}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Parsed RFC 6749 error body, when the server sent one.
        error: Option<OAuthErrorBody>,
        /// Error body summary or raw response text.
        detail: String,
    },

    /// 2xx response that is not a usable token payload.
    #[error("malformed token response: {0}")]
    Malformed(String),
}

impl ExchangeError {
    /// Whether retrying the same request might succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Rejected { status, .. } => *status >= 500 || *status == 429,
            Self::Malformed(_) => false,
        }
    }

    /// OAuth error code (`invalid_grant`, ...), when the server sent one.
    #[must_use]
    pub fn oauth_error(&self) -> Option<&str> {
        match self {
            Self::Rejected { error: Some(body), .. } => Some(body.error.as_str()),
            _ => None,
        }
    }
}

fn push_client_credentials(form: &mut Vec<(String, String)>, config: &ProviderConfig) {
    form.push(("client_id".into(), config.client_id.clone()));
    if let Some(secret) = config.client_secret.as_deref().filter(|s| !s.is_empty()) {
        form.push(("client_secret".into(), secret.to_string()));
    }
}

/// Form body for `grant_type=authorization_code`.
///
/// `code_verifier` is attached only when one was stored for the request.
#[must_use]
pub fn authorization_code_form(
    config: &ProviderConfig,
    code: &str,
    code_verifier: Option<&str>,
) -> Vec<(String, String)> {
    let mut form = vec![
        ("grant_type".to_string(), "authorization_code".to_string()),
        ("code".to_string(), code.to_string()),
    ];
    push_client_credentials(&mut form, config);
    if !config.redirect_uri.is_empty() {
        form.push(("redirect_uri".into(), config.redirect_uri.clone()));
    }
    if let Some(verifier) = code_verifier {
        form.push(("code_verifier".into(), verifier.to_string()));
    }
    form
}

/// Form body for `grant_type=refresh_token`.
#[must_use]
pub fn refresh_token_form(config: &ProviderConfig, refresh_token: &str) -> Vec<(String, String)> {
    let mut form = vec![
        ("grant_type".to_string(), "refresh_token".to_string()),
        ("refresh_token".to_string(), refresh_token.to_string()),
    ];
    push_client_credentials(&mut form, config);
    form
}

/// [`TokenExchanger`] that performs a real form POST.
#[derive(Debug, Clone)]
pub struct HttpTokenExchanger {
    client: Client,
}

impl HttpTokenExchanger {
    /// Client with a 30 second request timeout.
    #[must_use]
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }

    /// Wrap a preconfigured client (proxies, custom timeouts).
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for HttpTokenExchanger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenExchanger for HttpTokenExchanger {
    async fn exchange(
        &self,
        token_url: &str,
        form: &[(String, String)],
    ) -> Result<TokenResponse, ExchangeError> {
        let grant = form.iter().find(|(k, _)| k == "grant_type").map_or("", |(_, v)| v.as_str());
        debug!(token_url = %token_url, grant_type = %grant, "posting to token endpoint");

        let response = self
            .client
            .post(token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let error = serde_json::from_str::<OAuthErrorBody>(&body).ok();
            let detail = error.as_ref().map_or_else(|| truncate(&body, 200), ToString::to_string);
            warn!(status = status.as_u16(), detail = %detail, "token endpoint rejected request");
            return Err(ExchangeError::Rejected { status: status.as_u16(), error, detail });
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| ExchangeError::Malformed(format!("invalid JSON payload: {e}")))?;
        if parsed.access_token.trim().is_empty() {
            return Err(ExchangeError::Malformed("access_token is empty".into()));
        }
        Ok(parsed)
    }
}

fn truncate(body: &str, max: usize) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
