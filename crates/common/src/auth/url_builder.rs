//! Authorization endpoint URL construction.

use tracing::{debug, info};
use url::Url;

use super::pending::PendingAuthStateStore;
use super::pkce::{generate_state, PkcePair};
use super::types::ProviderConfig;
use crate::error::AuthError;

/// A built authorization request.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// URL to open in the user's browser.
    pub url: String,
    /// CSRF state round-tripped through the redirect.
    pub state: String,
    /// PKCE verifier, when PKCE is enabled.
    pub code_verifier: Option<String>,
}

/// Builds authorize URLs and records their pending state.
#[derive(Debug, Clone, Copy)]
pub struct AuthorizationUrlBuilder<'a> {
    pending: &'a PendingAuthStateStore,
}

impl<'a> AuthorizationUrlBuilder<'a> {
    /// Builder recording state into `pending`.
    #[must_use]
    pub fn new(pending: &'a PendingAuthStateStore) -> Self {
        Self { pending }
    }

    /// Build the authorize URL for `provider`.
    ///
    /// The generated state (and verifier) is persisted before the URL is
    /// returned, so a URL is never handed out without its pending state.
    ///
    /// # Errors
    /// - [`AuthError::Config`] if the authorize URL or client id is missing
    ///   or invalid.
    /// - [`AuthError::Storage`] if the pending state cannot be written.
    pub fn build(
        &self,
        provider: &str,
        config: &ProviderConfig,
    ) -> Result<AuthorizationRequest, AuthError> {
        if config.client_id.trim().is_empty() {
            return Err(AuthError::Config(format!("provider {provider}: client_id is not configured")));
        }
        let mut url = Url::parse(&config.authorize_url).map_err(|e| {
            AuthError::Config(format!(
                "provider {provider}: invalid authorize URL {:?}: {e}",
                config.authorize_url
            ))
        })?;

        let state = generate_state();
        let pkce = config.pkce.then(|| PkcePair::generate(config.pkce_method));

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &config.client_id)
                .append_pair("response_type", "code")
                .append_pair("redirect_uri", &config.redirect_uri);
            if !config.scope.trim().is_empty() {
                query.append_pair("scope", config.scope.trim());
            }
            query.append_pair("state", &state);
            if let Some(pair) = &pkce {
                query
                    .append_pair("code_challenge", &pair.challenge)
                    .append_pair("code_challenge_method", pair.method.as_str());
            }
            for (key, value) in &config.extra_authorize_params {
                query.append_pair(key, value);
            }
        }

        let code_verifier = pkce.map(|pair| pair.verifier);
        self.pending.store(provider, &state, code_verifier.as_deref())?;

        info!(provider = %provider, pkce = config.pkce, "built authorization URL");
        debug!(provider = %provider, url = %url, "authorization URL");
        Ok(AuthorizationRequest { url: url.into(), state, code_verifier })
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for auth::url_builder.
    use std::collections::HashMap;

    use tempfile::TempDir;

    use super::*;
    use crate::auth::pkce::{code_challenge, ChallengeMethod};

    fn config() -> ProviderConfig {
        ProviderConfig {
            client_id: "client-123".into(),
            authorize_url: "https://auth.example.com/oauth/authorize".into(),
            token_url: "https://auth.example.com/oauth/token".into(),
            redirect_uri: "http://127.0.0.1:8765/callback".into(),
            scope: "read trade".into(),
            ..Default::default()
        }
    }

    fn params(url: &str) -> HashMap<String, String> {
        Url::parse(url).expect("url").query_pairs().into_owned().collect()
    }

    /// Validates the query parameters of a PKCE authorize URL.
    ///
    /// Assertions:
    /// - Standard OAuth parameters are present and encoded.
    /// - The challenge matches the stored verifier.
    /// - Pending state is stored before the URL is returned.
    #[test]
    fn build_with_pkce_stores_pending_state() {
        let dir = TempDir::new().expect("tempdir");
        let pending = PendingAuthStateStore::new(dir.path().join("pkce_state.json"));
        let request = AuthorizationUrlBuilder::new(&pending).build("default", &config()).expect("build");

        assert!(request.url.starts_with("https://auth.example.com/oauth/authorize?"));
        let query = params(&request.url);
        assert_eq!(query["client_id"], "client-123");
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["redirect_uri"], "http://127.0.0.1:8765/callback");
        assert_eq!(query["scope"], "read trade");
        assert_eq!(query["state"], request.state);
        assert_eq!(query["code_challenge_method"], "S256");

        let verifier = request.code_verifier.clone().expect("verifier");
        assert_eq!(query["code_challenge"], code_challenge(&verifier, ChallengeMethod::S256));

        let stored = pending.get("default").expect("pending state");
        assert_eq!(stored.state, request.state);
        assert_eq!(stored.code_verifier.as_deref(), Some(verifier.as_str()));
    }

    #[test]
    fn build_without_pkce_omits_challenge() {
        let dir = TempDir::new().expect("tempdir");
        let pending = PendingAuthStateStore::new(dir.path().join("pkce_state.json"));
        let mut cfg = config();
        cfg.pkce = false;
        cfg.scope = String::new();
        cfg.extra_authorize_params.insert("prompt".into(), "consent".into());

        let request = AuthorizationUrlBuilder::new(&pending).build("default", &cfg).expect("build");
        let query = params(&request.url);
        assert!(!query.contains_key("code_challenge"));
        assert!(!query.contains_key("scope"));
        assert_eq!(query["prompt"], "consent");
        assert!(request.code_verifier.is_none());
        assert!(pending.get("default").expect("pending").code_verifier.is_none());
    }

    #[test]
    fn build_preserves_existing_query_and_rejects_bad_config() {
        let dir = TempDir::new().expect("tempdir");
        let pending = PendingAuthStateStore::new(dir.path().join("pkce_state.json"));
        let mut cfg = config();
        cfg.authorize_url = "https://auth.example.com/authorize?tenant=acme".into();
        let request = AuthorizationUrlBuilder::new(&pending).build("default", &cfg).expect("build");
        assert_eq!(params(&request.url)["tenant"], "acme");

        cfg.authorize_url = "not a url".into();
        assert!(matches!(
            AuthorizationUrlBuilder::new(&pending).build("alt", &cfg),
            Err(AuthError::Config(_))
        ));
        assert!(pending.get("alt").is_none());
    }
}
