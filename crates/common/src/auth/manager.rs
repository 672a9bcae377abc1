//! Token lifecycle orchestration.
//!
//! [`AuthManager`] drives the authorization-code flow and keeps the cached
//! credential fresh:
//!
//! ```text
//! NoToken ─login─► AwaitingCallback ─handle_callback─► Authenticated
//!                                                         │ expires
//!                                                         ▼
//!            NoToken ◄─refresh fails── Refreshing ◄──── Expired
//!                                          │ succeeds
//!                                          └──────────► Authenticated
//! ```
//!
//! Every public operation returns an [`AuthResult`]; nothing here panics or
//! terminates the host process.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::callback::{parse_callback_input, CallbackListener, CallbackOutcome, CapturedCallback};
use super::client::{authorization_code_form, refresh_token_form, HttpTokenExchanger};
use super::pending::PendingAuthStateStore;
use super::pkce::validate_state;
use super::prompt::ConsolePrompt;
use super::settings::AuthSettings;
use super::token_store::TokenStore;
use super::traits::{AuthorizationPrompt, TokenExchanger};
use super::types::{ProviderConfig, TokenRecord, TokenResponse};
use super::url_builder::{AuthorizationRequest, AuthorizationUrlBuilder};
use crate::error::{AuthError, AuthResult, ErrorClassification};

/// Access token stored in simulate mode.
pub const SIMULATED_ACCESS_TOKEN: &str = "simulated-access-token";

/// Refresh token stored in simulate mode.
pub const SIMULATED_REFRESH_TOKEN: &str = "simulated-refresh-token";

const SIMULATED_EXPIRES_IN: i64 = 3600;

/// How a successful [`AuthManager::login`] was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// A usable token was already cached.
    AlreadyAuthenticated,
    /// Simulate mode stored placeholder tokens.
    Simulated,
    /// A code was obtained and exchanged.
    Authorized,
}

/// Snapshot of a provider's position in the auth lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// Nothing cached and no authorization in flight.
    NoToken,
    /// An authorize URL was issued; its callback has not been handled.
    AwaitingCallback,
    /// A token valid beyond the refresh threshold is cached.
    Authenticated,
    /// A cached token is expired or inside the refresh threshold.
    Expired,
}

/// OAuth authorization-code + PKCE client and token lifecycle manager.
pub struct AuthManager {
    settings: AuthSettings,
    tokens: TokenStore,
    pending: PendingAuthStateStore,
    exchanger: Arc<dyn TokenExchanger>,
    prompt: Arc<dyn AuthorizationPrompt>,
    refresh_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthManager")
            .field("environment", &self.settings.environment)
            .field("tokens", &self.tokens)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl AuthManager {
    /// Manager with injected collaborators.
    #[must_use]
    pub fn new(
        settings: AuthSettings,
        exchanger: Arc<dyn TokenExchanger>,
        prompt: Arc<dyn AuthorizationPrompt>,
    ) -> Self {
        let tokens = TokenStore::from_settings(&settings);
        let pending = PendingAuthStateStore::from_settings(&settings);
        Self { settings, tokens, pending, exchanger, prompt, refresh_locks: Mutex::new(HashMap::new()) }
    }

    /// Manager using the HTTP token exchanger and the console prompt.
    #[must_use]
    pub fn with_http(settings: AuthSettings) -> Self {
        let prompt = ConsolePrompt::new(settings.open_browser, settings.interactive);
        Self::new(settings, Arc::new(HttpTokenExchanger::new()), Arc::new(prompt))
    }

    /// Settings this manager was built with.
    #[must_use]
    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    /// Store backing the token cache.
    #[must_use]
    pub fn token_store(&self) -> &TokenStore {
        &self.tokens
    }

    /// Store backing pending authorization state.
    #[must_use]
    pub fn pending_store(&self) -> &PendingAuthStateStore {
        &self.pending
    }

    /// Ensure `provider` has a usable token, running the authorization flow
    /// if needed.
    ///
    /// Channels are tried in order: cached token, simulate mode, manually
    /// supplied code, loopback capture of the browser redirect, then the
    /// manual code file and the interactive prompt.
    ///
    /// # Errors
    /// - [`AuthError::AuthorizationNotObtained`] when no channel produced a code.
    /// - [`AuthError::StateMismatch`] / [`AuthError::StateExpired`] when the
    ///   returned state fails verification.
    /// - [`AuthError::Exchange`] when the code exchange fails.
    pub async fn login(&self, provider: &str) -> AuthResult<LoginOutcome> {
        if let Some(record) = self.usable_token(provider) {
            info!(
                provider = %provider,
                expires_in_secs = record.seconds_until_expiry(),
                "cached token is valid; login not needed"
            );
            return Ok(LoginOutcome::AlreadyAuthenticated);
        }

        if self.settings.simulate {
            self.store_simulated(provider)?;
            return Ok(LoginOutcome::Simulated);
        }

        let config = self.settings.provider_config(provider).clone();

        if let Some(code) = self.settings.manual_code.as_deref().map(str::trim).filter(|c| !c.is_empty())
        {
            info!(provider = %provider, "using manually supplied authorization code");
            self.exchange_trusted(provider, &config, code).await?;
            return Ok(LoginOutcome::Authorized);
        }

        // Bound before the URL is shown so an immediate redirect is not missed.
        let listener = CallbackListener::bind(&config.redirect_uri).await;
        let request = AuthorizationUrlBuilder::new(&self.pending).build(provider, &config)?;
        self.prompt.present(provider, &request.url).await;

        if let Some(listener) = listener {
            match listener.wait(self.settings.callback_timeout).await {
                Some(CallbackOutcome::Code(captured)) => {
                    let state = captured.state.unwrap_or_default();
                    self.handle_callback(&captured.code, &state, provider).await?;
                    return Ok(LoginOutcome::Authorized);
                }
                Some(CallbackOutcome::Denied { error, description }) => {
                    warn!(provider = %provider, error = %error, description = ?description, "authorization was denied");
                    return Err(AuthError::AuthorizationDenied { provider: provider.to_string(), error });
                }
                None => info!(provider = %provider, "local capture unavailable; falling back to manual code entry"),
            }
        }

        match self.manual_input(provider).await {
            Some(CapturedCallback { code, state: Some(state) }) => {
                self.handle_callback(&code, &state, provider).await?;
            }
            Some(CapturedCallback { code, state: None }) => {
                self.exchange_trusted(provider, &config, &code).await?;
            }
            None => {
                warn!(provider = %provider, "no authorization code obtained");
                return Err(AuthError::AuthorizationNotObtained { provider: provider.to_string() });
            }
        }
        Ok(LoginOutcome::Authorized)
    }

    /// Build an authorize URL and persist its pending state without waiting
    /// for the redirect. The callback can be handled later, possibly by
    /// another process, with [`AuthManager::handle_callback`].
    ///
    /// # Errors
    /// Returns [`AuthError::Config`] or [`AuthError::Storage`].
    pub fn authorization_url(&self, provider: &str) -> AuthResult<AuthorizationRequest> {
        AuthorizationUrlBuilder::new(&self.pending).build(provider, self.settings.provider_config(provider))
    }

    /// Verify `state` against the pending state and exchange `code`.
    ///
    /// A stored state that differs from `state` is rejected before any
    /// network call. On exchange failure the pending state is kept so a
    /// fresh code for the same request can be retried.
    ///
    /// # Errors
    /// [`AuthError::StateMismatch`], [`AuthError::StateExpired`],
    /// [`AuthError::Exchange`] or [`AuthError::Storage`].
    pub async fn handle_callback(&self, code: &str, state: &str, provider: &str) -> AuthResult<()> {
        let config = self.settings.provider_config(provider).clone();

        let verifier = match self.pending.get(provider) {
            Some(pending) => {
                if !validate_state(&pending.state, state) {
                    warn!(provider = %provider, "callback state does not match pending state; rejecting (possible CSRF)");
                    return Err(AuthError::StateMismatch { provider: provider.to_string() });
                }
                if pending.is_expired_at(Utc::now(), self.settings.pending_state_ttl()) {
                    warn!(provider = %provider, "pending authorization state has expired");
                    return Err(AuthError::StateExpired { provider: provider.to_string() });
                }
                pending.code_verifier
            }
            None => {
                warn!(provider = %provider, "no pending state stored; exchanging without state verification or PKCE verifier");
                None
            }
        };

        self.exchange_code(provider, &config, code, verifier.as_deref()).await
    }

    /// Refresh the cached access token for `provider`.
    ///
    /// Concurrent refreshes of one provider within this process are
    /// serialized. The refresh token is replaced only when the endpoint
    /// returns a new one.
    ///
    /// # Errors
    /// - [`AuthError::AuthRequired`] when nothing is cached.
    /// - [`AuthError::NoRefreshToken`] when the record has no refresh token.
    /// - [`AuthError::RefreshFailed`] when the exchange fails; the cached
    ///   record is left untouched.
    pub async fn refresh(&self, provider: &str) -> AuthResult<TokenRecord> {
        let lock = self.refresh_lock(provider);
        let _guard = lock.lock().await;
        self.refresh_locked(provider).await
    }

    /// Usable access token for `provider`, refreshing when necessary.
    ///
    /// # Errors
    /// [`AuthError::AuthRequired`] when no token can be produced without the
    /// user. A refresh that failed for a transient reason (network, 5xx) is
    /// returned as [`AuthError::RefreshFailed`] so the caller can retry.
    pub async fn get_access_token(&self, provider: &str) -> AuthResult<String> {
        if let Some(record) = self.usable_token(provider) {
            return Ok(record.access_token);
        }

        let lock = self.refresh_lock(provider);
        let _guard = lock.lock().await;

        // Another caller may have refreshed while this one waited.
        if let Some(record) = self.usable_token(provider) {
            debug!(provider = %provider, "token refreshed by a concurrent caller");
            return Ok(record.access_token);
        }

        match self.refresh_locked(provider).await {
            Ok(record) if record.is_usable(Duration::zero()) => Ok(record.access_token),
            Ok(_) => {
                warn!(provider = %provider, "refreshed token is already expired");
                Err(AuthError::auth_required(provider))
            }
            Err(err) if err.is_retryable() => Err(err),
            Err(err) => {
                info!(provider = %provider, reason = %err, "no usable token; login required");
                Err(AuthError::auth_required(provider))
            }
        }
    }

    /// Current lifecycle state for `provider`.
    #[must_use]
    pub fn status(&self, provider: &str) -> AuthState {
        match self.tokens.get(provider) {
            Some(record) if record.is_usable(self.settings.refresh_threshold()) => AuthState::Authenticated,
            Some(_) => AuthState::Expired,
            None if self.pending.get(provider).is_some() => AuthState::AwaitingCallback,
            None => AuthState::NoToken,
        }
    }

    /// Forget the cached token and any pending authorization for `provider`.
    ///
    /// Returns whether a token was removed.
    ///
    /// # Errors
    /// Returns [`AuthError::Storage`] if either file cannot be rewritten.
    pub fn logout(&self, provider: &str) -> AuthResult<bool> {
        let removed = self.tokens.remove(provider)?;
        self.pending.clear(provider)?;
        info!(provider = %provider, removed, "logged out");
        Ok(removed)
    }

    fn usable_token(&self, provider: &str) -> Option<TokenRecord> {
        self.tokens.get(provider).filter(|record| record.is_usable(self.settings.refresh_threshold()))
    }

    fn refresh_lock(&self, provider: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.refresh_locks.lock().entry(provider.to_string()).or_default().clone()
    }

    async fn refresh_locked(&self, provider: &str) -> AuthResult<TokenRecord> {
        let Some(mut record) = self.tokens.get(provider) else {
            return Err(AuthError::auth_required(provider));
        };
        let Some(refresh_token) = record.refresh_token.clone() else {
            warn!(provider = %provider, "cannot refresh: no refresh token cached");
            return Err(AuthError::NoRefreshToken { provider: provider.to_string() });
        };

        let response = if self.settings.simulate {
            simulated_response()
        } else {
            let config = self.settings.provider_config(provider);
            let form = refresh_token_form(config, &refresh_token);
            self.exchanger.exchange(&config.token_url, &form).await.map_err(|source| {
                warn!(provider = %provider, error = %source, "token refresh failed; cached record left unchanged");
                AuthError::RefreshFailed { provider: provider.to_string(), source }
            })?
        };

        let rotated = response.refresh_token.is_some();
        record.apply_refresh(response, Utc::now()).map_err(|source| {
            warn!(provider = %provider, error = %source, "refresh response rejected; cached record left unchanged");
            AuthError::RefreshFailed { provider: provider.to_string(), source }
        })?;
        self.tokens.upsert(provider, record.clone())?;
        info!(
            provider = %provider,
            rotated,
            expires_in_secs = record.seconds_until_expiry(),
            "access token refreshed"
        );
        Ok(record)
    }

    /// Code from an out-of-band channel: no state to verify, but the pending
    /// verifier (if any) still belongs to the request the user authorized.
    async fn exchange_trusted(&self, provider: &str, config: &ProviderConfig, code: &str) -> AuthResult<()> {
        let verifier = self.pending.get(provider).and_then(|pending| pending.code_verifier);
        self.exchange_code(provider, config, code, verifier.as_deref()).await
    }

    async fn exchange_code(
        &self,
        provider: &str,
        config: &ProviderConfig,
        code: &str,
        verifier: Option<&str>,
    ) -> AuthResult<()> {
        if config.token_url.trim().is_empty() {
            return Err(AuthError::Config(format!("provider {provider}: token_url is not configured")));
        }

        let form = authorization_code_form(config, code, verifier);
        let response = self.exchanger.exchange(&config.token_url, &form).await.map_err(|err| {
            warn!(provider = %provider, error = %err, "authorization code exchange failed; pending state kept");
            AuthError::Exchange(err)
        })?;

        let record = TokenRecord::from_response(response, Utc::now()).map_err(|err| {
            warn!(provider = %provider, error = %err, "token response rejected; pending state kept");
            AuthError::Exchange(err)
        })?;
        let expires_in = record.seconds_until_expiry();
        self.tokens.upsert(provider, record)?;
        if let Err(err) = self.pending.clear(provider) {
            warn!(provider = %provider, error = %err, "tokens stored but pending state could not be cleared");
        }
        info!(provider = %provider, expires_in_secs = expires_in, pkce = verifier.is_some(), "authorization complete; tokens stored");
        Ok(())
    }

    fn store_simulated(&self, provider: &str) -> AuthResult<()> {
        let record = TokenRecord::from_response(simulated_response(), Utc::now())?;
        self.tokens.upsert(provider, record)?;
        info!(provider = %provider, "simulate mode: stored placeholder tokens");
        Ok(())
    }

    async fn manual_input(&self, provider: &str) -> Option<CapturedCallback> {
        if let Some(path) = &self.settings.manual_code_file {
            match std::fs::read_to_string(path) {
                Ok(contents) => {
                    if let Err(err) = std::fs::remove_file(path) {
                        warn!(path = %path.display(), error = %err, "could not remove consumed code file");
                    }
                    if let Some(captured) = parse_callback_input(&contents) {
                        info!(provider = %provider, path = %path.display(), "read authorization code from file");
                        return Some(captured);
                    }
                    warn!(path = %path.display(), "code file did not contain an authorization code");
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "no manual code file present");
                }
                Err(err) => warn!(path = %path.display(), error = %err, "failed to read manual code file"),
            }
        }

        let input = self.prompt.read_code(provider).await?;
        parse_callback_input(&input)
    }
}

fn simulated_response() -> TokenResponse {
    TokenResponse::bearer(SIMULATED_ACCESS_TOKEN, SIMULATED_EXPIRES_IN)
        .with_refresh_token(SIMULATED_REFRESH_TOKEN)
}
