//! Traits for token endpoint and user-interaction seams
//!
//! These traits enable dependency injection and testing by abstracting the
//! external collaborators of [`AuthManager`](super::AuthManager): the OAuth
//! token endpoint and the human completing the browser authorization.

use async_trait::async_trait;

use super::client::ExchangeError;
use super::types::TokenResponse;

/// Capability to call an OAuth token endpoint.
///
/// The production implementation is
/// [`HttpTokenExchanger`](super::client::HttpTokenExchanger); tests inject
/// `testing::MockTokenExchanger`.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    /// POST `form` (already including `grant_type`) to `token_url`.
    ///
    /// # Errors
    /// Returns [`ExchangeError`] on transport failure, a non-2xx status, or a
    /// payload without an access token.
    async fn exchange(
        &self,
        token_url: &str,
        form: &[(String, String)],
    ) -> Result<TokenResponse, ExchangeError>;
}

/// How the authorization URL reaches the user and how a pasted code comes
/// back.
#[async_trait]
pub trait AuthorizationPrompt: Send + Sync {
    /// Show or open the authorization URL.
    async fn present(&self, provider: &str, url: &str);

    /// Ask for a pasted authorization code or redirect URL.
    ///
    /// `None` when the prompt is non-interactive or the user gave nothing.
    async fn read_code(&self, provider: &str) -> Option<String>;
}
