//! OAuth 2.0 authorization-code + PKCE client
//!
//! Turns a one-time user authorization into a durable, encrypted,
//! auto-refreshing credential.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   AuthManager   │  login / handle_callback / refresh / get_access_token
//! └────────┬────────┘
//!          │
//!          ├──► AuthorizationUrlBuilder ──► PendingAuthStateStore (pkce_state.json)
//!          │            └──► pkce (verifier, challenge, state)
//!          ├──► CallbackListener        (loopback redirect capture)
//!          ├──► AuthorizationPrompt     (browser / console / pasted code)
//!          ├──► TokenExchanger          (token endpoint; HTTP or mock)
//!          └──► TokenStore              (token_cache.json, CryptoBox at rest)
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use tradeauth_common::auth::{AuthManager, AuthSettings};
//!
//! # async fn example(settings: AuthSettings) -> Result<(), tradeauth_common::AuthError> {
//! let manager = AuthManager::with_http(settings);
//! manager.login("default").await?;
//! let token = manager.get_access_token("default").await?;
//! # let _ = token;
//! # Ok(())
//! # }
//! ```
//!
//! # Security Features
//!
//! - **PKCE**: S256 challenges bind the code exchange to this client
//! - **State Validation**: constant-time comparison against the persisted state
//! - **At-rest encryption**: AES-256-GCM token cache with fail-closed reads
//! - **Redacted Debug**: token values never appear in logs

pub mod callback;
pub mod client;
pub mod manager;
pub mod pending;
pub mod pkce;
pub mod prompt;
pub mod settings;
pub mod token_store;
pub mod traits;
pub mod types;
pub mod url_builder;

pub use callback::{
    is_loopback_redirect, parse_callback_input, try_local_capture, CallbackListener,
    CallbackOutcome, CapturedCallback,
};
pub use client::{authorization_code_form, refresh_token_form, ExchangeError, HttpTokenExchanger};
pub use manager::{AuthManager, AuthState, LoginOutcome};
pub use pending::{PendingAuth, PendingAuthStateStore};
pub use pkce::{
    code_challenge, generate_code_verifier, generate_state, validate_state, ChallengeMethod,
    PkcePair,
};
pub use prompt::ConsolePrompt;
pub use settings::{AuthSettings, DEFAULT_PROVIDER};
pub use token_store::{StoreError, TokenStore};
pub use traits::{AuthorizationPrompt, TokenExchanger};
pub use types::{OAuthErrorBody, ProviderConfig, TokenCache, TokenRecord, TokenResponse};
pub use url_builder::{AuthorizationRequest, AuthorizationUrlBuilder};
