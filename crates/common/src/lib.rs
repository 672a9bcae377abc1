//! OAuth authorization-code + PKCE core shared by TradeAuth crates.
//!
//! - [`auth`]: token lifecycle manager and its collaborators
//! - [`crypto`]: authenticated encryption of the token cache
//! - [`error`]: manager-boundary error taxonomy
//! - `testing`: mock token endpoint and prompt (`test-utils` feature)

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod auth;
pub mod crypto;
pub mod error;

// Testing utilities
// ---------------------------------------------------------------
#[cfg(any(feature = "test-utils", test))]
pub mod testing;

pub use auth::{AuthManager, AuthSettings, AuthState, LoginOutcome, ProviderConfig, TokenRecord};
pub use crypto::{CryptoBox, CryptoError};
pub use error::{AuthError, AuthResult, ErrorClassification};
