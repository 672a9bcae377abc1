//! Error types at the auth manager boundary.
//!
//! Each seam has its own `thiserror` enum ([`CryptoError`], [`StoreError`],
//! [`ExchangeError`]); [`AuthError`] composes them into the taxonomy callers
//! branch on. [`ErrorClassification`] gives callers a uniform way to decide
//! between retrying, re-running login, or surfacing the failure.
//!
//! [`CryptoError`]: crate::crypto::CryptoError

use thiserror::Error;

use crate::auth::client::ExchangeError;
use crate::auth::token_store::StoreError;

/// Result alias for auth manager operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Failures returned by [`AuthManager`](crate::auth::AuthManager).
///
/// None of these are fatal to the host process.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No usable token and no way to refresh one; run `login`.
    #[error("authentication required for provider {provider}")]
    AuthRequired {
        /// Provider key.
        provider: String,
    },

    /// Refresh requested but the cached record has no refresh token.
    #[error("no refresh token cached for provider {provider}")]
    NoRefreshToken {
        /// Provider key.
        provider: String,
    },

    /// The token endpoint rejected or failed the refresh; the cached record
    /// is unchanged.
    #[error("token refresh failed for provider {provider}: {source}")]
    RefreshFailed {
        /// Provider key.
        provider: String,
        /// Underlying exchange failure.
        #[source]
        source: ExchangeError,
    },

    /// Callback `state` does not match the pending state (CSRF rejection).
    #[error("OAuth state mismatch for provider {provider}; callback rejected")]
    StateMismatch {
        /// Provider key.
        provider: String,
    },

    /// Pending state is older than its TTL.
    #[error("pending authorization for provider {provider} has expired; start login again")]
    StateExpired {
        /// Provider key.
        provider: String,
    },

    /// The provider redirected with an OAuth error (e.g. consent denied).
    #[error("authorization denied for provider {provider}: {error}")]
    AuthorizationDenied {
        /// Provider key.
        provider: String,
        /// OAuth `error` value.
        error: String,
    },

    /// Login finished every channel without obtaining a code.
    #[error("no authorization code obtained for provider {provider}")]
    AuthorizationNotObtained {
        /// Provider key.
        provider: String,
    },

    /// Authorization-code exchange failed; pending state is kept for retry.
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// Token cache or pending-state write failed.
    #[error(transparent)]
    Storage(#[from] StoreError),

    /// Provider configuration is incomplete or invalid.
    #[error("auth configuration error: {0}")]
    Config(String),
}

/// Standard classification of errors.
pub trait ErrorClassification {
    /// Whether the same call may succeed if retried.
    fn is_retryable(&self) -> bool;

    /// Whether the caller should run the interactive login flow.
    fn requires_login(&self) -> bool;
}

impl ErrorClassification for AuthError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::RefreshFailed { source, .. } => source.is_retryable(),
            Self::Exchange(source) => source.is_retryable(),
            Self::Storage(StoreError::Io { .. }) => true,
            _ => false,
        }
    }

    fn requires_login(&self) -> bool {
        match self {
            Self::AuthRequired { .. }
            | Self::NoRefreshToken { .. }
            | Self::StateMismatch { .. }
            | Self::StateExpired { .. } => true,
            Self::RefreshFailed { source, .. } => source.oauth_error() == Some("invalid_grant"),
            _ => false,
        }
    }
}

impl AuthError {
    pub(crate) fn auth_required(provider: &str) -> Self {
        Self::AuthRequired { provider: provider.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::types::OAuthErrorBody;

    fn rejected(status: u16, error: &str) -> ExchangeError {
        ExchangeError::Rejected {
            status,
            error: Some(OAuthErrorBody { error: error.into(), error_description: None }),
            detail: error.into(),
        }
    }

    #[test]
    fn classification() {
        assert!(AuthError::auth_required("default").requires_login());
        assert!(!AuthError::auth_required("default").is_retryable());

        let revoked = AuthError::RefreshFailed {
            provider: "default".into(),
            source: rejected(400, "invalid_grant"),
        };
        assert!(revoked.requires_login());
        assert!(!revoked.is_retryable());

        let outage = AuthError::RefreshFailed {
            provider: "default".into(),
            source: rejected(503, "temporarily_unavailable"),
        };
        assert!(!outage.requires_login());
        assert!(outage.is_retryable());

        assert!(AuthError::StateMismatch { provider: "p".into() }.requires_login());
        assert!(!AuthError::Config("x".into()).requires_login());
    }

    #[test]
    fn display_names_provider() {
        let err = AuthError::StateMismatch { provider: "broker".into() };
        assert!(err.to_string().contains("broker"));
    }
}
