//! OAuth 2.0 types and structures
//!
//! Token records as persisted in the cache, token endpoint payloads, and the
//! per-provider endpoint configuration.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::client::ExchangeError;
use super::pkce::ChallengeMethod;

/// Default `token_type` when a provider omits it.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Assumed access token lifetime when `expires_in` is missing.
pub const DEFAULT_EXPIRES_IN: i64 = 3600;

/// Longest `expires_in` accepted from a token endpoint (ten years).
pub const MAX_EXPIRES_IN: i64 = 10 * 365 * 24 * 3600;

fn default_token_type() -> String {
    DEFAULT_TOKEN_TYPE.to_string()
}

fn default_expires_in() -> i64 {
    DEFAULT_EXPIRES_IN
}

/// Cached credential for one provider.
///
/// `refresh_token` is written as `null` when absent so the on-disk document
/// keeps a stable shape.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Bearer credential presented to the API.
    pub access_token: String,

    /// Present when the server issued one.
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Usually `Bearer`.
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Absolute expiry. Accepts naive local timestamps on read.
    #[serde(with = "timestamp")]
    pub expires_at: DateTime<Utc>,

    /// Granted scope, when the server reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// When the record was first written.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "timestamp::option")]
    pub created_at: Option<DateTime<Utc>>,
}

impl TokenRecord {
    /// Build a record from a token endpoint response received at `now`.
    ///
    /// # Errors
    /// Returns [`ExchangeError::Malformed`] when `expires_in` is negative or
    /// larger than [`MAX_EXPIRES_IN`].
    pub fn from_response(response: TokenResponse, now: DateTime<Utc>) -> Result<Self, ExchangeError> {
        let expires_at = response.expires_at(now)?;
        Ok(Self {
            expires_at,
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            token_type: response.token_type,
            scope: response.scope,
            created_at: Some(now),
        })
    }

    /// Whether the access token stays valid for more than `threshold`.
    #[must_use]
    pub fn is_usable(&self, threshold: Duration) -> bool {
        self.is_usable_at(Utc::now(), threshold)
    }

    /// `is_usable` against an explicit clock.
    ///
    /// Strict: a token expiring exactly at `now + threshold` is not usable.
    #[must_use]
    pub fn is_usable_at(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        now.checked_add_signed(threshold).is_some_and(|limit| self.expires_at > limit)
    }

    /// Seconds until expiry (negative once expired).
    #[must_use]
    pub fn seconds_until_expiry(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds()
    }

    /// Apply a refresh response in place.
    ///
    /// The refresh token is only replaced when the response carries a new one.
    /// On error the record is left unchanged.
    ///
    /// # Errors
    /// Returns [`ExchangeError::Malformed`] for an out-of-range `expires_in`.
    pub fn apply_refresh(&mut self, response: TokenResponse, now: DateTime<Utc>) -> Result<(), ExchangeError> {
        self.expires_at = response.expires_at(now)?;
        self.access_token = response.access_token;
        self.token_type = response.token_type;
        if let Some(rotated) = response.refresh_token {
            self.refresh_token = Some(rotated);
        }
        if response.scope.is_some() {
            self.scope = response.scope;
        }
        Ok(())
    }
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Provider key → record, serialized as one JSON document.
pub type TokenCache = BTreeMap<String, TokenRecord>;

/// OAuth token response from authorization server
///
/// Standard OAuth 2.0 token response format (RFC 6749 section 5.1).
#[derive(Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    /// Bearer credential presented to the API.
    pub access_token: String,
    /// Present when the server issued one.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds; defaults to one hour when omitted.
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
    /// Token type from the server.
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Granted scope.
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Response carrying only an access token, with defaults elsewhere.
    #[must_use]
    pub fn bearer(access_token: impl Into<String>, expires_in: i64) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_in,
            token_type: default_token_type(),
            scope: None,
        }
    }

    /// Absolute expiry of this response when received at `now`.
    ///
    /// # Errors
    /// Returns [`ExchangeError::Malformed`] when `expires_in` is outside
    /// `0..=MAX_EXPIRES_IN`.
    pub fn expires_at(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, ExchangeError> {
        (0..=MAX_EXPIRES_IN)
            .contains(&self.expires_in)
            .then(|| Duration::try_seconds(self.expires_in))
            .flatten()
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| {
                ExchangeError::Malformed(format!("expires_in out of range: {}", self.expires_in))
            })
    }

    /// Attach a refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .finish_non_exhaustive()
    }
}

/// OAuth error response (RFC 6749 section 5.2)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OAuthErrorBody {
    /// Error code such as `invalid_grant`.
    pub error: String,
    /// Human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl fmt::Display for OAuthErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_description {
            Some(description) => write!(f, "{}: {}", self.error, description),
            None => write!(f, "{}", self.error),
        }
    }
}

/// Endpoints and client registration for one OAuth provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// OAuth client identifier.
    pub client_id: String,
    /// Sent as `client_secret` when set; public clients leave it `None`.
    pub client_secret: Option<String>,
    /// Authorization endpoint.
    pub authorize_url: String,
    /// Token endpoint.
    pub token_url: String,
    /// Redirect URI registered for this client.
    pub redirect_uri: String,
    /// Space-separated scopes; omitted from the authorize URL when empty.
    pub scope: String,
    /// Send a PKCE challenge with the authorize request.
    pub pkce: bool,
    /// Challenge method used when PKCE is on.
    pub pkce_method: ChallengeMethod,
    /// Appended to the authorize URL after the standard parameters.
    pub extra_authorize_params: BTreeMap<String, String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            authorize_url: String::new(),
            token_url: String::new(),
            redirect_uri: String::new(),
            scope: String::new(),
            pkce: true,
            pkce_method: ChallengeMethod::S256,
            extra_authorize_params: BTreeMap::new(),
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .field("redirect_uri", &self.redirect_uri)
            .field("scope", &self.scope)
            .field("pkce", &self.pkce)
            .field("pkce_method", &self.pkce_method)
            .finish_non_exhaustive()
    }
}

/// Timestamp (de)serialization tolerant of naive local ISO-8601 strings.
///
/// Written as RFC 3339 UTC. On read, RFC 3339 is tried first; a string
/// without offset is interpreted in the local timezone.
pub(crate) mod timestamp {
    use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat, TimeZone, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub(crate) fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
        let naive = raw
            .parse::<NaiveDateTime>()
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
            .ok()?;
        Local.from_local_datetime(&naive).earliest().map(|local| local.with_timezone(&Utc))
    }

    pub(crate) fn serialize<S: Serializer>(value: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("unrecognised timestamp: {raw}")))
    }

    pub(crate) mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        #[allow(clippy::ref_option)]
        pub(crate) fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => super::serialize(value, s),
                None => s.serialize_none(),
            }
        }

        pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            // Unparseable values are dropped rather than failing the record.
            let raw: Option<String> = Option::deserialize(d)?;
            Ok(raw.as_deref().and_then(super::parse))
        }
    }
}
