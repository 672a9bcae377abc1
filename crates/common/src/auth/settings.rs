//! Explicit configuration object for [`AuthManager`](super::AuthManager).
//!
//! Built once at process start (see `tradeauth-infra`'s config loader) and
//! injected; nothing in this crate reads ambient global configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use super::types::ProviderConfig;

/// Provider key used when callers do not name one.
pub const DEFAULT_PROVIDER: &str = "default";

/// Default token cache filename inside the environment directory.
pub const DEFAULT_TOKEN_CACHE_FILE: &str = "token_cache.json";

/// Default pending PKCE/state filename inside the environment directory.
pub const DEFAULT_PENDING_STATE_FILE: &str = "pkce_state.json";

/// Configured windows are clamped to this many seconds (a century).
const MAX_WINDOW_SECONDS: i64 = 100 * 365 * 24 * 3600;

/// Settings consumed by the auth manager and its stores.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Logical environment name (`dev`, `prod`, ...); selects the cache subdirectory.
    pub environment: String,
    /// Root of the per-environment cache directories.
    pub cache_root: PathBuf,
    /// Token cache file name inside the environment directory.
    pub token_cache_file: String,
    /// Pending-state file name inside the environment directory.
    pub pending_state_file: String,
    /// Configuration used for [`DEFAULT_PROVIDER`] and for any provider without an override.
    pub provider: ProviderConfig,
    /// Named provider overrides.
    pub providers: BTreeMap<String, ProviderConfig>,
    /// Encrypt the token cache at rest.
    pub encrypt_tokens: bool,
    /// Base64 AES-256 key material; `None` means an ephemeral key.
    pub encryption_key: Option<String>,
    /// Issue fixed placeholder tokens without any network call.
    pub simulate: bool,
    /// Authorization code supplied out of band.
    pub manual_code: Option<String>,
    /// File holding a pasted code or a `{code, state}` callback artifact.
    pub manual_code_file: Option<PathBuf>,
    /// Prompt on stdin for a pasted code when other channels fail.
    pub interactive: bool,
    /// Launch the system browser for the authorize URL.
    pub open_browser: bool,
    /// How long to wait for the loopback redirect.
    pub callback_timeout: Duration,
    /// Tokens expiring sooner than this are treated as unusable.
    pub refresh_threshold_seconds: i64,
    /// Pending entries older than this are discarded; zero or negative disables expiry.
    pub pending_state_ttl_seconds: i64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            environment: "dev".to_string(),
            cache_root: PathBuf::from(".cache"),
            token_cache_file: DEFAULT_TOKEN_CACHE_FILE.to_string(),
            pending_state_file: DEFAULT_PENDING_STATE_FILE.to_string(),
            provider: ProviderConfig::default(),
            providers: BTreeMap::new(),
            encrypt_tokens: true,
            encryption_key: None,
            simulate: false,
            manual_code: None,
            manual_code_file: None,
            interactive: false,
            open_browser: true,
            callback_timeout: Duration::from_secs(180),
            refresh_threshold_seconds: 300,
            pending_state_ttl_seconds: 600,
        }
    }
}

impl AuthSettings {
    /// Directory holding this environment's cache files.
    #[must_use]
    pub fn environment_dir(&self) -> PathBuf {
        self.cache_root.join(&self.environment)
    }

    /// `<cache-root>/<environment>/<token-cache-file>`
    #[must_use]
    pub fn token_cache_path(&self) -> PathBuf {
        self.environment_dir().join(&self.token_cache_file)
    }

    /// `<cache-root>/<environment>/<pending-state-file>`
    #[must_use]
    pub fn pending_state_path(&self) -> PathBuf {
        self.environment_dir().join(&self.pending_state_file)
    }

    /// Configuration for `provider`, falling back to the default provider.
    #[must_use]
    pub fn provider_config(&self, provider: &str) -> &ProviderConfig {
        self.providers.get(provider).unwrap_or(&self.provider)
    }

    /// Refresh threshold, clamped to `0..=100 years`.
    #[must_use]
    pub fn refresh_threshold(&self) -> chrono::Duration {
        clamped_seconds(self.refresh_threshold_seconds.clamp(0, MAX_WINDOW_SECONDS))
    }

    /// Pending-state TTL; zero or negative disables expiry.
    #[must_use]
    pub fn pending_state_ttl(&self) -> chrono::Duration {
        clamped_seconds(self.pending_state_ttl_seconds.clamp(-MAX_WINDOW_SECONDS, MAX_WINDOW_SECONDS))
    }
}

fn clamped_seconds(seconds: i64) -> chrono::Duration {
    chrono::Duration::try_seconds(seconds).unwrap_or_else(chrono::Duration::zero)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_scoped_by_environment() {
        let settings = AuthSettings {
            cache_root: PathBuf::from("/tmp/cache"),
            environment: "prod".into(),
            ..Default::default()
        };
        assert_eq!(settings.token_cache_path(), PathBuf::from("/tmp/cache/prod/token_cache.json"));
        assert_eq!(settings.pending_state_path(), PathBuf::from("/tmp/cache/prod/pkce_state.json"));
    }

    #[test]
    fn extreme_windows_are_clamped() {
        let settings = AuthSettings {
            refresh_threshold_seconds: i64::MAX,
            pending_state_ttl_seconds: i64::MIN,
            ..Default::default()
        };
        assert_eq!(settings.refresh_threshold(), chrono::Duration::seconds(MAX_WINDOW_SECONDS));
        assert_eq!(settings.pending_state_ttl(), chrono::Duration::seconds(-MAX_WINDOW_SECONDS));

        let negative = AuthSettings { refresh_threshold_seconds: -5, ..Default::default() };
        assert_eq!(negative.refresh_threshold(), chrono::Duration::zero());
    }

    #[test]
    fn provider_config_falls_back_to_default() {
        let mut settings = AuthSettings::default();
        settings.provider.client_id = "main".into();
        settings
            .providers
            .insert("alt".into(), ProviderConfig { client_id: "alt".into(), ..Default::default() });

        assert_eq!(settings.provider_config("alt").client_id, "alt");
        assert_eq!(settings.provider_config("default").client_id, "main");
        assert_eq!(settings.provider_config("unknown").client_id, "main");
    }
}
