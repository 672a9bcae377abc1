//! Configuration loader
//!
//! Builds the [`AuthSettings`] injected into `AuthManager`, plus logging and
//! the registered-redirect allowlist.
//!
//! ## Loading Strategy
//! 1. Load `.env` into the process environment (`dotenvy`, missing is fine)
//! 2. Parse the first config file found (TOML or JSON, by extension)
//! 3. Apply environment variable overrides
//! 4. Check every configured redirect URI; findings are logged, not fatal
//!
//! ## Environment Variables
//! - `TRADEAUTH_ENV`: Environment name (selects `[env.<name>]` and the cache subdirectory)
//! - `TRADEAUTH_CACHE_ROOT`: Root directory for token and pending-state files
//! - `TRADEAUTH_LOG_LEVEL`: Log filter directive
//! - `TOKEN_ENC_KEY`: Base64 AES-256 key for the token cache
//! - `AUTH_SIMULATE`: Issue placeholder tokens without network calls (true/false)
//! - `AUTH_CODE`: Authorization code supplied out of band
//! - `AUTH_CODE_FILE`: File holding a pasted code or a `{code, state}` artifact
//! - `OAUTH_AUTH_URL`, `OAUTH_TOKEN_URL`: Provider endpoints
//! - `CLIENT_ID`, `CLIENT_SECRET`: Client registration
//! - `OAUTH_REDIRECT_URI`: Redirect URI (wins over the file)
//! - `OAUTH_SCOPE`: Space-separated scopes
//! - `OAUTH_PKCE`: Enable PKCE (true/false)
//! - `OAUTH_PKCE_METHOD`: `S256` or `plain`
//!
//! ## Redirect URI Resolution
//! `OAUTH_REDIRECT_URI`, then `[env.<name>] redirect_uri`, then
//! `[auth] redirect_uri`.
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./tradeauth.toml`, `./config.toml`, `./tradeauth.json`
//! 2. The same names in `../` and `../../`
//! 3. Next to the executable

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tradeauth_common::auth::{AuthSettings, ChallengeMethod, ProviderConfig, DEFAULT_PROVIDER};

use super::validator::{RedirectValidator, RegisteredRedirectValidator};
use crate::observability::LoggingConfig;

/// File names probed in each candidate directory.
const CONFIG_FILE_NAMES: [&str; 3] = ["tradeauth.toml", "config.toml", "tradeauth.json"];

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No file at the given or searched location.
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The file exists but could not be read.
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`FileConfig`].
    #[error("invalid TOML in {}: {source}", path.display())]
    Toml {
        /// File being parsed.
        path: PathBuf,
        /// Parser error.
        #[source]
        source: toml::de::Error,
    },

    /// The file is not valid JSON for [`FileConfig`].
    #[error("invalid JSON in {}: {source}", path.display())]
    Json {
        /// File being parsed.
        path: PathBuf,
        /// Parser error.
        #[source]
        source: serde_json::Error,
    },

    /// Extension is neither `.toml` nor `.json`.
    #[error("unsupported config file format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    /// An environment variable held a value that does not parse.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
    },
}

/// Fully resolved application configuration.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// Manager settings with every layer applied.
    pub auth: AuthSettings,
    /// Redirect URIs registered with the authorization server.
    pub registered_uris: Vec<String>,
    /// Logging setup.
    pub logging: LoggingConfig,
    /// File the configuration was read from, if any.
    pub source: Option<PathBuf>,
}

/// On-disk layout of `tradeauth.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// The `[auth]` table.
    pub auth: AuthSection,
    /// Named providers; unset fields inherit from `[auth]`.
    pub auth_providers: BTreeMap<String, ProviderOverride>,
    /// Per-environment overrides keyed by environment name.
    pub env: BTreeMap<String, EnvSection>,
    /// The `[logging]` table.
    pub logging: LoggingConfig,
}

/// `[auth]`: manager settings plus the default provider.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    /// Selects the cache subdirectory and the `[env.<name>]` section.
    pub environment: Option<String>,
    /// Root of the per-environment cache directories.
    pub cache_root: Option<PathBuf>,
    /// Overrides `AuthSettings::token_cache_file`.
    pub token_cache_file: Option<String>,
    /// Overrides `AuthSettings::pending_state_file`.
    pub pending_state_file: Option<String>,
    /// Overrides `AuthSettings::encrypt_tokens`.
    pub encrypt_tokens: Option<bool>,
    /// Base64 AES-256 key.
    pub encryption_key: Option<String>,
    /// Overrides `AuthSettings::simulate`.
    pub simulate: Option<bool>,
    /// File holding a pasted code or callback artifact.
    pub manual_code_file: Option<PathBuf>,
    /// Overrides `AuthSettings::interactive`.
    pub interactive: Option<bool>,
    /// Overrides `AuthSettings::open_browser`.
    pub open_browser: Option<bool>,
    /// Overrides `AuthSettings::callback_timeout`, in seconds.
    pub callback_timeout_seconds: Option<u64>,
    /// Overrides `AuthSettings::refresh_threshold_seconds`.
    pub refresh_threshold_seconds: Option<i64>,
    /// Overrides `AuthSettings::pending_state_ttl_seconds`.
    pub pending_state_ttl_seconds: Option<i64>,
    /// Redirect URIs registered with the authorization server.
    pub registered_uris: Vec<String>,
    /// Fields of the default provider.
    #[serde(flatten)]
    pub provider: ProviderOverride,
}

/// Provider fields as they appear in the file; `None` means "inherit".
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderOverride {
    /// Overrides `ProviderConfig::client_id`.
    pub client_id: Option<String>,
    /// Overrides `ProviderConfig::client_secret`.
    pub client_secret: Option<String>,
    /// Overrides `ProviderConfig::authorize_url`.
    pub authorize_url: Option<String>,
    /// Overrides `ProviderConfig::token_url`.
    pub token_url: Option<String>,
    /// Overrides `ProviderConfig::redirect_uri`.
    pub redirect_uri: Option<String>,
    /// Overrides `ProviderConfig::scope`.
    pub scope: Option<String>,
    /// Overrides `ProviderConfig::pkce`.
    pub pkce: Option<bool>,
    /// Overrides `ProviderConfig::pkce_method`.
    pub pkce_method: Option<ChallengeMethod>,
    /// Replaces the inherited map as a whole.
    pub extra_authorize_params: Option<BTreeMap<String, String>>,
}

impl ProviderOverride {
    /// `base` with every field set here replacing the inherited value.
    #[must_use]
    pub fn apply_to(&self, base: &ProviderConfig) -> ProviderConfig {
        let mut config = base.clone();
        if let Some(v) = &self.client_id {
            config.client_id.clone_from(v);
        }
        if let Some(v) = &self.client_secret {
            config.client_secret = Some(v.clone());
        }
        if let Some(v) = &self.authorize_url {
            config.authorize_url.clone_from(v);
        }
        if let Some(v) = &self.token_url {
            config.token_url.clone_from(v);
        }
        if let Some(v) = &self.redirect_uri {
            config.redirect_uri.clone_from(v);
        }
        if let Some(v) = &self.scope {
            config.scope.clone_from(v);
        }
        if let Some(v) = self.pkce {
            config.pkce = v;
        }
        if let Some(v) = self.pkce_method {
            config.pkce_method = v;
        }
        if let Some(v) = &self.extra_authorize_params {
            config.extra_authorize_params.clone_from(v);
        }
        config
    }
}

/// `[env.<name>]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EnvSection {
    /// Redirect URI for this environment.
    pub redirect_uri: Option<String>,
    /// Cache root for this environment.
    pub cache_root: Option<PathBuf>,
}

/// Load configuration from `.env`, the first config file found, and the
/// process environment.
///
/// A missing config file is not an error; defaults plus environment apply.
///
/// # Errors
/// Returns [`ConfigError`] if the file found cannot be read or parsed, or an
/// environment variable holds an invalid value.
pub fn load() -> Result<AppConfig, ConfigError> {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env file"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "Ignoring unreadable .env file"),
    }

    match probe_config_paths() {
        Some(path) => load_from_file(Some(path)),
        None => {
            tracing::info!("No config file found, using defaults and environment");
            resolve(FileConfig::default(), None, &process_env)
        }
    }
}

/// Load configuration from a file, then apply environment overrides.
///
/// If `path` is `None`, probes for a file with [`probe_config_paths`].
///
/// # Errors
/// Returns [`ConfigError::NotFound`] if no file exists, or a read/parse
/// error for the file found.
pub fn load_from_file(path: Option<PathBuf>) -> Result<AppConfig, ConfigError> {
    let path = match path {
        Some(p) => p,
        None => probe_config_paths().ok_or_else(|| ConfigError::NotFound(PathBuf::from(".")))?,
    };
    if !path.exists() {
        return Err(ConfigError::NotFound(path));
    }

    tracing::info!(path = %path.display(), "Loading configuration from file");
    let contents = std::fs::read_to_string(&path)
        .map_err(|source| ConfigError::Io { path: path.clone(), source })?;
    let file = parse_config(&contents, &path)?;
    resolve(file, Some(path), &process_env)
}

/// Parse config file contents, choosing the format by extension.
///
/// # Errors
/// Returns a parse error, or [`ConfigError::UnsupportedFormat`] for an
/// extension other than `.toml` or `.json`.
pub fn parse_config(contents: &str, path: &Path) -> Result<FileConfig, ConfigError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(contents)
            .map_err(|source| ConfigError::Toml { path: path.to_path_buf(), source }),
        Some("json") => serde_json::from_str(contents)
            .map_err(|source| ConfigError::Json { path: path.to_path_buf(), source }),
        _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// Merge a parsed file with environment overrides read through `env`.
///
/// `env` stands in for `std::env::var`; blank values count as unset.
///
/// # Errors
/// Returns [`ConfigError::InvalidValue`] for an unparseable boolean or PKCE
/// method.
pub fn resolve(
    file: FileConfig,
    source: Option<PathBuf>,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<AppConfig, ConfigError> {
    let lookup = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    let FileConfig { auth: section, auth_providers, env: env_sections, mut logging } = file;

    let mut settings = AuthSettings::default();
    if let Some(environment) = lookup("TRADEAUTH_ENV").or(section.environment) {
        settings.environment = environment;
    }
    let env_section = env_sections.get(&settings.environment).cloned().unwrap_or_default();

    if let Some(root) = lookup("TRADEAUTH_CACHE_ROOT")
        .map(PathBuf::from)
        .or(env_section.cache_root)
        .or(section.cache_root)
    {
        settings.cache_root = root;
    }
    if let Some(v) = section.token_cache_file {
        settings.token_cache_file = v;
    }
    if let Some(v) = section.pending_state_file {
        settings.pending_state_file = v;
    }
    if let Some(v) = section.encrypt_tokens {
        settings.encrypt_tokens = v;
    }
    settings.encryption_key = lookup("TOKEN_ENC_KEY").or(section.encryption_key);
    settings.simulate = match lookup("AUTH_SIMULATE") {
        Some(raw) => parse_bool("AUTH_SIMULATE", &raw)?,
        None => section.simulate.unwrap_or(false),
    };
    settings.manual_code = lookup("AUTH_CODE");
    settings.manual_code_file =
        lookup("AUTH_CODE_FILE").map(PathBuf::from).or(section.manual_code_file);
    if let Some(v) = section.interactive {
        settings.interactive = v;
    }
    if let Some(v) = section.open_browser {
        settings.open_browser = v;
    }
    if let Some(secs) = section.callback_timeout_seconds {
        settings.callback_timeout = Duration::from_secs(secs);
    }
    if let Some(v) = section.refresh_threshold_seconds {
        settings.refresh_threshold_seconds = v;
    }
    if let Some(v) = section.pending_state_ttl_seconds {
        settings.pending_state_ttl_seconds = v;
    }

    let mut provider = section.provider.apply_to(&ProviderConfig::default());
    if let Some(uri) = env_section.redirect_uri {
        provider.redirect_uri = uri;
    }
    apply_provider_env(&mut provider, &lookup)?;
    settings.providers = auth_providers
        .iter()
        .map(|(name, over)| (name.clone(), over.apply_to(&provider)))
        .collect();
    settings.provider = provider;

    if let Some(level) = lookup("TRADEAUTH_LOG_LEVEL") {
        logging.level = level;
    }

    let config = AppConfig { auth: settings, registered_uris: section.registered_uris, logging, source };
    warn_on_redirect_findings(&config);
    Ok(config)
}

fn apply_provider_env(
    provider: &mut ProviderConfig,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(v) = lookup("OAUTH_AUTH_URL") {
        provider.authorize_url = v;
    }
    if let Some(v) = lookup("OAUTH_TOKEN_URL") {
        provider.token_url = v;
    }
    if let Some(v) = lookup("CLIENT_ID") {
        provider.client_id = v;
    }
    if let Some(v) = lookup("CLIENT_SECRET") {
        provider.client_secret = Some(v);
    }
    if let Some(v) = lookup("OAUTH_REDIRECT_URI") {
        provider.redirect_uri = v;
    }
    if let Some(v) = lookup("OAUTH_SCOPE") {
        provider.scope = v;
    }
    if let Some(raw) = lookup("OAUTH_PKCE") {
        provider.pkce = parse_bool("OAUTH_PKCE", &raw)?;
    }
    if let Some(raw) = lookup("OAUTH_PKCE_METHOD") {
        provider.pkce_method = raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: "OAUTH_PKCE_METHOD".to_string(),
            value: raw.clone(),
        })?;
    }
    Ok(())
}

fn warn_on_redirect_findings(config: &AppConfig) {
    if config.auth.simulate {
        return;
    }
    let validator = RegisteredRedirectValidator::new(config.registered_uris.iter().cloned());
    let named = config.auth.providers.iter().map(|(name, p)| (name.as_str(), p));
    for (provider, provider_config) in
        std::iter::once((DEFAULT_PROVIDER, &config.auth.provider)).chain(named)
    {
        for finding in validator.validate(&provider_config.redirect_uri) {
            tracing::warn!(provider = %provider, finding = %finding, "redirect URI check failed");
        }
    }
}

/// Find the first config file in the probe locations.
#[must_use]
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut dirs = vec![PathBuf::from("."), PathBuf::from(".."), PathBuf::from("../..")];
    if let Some(exe_dir) = std::env::current_exe().ok().and_then(|p| p.parent().map(Path::to_path_buf)) {
        dirs.push(exe_dir);
    }

    dirs.iter()
        .flat_map(|dir| CONFIG_FILE_NAMES.iter().map(move |name| dir.join(name)))
        .find(|path| path.is_file())
}

fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Parse a boolean flag.
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue { key: key.to_string(), value: raw.to_string() }),
    }
}
