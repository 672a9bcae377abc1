//! OAuth readiness check
//!
//! Inspects resolved settings before a login attempt and reports anything
//! that would make the authorization server reject the flow: an unregistered
//! or insecure redirect URI, missing endpoints, placeholder credentials, or an
//! unusable encryption key. Optionally wipes the local token and pending-state
//! files so the next login starts clean.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;
use tradeauth_common::auth::{is_loopback_redirect, AuthSettings, ProviderConfig};
use tradeauth_common::CryptoBox;
use url::Url;

use crate::config::{RedirectValidator, RegisteredRedirectValidator};

/// Substrings that mark a credential as a template value.
const PLACEHOLDER_MARKERS: [&str; 7] =
    ["changeme", "change-me", "placeholder", "your_", "your-", "<", "xxx"];

/// State of a client credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    /// Not configured.
    Absent,
    /// Looks like a template value.
    Placeholder,
    /// Configured with a plausible value.
    Present,
}

impl CredentialStatus {
    fn of(value: Option<&str>) -> Self {
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            None => Self::Absent,
            Some(v) if is_placeholder(v) => Self::Placeholder,
            Some(_) => Self::Present,
        }
    }
}

/// State of the token cache encryption key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    /// Encryption is turned off in settings.
    Disabled,
    /// No key configured; an ephemeral key will be used.
    Ephemeral,
    /// Key decodes to 32 bytes.
    Valid,
    /// Key does not decode to 32 bytes; the cache would be written in plaintext.
    Invalid,
}

/// Result of [`run`], serializable for `--json` style output.
#[derive(Debug, Clone, Serialize)]
pub struct PreflightReport {
    /// Environment the report describes.
    pub environment: String,
    /// Redirect URI of the default provider.
    pub redirect_uri: String,
    /// Redirect uses `https`.
    pub redirect_https: bool,
    /// Redirect targets a loopback host.
    pub redirect_loopback: bool,
    /// `None` when no allowlist is configured.
    pub redirect_registered: Option<bool>,
    /// An authorize endpoint is configured.
    pub authorize_url_present: bool,
    /// A token endpoint is configured.
    pub token_url_present: bool,
    /// State of the client id.
    pub client_id: CredentialStatus,
    /// State of the client secret.
    pub client_secret: CredentialStatus,
    /// PKCE enabled for the default provider.
    pub pkce: bool,
    /// State of the token cache key.
    pub encryption_key: KeyStatus,
    /// Resolved token cache file.
    pub token_cache_path: PathBuf,
    /// Resolved pending-state file.
    pub pending_state_path: PathBuf,
    /// Token cache was present after this run.
    pub token_cache_exists: bool,
    /// Problems that will likely make login fail.
    pub issues: Vec<String>,
    /// Changes made on disk during this run.
    pub actions: Vec<String>,
}

impl PreflightReport {
    /// `true` when no issues were found.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Check the default provider in `settings` against `registered_uris` and,
/// when `reset_cache` is set, delete the token cache and pending-state files.
///
/// # Errors
/// Returns an error only if a cache file exists but cannot be removed.
pub fn run(
    settings: &AuthSettings,
    registered_uris: &[String],
    reset_cache: bool,
) -> anyhow::Result<PreflightReport> {
    let provider = &settings.provider;
    let validator = RegisteredRedirectValidator::new(registered_uris.iter().cloned());

    let redirect_uri = provider.redirect_uri.trim().to_string();
    let redirect_https =
        Url::parse(&redirect_uri).map(|u| u.scheme() == "https").unwrap_or(false);
    let redirect_registered =
        (!registered_uris.is_empty()).then(|| validator.is_registered(&redirect_uri));

    let mut issues: Vec<String> =
        validator.validate(&redirect_uri).iter().map(ToString::to_string).collect();
    issues.extend(endpoint_issues(provider));

    let client_id = CredentialStatus::of(Some(provider.client_id.as_str()));
    let client_secret = CredentialStatus::of(provider.client_secret.as_deref());
    match client_id {
        CredentialStatus::Absent => issues.push("client_id is not configured".to_string()),
        CredentialStatus::Placeholder => issues.push("client_id looks like a placeholder".to_string()),
        CredentialStatus::Present => {}
    }
    if client_secret == CredentialStatus::Placeholder {
        issues.push("client_secret looks like a placeholder".to_string());
    }
    if client_secret == CredentialStatus::Absent && !provider.pkce {
        issues.push("no client_secret and PKCE disabled; the client cannot authenticate".to_string());
    }

    let encryption_key = key_status(settings);
    if encryption_key == KeyStatus::Invalid {
        issues.push("encryption key is invalid; tokens would be stored in plaintext".to_string());
    }

    let token_cache_path = settings.token_cache_path();
    let pending_state_path = settings.pending_state_path();
    let token_cache_exists = token_cache_path.is_file();

    let mut actions = Vec::new();
    if reset_cache {
        for path in [&token_cache_path, &pending_state_path] {
            if remove_if_present(path)? {
                actions.push(format!("removed {}", path.display()));
            }
        }
    }

    let report = PreflightReport {
        environment: settings.environment.clone(),
        redirect_loopback: is_loopback_redirect(&redirect_uri),
        redirect_uri,
        redirect_https,
        redirect_registered,
        authorize_url_present: !provider.authorize_url.trim().is_empty(),
        token_url_present: !provider.token_url.trim().is_empty(),
        client_id,
        client_secret,
        pkce: provider.pkce,
        encryption_key,
        token_cache_exists: token_cache_exists && !reset_cache,
        token_cache_path,
        pending_state_path,
        issues,
        actions,
    };

    if report.is_ready() {
        tracing::info!(environment = %report.environment, "OAuth preflight passed");
    } else {
        for issue in &report.issues {
            tracing::warn!(environment = %report.environment, issue = %issue, "OAuth preflight issue");
        }
    }
    Ok(report)
}

fn endpoint_issues(provider: &ProviderConfig) -> Vec<String> {
    [("authorize_url", &provider.authorize_url), ("token_url", &provider.token_url)]
        .into_iter()
        .filter_map(|(name, value)| {
            let value = value.trim();
            if value.is_empty() {
                Some(format!("{name} is not configured"))
            } else if Url::parse(value).is_err() {
                Some(format!("{name} is not a valid URL: {value}"))
            } else {
                None
            }
        })
        .collect()
}

fn key_status(settings: &AuthSettings) -> KeyStatus {
    if !settings.encrypt_tokens {
        return KeyStatus::Disabled;
    }
    match settings.encryption_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        None => KeyStatus::Ephemeral,
        Some(key) if CryptoBox::from_encoded_key(key).is_ok() => KeyStatus::Valid,
        Some(_) => KeyStatus::Invalid,
    }
}

fn is_placeholder(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    PLACEHOLDER_MARKERS.iter().any(|marker| lower.contains(marker))
}

fn remove_if_present(path: &Path) -> anyhow::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::info!(path = %path.display(), "Removed cached OAuth state");
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("failed to remove {}", path.display())),
    }
}
