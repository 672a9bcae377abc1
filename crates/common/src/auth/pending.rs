//! In-flight authorization state persisted between building the authorize
//! URL and handling its callback.
//!
//! Those two steps are usually separated by a browser round trip and may run
//! in different processes, so the `{state, code_verifier}` pair lives on disk
//! (`pkce_state.json`) keyed by provider.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::settings::AuthSettings;
use super::token_store::{write_atomic, StoreError};
use super::types::timestamp;

/// One pending authorization request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAuth {
    /// Opaque value sent as the `state` parameter.
    pub state: String,
    /// PKCE verifier, when the request used PKCE.
    #[serde(default)]
    pub code_verifier: Option<String>,
    /// Absent in files written by older tooling; such entries never expire.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "timestamp::option")]
    pub created_at: Option<DateTime<Utc>>,
}

impl PendingAuth {
    /// Entry stamped with the current time.
    #[must_use]
    pub fn new(state: impl Into<String>, code_verifier: Option<String>) -> Self {
        Self { state: state.into(), code_verifier, created_at: Some(Utc::now()) }
    }

    /// Whether the entry is older than `ttl` at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match self.created_at {
            Some(created_at) if ttl > Duration::zero() => now - created_at > ttl,
            _ => false,
        }
    }
}

impl std::fmt::Debug for PendingAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingAuth")
            .field("state", &self.state)
            .field("code_verifier", &self.code_verifier.as_ref().map(|_| "<redacted>"))
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// JSON-file backed store of [`PendingAuth`] entries.
#[derive(Debug, Clone)]
pub struct PendingAuthStateStore {
    path: PathBuf,
}

impl PendingAuthStateStore {
    /// Store backed by the JSON file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the pending-state path resolved from `settings`.
    #[must_use]
    pub fn from_settings(settings: &AuthSettings) -> Self {
        Self::new(settings.pending_state_path())
    }

    /// Location of the pending-state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record `state`/`verifier` for `provider`, replacing any earlier entry.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the file cannot be written.
    pub fn store(
        &self,
        provider: &str,
        state: &str,
        code_verifier: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut entries = self.load();
        entries.insert(
            provider.to_string(),
            PendingAuth::new(state, code_verifier.map(str::to_string)),
        );
        self.write(&entries)?;
        debug!(provider = %provider, path = %self.path.display(), "stored pending authorization state");
        Ok(())
    }

    /// All pending entries. Missing or unreadable files yield an empty map.
    #[must_use]
    pub fn load(&self) -> BTreeMap<String, PendingAuth> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to read pending state");
                return BTreeMap::new();
            }
        };
        serde_json::from_slice(&raw).unwrap_or_else(|err| {
            warn!(path = %self.path.display(), error = %err, "ignoring unparseable pending state");
            BTreeMap::new()
        })
    }

    /// Pending entry for `provider`, if any.
    #[must_use]
    pub fn get(&self, provider: &str) -> Option<PendingAuth> {
        self.load().remove(provider)
    }

    /// Remove the entry for `provider`; a no-op when none exists.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the file cannot be rewritten.
    pub fn clear(&self, provider: &str) -> Result<(), StoreError> {
        let mut entries = self.load();
        if entries.remove(provider).is_none() {
            return Ok(());
        }
        self.write(&entries)?;
        debug!(provider = %provider, "cleared pending authorization state");
        Ok(())
    }

    fn write(&self, entries: &BTreeMap<String, PendingAuth>) -> Result<(), StoreError> {
        let body = serde_json::to_vec_pretty(entries)?;
        write_atomic(&self.path, &body)
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for auth::pending.
    use tempfile::TempDir;

    use super::*;

    fn store() -> (TempDir, PendingAuthStateStore) {
        let dir = TempDir::new().expect("tempdir");
        let store = PendingAuthStateStore::new(dir.path().join("dev").join("pkce_state.json"));
        (dir, store)
    }

    /// Validates the store/load/clear lifecycle.
    ///
    /// Assertions:
    /// - Parent directories are created on first store.
    /// - Entries are keyed per provider.
    /// - Clearing one provider leaves the other intact.
    #[test]
    fn store_load_clear_lifecycle() {
        let (_dir, store) = store();
        store.store("default", "state-a", Some("verifier-a")).expect("store default");
        store.store("alt", "state-b", None).expect("store alt");

        let entries = store.load();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries["default"].state, "state-a");
        assert_eq!(entries["default"].code_verifier.as_deref(), Some("verifier-a"));
        assert!(entries["alt"].code_verifier.is_none());

        store.clear("default").expect("clear");
        assert!(store.get("default").is_none());
        assert_eq!(store.get("alt").map(|p| p.state), Some("state-b".to_string()));
    }

    #[test]
    fn store_overwrites_previous_attempt() {
        let (_dir, store) = store();
        store.store("default", "first", Some("v1")).expect("store");
        store.store("default", "second", Some("v2")).expect("store");
        let pending = store.get("default").expect("pending");
        assert_eq!(pending.state, "second");
        assert_eq!(pending.code_verifier.as_deref(), Some("v2"));
    }

    #[test]
    fn load_tolerates_missing_and_corrupt_files() {
        let (_dir, store) = store();
        assert!(store.load().is_empty());
        assert!(store.clear("default").is_ok());

        std::fs::create_dir_all(store.path().parent().expect("parent")).expect("mkdir");
        std::fs::write(store.path(), b"not json").expect("write");
        assert!(store.load().is_empty());
    }

    #[test]
    fn legacy_entries_without_timestamp_are_accepted() {
        let (_dir, store) = store();
        std::fs::create_dir_all(store.path().parent().expect("parent")).expect("mkdir");
        std::fs::write(store.path(), br#"{"default":{"state":"s","code_verifier":"v"}}"#)
            .expect("write");
        let pending = store.get("default").expect("pending");
        assert!(pending.created_at.is_none());
        assert!(!pending.is_expired_at(Utc::now(), Duration::seconds(1)));
    }

    #[test]
    fn expiry_respects_ttl() {
        let now = Utc::now();
        let mut pending = PendingAuth::new("s", None);
        pending.created_at = Some(now - Duration::minutes(11));
        assert!(pending.is_expired_at(now, Duration::minutes(10)));
        assert!(!pending.is_expired_at(now, Duration::minutes(15)));
        assert!(!pending.is_expired_at(now, Duration::zero()));
    }
}
