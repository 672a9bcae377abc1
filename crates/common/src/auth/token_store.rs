//! Per-environment token cache file.
//!
//! The cache is one JSON document keyed by provider. When encryption is
//! enabled the file holds a [`CryptoBox`] envelope of that document instead.
//! Reads auto-detect the two forms: plain JSON first, then decrypt.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, error, info};

use super::settings::{AuthSettings, DEFAULT_PROVIDER};
use super::types::{TokenCache, TokenRecord};
use crate::crypto::{CryptoBox, CryptoError};

/// Token cache and pending-state persistence errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// JSON encode/decode failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Decryption (wrong key, tampering) or encryption failure.
    #[error("token cache crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The file is neither JSON nor decryptable with the configured cipher.
    #[error("token cache is not plain JSON and no encryption key is available")]
    EncryptionUnavailable,

    /// Parsed JSON that is not a cache document.
    #[error("unrecognised token cache format: {0}")]
    Format(String),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io { path: path.to_path_buf(), source }
    }
}

/// Write `bytes` to `path` via a sibling temp file and rename, creating
/// parent directories first. Readers never observe a half-written file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
    tmp.write_all(bytes).map_err(|e| StoreError::io(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| StoreError::io(path, e))?;
    tmp.persist(path).map_err(|e| StoreError::io(path, e.error))?;
    Ok(())
}

/// Reads and writes the token cache file.
#[derive(Debug)]
pub struct TokenStore {
    path: PathBuf,
    crypto: Option<CryptoBox>,
}

impl TokenStore {
    /// Store at `path`; `crypto` enables encryption on write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, crypto: Option<CryptoBox>) -> Self {
        Self { path: path.into(), crypto }
    }

    /// Store at the settings' cache path, resolving the session cipher when
    /// encryption is enabled.
    #[must_use]
    pub fn from_settings(settings: &AuthSettings) -> Self {
        let crypto = if settings.encrypt_tokens {
            CryptoBox::for_session(settings.encryption_key.as_deref())
        } else {
            None
        };
        Self::new(settings.token_cache_path(), crypto)
    }

    /// Location of the cache file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether saves are encrypted.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.crypto.is_some()
    }

    /// Load the cache, surfacing the reason when it cannot be read.
    ///
    /// A missing or empty file is an empty cache, not an error.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the file is unreadable, undecryptable or
    /// not a cache document.
    pub fn try_load(&self) -> Result<TokenCache, StoreError> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(TokenCache::new()),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(TokenCache::new());
        }

        let document = match serde_json::from_slice::<Value>(&raw) {
            Ok(document) => document,
            Err(_) => {
                let crypto = self.crypto.as_ref().ok_or(StoreError::EncryptionUnavailable)?;
                let plaintext = crypto.decrypt(&raw)?;
                serde_json::from_slice(&plaintext)?
            }
        };
        parse_document(document)
    }

    /// Load the cache, treating any failure as an empty cache.
    ///
    /// Failures are logged at error level; a cache written under another key
    /// fails closed here.
    #[must_use]
    pub fn load(&self) -> TokenCache {
        match self.try_load() {
            Ok(cache) => cache,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "failed to load token cache; treating as empty");
                TokenCache::new()
            }
        }
    }

    /// Serialize, optionally encrypt, and atomically replace the cache file.
    ///
    /// # Errors
    /// Returns [`StoreError`] on serialization, encryption or I/O failure.
    pub fn save(&self, cache: &TokenCache) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(cache)?;
        let bytes = match &self.crypto {
            Some(crypto) => crypto.encrypt(&json)?,
            None => json,
        };
        write_atomic(&self.path, &bytes)?;
        debug!(
            path = %self.path.display(),
            providers = cache.len(),
            encrypted = self.crypto.is_some(),
            "saved token cache"
        );
        Ok(())
    }

    /// Record for `provider`, if one loads.
    #[must_use]
    pub fn get(&self, provider: &str) -> Option<TokenRecord> {
        self.load().remove(provider)
    }

    /// Insert or replace the record for `provider` and persist.
    ///
    /// # Errors
    /// Returns [`StoreError`] if the cache cannot be written.
    pub fn upsert(&self, provider: &str, record: TokenRecord) -> Result<(), StoreError> {
        let mut cache = self.load();
        cache.insert(provider.to_string(), record);
        self.save(&cache)
    }

    /// Remove the record for `provider`. Returns whether one existed.
    ///
    /// # Errors
    /// Returns [`StoreError`] if the cache cannot be written.
    pub fn remove(&self, provider: &str) -> Result<bool, StoreError> {
        let mut cache = self.load();
        if cache.remove(provider).is_none() {
            return Ok(false);
        }
        self.save(&cache)?;
        info!(provider = %provider, "removed cached token");
        Ok(true)
    }
}

/// Accept the canonical `{provider: record}` shape plus the import-tool shape
/// (flat record fields at the top level and a `providers` table). Entries
/// that are not token records are skipped.
fn parse_document(document: Value) -> Result<TokenCache, StoreError> {
    let Value::Object(mut top) = document else {
        return Err(StoreError::Format("expected a JSON object".into()));
    };

    let mut cache = TokenCache::new();
    if let Some(Value::Object(nested)) = top.remove("providers") {
        collect_records(nested, &mut cache);
    }

    let flat = serde_json::from_value::<TokenRecord>(Value::Object(top.clone())).ok();
    collect_records(top, &mut cache);
    if let Some(flat) = flat {
        cache.entry(DEFAULT_PROVIDER.to_string()).or_insert(flat);
    }
    Ok(cache)
}

fn collect_records(entries: Map<String, Value>, cache: &mut TokenCache) {
    for (provider, value) in entries {
        if !value.is_object() {
            continue;
        }
        match serde_json::from_value::<TokenRecord>(value) {
            Ok(record) => {
                cache.insert(provider, record);
            }
            Err(e) => debug!(provider = %provider, error = %e, "skipping non-token cache entry"),
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for auth::token_store.
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    use super::*;

    fn record(access: &str) -> TokenRecord {
        TokenRecord {
            access_token: access.into(),
            refresh_token: Some(format!("{access}-refresh")),
            token_type: "Bearer".into(),
            expires_at: Utc::now() + Duration::hours(1),
            scope: None,
            created_at: None,
        }
    }

    fn cache_path(dir: &TempDir) -> PathBuf {
        dir.path().join("dev").join("token_cache.json")
    }

    /// Validates plaintext save/load.
    ///
    /// Assertions:
    /// - Parent directories are created.
    /// - The file is readable JSON keyed by provider.
    #[test]
    fn plaintext_roundtrip() {
        let dir = TempDir::new().expect("tempdir");
        let store = TokenStore::new(cache_path(&dir), None);
        store.upsert("default", record("a")).expect("upsert");

        let raw: Value =
            serde_json::from_slice(&std::fs::read(store.path()).expect("read")).expect("json");
        assert_eq!(raw["default"]["access_token"], "a");
        assert_eq!(store.get("default").map(|r| r.access_token), Some("a".into()));
    }

    /// Validates encrypted save/load.
    ///
    /// Assertions:
    /// - The file on disk does not contain the token.
    /// - A store with the same key reads it back.
    /// - A store with a different key fails closed to an empty cache.
    #[test]
    fn encrypted_roundtrip_and_wrong_key() {
        let dir = TempDir::new().expect("tempdir");
        let key = CryptoBox::generate_encoded_key();
        let store = TokenStore::new(
            cache_path(&dir),
            Some(CryptoBox::from_encoded_key(&key).expect("key")),
        );
        store.upsert("default", record("secret-access")).expect("upsert");

        let raw = std::fs::read(store.path()).expect("read");
        assert!(!String::from_utf8_lossy(&raw).contains("secret-access"));

        let same_key =
            TokenStore::new(cache_path(&dir), Some(CryptoBox::from_encoded_key(&key).expect("key")));
        assert_eq!(same_key.get("default").map(|r| r.access_token), Some("secret-access".into()));

        let other_key = TokenStore::new(cache_path(&dir), Some(CryptoBox::ephemeral()));
        assert!(matches!(
            other_key.try_load(),
            Err(StoreError::Crypto(CryptoError::Authentication))
        ));
        assert!(other_key.load().is_empty());
    }

    #[test]
    fn encrypted_store_reads_legacy_plaintext() {
        let dir = TempDir::new().expect("tempdir");
        TokenStore::new(cache_path(&dir), None).upsert("default", record("plain")).expect("upsert");

        let encrypted = TokenStore::new(cache_path(&dir), Some(CryptoBox::ephemeral()));
        assert_eq!(encrypted.get("default").map(|r| r.access_token), Some("plain".into()));
    }

    #[test]
    fn garbage_is_empty_not_error_on_load() {
        let dir = TempDir::new().expect("tempdir");
        let path = cache_path(&dir);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(&path, b"\x00\x01garbage").expect("write");

        let plain = TokenStore::new(&path, None);
        assert!(matches!(plain.try_load(), Err(StoreError::EncryptionUnavailable)));
        assert!(plain.load().is_empty());

        let encrypted = TokenStore::new(&path, Some(CryptoBox::ephemeral()));
        assert!(matches!(encrypted.try_load(), Err(StoreError::Crypto(CryptoError::Malformed(_)))));

        // A later save replaces the garbage cleanly.
        encrypted.upsert("default", record("fresh")).expect("upsert");
        assert_eq!(encrypted.get("default").map(|r| r.access_token), Some("fresh".into()));
    }

    #[test]
    fn missing_and_empty_files_are_empty_caches() {
        let dir = TempDir::new().expect("tempdir");
        let store = TokenStore::new(cache_path(&dir), None);
        assert!(store.try_load().expect("missing").is_empty());

        std::fs::create_dir_all(cache_path(&dir).parent().expect("parent")).expect("mkdir");
        std::fs::write(cache_path(&dir), b"  \n").expect("write");
        assert!(store.try_load().expect("empty").is_empty());
    }

    /// Validates the import-tool document shape.
    ///
    /// Assertions:
    /// - Flat top-level fields become the default provider.
    /// - `providers` entries are merged.
    /// - Unrelated keys are skipped.
    #[test]
    fn compat_document_is_accepted() {
        let dir = TempDir::new().expect("tempdir");
        let path = cache_path(&dir);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        let doc = serde_json::json!({
            "access_token": "flat",
            "refresh_token": "flat-refresh",
            "token_type": "Bearer",
            "expires_at": "2030-01-01T00:00:00",
            "providers": {
                "broker": {
                    "access_token": "nested",
                    "refresh_token": null,
                    "expires_at": "2030-01-01T00:00:00Z"
                }
            },
            "meta": {"imported_by": "tool"},
            "version": 2
        });
        std::fs::write(&path, serde_json::to_vec(&doc).expect("encode")).expect("write");

        let cache = TokenStore::new(&path, None).try_load().expect("load");
        assert_eq!(cache.len(), 2);
        assert_eq!(cache["default"].access_token, "flat");
        assert_eq!(cache["broker"].access_token, "nested");
        assert!(cache["broker"].refresh_token.is_none());
        assert_eq!(cache["broker"].token_type, "Bearer");
    }

    #[test]
    fn remove_reports_presence() {
        let dir = TempDir::new().expect("tempdir");
        let store = TokenStore::new(cache_path(&dir), None);
        store.upsert("default", record("a")).expect("upsert");
        store.upsert("alt", record("b")).expect("upsert");

        assert!(store.remove("default").expect("remove"));
        assert!(!store.remove("default").expect("remove again"));
        assert_eq!(store.load().keys().collect::<Vec<_>>(), vec!["alt"]);
    }
}
