//! Persisted local state.
//!
//! A small key/value medium shared by the identity provider (session-token
//! blob) and the activity monitor (last-activity stamp). Values are strings,
//! as in browser `localStorage`, so the provider's blob stays opaque here.
//!
//! [`ActivityTrackingStorage`] wraps any medium and stamps the activity key
//! whenever the session-token key is written.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

use crate::clock::Clock;

/// Keys used in the storage medium.
pub mod keys {
    /// Opaque session-token blob written by the identity provider.
    pub const SESSION: &str = "pantry.auth.token";

    /// Last observed interaction, epoch milliseconds.
    pub const LAST_ACTIVITY: &str = "pantry.auth.last_activity";

    /// Cached UI locale, cleared together with the session.
    pub const LOCALE: &str = "pantry.locale";

    /// PKCE verifier of the OAuth sign-in in flight.
    pub const CODE_VERIFIER: &str = "pantry.auth.code_verifier";
}

/// Errors from a storage medium.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading or writing the backing file failed.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file is not a JSON object of strings.
    #[error("storage file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// A pluggable key/value medium for session persistence.
pub trait SessionStorage: Send + Sync {
    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the medium cannot be read.
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the medium cannot be written.
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a value. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the medium cannot be written.
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

// =============================================================================
// In-memory
// =============================================================================

/// Process-local storage. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        items.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        items.remove(key);
        Ok(())
    }
}

// =============================================================================
// JSON file
// =============================================================================

/// Storage persisted as one JSON object in a file, surviving restarts.
///
/// Every write rewrites the whole file through a temporary sibling and a
/// rename, so a crash leaves either the old or the new contents.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    /// File name used inside the storage directory.
    pub const FILE_NAME: &'static str = "session.json";

    /// Open (or lazily create) `session.json` inside `dir`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the directory cannot be created.
    pub fn open(dir: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join(Self::FILE_NAME),
            lock: Mutex::new(()),
        })
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match std::fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&self, items: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(items)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SessionStorage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read_all()?.remove(key))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut items = self.read_all()?;
        items.insert(key.to_owned(), value.to_owned());
        self.write_all(&items)
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut items = self.read_all()?;
        if items.remove(key).is_some() {
            self.write_all(&items)?;
        }
        Ok(())
    }
}

// =============================================================================
// Activity stamping wrapper
// =============================================================================

/// Wraps the session medium so every session-token write also records activity.
///
/// The provider writes the session blob when it issues a session (password
/// sign-in, auto-confirmed sign-up, OAuth code exchange), so establishing a
/// session always leaves a fresh activity stamp behind.
pub struct ActivityTrackingStorage {
    inner: Arc<dyn SessionStorage>,
    clock: Arc<dyn Clock>,
}

impl ActivityTrackingStorage {
    #[must_use]
    pub fn new(inner: Arc<dyn SessionStorage>, clock: Arc<dyn Clock>) -> Self {
        Self { inner, clock }
    }
}

impl SessionStorage for ActivityTrackingStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.inner.get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.inner.set_item(key, value)?;
        if key == keys::SESSION {
            stamp_activity(&*self.inner, self.clock.now_millis())?;
        }
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.inner.remove_item(key)
    }
}

/// Read the last-activity stamp, ignoring unparseable values.
///
/// # Errors
///
/// Returns `StorageError` if the medium cannot be read.
pub fn read_activity(storage: &dyn SessionStorage) -> Result<Option<i64>, StorageError> {
    let raw = storage.get_item(keys::LAST_ACTIVITY)?;
    Ok(raw.and_then(|value| {
        value
            .parse::<i64>()
            .inspect_err(|e| tracing::warn!(error = %e, "ignoring malformed activity stamp"))
            .ok()
    }))
}

/// Write `now_ms` as the activity stamp unless a later stamp is already stored.
///
/// Returns the stamp that is stored afterwards.
///
/// # Errors
///
/// Returns `StorageError` if the medium cannot be read or written.
pub fn stamp_activity(storage: &dyn SessionStorage, now_ms: i64) -> Result<i64, StorageError> {
    match read_activity(storage)? {
        Some(existing) if existing >= now_ms => Ok(existing),
        _ => {
            storage.set_item(keys::LAST_ACTIVITY, &now_ms.to_string())?;
            Ok(now_ms)
        }
    }
}

/// Remove the session blob, activity stamp and cached locale.
///
/// Every key is attempted; the first failure is returned.
///
/// # Errors
///
/// Returns `StorageError` if any key cannot be removed.
pub fn clear_local_state(storage: &dyn SessionStorage) -> Result<(), StorageError> {
    let mut first_error = None;
    for key in [keys::SESSION, keys::LAST_ACTIVITY, keys::LOCALE] {
        if let Err(e) = storage.remove_item(key) {
            tracing::warn!(key, error = %e, "Failed to clear local state");
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::testing::ManualClock;

    #[test]
    fn test_memory_storage_roundtrip() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get_item("k").unwrap(), None);

        storage.set_item("k", "v").unwrap();
        assert_eq!(storage.get_item("k").unwrap().as_deref(), Some("v"));

        storage.remove_item("k").unwrap();
        storage.remove_item("k").unwrap();
        assert_eq!(storage.get_item("k").unwrap(), None);
    }

    #[test]
    fn test_file_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let storage = FileStorage::open(dir.path()).unwrap();
        storage.set_item(keys::SESSION, "{\"blob\":1}").unwrap();
        storage.set_item(keys::LOCALE, "fr").unwrap();
        storage.remove_item(keys::LOCALE).unwrap();
        drop(storage);

        let reopened = FileStorage::open(dir.path()).unwrap();
        assert_eq!(
            reopened.get_item(keys::SESSION).unwrap().as_deref(),
            Some("{\"blob\":1}")
        );
        assert_eq!(reopened.get_item(keys::LOCALE).unwrap(), None);
    }

    #[test]
    fn test_file_storage_reports_corruption() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(FileStorage::FILE_NAME), "not json").unwrap();

        let storage = FileStorage::open(dir.path()).unwrap();
        assert!(matches!(
            storage.get_item(keys::SESSION),
            Err(StorageError::Corrupt(_))
        ));
    }

    #[test]
    fn test_session_write_stamps_activity() {
        let inner: Arc<dyn SessionStorage> = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let storage = ActivityTrackingStorage::new(Arc::clone(&inner), clock.clone());

        storage.set_item(keys::LOCALE, "en").unwrap();
        assert_eq!(read_activity(&*inner).unwrap(), None);

        storage.set_item(keys::SESSION, "token").unwrap();
        assert_eq!(read_activity(&*inner).unwrap(), Some(clock.now_millis()));
    }

    #[test]
    fn test_stamp_never_moves_backwards() {
        let storage = MemoryStorage::new();
        assert_eq!(stamp_activity(&storage, 2_000).unwrap(), 2_000);
        assert_eq!(stamp_activity(&storage, 1_000).unwrap(), 2_000);
        assert_eq!(read_activity(&storage).unwrap(), Some(2_000));
        assert_eq!(stamp_activity(&storage, 3_000).unwrap(), 3_000);
    }

    #[test]
    fn test_malformed_stamp_is_ignored() {
        let storage = MemoryStorage::new();
        storage.set_item(keys::LAST_ACTIVITY, "yesterday").unwrap();
        assert_eq!(read_activity(&storage).unwrap(), None);
        assert_eq!(stamp_activity(&storage, 5).unwrap(), 5);
    }
}
