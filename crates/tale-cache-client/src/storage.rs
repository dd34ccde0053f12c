//! Persistent key-value storage behind the client cache

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Key written and removed by the default availability check
const AVAILABILITY_KEY: &str = "__stats_cache_test__";

/// Errors raised by a [`PersistentStorage`]
#[derive(Error, Debug)]
pub enum StorageError {
    /// Storage is disabled or access was revoked
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The write would exceed the storage quota
    #[error("storage quota exceeded")]
    QuotaExceeded,

    /// Reading or writing the backing medium failed
    #[error("storage I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Whether storage can currently be used
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable(String),
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available)
    }
}

/// String-keyed persistent storage with positional key enumeration
///
/// Any call may fail at any time: access can be revoked mid-session and
/// writes can hit a quota.
pub trait PersistentStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove_item(&self, key: &str) -> Result<(), StorageError>;

    /// The key at `index`, or `None` past the end
    fn key(&self, index: usize) -> Result<Option<String>, StorageError>;

    fn length(&self) -> Result<usize, StorageError>;

    /// Check with a throwaway write
    fn availability(&self) -> Availability {
        let written = self
            .set_item(AVAILABILITY_KEY, AVAILABILITY_KEY)
            .and_then(|()| self.remove_item(AVAILABILITY_KEY));
        match written {
            // Full but readable
            Ok(()) | Err(StorageError::QuotaExceeded) => Availability::Available,
            Err(e) => Availability::Unavailable(e.to_string()),
        }
    }
}

impl<S: PersistentStorage + ?Sized> PersistentStorage for Arc<S> {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set_item(key, value)
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove_item(key)
    }

    fn key(&self, index: usize) -> Result<Option<String>, StorageError> {
        (**self).key(index)
    }

    fn length(&self) -> Result<usize, StorageError> {
        (**self).length()
    }

    fn availability(&self) -> Availability {
        (**self).availability()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    items: BTreeMap<String, String>,
    quota_bytes: Option<usize>,
    revoked: Option<String>,
    enumeration_broken: bool,
}

impl MemoryState {
    fn check_access(&self) -> Result<(), StorageError> {
        match &self.revoked {
            Some(reason) => Err(StorageError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    fn used_bytes(&self) -> usize {
        self.items.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

/// In-process storage with switches for quota and revocation
///
/// Cloning creates a new handle to the SAME underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with a byte quota over keys plus values
    pub fn with_quota(quota_bytes: usize) -> Self {
        let storage = Self::default();
        storage.set_quota(Some(quota_bytes));
        storage
    }

    pub fn set_quota(&self, quota_bytes: Option<usize>) {
        self.state.lock().quota_bytes = quota_bytes;
    }

    /// Fail every call until [`restore`](Self::restore)
    pub fn revoke(&self, reason: impl Into<String>) {
        self.state.lock().revoked = Some(reason.into());
    }

    pub fn restore(&self) {
        self.state.lock().revoked = None;
    }

    /// Make `key` and `length` fail while item access keeps working
    pub fn break_enumeration(&self, broken: bool) {
        self.state.lock().enumeration_broken = broken;
    }

    /// Bytes held by keys plus values
    pub fn used_bytes(&self) -> usize {
        self.state.lock().used_bytes()
    }
}

impl PersistentStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let state = self.state.lock();
        state.check_access()?;
        Ok(state.items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        state.check_access()?;
        if let Some(quota) = state.quota_bytes {
            let replaced = state.items.get(key).map_or(0, |old| key.len() + old.len());
            if state.used_bytes() - replaced + key.len() + value.len() > quota {
                return Err(StorageError::QuotaExceeded);
            }
        }
        state.items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        state.check_access()?;
        state.items.remove(key);
        Ok(())
    }

    fn key(&self, index: usize) -> Result<Option<String>, StorageError> {
        let state = self.state.lock();
        state.check_access()?;
        if state.enumeration_broken {
            return Err(StorageError::Unavailable("enumeration failed".to_string()));
        }
        Ok(state.items.keys().nth(index).cloned())
    }

    fn length(&self) -> Result<usize, StorageError> {
        let state = self.state.lock();
        state.check_access()?;
        if state.enumeration_broken {
            return Err(StorageError::Unavailable("enumeration failed".to_string()));
        }
        Ok(state.items.len())
    }
}

/// Storage persisted as one JSON object in a file
///
/// The whole file is rewritten on every mutation, through a sibling
/// temporary file so a crash never leaves it half written.
#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    items: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStorage {
    /// Open `path`, starting empty if it does not exist or is unreadable
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let items = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(target: "tale_cache", path = %path.display(), error = %e, "Discarding unparsable storage file");
                BTreeMap::new()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(map_io(e)),
        };
        Ok(Self {
            path,
            items: Mutex::new(items),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling the file is written through before the rename
    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }

    fn persist(&self, items: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(map_io)?;
        }
        let content = serde_json::to_string(items).map_err(io::Error::from)?;
        let tmp = self.tmp_path();
        std::fs::write(&tmp, content).map_err(map_io)?;
        std::fs::rename(&tmp, &self.path).map_err(map_io)?;
        Ok(())
    }

    /// Apply `change` and persist, rolling back the in-memory copy on failure
    fn mutate(&self, change: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<(), StorageError> {
        let mut items = self.items.lock();
        let mut next = items.clone();
        change(&mut next);
        self.persist(&next)?;
        *items = next;
        Ok(())
    }
}

fn map_io(e: io::Error) -> StorageError {
    match e.kind() {
        io::ErrorKind::StorageFull => StorageError::QuotaExceeded,
        io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem => {
            StorageError::Unavailable(e.to_string())
        }
        _ => StorageError::Io(e),
    }
}

impl PersistentStorage for JsonFileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items.lock().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.mutate(|items| {
            items.insert(key.to_string(), value.to_string());
        })
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        if !self.items.lock().contains_key(key) {
            return Ok(());
        }
        self.mutate(|items| {
            items.remove(key);
        })
    }

    fn key(&self, index: usize) -> Result<Option<String>, StorageError> {
        Ok(self.items.lock().keys().nth(index).cloned())
    }

    fn length(&self) -> Result<usize, StorageError> {
        Ok(self.items.lock().len())
    }

    /// Inspect the file, or the nearest existing directory it would be
    /// created in, without writing anything
    fn availability(&self) -> Availability {
        let target = match std::fs::metadata(&self.path) {
            Ok(meta) => Some((self.path.as_path(), meta)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => self
                .path
                .ancestors()
                .skip(1)
                .filter(|dir| !dir.as_os_str().is_empty())
                .find_map(|dir| std::fs::metadata(dir).ok().map(|meta| (dir, meta))),
            Err(e) => return Availability::Unavailable(e.to_string()),
        };

        match target {
            // Relative path whose directory is the working directory
            None => Availability::Available,
            Some((path, meta)) if meta.permissions().readonly() => {
                Availability::Unavailable(format!("{} is read-only", path.display()))
            }
            Some((path, meta)) if path != self.path && !meta.is_dir() => {
                Availability::Unavailable(format!("{} is not a directory", path.display()))
            }
            Some(_) => Availability::Available,
        }
    }
}
