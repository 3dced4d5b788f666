//! Cache storage backends
//!
//! A uniform async key/value contract with two implementations — a durable
//! per-directory disk store and an in-memory store — composed by
//! [`TieredStore`], which tries an ordered list of backends and threads typed
//! failure reasons through instead of catching generically.

use std::collections::{BTreeSet, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;

use crate::error::{CacheError, Result};

/// Cache storage trait. Values are opaque strings; key prefixing and entry
/// encoding are the manager's concern.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Retrieve a value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value; absent keys are not an error
    async fn remove(&self, key: &str) -> Result<bool>;

    /// Remove all values
    async fn clear(&self) -> Result<()>;

    /// List all stored keys
    async fn keys(&self) -> Result<Vec<String>>;

    /// Backend name for diagnostics
    fn name(&self) -> &'static str;
}

struct MemoryInner {
    entries: HashMap<String, String>,
    bytes: u64,
}

/// In-memory store. Serves as the fallback tier; an optional byte capacity
/// makes its quota exhaustion observable and testable.
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
    capacity_bytes: Option<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryInner {
                entries: HashMap::new(),
                bytes: 0,
            }),
            capacity_bytes: None,
        }
    }

    /// Bound the total bytes (keys + values) this store will hold.
    pub fn with_capacity_bytes(capacity: u64) -> Self {
        Self {
            inner: RwLock::new(MemoryInner {
                entries: HashMap::new(),
                bytes: 0,
            }),
            capacity_bytes: Some(capacity),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let inner = self.inner.read().await;
        Ok(inner.entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let replaced = inner
            .entries
            .get(key)
            .map(|old| (key.len() + old.len()) as u64)
            .unwrap_or(0);
        let added = (key.len() + value.len()) as u64;
        let projected = inner.bytes - replaced + added;

        if let Some(capacity) = self.capacity_bytes {
            if projected > capacity {
                return Err(CacheError::QuotaExceeded {
                    store: "memory".to_string(),
                });
            }
        }

        inner.entries.insert(key.to_string(), value.to_string());
        inner.bytes = projected;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.entries.remove(key) {
            Some(old) => {
                inner.bytes -= (key.len() + old.len()) as u64;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn clear(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.entries.clear();
        inner.bytes = 0;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        Ok(inner.entries.keys().cloned().collect())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Current on-disk layout version. Bumped when the entry file format changes.
const LAYOUT_VERSION: u32 = 1;
const VERSION_FILE: &str = ".version";
const LOCK_FILE: &str = ".lock";
const ENTRY_SUFFIX: &str = ".entry";

/// Removes the lock file when the store is dropped.
#[derive(Debug)]
struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            tracing::warn!("failed to release store lock {}: {}", self.path.display(), err);
        }
    }
}

/// Durable store: one directory per store, one file per key.
///
/// Writes go through a temp file and an atomic rename; a write is committed
/// only once the rename returns. Opening takes an exclusive lock file and
/// verifies the layout-version marker, so a second handle or a
/// newer-than-supported layout fails with a typed reason.
#[derive(Debug)]
pub struct DiskStore {
    dir: PathBuf,
    _lock: LockGuard,
}

impl DiskStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|err| CacheError::from_io("disk", err))?;

        let lock_path = dir.join(LOCK_FILE);
        let lock = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(_) => LockGuard { path: lock_path },
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(CacheError::Blocked {
                    message: format!("{} is held by another store handle", dir.display()),
                });
            }
            Err(err) => return Err(CacheError::from_io("disk", err)),
        };

        Self::check_layout(&dir).await?;

        Ok(Self { dir, _lock: lock })
    }

    async fn check_layout(dir: &Path) -> Result<()> {
        let version_path = dir.join(VERSION_FILE);
        match fs::read_to_string(&version_path).await {
            Ok(raw) => {
                let found: u32 = raw.trim().parse().map_err(|_| CacheError::Upgrade {
                    message: format!("unreadable layout marker in {}", dir.display()),
                })?;
                if found > LAYOUT_VERSION {
                    return Err(CacheError::Upgrade {
                        message: format!(
                            "store layout v{found} is newer than supported v{LAYOUT_VERSION}"
                        ),
                    });
                }
                if found < LAYOUT_VERSION {
                    // older layouts only need the marker rewritten
                    Self::write_layout_marker(&version_path).await?;
                }
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Self::write_layout_marker(&version_path).await
            }
            Err(err) => Err(CacheError::from_io("disk", err)),
        }
    }

    async fn write_layout_marker(version_path: &Path) -> Result<()> {
        fs::write(version_path, LAYOUT_VERSION.to_string())
            .await
            .map_err(|err| CacheError::Upgrade {
                message: format!("could not record layout version: {err}"),
            })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}{}", urlencoding::encode(key), ENTRY_SUFFIX))
    }
}

#[async_trait]
impl StorageBackend for DiskStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.entry_path(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(CacheError::from_io("disk", err)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.entry_path(key);
        let staging = self.dir.join(format!("{}.tmp", urlencoding::encode(key)));

        fs::write(&staging, value)
            .await
            .map_err(|err| CacheError::from_io("disk", err))?;
        // the write is committed by the rename, not before
        fs::rename(&staging, &path)
            .await
            .map_err(|err| CacheError::from_io("disk", err))
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        match fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(CacheError::from_io("disk", err)),
        }
    }

    async fn clear(&self) -> Result<()> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|err| CacheError::from_io("disk", err))?;
        while let Some(dirent) = entries
            .next_entry()
            .await
            .map_err(|err| CacheError::from_io("disk", err))?
        {
            let name = dirent.file_name();
            if name.to_string_lossy().ends_with(ENTRY_SUFFIX) {
                fs::remove_file(dirent.path())
                    .await
                    .map_err(|err| CacheError::from_io("disk", err))?;
            }
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|err| CacheError::from_io("disk", err))?;
        while let Some(dirent) = entries
            .next_entry()
            .await
            .map_err(|err| CacheError::from_io("disk", err))?
        {
            let name = dirent.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(encoded) = name.strip_suffix(ENTRY_SUFFIX) else {
                continue;
            };
            match urlencoding::decode(encoded) {
                Ok(key) => keys.push(key.into_owned()),
                Err(err) => {
                    tracing::warn!("skipping undecodable entry file {name}: {err}");
                }
            }
        }
        Ok(keys)
    }

    fn name(&self) -> &'static str {
        "disk"
    }
}

/// Ordered chain of storage backends.
///
/// Each operation walks the tiers in order. A failing tier is logged and the
/// next one is tried; an operation fails only when every tier failed, and a
/// quota failure anywhere takes precedence in the surfaced error because its
/// remedial action differs from a generic fault.
pub struct TieredStore {
    tiers: Vec<Arc<dyn StorageBackend>>,
    prefix: String,
}

impl TieredStore {
    /// `prefix` scopes destructive maintenance of shared-namespace fallback
    /// tiers: `clear` only touches their keys carrying this prefix.
    pub fn new(tiers: Vec<Arc<dyn StorageBackend>>, prefix: impl Into<String>) -> Result<Self> {
        if tiers.is_empty() {
            return Err(CacheError::Storage {
                message: "at least one storage tier is required".to_string(),
            });
        }
        Ok(Self {
            tiers,
            prefix: prefix.into(),
        })
    }

    fn surface(mut errors: Vec<CacheError>) -> CacheError {
        if let Some(pos) = errors.iter().rposition(CacheError::is_quota) {
            return errors.swap_remove(pos);
        }
        errors.pop().unwrap_or(CacheError::Storage {
            message: "no storage tier produced an error".to_string(),
        })
    }
}

#[async_trait]
impl StorageBackend for TieredStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut errors = Vec::new();
        for tier in &self.tiers {
            match tier.get(key).await {
                Ok(Some(value)) => return Ok(Some(value)),
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!("{} tier read failed for {key}: {err}", tier.name());
                    errors.push(err);
                }
            }
        }
        if errors.len() == self.tiers.len() {
            Err(Self::surface(errors))
        } else {
            Ok(None)
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut errors = Vec::new();
        for tier in &self.tiers {
            match tier.set(key, value).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    tracing::warn!("{} tier write failed for {key}: {err}", tier.name());
                    errors.push(err);
                }
            }
        }
        Err(Self::surface(errors))
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        // a key may live in several tiers after a fallback write; remove from
        // all of them so invalidation cannot resurrect stale data
        let mut errors = Vec::new();
        let mut removed = false;
        for tier in &self.tiers {
            match tier.remove(key).await {
                Ok(hit) => removed |= hit,
                Err(err) => {
                    tracing::warn!("{} tier remove failed for {key}: {err}", tier.name());
                    errors.push(err);
                }
            }
        }
        if errors.len() == self.tiers.len() {
            Err(Self::surface(errors))
        } else {
            Ok(removed)
        }
    }

    async fn clear(&self) -> Result<()> {
        let mut errors = Vec::new();
        for (index, tier) in self.tiers.iter().enumerate() {
            // the first tier is exclusively ours; fallback tiers may share a
            // namespace, so only our prefixed keys are deleted there
            let result = if index == 0 {
                tier.clear().await
            } else {
                clear_prefixed(tier.as_ref(), &self.prefix).await
            };
            if let Err(err) = result {
                tracing::warn!("{} tier clear failed: {err}", tier.name());
                errors.push(err);
            }
        }
        if errors.len() == self.tiers.len() {
            Err(Self::surface(errors))
        } else {
            Ok(())
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut errors = Vec::new();
        let mut union = BTreeSet::new();
        for tier in &self.tiers {
            match tier.keys().await {
                Ok(keys) => union.extend(keys),
                Err(err) => {
                    tracing::warn!("{} tier key listing failed: {err}", tier.name());
                    errors.push(err);
                }
            }
        }
        if errors.len() == self.tiers.len() {
            Err(Self::surface(errors))
        } else {
            Ok(union.into_iter().collect())
        }
    }

    fn name(&self) -> &'static str {
        "tiered"
    }
}

async fn clear_prefixed(tier: &dyn StorageBackend, prefix: &str) -> Result<()> {
    for key in tier.keys().await? {
        if key.starts_with(prefix) {
            tier.remove(&key).await?;
        }
    }
    Ok(())
}
