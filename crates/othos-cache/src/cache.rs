//! Cache manager: configuration, expiry sweeps, and the public cache API
//!
//! The manager composes a storage backend, the payload codec, and the
//! invalidation rule engine. Read and write paths never surface errors to
//! callers; every internal failure degrades to a cache miss or a skipped
//! invalidation and is logged.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::codec::Codec;
use crate::entry::{CacheEntry, CacheMetadata, CacheMetadataUpdate, EntityType, METADATA_KEY};
use crate::error::Result;
use crate::invalidation::{cascade_patterns, glob_to_regex, invalidation_patterns};
use crate::metrics::{CacheMetrics, CacheStats, OperationTimer};
use crate::storage::{DiskStore, MemoryStore, StorageBackend, TieredStore};

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL applied when `set` is called without one
    pub default_ttl: Duration,
    /// Advisory size bound in bytes; nothing evicts on it
    pub max_cache_size: u64,
    /// Period of the background expiry sweep
    pub cleanup_interval: Duration,
    /// Compress serialized entries before storage
    pub compression_enabled: bool,
    /// Prepended to every logical key before it reaches storage
    pub storage_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            max_cache_size: 50 * 1024 * 1024,
            cleanup_interval: Duration::from_secs(3600),
            compression_enabled: true,
            storage_prefix: "oth_cache_".to_string(),
        }
    }
}

/// The cache orchestrator.
///
/// Construction is immediately usable: the sweep timer and the asynchronous
/// metadata load start right away when a Tokio runtime is present, and are
/// deferred to the first operation otherwise. [`CacheManager::destroy`]
/// cancels the timer; a destroyed manager ignores further calls and logs
/// them at debug level.
pub struct CacheManager {
    config: CacheConfig,
    storage: Arc<dyn StorageBackend>,
    codec: Codec,
    metrics: Arc<CacheMetrics>,
    metadata: Arc<RwLock<Option<CacheMetadata>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    destroyed: Arc<AtomicBool>,
}

impl CacheManager {
    pub fn new(storage: Arc<dyn StorageBackend>, config: CacheConfig) -> Self {
        let manager = Self {
            codec: Codec::new(config.compression_enabled),
            config,
            storage,
            metrics: Arc::new(CacheMetrics::new()),
            metadata: Arc::new(RwLock::new(None)),
            sweeper: Mutex::new(None),
            destroyed: Arc::new(AtomicBool::new(false)),
        };
        manager.start_background_tasks();
        manager
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Counter snapshot for diagnostics
    pub fn stats(&self) -> CacheStats {
        self.metrics.snapshot()
    }

    /// Read a cached value. Absent, expired, and undecodable entries are all
    /// misses; expired entries are deleted on access.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if self.is_destroyed() {
            return None;
        }
        self.ensure_sweeper();

        let timer = OperationTimer::start();
        let physical = self.physical_key(key);
        let raw = match self.storage.get(&physical).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.metrics.record_miss();
                return None;
            }
            Err(err) => {
                tracing::warn!("cache read failed for {key}: {err}");
                self.metrics.record_miss();
                return None;
            }
        };

        let entry: CacheEntry<T> = match serde_json::from_str(&self.codec.decompress(&raw)) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::debug!("undecodable cache entry {key} treated as miss: {err}");
                self.metrics.record_miss();
                return None;
            }
        };

        if entry.is_expired() {
            if let Err(err) = self.storage.remove(&physical).await {
                tracing::debug!("could not drop expired entry {key}: {err}");
            }
            self.metrics.record_miss();
            return None;
        }

        self.metrics.record_hit(timer.elapsed_ms());
        Some(entry.data)
    }

    /// Store a value. Never fails from the caller's perspective: quota
    /// exhaustion triggers a best-effort expiry sweep (the write is not
    /// retried), any other failure is logged and swallowed.
    pub async fn set<T: Serialize>(&self, key: &str, data: T, ttl: Option<Duration>) {
        if self.is_destroyed() {
            return;
        }
        self.ensure_sweeper();

        let meta = self.metadata_snapshot().await;
        let ttl_ms = ttl.unwrap_or(self.config.default_ttl).as_millis() as u64;
        let entry = CacheEntry::new(key, data, ttl_ms, &meta.version, &meta.user_id);

        let serialized = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!("cache write skipped, entry for {key} not serializable: {err}");
                return;
            }
        };
        let stored = self.codec.compress(&serialized);

        match self.storage.set(&self.physical_key(key), &stored).await {
            Ok(()) => self.metrics.record_write(),
            Err(err) if err.is_quota() => {
                self.metrics.record_quota_event();
                tracing::warn!("cache write for {key} hit the storage quota, scheduling sweep");
                self.spawn_opportunistic_sweep();
            }
            Err(err) => tracing::warn!("cache write failed for {key}: {err}"),
        }
    }

    /// Remove one exact logical key. Missing keys are not an error.
    pub async fn invalidate(&self, key: &str) {
        if self.is_destroyed() {
            return;
        }
        match self.storage.remove(&self.physical_key(key)).await {
            Ok(true) => self.metrics.record_invalidations(1),
            Ok(false) => {}
            Err(err) => tracing::warn!("invalidation failed for {key}: {err}"),
        }
    }

    /// Remove several exact logical keys.
    pub async fn invalidate_many<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for key in keys {
            self.invalidate(key.as_ref()).await;
        }
    }

    /// Remove every entry whose logical key matches the glob. The metadata
    /// record is never considered, whatever the pattern. Returns the number
    /// of entries removed.
    pub async fn invalidate_pattern(&self, pattern: &str) -> usize {
        if self.is_destroyed() {
            return 0;
        }
        let regex = match glob_to_regex(pattern) {
            Ok(regex) => regex,
            Err(err) => {
                tracing::warn!("unusable invalidation pattern {pattern}: {err}");
                return 0;
            }
        };
        let keys = match self.storage.keys().await {
            Ok(keys) => keys,
            Err(err) => {
                tracing::warn!("key listing failed during pattern invalidation: {err}");
                return 0;
            }
        };

        let metadata_physical = self.physical_key(METADATA_KEY);
        let mut removed = 0;
        for physical in keys {
            if physical == metadata_physical {
                continue;
            }
            let Some(logical) = physical.strip_prefix(self.config.storage_prefix.as_str()) else {
                continue;
            };
            if !regex.is_match(logical) {
                continue;
            }
            match self.storage.remove(&physical).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(err) => tracing::warn!("failed to remove {logical}: {err}"),
            }
        }
        self.metrics.record_invalidations(removed as u64);
        removed
    }

    /// Remove an exact key, then every related entry its entity type
    /// cascades to.
    pub async fn invalidate_with_cascade(
        &self,
        key: &str,
        entity_type: EntityType,
        entity_id: Option<&str>,
    ) {
        self.invalidate(key).await;
        for pattern in cascade_patterns(entity_type, entity_id) {
            self.invalidate_pattern(&pattern).await;
        }
    }

    /// Purge everything cached under a user's key namespace.
    pub async fn invalidate_user(&self, user_id: &str) {
        self.invalidate_pattern(&format!("{user_id}:*")).await;
    }

    /// Purge every cached entry. Entries do not record the session that
    /// wrote them, so this cannot scope tighter than the whole cache; the
    /// metadata record survives.
    pub async fn invalidate_session(&self, session_id: &str) {
        tracing::debug!("session {session_id} invalidation purges all cached entries");
        self.invalidate_pattern("*").await;
    }

    /// True when no usable entry exists: absent, expired, or unreadable.
    pub async fn is_stale(&self, key: &str) -> bool {
        if self.is_destroyed() {
            return true;
        }
        match self.storage.get(&self.physical_key(key)).await {
            Ok(Some(raw)) => {
                match serde_json::from_str::<CacheEntry<serde_json::Value>>(
                    &self.codec.decompress(&raw),
                ) {
                    Ok(entry) => entry.is_expired(),
                    Err(_) => true,
                }
            }
            Ok(None) => true,
            Err(err) => {
                tracing::debug!("treating {key} as stale, read failed: {err}");
                true
            }
        }
    }

    pub async fn validate_freshness(&self, key: &str) -> bool {
        !self.is_stale(key).await
    }

    /// Drop every expired or corrupted entry now.
    pub async fn refresh_stale_data(&self) {
        if self.is_destroyed() {
            return;
        }
        let removed = sweep_expired(
            self.storage.as_ref(),
            self.codec,
            &self.config.storage_prefix,
            &self.metrics,
        )
        .await;
        tracing::info!("removed {removed} stale cache entries");
    }

    /// Shallow-merge a partial update into the metadata record and persist it.
    pub async fn update_metadata(&self, update: CacheMetadataUpdate) {
        if self.is_destroyed() {
            return;
        }
        let mut meta = self.metadata_snapshot().await;
        meta.apply(update);
        persist_metadata(self.storage.as_ref(), &self.config.storage_prefix, &meta).await;
        *self.metadata.write().await = Some(meta);
    }

    /// Rebind the cache to a user/session pair, stamping `last_sync`.
    pub async fn bind_session(&self, user_id: &str, session_id: &str) {
        self.update_metadata(CacheMetadataUpdate {
            user_id: Some(user_id.to_string()),
            session_id: Some(session_id.to_string()),
            last_sync: Some(chrono::Utc::now().timestamp_millis()),
            ..Default::default()
        })
        .await;
    }

    /// Apply the invalidation rules for a named mutation, then cascade from
    /// the mutated entity when both its type and id are known.
    pub async fn invalidate_by_operation(
        &self,
        operation: &str,
        user_id: &str,
        entity_id: Option<&str>,
        entity_type: Option<EntityType>,
    ) {
        if self.is_destroyed() {
            return;
        }
        let patterns = invalidation_patterns(operation, entity_id, Some(user_id));
        if patterns.is_empty() {
            tracing::debug!("no invalidation rules for operation {operation}, nothing to purge");
        }
        for pattern in &patterns {
            self.invalidate_pattern(pattern).await;
        }

        if let (Some(entity_type), Some(entity_id)) = (entity_type, entity_id) {
            let key = format!("user:{user_id}:{}:{entity_id}", entity_type.as_str());
            self.invalidate_with_cascade(&key, entity_type, Some(entity_id))
                .await;
        }
    }

    /// Drop everything, metadata included. A fresh metadata record is
    /// created on the next operation that needs one.
    pub async fn clear(&self) {
        if self.is_destroyed() {
            return;
        }
        if let Err(err) = self.storage.clear().await {
            tracing::warn!("cache clear failed: {err}");
        }
        *self.metadata.write().await = None;
    }

    /// Cancel the sweep timer and retire this manager. In-flight operations
    /// complete; subsequent calls are ignored.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        if let Ok(mut guard) = self.sweeper.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }

    fn is_destroyed(&self) -> bool {
        if self.destroyed.load(Ordering::SeqCst) {
            tracing::debug!("cache manager used after destroy, ignoring call");
            return true;
        }
        false
    }

    fn physical_key(&self, logical: &str) -> String {
        format!("{}{}", self.config.storage_prefix, logical)
    }

    async fn metadata_snapshot(&self) -> CacheMetadata {
        load_or_create_metadata(
            self.storage.as_ref(),
            self.codec,
            &self.config.storage_prefix,
            &self.metadata,
        )
        .await
    }

    fn start_background_tasks(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no async runtime at construction, deferring background tasks");
            return;
        };

        // metadata loads off the construction path; operations that need it
        // earlier load it inline
        let storage = Arc::clone(&self.storage);
        let codec = self.codec;
        let prefix = self.config.storage_prefix.clone();
        let slot = Arc::clone(&self.metadata);
        handle.spawn(async move {
            load_or_create_metadata(storage.as_ref(), codec, &prefix, &slot).await;
        });

        self.start_sweeper_on(&handle);
    }

    fn ensure_sweeper(&self) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        {
            let Ok(guard) = self.sweeper.lock() else { return };
            if guard.is_some() {
                return;
            }
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            self.start_sweeper_on(&handle);
        }
    }

    fn start_sweeper_on(&self, handle: &tokio::runtime::Handle) {
        let Ok(mut guard) = self.sweeper.lock() else { return };
        if guard.is_some() {
            return;
        }
        *guard = Some(handle.spawn(sweep_loop(
            Arc::clone(&self.storage),
            self.codec,
            self.config.storage_prefix.clone(),
            Arc::clone(&self.metrics),
            Arc::clone(&self.destroyed),
            self.config.cleanup_interval,
        )));
    }

    fn spawn_opportunistic_sweep(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let storage = Arc::clone(&self.storage);
        let codec = self.codec;
        let prefix = self.config.storage_prefix.clone();
        let metrics = Arc::clone(&self.metrics);
        handle.spawn(async move {
            let removed = sweep_expired(storage.as_ref(), codec, &prefix, &metrics).await;
            tracing::debug!("quota-pressure sweep removed {removed} entries");
        });
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.sweeper.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

async fn sweep_loop(
    storage: Arc<dyn StorageBackend>,
    codec: Codec,
    prefix: String,
    metrics: Arc<CacheMetrics>,
    destroyed: Arc<AtomicBool>,
    period: Duration,
) {
    if period.is_zero() {
        return;
    }
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // the first tick completes immediately
    loop {
        ticker.tick().await;
        if destroyed.load(Ordering::SeqCst) {
            break;
        }
        let removed = sweep_expired(storage.as_ref(), codec, &prefix, &metrics).await;
        if removed > 0 {
            tracing::debug!("expiry sweep removed {removed} entries");
        }
    }
}

/// Remove expired and corrupted entries. Shared by the interval timer, the
/// quota-pressure path, and `refresh_stale_data`; safe to run concurrently
/// with foreground operations because deletes of absent keys are no-ops.
async fn sweep_expired(
    storage: &dyn StorageBackend,
    codec: Codec,
    prefix: &str,
    metrics: &CacheMetrics,
) -> u64 {
    let keys = match storage.keys().await {
        Ok(keys) => keys,
        Err(err) => {
            tracing::warn!("key listing failed during sweep: {err}");
            return 0;
        }
    };

    let metadata_physical = format!("{prefix}{METADATA_KEY}");
    let mut removed = 0;
    for physical in keys {
        if physical == metadata_physical || !physical.starts_with(prefix) {
            continue;
        }
        let drop_entry = match storage.get(&physical).await {
            Ok(Some(raw)) => {
                match serde_json::from_str::<CacheEntry<serde_json::Value>>(&codec.decompress(&raw))
                {
                    Ok(entry) => entry.is_expired(),
                    // corrupted entries are swept along with expired ones
                    Err(_) => true,
                }
            }
            Ok(None) => false,
            // unreadable right now; the next sweep will see it again
            Err(_) => false,
        };
        if drop_entry {
            if let Ok(true) = storage.remove(&physical).await {
                removed += 1;
            }
        }
    }
    metrics.record_swept(removed);
    removed
}

async fn load_or_create_metadata(
    storage: &dyn StorageBackend,
    codec: Codec,
    prefix: &str,
    slot: &RwLock<Option<CacheMetadata>>,
) -> CacheMetadata {
    if let Some(meta) = slot.read().await.clone() {
        return meta;
    }
    let mut guard = slot.write().await;
    if let Some(meta) = guard.as_ref() {
        return meta.clone();
    }

    let physical = format!("{prefix}{METADATA_KEY}");
    let loaded = match storage.get(&physical).await {
        Ok(Some(raw)) => serde_json::from_str::<CacheMetadata>(&codec.decompress(&raw)).ok(),
        Ok(None) => None,
        Err(err) => {
            tracing::warn!("metadata read failed, starting from defaults: {err}");
            None
        }
    };

    let meta = match loaded {
        Some(meta) => meta,
        None => {
            let meta = CacheMetadata::default();
            persist_metadata(storage, prefix, &meta).await;
            meta
        }
    };
    *guard = Some(meta.clone());
    meta
}

async fn persist_metadata(storage: &dyn StorageBackend, prefix: &str, meta: &CacheMetadata) {
    let physical = format!("{prefix}{METADATA_KEY}");
    match serde_json::to_string(meta) {
        Ok(raw) => {
            if let Err(err) = storage.set(&physical, &raw).await {
                tracing::warn!("metadata write failed: {err}");
            }
        }
        Err(err) => tracing::warn!("metadata serialization failed: {err}"),
    }
}

/// Composition-root factory: a disk-primary, memory-fallback manager with
/// default configuration. The caller owns the returned instance; there is no
/// process-global cache to reach for.
pub async fn build_default_manager(data_dir: impl Into<PathBuf>) -> Result<Arc<CacheManager>> {
    let config = CacheConfig::default();
    let disk = DiskStore::open(data_dir).await?;
    let storage = TieredStore::new(
        vec![
            Arc::new(disk) as Arc<dyn StorageBackend>,
            Arc::new(MemoryStore::new()),
        ],
        config.storage_prefix.clone(),
    )?;
    Ok(Arc::new(CacheManager::new(Arc::new(storage), config)))
}
