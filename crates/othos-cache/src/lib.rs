//! # Othos Cache
//!
//! Client-side caching infrastructure for Othos: TTL expiration, cascade
//! invalidation across related entity types, tiered storage with typed
//! fallback, and transparent payload compression.
//!
//! ## Features
//!
//! - **Tiered storage**: durable disk store with an in-memory fallback,
//!   tried in order with typed failure reasons
//! - **TTL expiration**: lazy deletion on read plus a periodic sweep
//! - **Cascade invalidation**: a mutation purges every related entry, driven
//!   by a static rule table keyed on operation names
//! - **Compression**: deflate-compressed payloads with transparent reads of
//!   legacy uncompressed entries
//! - **Defensive degradation**: reads and writes never fail the caller; the
//!   worst observable outcome is a cache miss

pub mod cache;
pub mod codec;
pub mod di;
pub mod entry;
pub mod error;
pub mod invalidation;
pub mod metrics;
pub mod storage;

pub use cache::{build_default_manager, CacheConfig, CacheManager};
pub use codec::Codec;
pub use entry::{CacheEntry, CacheMetadata, CacheMetadataUpdate, EntityType};
pub use error::CacheError;
pub use invalidation::{InvalidationRule, InvalidationTrigger};
pub use metrics::{CacheMetrics, CacheStats};
pub use storage::{DiskStore, MemoryStore, StorageBackend, TieredStore};

/// Re-export commonly used Result type
pub type Result<T> = std::result::Result<T, CacheError>;
