//! Service registration types for composition-root wiring
//!
//! Othos crates do not expose process-wide singletons. Instead, each crate
//! that provides services submits a [`ServiceFactory`] via
//! `inventory::submit!`; the application's composition root calls
//! [`collect_all_services`] exactly once, keeps the returned instances, and
//! hands them to the code that needs them. Nothing outside the composition
//! root can reach a shared mutable instance.
//!
//! ## Factory-return pattern
//!
//! In a feature crate (e.g. othos-cache):
//!
//! ```rust,ignore
//! use othos_common::di::{ServiceEntry, ServiceFactory};
//! use std::sync::Arc;
//!
//! inventory::submit! {
//!     ServiceFactory::new("cache", create_cache_services)
//! }
//!
//! fn create_cache_services() -> Vec<ServiceEntry> {
//!     vec![ServiceEntry::new::<CacheManager>(Arc::new(manager))]
//! }
//! ```

use std::any::{Any, TypeId};
use std::sync::Arc;

use tracing::{debug, info};

/// Error type for service registration and resolution
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("service registration failed: {message}")]
    RegistrationFailed { message: String },

    #[error("service resolution failed: {message}")]
    ResolutionFailed { message: String },
}

/// A type-erased service instance produced by a factory.
pub struct ServiceEntry {
    /// Registration key
    pub type_id: TypeId,

    /// Human-readable type name for diagnostics
    pub type_name: &'static str,

    /// The service instance
    pub instance: Arc<dyn Any + Send + Sync>,
}

impl ServiceEntry {
    /// Create a new service entry for a concrete type
    pub fn new<T: Send + Sync + 'static>(instance: Arc<T>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            instance: instance as Arc<dyn Any + Send + Sync>,
        }
    }

    /// Downcast the entry back to its concrete type
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.instance).downcast::<T>().ok()
    }
}

impl std::fmt::Debug for ServiceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceEntry")
            .field("type_id", &self.type_id)
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// A named factory that creates the services of one crate.
///
/// Submitted via `inventory::submit!` and executed during composition-root
/// initialization. Factories run in priority order (lower value first).
pub struct ServiceFactory {
    /// Name of the service group (e.g. "cache")
    pub name: &'static str,

    /// Factory function that creates and returns services
    pub factory_fn: fn() -> Vec<ServiceEntry>,

    /// Registration order (lower = earlier, default = 100)
    pub priority: u32,
}

impl ServiceFactory {
    /// Create a new service factory with default priority
    pub const fn new(name: &'static str, factory_fn: fn() -> Vec<ServiceEntry>) -> Self {
        Self {
            name,
            factory_fn,
            priority: 100,
        }
    }

    /// Create a new service factory with custom priority
    pub const fn with_priority(
        name: &'static str,
        factory_fn: fn() -> Vec<ServiceEntry>,
        priority: u32,
    ) -> Self {
        Self {
            name,
            factory_fn,
            priority,
        }
    }
}

inventory::collect!(ServiceFactory);

/// Run every discovered factory and collect the services they produce.
///
/// Call this once, at the application's composition root. The caller owns
/// the returned instances; this module keeps no global copy of them.
pub fn collect_all_services() -> Vec<ServiceEntry> {
    let mut factories: Vec<&ServiceFactory> = inventory::iter::<ServiceFactory>().collect();
    factories.sort_by_key(|f| f.priority);

    info!("discovered {} service factories", factories.len());

    let mut all_services = Vec::new();
    for factory in factories {
        let services = (factory.factory_fn)();
        debug!(
            "factory '{}' created {} services (priority {})",
            factory.name,
            services.len(),
            factory.priority
        );
        all_services.extend(services);
    }

    all_services
}

/// Number of factories discovered via inventory.
pub fn discovered_factory_count() -> usize {
    inventory::iter::<ServiceFactory>().count()
}

/// Names of all discovered factories.
pub fn list_discovered_factories() -> Vec<&'static str> {
    inventory::iter::<ServiceFactory>().map(|f| f.name).collect()
}
