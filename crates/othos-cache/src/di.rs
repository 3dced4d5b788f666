//! Dependency injection support for othos-cache

use std::sync::Arc;

use othos_common::di::{ServiceEntry, ServiceFactory};

use crate::cache::{CacheConfig, CacheManager};
use crate::storage::MemoryStore;

inventory::submit! {
    ServiceFactory::new("cache", create_cache_services)
}

fn create_cache_services() -> Vec<ServiceEntry> {
    // memory-backed default; applications that want the disk-primary tiered
    // setup call build_default_manager at their composition root instead
    let storage = Arc::new(MemoryStore::new());
    let manager = CacheManager::new(storage, CacheConfig::default());

    vec![ServiceEntry::new::<CacheManager>(Arc::new(manager))]
}

#[cfg(test)]
mod tests {
    use othos_common::di::list_discovered_factories;

    #[test]
    fn test_cache_factory_registered() {
        let factories = list_discovered_factories();
        assert!(factories.contains(&"cache"), "factory should be registered");
    }

    #[tokio::test]
    async fn test_factory_produces_usable_manager() {
        let services = super::create_cache_services();
        let manager = services[0].resolve::<super::CacheManager>().unwrap();

        manager.set("user:u1:dot:d1", 1, None).await;
        assert_eq!(manager.get::<i32>("user:u1:dot:d1").await, Some(1));
    }
}
