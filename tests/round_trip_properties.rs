//! Property tests: anything serializable survives a set/get round trip,
//! with and without compression engaging.

use std::sync::Arc;

use othos_cache::{CacheConfig, CacheManager, MemoryStore};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DotRecord {
    id: String,
    label: String,
    position: (i64, i64),
    tags: Vec<String>,
}

fn dot_record() -> impl Strategy<Value = DotRecord> {
    (
        "[a-f0-9]{8}-[a-f0-9]{4}",
        ".{0,64}",
        (any::<i64>(), any::<i64>()),
        proptest::collection::vec("[a-z]{1,12}", 0..5),
    )
        .prop_map(|(id, label, position, tags)| DotRecord {
            id,
            label,
            position,
            tags,
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_set_get_round_trips(record in dot_record(), compress in any::<bool>()) {
        let rt = Runtime::new().expect("runtime");
        rt.block_on(async {
            let config = CacheConfig {
                compression_enabled: compress,
                ..CacheConfig::default()
            };
            let manager = CacheManager::new(Arc::new(MemoryStore::new()), config);

            manager.set("user:u1:dot:d1", record.clone(), None).await;
            let cached: Option<DotRecord> = manager.get("user:u1:dot:d1").await;
            prop_assert_eq!(cached, Some(record));
            Ok(())
        })?;
    }

    #[test]
    fn prop_missing_keys_are_stale(key in "[a-z:]{1,32}") {
        let rt = Runtime::new().expect("runtime");
        rt.block_on(async {
            let manager = CacheManager::new(
                Arc::new(MemoryStore::new()),
                CacheConfig::default(),
            );
            prop_assert!(manager.is_stale(&key).await);
            prop_assert!(!manager.validate_freshness(&key).await);
            Ok(())
        })?;
    }
}
