use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tokio::runtime::Runtime;

use othos_cache::invalidation::glob_to_regex;
use othos_cache::{CacheConfig, CacheManager, Codec, MemoryStore};

fn benchmark_codec(c: &mut Criterion) {
    let codec = Codec::new(true);
    let payload = serde_json::json!({
        "key": "user:u1:collections:list",
        "data": vec!["collection"; 64],
    })
    .to_string();
    let stored = codec.compress(&payload);

    c.bench_function("codec_compress", |b| {
        b.iter(|| codec.compress(black_box(&payload)))
    });
    c.bench_function("codec_decompress", |b| {
        b.iter(|| codec.decompress(black_box(&stored)))
    });
}

fn benchmark_glob(c: &mut Criterion) {
    let regex = glob_to_regex("user:*:collections*").expect("pattern compiles");

    c.bench_function("glob_compile", |b| {
        b.iter(|| glob_to_regex(black_box("user:*:collections*")))
    });
    c.bench_function("glob_match", |b| {
        b.iter(|| regex.is_match(black_box("user:u1:collections:list")))
    });
}

fn benchmark_manager(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let manager = rt.block_on(async {
        let manager = CacheManager::new(Arc::new(MemoryStore::new()), CacheConfig::default());
        manager.set("user:u1:dot:d1", vec![1u32; 128], None).await;
        manager
    });

    c.bench_function("manager_get_hit", |b| {
        b.iter(|| {
            rt.block_on(async { manager.get::<Vec<u32>>(black_box("user:u1:dot:d1")).await })
        })
    });
    c.bench_function("manager_set", |b| {
        b.iter(|| {
            rt.block_on(async {
                manager
                    .set(black_box("user:u1:dot:d2"), vec![2u32; 128], None)
                    .await
            })
        })
    });
}

criterion_group!(benches, benchmark_codec, benchmark_glob, benchmark_manager);
criterion_main!(benches);
