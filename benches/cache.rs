//! Model cache and loader fast-path benchmarks
//!
//! Benchmarks for:
//! - Cache lookup with many resident models
//! - `ensure_loaded` on a cache hit (the per-request path)
//! - Catalog lookups in the metadata store

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use modelbox::engine::{LoadedAsset, ModelCache, RuntimeLoader};
use modelbox::models::{MetadataStore, ModelRecord};
use modelbox::runtime::{
    Backends, CausalLm, DeviceKind, LoadedModel, Runtime as ModelRuntime, RuntimeBackend,
    Sampling, TextCodec,
};
use std::hint::black_box;
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::Runtime;

struct NullModel;

impl CausalLm for NullModel {
    fn generate(
        &mut self,
        _prompt_ids: &[u32],
        _max_new_tokens: usize,
        _sampling: &Sampling,
        _on_token: &mut dyn FnMut(u32) -> bool,
    ) -> anyhow::Result<Vec<u32>> {
        Ok(Vec::new())
    }
}

struct NullCodec;

impl TextCodec for NullCodec {
    fn encode(&self, _text: &str) -> anyhow::Result<Vec<u32>> {
        Ok(Vec::new())
    }

    fn decode(&self, _ids: &[u32]) -> anyhow::Result<String> {
        Ok(String::new())
    }
}

struct NullBackend;

impl RuntimeBackend for NullBackend {
    fn load(&self, _dir: &Path) -> anyhow::Result<LoadedModel> {
        Ok(null_model())
    }
}

fn null_model() -> LoadedModel {
    LoadedModel {
        model: Box::new(NullModel),
        codec: Arc::new(NullCodec),
        device: DeviceKind::Cpu,
        resident_bytes: 0,
    }
}

/// Benchmark cache get with a populated table
fn bench_cache_get(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("cache_get");

    for model_count in [1, 10, 100] {
        let cache = ModelCache::new();
        rt.block_on(async {
            for i in 0..model_count {
                let asset = LoadedAsset::new(format!("org/model-{}", i), ModelRuntime::Native, null_model());
                cache.put(Arc::new(asset)).await;
            }
        });

        group.bench_with_input(
            BenchmarkId::new("models", model_count),
            &cache,
            |b, cache| {
                b.to_async(&rt).iter(|| async {
                    let _asset = cache.get(black_box("org/model-0")).await;
                });
            },
        );
    }
    group.finish();
}

/// Benchmark the cache-hit path of ensure_loaded
fn bench_ensure_loaded_hit(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let temp_dir = tempfile::tempdir().unwrap();

    let loader = rt.block_on(async {
        let store = Arc::new(
            MetadataStore::open(temp_dir.path().join("models_metadata.json"))
                .await
                .unwrap(),
        );
        store
            .put(ModelRecord::new(
                "org/model",
                "main",
                temp_dir.path().to_path_buf(),
            ))
            .await
            .unwrap();

        let backend = Arc::new(NullBackend);
        let loader = RuntimeLoader::new(store, Backends::new(backend.clone(), backend));
        loader
            .ensure_loaded("org/model", ModelRuntime::Native)
            .await
            .unwrap();
        loader
    });

    c.bench_function("ensure_loaded_hit", |b| {
        b.to_async(&rt).iter(|| async {
            let _asset = loader
                .ensure_loaded(black_box("org/model"), ModelRuntime::Native)
                .await
                .unwrap();
        });
    });
}

/// Benchmark metadata store get with many records
fn bench_store_get(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("store_get");

    for record_count in [10, 100] {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = rt.block_on(async {
            let store = MetadataStore::open(temp_dir.path().join("models_metadata.json"))
                .await
                .unwrap();
            for i in 0..record_count {
                store
                    .put(ModelRecord::new(
                        format!("org/model-{}", i),
                        "main",
                        temp_dir.path().join(i.to_string()),
                    ))
                    .await
                    .unwrap();
            }
            store
        });

        group.bench_with_input(
            BenchmarkId::new("records", record_count),
            &store,
            |b, store| {
                b.to_async(&rt).iter(|| async {
                    let _record = store.get(black_box("org/model-0")).await;
                });
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_cache_get,
    bench_ensure_loaded_hit,
    bench_store_get
);
criterion_main!(benches);
