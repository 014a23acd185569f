//! Runtime loader
//!
//! Resolves the on-disk variant a runtime needs, instantiates it off the async
//! reactor and installs it into the model cache, superseding whatever the
//! model was resident under before.

use super::cache::{LoadedAsset, ModelCache, ResidentModel};
use crate::error::{ModelboxError, ModelboxResult};
use crate::models::MetadataStore;
use crate::runtime::{Backends, Runtime};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

pub struct RuntimeLoader {
    store: Arc<MetadataStore>,
    backends: Backends,
    cache: ModelCache,
    /// Serializes loads so concurrent callers never double-load
    load_lock: Mutex<()>,
}

impl RuntimeLoader {
    pub fn new(store: Arc<MetadataStore>, backends: Backends) -> Self {
        Self {
            store,
            backends,
            cache: ModelCache::new(),
            load_lock: Mutex::new(()),
        }
    }

    /// Return the resident asset for `model_id` under `runtime`, loading it
    /// (and evicting any entry under another runtime) when needed.
    ///
    /// Never converts: a missing variant is reported as
    /// [`ModelboxError::FormatNotAvailable`].
    pub async fn ensure_loaded(
        &self,
        model_id: &str,
        runtime: Runtime,
    ) -> ModelboxResult<Arc<LoadedAsset>> {
        if let Some(asset) = self.resident(model_id, runtime).await {
            return Ok(asset);
        }

        let _guard = self.load_lock.lock().await;

        // Another caller may have finished the same load while we waited
        if let Some(asset) = self.resident(model_id, runtime).await {
            return Ok(asset);
        }

        let record = self
            .store
            .get(model_id)
            .await
            .ok_or_else(|| ModelboxError::NotFound(model_id.to_string()))?;

        let format = runtime.required_format();
        let dir = record
            .format_path(format)
            .filter(|path| path.is_dir())
            .map(|path| path.to_path_buf())
            .ok_or_else(|| ModelboxError::FormatNotAvailable {
                model_id: model_id.to_string(),
                format,
            })?;

        tracing::info!(
            model_id = %model_id,
            runtime = %runtime,
            path = ?dir,
            "Loading model"
        );

        let backend = self.backends.for_runtime(runtime);
        let started = Instant::now();
        let loaded = match tokio::task::spawn_blocking(move || backend.load(&dir)).await {
            Ok(result) => result,
            Err(e) => Err(anyhow::Error::new(e).context("load task panicked")),
        };

        let loaded = match loaded {
            Ok(loaded) => loaded,
            Err(source) => {
                tracing::error!(
                    model_id = %model_id,
                    runtime = %runtime,
                    error = %format!("{:#}", source),
                    "Model load failed"
                );
                crate::metrics::record_load_failure(model_id, runtime);
                return Err(ModelboxError::LoadFailure {
                    model_id: model_id.to_string(),
                    runtime,
                    source,
                });
            }
        };

        let asset = Arc::new(LoadedAsset::new(model_id, runtime, loaded));
        if let Some(previous) = self.cache.put(asset.clone()).await {
            tracing::info!(
                model_id = %model_id,
                previous_runtime = %previous.runtime,
                runtime = %runtime,
                "Evicted model from cache"
            );
            crate::metrics::record_eviction(model_id, previous.runtime);
        }

        let elapsed = started.elapsed().as_secs_f64();
        crate::metrics::record_load(model_id, runtime, elapsed);
        self.report_resident().await;

        tracing::info!(
            model_id = %model_id,
            runtime = %runtime,
            device = %asset.device,
            resident_bytes = asset.resident_bytes,
            elapsed_secs = elapsed,
            "Model loaded"
        );

        Ok(asset)
    }

    /// Drop the cache entry for a model. Returns whether one was resident.
    pub async fn unload(&self, model_id: &str) -> bool {
        let _guard = self.load_lock.lock().await;

        match self.cache.remove(model_id).await {
            Some(previous) => {
                tracing::info!(model_id = %model_id, runtime = %previous.runtime, "Unloaded model");
                crate::metrics::record_eviction(model_id, previous.runtime);
                self.report_resident().await;
                true
            }
            None => false,
        }
    }

    pub async fn resident_models(&self) -> Vec<ResidentModel> {
        self.cache.list().await
    }

    async fn resident(&self, model_id: &str, runtime: Runtime) -> Option<Arc<LoadedAsset>> {
        self.cache
            .get(model_id)
            .await
            .filter(|asset| asset.runtime == runtime)
    }

    async fn report_resident(&self) {
        crate::metrics::update_resident(self.cache.len().await, self.cache.resident_bytes().await);
    }
}
