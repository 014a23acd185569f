//! Inference engine: the public face of the core
//!
//! Owns the metadata store, converter and runtime loader and exposes the model
//! lifecycle (download, convert, load, unload) alongside blocking and
//! streaming generation.

use super::cache::{LoadedAsset, ResidentModel};
use super::loader::RuntimeLoader;
use super::stream::{GenerationStream, spawn_stream_worker};
use crate::config::ModelboxConfig;
use crate::error::{ModelboxError, ModelboxResult};
use crate::models::{
    Exporter, FormatConverter, HubSource, MetadataStore, ModelFormat, ModelRecord, ModelSource,
    OptimumExporter, StorageLayout, dir_size, parse_model_config,
};
use crate::runtime::{Backends, Runtime, Sampling};
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Engine settings that are not owned by a collaborator
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub sampling: Sampling,
    pub stream_buffer: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            sampling: Sampling::default(),
            stream_buffer: 1,
        }
    }
}

pub struct InferenceEngine {
    store: Arc<MetadataStore>,
    source: Arc<dyn ModelSource>,
    converter: FormatConverter,
    loader: RuntimeLoader,
    layout: StorageLayout,
    options: EngineOptions,
}

impl InferenceEngine {
    /// Open the metadata store under `layout` and wire up the collaborators
    pub async fn open(
        layout: StorageLayout,
        source: Arc<dyn ModelSource>,
        exporter: Arc<dyn Exporter>,
        backends: Backends,
        options: EngineOptions,
    ) -> Result<Self> {
        let store = Arc::new(MetadataStore::open(layout.metadata_file()).await?);
        let converter = FormatConverter::new(store.clone(), exporter, layout.clone());
        let loader = RuntimeLoader::new(store.clone(), backends);

        tracing::info!(
            storage_root = ?layout.root(),
            models = store.count().await,
            "Inference engine ready"
        );

        Ok(Self {
            store,
            source,
            converter,
            loader,
            layout,
            options,
        })
    }

    /// Production wiring: hf-hub downloads, optimum-cli conversion, candle
    /// and ONNX Runtime backends
    pub async fn from_config(config: &ModelboxConfig) -> Result<Self> {
        let layout = config.layout();
        let source = Arc::new(HubSource::new(layout.models_dir(), config.hf_token.clone()));
        let exporter = Arc::new(OptimumExporter::new(
            config.exporter.optimum_cli_path.clone(),
            config.exporter.quantization_preset.clone(),
        ));
        let options = EngineOptions {
            sampling: config.sampling.clone(),
            stream_buffer: config.stream_buffer,
        };

        Self::open(
            layout,
            source,
            exporter,
            Backends::production(config.device),
            options,
        )
        .await
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    // ========================================================================
    // Catalog
    // ========================================================================

    /// Known model ids, sorted
    pub async fn list_models(&self) -> Vec<String> {
        self.store.list().await
    }

    pub async fn get_model(&self, model_id: &str) -> ModelboxResult<ModelRecord> {
        self.store
            .get(model_id)
            .await
            .ok_or_else(|| ModelboxError::NotFound(model_id.to_string()))
    }

    /// Fetch the native snapshot at `revision` and record it.
    ///
    /// A record already at `revision` is returned without fetching. A
    /// different revision refreshes the native variant; derived variants are
    /// kept as they are.
    pub async fn download(&self, model_id: &str, revision: &str) -> ModelboxResult<ModelRecord> {
        let existing = self.store.get(model_id).await;
        if let Some(record) = &existing
            && record.revision == revision
        {
            tracing::debug!(model_id = %model_id, revision = %revision, "Model already downloaded");
            return Ok(record.clone());
        }

        tracing::info!(model_id = %model_id, revision = %revision, "Downloading model");

        let path = match self.source.fetch(model_id, revision).await {
            Ok(path) => path,
            Err(source) => {
                tracing::error!(model_id = %model_id, error = %format!("{:#}", source), "Download failed");
                crate::metrics::record_download(model_id, false);
                return Err(ModelboxError::Download {
                    model_id: model_id.to_string(),
                    source,
                });
            }
        };

        let snapshot = path.clone();
        let (metadata, size_bytes) = tokio::task::spawn_blocking(move || {
            (parse_model_config(&snapshot), dir_size(&snapshot))
        })
        .await
        .map_err(|e| ModelboxError::Download {
            model_id: model_id.to_string(),
            source: anyhow::Error::new(e).context("snapshot inspection task panicked"),
        })?;

        let record = match existing {
            Some(mut record) => {
                let kept = record.refresh_native(revision, path);
                if !kept.is_empty() {
                    tracing::warn!(
                        model_id = %model_id,
                        revision = %revision,
                        formats = ?kept,
                        "Keeping variants converted from a previous revision"
                    );
                }
                record.with_metadata(metadata).with_size(size_bytes)
            }
            None => ModelRecord::new(model_id, revision, path)
                .with_metadata(metadata)
                .with_size(size_bytes),
        };

        self.store
            .put(record.clone())
            .await
            .map_err(ModelboxError::storage)?;

        crate::metrics::record_download(model_id, true);
        tracing::info!(
            model_id = %model_id,
            revision = %revision,
            path = ?record.path,
            size_bytes,
            "Model downloaded"
        );

        Ok(record)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub async fn convert(
        &self,
        model_id: &str,
        format: ModelFormat,
        quantize: bool,
    ) -> ModelboxResult<PathBuf> {
        self.converter.convert(model_id, format, quantize).await
    }

    /// Make `model_id` resident under `runtime`
    pub async fn load(&self, model_id: &str, runtime: Runtime) -> ModelboxResult<Arc<LoadedAsset>> {
        self.loader.ensure_loaded(model_id, runtime).await
    }

    /// Drop a resident model. Returns whether it was resident.
    pub async fn unload(&self, model_id: &str) -> bool {
        self.loader.unload(model_id).await
    }

    pub async fn resident_models(&self) -> Vec<ResidentModel> {
        self.loader.resident_models().await
    }

    // ========================================================================
    // Generation
    // ========================================================================

    /// Blocking generation.
    ///
    /// `max_length` bounds the total sequence, prompt included. Returns the
    /// decoded prompt plus continuation with special tokens skipped.
    pub async fn generate(
        &self,
        model_id: &str,
        prompt: &str,
        max_length: usize,
        runtime: Runtime,
    ) -> ModelboxResult<String> {
        let started = Instant::now();
        let asset = self.loader.ensure_loaded(model_id, runtime).await?;

        let worker_asset = asset.clone();
        let prompt = prompt.to_string();
        let sampling = self.options.sampling.clone();
        let result = match tokio::task::spawn_blocking(move || {
            generate_blocking(&worker_asset, &prompt, max_length, &sampling)
        })
        .await
        {
            Ok(result) => result,
            Err(e) => Err(anyhow::Error::new(e).context("generation task panicked")),
        };

        let output = result.map_err(|source| {
            tracing::error!(
                model_id = %model_id,
                runtime = %runtime,
                error = %format!("{:#}", source),
                "Generation failed"
            );
            crate::metrics::record_generation_failure(runtime);
            ModelboxError::generation(model_id, source)
        })?;

        let total = started.elapsed();
        crate::metrics::record_generation(
            runtime,
            output.generate_time.as_secs_f64(),
            total.as_secs_f64(),
            output.new_tokens,
        );

        if asset.device.is_accelerator() {
            tracing::info!(
                model_id = %model_id,
                runtime = %runtime,
                device = %asset.device,
                new_tokens = output.new_tokens,
                generate_secs = output.generate_time.as_secs_f64(),
                total_secs = total.as_secs_f64(),
                resident_bytes = asset.resident_bytes,
                "Generation complete"
            );
        } else {
            tracing::info!(
                model_id = %model_id,
                runtime = %runtime,
                new_tokens = output.new_tokens,
                generate_secs = output.generate_time.as_secs_f64(),
                total_secs = total.as_secs_f64(),
                "Generation complete"
            );
        }

        Ok(output.text)
    }

    /// Streaming generation on the native runtime.
    ///
    /// A model resident under another runtime is reloaded onto native first.
    /// `max_length` is the budget of new tokens; the prompt is not counted.
    /// Load errors are returned directly; errors during generation arrive as
    /// the stream's terminal element.
    pub async fn generate_stream(
        &self,
        model_id: &str,
        prompt: &str,
        max_length: usize,
    ) -> ModelboxResult<GenerationStream> {
        let asset = self.loader.ensure_loaded(model_id, Runtime::Native).await?;

        tracing::info!(model_id = %model_id, max_length, "Starting generation stream");
        crate::metrics::record_stream_started(model_id);

        Ok(spawn_stream_worker(
            asset,
            prompt.to_string(),
            max_length,
            self.options.sampling.clone(),
            self.options.stream_buffer,
        ))
    }
}

struct BlockingOutput {
    text: String,
    new_tokens: usize,
    generate_time: Duration,
}

fn generate_blocking(
    asset: &LoadedAsset,
    prompt: &str,
    max_length: usize,
    sampling: &Sampling,
) -> Result<BlockingOutput> {
    let prompt_ids = asset.codec.encode(prompt)?;
    let budget = max_length.saturating_sub(prompt_ids.len());

    let started = Instant::now();
    let generated =
        asset.with_model(|model| model.generate(&prompt_ids, budget, sampling, &mut |_| true))?;
    let generate_time = started.elapsed();

    let new_tokens = generated.len();
    let mut sequence = prompt_ids;
    sequence.extend(generated);
    let text = asset.codec.decode(&sequence)?;

    Ok(BlockingOutput {
        text,
        new_tokens,
        generate_time,
    })
}
