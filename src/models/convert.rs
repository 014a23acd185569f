//! Format conversion
//!
//! Produces derived format variants (ONNX, quantized ONNX) from a model's
//! native snapshot. Work happens in a staging directory; only a complete
//! artifact is moved into place and registered in the metadata store, so a
//! half-converted variant is never observable as available.

use super::layout::{StorageLayout, find_onnx_file};
use super::record::{ModelFormat, ModelRecord};
use super::store::MetadataStore;
use crate::error::{ModelboxError, ModelboxResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Mutex;

/// Files copied next to an exported graph so the variant directory is
/// self-contained for the graph runtime
const COMPANION_FILES: [&str; 5] = [
    "config.json",
    "generation_config.json",
    "tokenizer.json",
    "tokenizer_config.json",
    "special_tokens_map.json",
];

// ============================================================================
// Trait Definitions
// ============================================================================

/// Tool that performs the actual graph export and quantization
#[async_trait]
pub trait Exporter: Send + Sync {
    /// Export a native snapshot to an ONNX graph directory
    async fn export_onnx(&self, source: &Path, output: &Path) -> Result<()>;

    /// Quantize an ONNX graph directory into `output`
    async fn quantize(&self, onnx_dir: &Path, output: &Path) -> Result<()>;
}

// ============================================================================
// Production Implementation
// ============================================================================

/// Exporter that shells out to `optimum-cli`
pub struct OptimumExporter {
    binary_path: String,
    quantization_preset: String,
}

impl OptimumExporter {
    pub fn new(binary_path: impl Into<String>, quantization_preset: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            quantization_preset: quantization_preset.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<()> {
        tracing::debug!(binary = %self.binary_path, args = ?args, "Spawning exporter");

        let output = Command::new(&self.binary_path)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to spawn exporter: {}", self.binary_path))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(10).collect();
            anyhow::bail!(
                "{} exited with {}: {}",
                self.binary_path,
                output.status,
                tail.into_iter().rev().collect::<Vec<_>>().join("\n")
            );
        }

        Ok(())
    }
}

#[async_trait]
impl Exporter for OptimumExporter {
    async fn export_onnx(&self, source: &Path, output: &Path) -> Result<()> {
        // No past-key-value inputs: the graph runtime recomputes the full
        // sequence each step
        self.run(&[
            "export",
            "onnx",
            "--model",
            &source.to_string_lossy(),
            "--task",
            "text-generation",
            &output.to_string_lossy(),
        ])
        .await
    }

    async fn quantize(&self, onnx_dir: &Path, output: &Path) -> Result<()> {
        let preset = format!("--{}", self.quantization_preset);
        self.run(&[
            "onnxruntime",
            "quantize",
            "--onnx_model",
            &onnx_dir.to_string_lossy(),
            &preset,
            "-o",
            &output.to_string_lossy(),
        ])
        .await
    }
}

// ============================================================================
// Format Converter
// ============================================================================

/// Converts native snapshots into derived format variants
pub struct FormatConverter {
    store: Arc<MetadataStore>,
    exporter: Arc<dyn Exporter>,
    layout: StorageLayout,
    /// Conversions are heavy; run one at a time
    lock: Mutex<()>,
}

impl FormatConverter {
    pub fn new(
        store: Arc<MetadataStore>,
        exporter: Arc<dyn Exporter>,
        layout: StorageLayout,
    ) -> Self {
        Self {
            store,
            exporter,
            layout,
            lock: Mutex::new(()),
        }
    }

    /// Convert a model to `format` (quantized when `quantize` is set).
    ///
    /// Returns the existing location unchanged if the variant is already
    /// registered; conversion is never redone silently.
    pub async fn convert(
        &self,
        model_id: &str,
        format: ModelFormat,
        quantize: bool,
    ) -> ModelboxResult<PathBuf> {
        let target = format.with_quantization(quantize);
        if target == ModelFormat::Native {
            return Err(ModelboxError::InvalidRequest(
                "the native format is produced by download, not conversion".to_string(),
            ));
        }

        let _guard = self.lock.lock().await;

        let mut record = self
            .store
            .get(model_id)
            .await
            .ok_or_else(|| ModelboxError::NotFound(model_id.to_string()))?;

        if let Some(existing) = record.format_path(target) {
            tracing::debug!(model_id = %model_id, format = %target, path = ?existing, "Format already available");
            return Ok(existing.to_path_buf());
        }

        let native = record
            .format_path(ModelFormat::Native)
            .map(Path::to_path_buf)
            .ok_or_else(|| ModelboxError::NotFound(model_id.to_string()))?;

        tracing::info!(model_id = %model_id, format = %target, "Starting conversion");
        let started = std::time::Instant::now();

        let staging = self.layout.staging_dir(model_id, target);
        let published = match self.produce(&record, &native, target, &staging).await {
            Ok(dir) => self.publish(&dir, model_id, target).await,
            Err(e) => Err(e),
        };

        // Whatever is left in staging is scratch
        remove_dir_if_exists(&staging).await;

        let final_dir = match published {
            Ok(dir) => dir,
            Err(source) => {
                tracing::error!(model_id = %model_id, format = %target, error = %source, "Conversion failed");
                crate::metrics::record_conversion(target, false);
                return Err(ModelboxError::ConversionFailure {
                    model_id: model_id.to_string(),
                    format: target,
                    source,
                });
            }
        };

        record.formats.insert(target, final_dir.clone());
        if let Err(source) = self.store.put(record).await {
            // Unregistered output would be mistaken for a leftover later
            remove_dir_if_exists(&final_dir).await;
            tracing::error!(model_id = %model_id, format = %target, error = %source, "Failed to register converted model");
            crate::metrics::record_conversion(target, false);
            return Err(ModelboxError::ConversionFailure {
                model_id: model_id.to_string(),
                format: target,
                source: source.context("Failed to register converted model"),
            });
        }

        crate::metrics::record_conversion(target, true);
        tracing::info!(
            model_id = %model_id,
            format = %target,
            path = ?final_dir,
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Conversion complete"
        );

        Ok(final_dir)
    }

    /// Run the exporter into staging and return the directory holding the result
    async fn produce(
        &self,
        record: &ModelRecord,
        native: &Path,
        target: ModelFormat,
        staging: &Path,
    ) -> Result<PathBuf> {
        tokio::fs::create_dir_all(staging)
            .await
            .with_context(|| format!("Failed to create staging directory: {:?}", staging))?;

        let result = match target {
            ModelFormat::Onnx => {
                let out = staging.join("onnx");
                self.exporter.export_onnx(native, &out).await?;
                out
            }
            ModelFormat::OnnxQuantized => {
                // Reuse a registered ONNX export as the quantization input
                let onnx_dir = match record.format_path(ModelFormat::Onnx) {
                    Some(existing) => existing.to_path_buf(),
                    None => {
                        let out = staging.join("onnx");
                        self.exporter.export_onnx(native, &out).await?;
                        out
                    }
                };
                let out = staging.join("quantized");
                self.exporter.quantize(&onnx_dir, &out).await?;
                out
            }
            ModelFormat::Native => anyhow::bail!("native is not a conversion target"),
        };

        if find_onnx_file(&result).is_none() {
            anyhow::bail!("exporter produced no .onnx graph in {:?}", result);
        }

        copy_companion_files(native, &result).await?;

        Ok(result)
    }

    /// Move a finished artifact to its final location
    async fn publish(&self, dir: &Path, model_id: &str, target: ModelFormat) -> Result<PathBuf> {
        let final_dir = self.layout.variant_dir(model_id, target);

        // Unregistered leftovers from an interrupted publish
        if final_dir.exists() {
            tracing::warn!(path = ?final_dir, "Replacing unregistered variant directory");
            tokio::fs::remove_dir_all(&final_dir)
                .await
                .with_context(|| format!("Failed to remove stale directory: {:?}", final_dir))?;
        }

        tokio::fs::rename(dir, &final_dir)
            .await
            .with_context(|| format!("Failed to move converted model into {:?}", final_dir))?;

        Ok(final_dir)
    }
}

async fn copy_companion_files(native: &Path, dest: &Path) -> Result<()> {
    for name in COMPANION_FILES {
        let from = native.join(name);
        let to = dest.join(name);
        if from.is_file() && !to.exists() {
            tokio::fs::copy(&from, &to)
                .await
                .with_context(|| format!("Failed to copy {} into converted model", name))?;
        }
    }
    Ok(())
}

async fn remove_dir_if_exists(path: &Path) {
    if path.exists()
        && let Err(e) = tokio::fs::remove_dir_all(path).await
    {
        tracing::warn!(path = ?path, error = %e, "Failed to clean up conversion output");
    }
}
