//! Native runtime: candle over the published safetensors snapshot
//!
//! Supports the llama, qwen2 and mistral decoder architectures, detected from
//! `model_type` in config.json.

use super::device::{DevicePreference, DeviceSelector};
use super::tokenizer::HfTextCodec;
use super::{CausalLm, LoadedModel, RuntimeBackend, Sampling, run_decode_loop};
use crate::models::download::shard_files;
use crate::models::parse_model_config;
use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::{llama, mistral, qwen2};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const SUPPORTED_ARCHITECTURES: [&str; 3] = ["llama", "qwen2", "mistral"];

/// Loads native snapshots with candle
pub struct NativeBackend {
    preference: DevicePreference,
}

impl NativeBackend {
    pub fn new(preference: DevicePreference) -> Self {
        Self { preference }
    }
}

impl RuntimeBackend for NativeBackend {
    fn load(&self, dir: &Path) -> Result<LoadedModel> {
        let config_str = std::fs::read_to_string(dir.join("config.json"))
            .with_context(|| format!("Failed to read config.json in {:?}", dir))?;
        let config: serde_json::Value =
            serde_json::from_str(&config_str).context("Failed to parse config.json")?;

        let model_type = config
            .get("model_type")
            .and_then(|v| v.as_str())
            .context("config.json has no model_type")?
            .to_string();
        if !SUPPORTED_ARCHITECTURES.contains(&model_type.as_str()) {
            anyhow::bail!(
                "unsupported architecture '{}' (supported: {})",
                model_type,
                SUPPORTED_ARCHITECTURES.join(", ")
            );
        }

        let codec = HfTextCodec::from_dir(dir)?;
        let weights = weight_files(dir)?;
        let resident_bytes = weights
            .iter()
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum();

        let profile = DeviceSelector::detect_with_preference(self.preference)?;
        let dtype = profile.select_dtype(config.get("torch_dtype").and_then(|v| v.as_str()));

        // The mapped files must not be modified while the model is resident
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&weights, dtype, &profile.device)? };

        let arch = match model_type.as_str() {
            "llama" => {
                let cfg: llama::LlamaConfig =
                    serde_json::from_str(&config_str).context("Invalid llama config")?;
                let cfg = cfg.into_config(false);
                let model = llama::Llama::load(vb, &cfg)?;
                Architecture::Llama {
                    model,
                    config: cfg,
                    dtype,
                }
            }
            "qwen2" => {
                let cfg: qwen2::Config =
                    serde_json::from_str(&config_str).context("Invalid qwen2 config")?;
                Architecture::Qwen2(qwen2::ModelForCausalLM::new(&cfg, vb)?)
            }
            "mistral" => {
                let cfg: mistral::Config =
                    serde_json::from_str(&config_str).context("Invalid mistral config")?;
                Architecture::Mistral(mistral::Model::new(&cfg, vb)?)
            }
            other => anyhow::bail!("unsupported architecture '{}'", other),
        };

        let configured_eos = parse_model_config(dir)
            .map(|m| m.eos_token_ids)
            .unwrap_or_default();
        let eos_ids = codec.resolve_eos_ids(&configured_eos);

        tracing::info!(
            path = ?dir,
            architecture = %model_type,
            device = %profile.kind,
            dtype = ?dtype,
            resident_bytes,
            "Loaded native model"
        );

        Ok(LoadedModel {
            model: Box::new(NativeModel {
                arch,
                device: profile.device.clone(),
                eos_ids,
            }),
            codec: Arc::new(codec),
            device: profile.kind,
            resident_bytes,
        })
    }
}

/// Safetensors files making up the checkpoint
fn weight_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let index_path = dir.join("model.safetensors.index.json");
    if index_path.exists() {
        let index = std::fs::read_to_string(&index_path)
            .context("Failed to read model.safetensors.index.json")?;
        return Ok(shard_files(&index)?
            .into_iter()
            .map(|shard| dir.join(shard))
            .collect());
    }

    let single = dir.join("model.safetensors");
    if !single.is_file() {
        anyhow::bail!("No safetensors weights found in {:?}", dir);
    }
    Ok(vec![single])
}

enum Architecture {
    Llama {
        model: llama::Llama,
        config: llama::Config,
        dtype: DType,
    },
    Qwen2(qwen2::ModelForCausalLM),
    Mistral(mistral::Model),
}

struct NativeModel {
    arch: Architecture,
    device: Device,
    eos_ids: Vec<u32>,
}

impl CausalLm for NativeModel {
    fn generate(
        &mut self,
        prompt_ids: &[u32],
        max_new_tokens: usize,
        sampling: &Sampling,
        on_token: &mut dyn FnMut(u32) -> bool,
    ) -> Result<Vec<u32>> {
        let device = &self.device;
        let input = |tokens: &[u32]| -> Result<Tensor> {
            Ok(Tensor::new(tokens, device)?.unsqueeze(0)?)
        };

        match &mut self.arch {
            Architecture::Llama {
                model,
                config,
                dtype,
            } => {
                // Fresh KV cache per request
                let mut cache = llama::Cache::new(true, *dtype, config, device)?;
                run_decode_loop(
                    prompt_ids,
                    max_new_tokens,
                    sampling,
                    &self.eos_ids,
                    on_token,
                    |tokens, pos| Ok(model.forward(&input(&tokens[pos..])?, pos, &mut cache)?),
                )
            }
            Architecture::Qwen2(model) => {
                model.clear_kv_cache();
                run_decode_loop(
                    prompt_ids,
                    max_new_tokens,
                    sampling,
                    &self.eos_ids,
                    on_token,
                    |tokens, pos| Ok(model.forward(&input(&tokens[pos..])?, pos)?),
                )
            }
            Architecture::Mistral(model) => {
                model.clear_kv_cache();
                run_decode_loop(
                    prompt_ids,
                    max_new_tokens,
                    sampling,
                    &self.eos_ids,
                    on_token,
                    |tokens, pos| Ok(model.forward(&input(&tokens[pos..])?, pos)?),
                )
            }
        }
    }
}
