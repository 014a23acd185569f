//! Graph-execution runtime: ONNX Runtime over an exported graph
//!
//! Graphs are exported for `text-generation` without past key/values, so every
//! step re-runs the full sequence. When the `onnx` feature is disabled a stub
//! backend is provided that fails every load with a rebuild hint.

use super::RuntimeBackend;

/// Loads exported ONNX graphs
pub struct OnnxBackend;

impl OnnxBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for OnnxBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBackend for OnnxBackend {
    fn load(&self, dir: &std::path::Path) -> anyhow::Result<super::LoadedModel> {
        inner::load(dir)
    }
}

#[cfg(feature = "onnx")]
mod inner {
    use crate::models::{find_onnx_file, parse_model_config};
    use crate::runtime::device::DeviceKind;
    use crate::runtime::tokenizer::HfTextCodec;
    use crate::runtime::{CausalLm, LoadedModel, Sampling, run_decode_loop};
    use anyhow::{Context, Result};
    use ort::{session::Session, value::Tensor};
    use std::path::Path;
    use std::sync::Arc;

    pub(super) fn load(dir: &Path) -> Result<LoadedModel> {
        let graph = find_onnx_file(dir)
            .with_context(|| format!("No .onnx graph found in {:?}", dir))?;

        let session = Session::builder()
            .map_err(|e| anyhow::anyhow!("ONNX session builder error: {}", e))?
            .commit_from_file(&graph)
            .map_err(|e| anyhow::anyhow!("Failed to load ONNX graph {:?}: {}", graph, e))?;

        let has_position_ids = session
            .inputs()
            .iter()
            .any(|input| input.name() == "position_ids");

        let codec = HfTextCodec::from_dir(dir)?;
        let configured_eos = parse_model_config(dir)
            .map(|m| m.eos_token_ids)
            .unwrap_or_default();
        let eos_ids = codec.resolve_eos_ids(&configured_eos);

        let resident_bytes = std::fs::metadata(&graph).map(|m| m.len()).unwrap_or(0);

        tracing::info!(
            graph = ?graph,
            has_position_ids,
            resident_bytes,
            "Loaded ONNX model"
        );

        Ok(LoadedModel {
            model: Box::new(OnnxModel {
                session,
                has_position_ids,
                eos_ids,
            }),
            codec: Arc::new(codec),
            // ONNX Runtime manages placement itself; the default provider is CPU
            device: DeviceKind::Cpu,
            resident_bytes,
        })
    }

    struct OnnxModel {
        session: Session,
        has_position_ids: bool,
        eos_ids: Vec<u32>,
    }

    // SAFETY: the session is only driven through `&mut self`, one call at a time
    unsafe impl Send for OnnxModel {}

    impl CausalLm for OnnxModel {
        fn generate(
            &mut self,
            prompt_ids: &[u32],
            max_new_tokens: usize,
            sampling: &Sampling,
            on_token: &mut dyn FnMut(u32) -> bool,
        ) -> Result<Vec<u32>> {
            let session = &mut self.session;
            let has_position_ids = self.has_position_ids;

            run_decode_loop(
                prompt_ids,
                max_new_tokens,
                sampling,
                &self.eos_ids,
                on_token,
                |tokens, _| forward(session, has_position_ids, tokens),
            )
        }
    }

    /// Run the whole sequence and return the last position's logits
    fn forward(
        session: &mut Session,
        has_position_ids: bool,
        tokens: &[u32],
    ) -> Result<candle_core::Tensor> {
        let n = tokens.len();
        let shape = vec![1_i64, n as i64];

        let ids: Vec<i64> = tokens.iter().map(|&t| t as i64).collect();
        let input_ids = Tensor::from_array((shape.clone(), ids))
            .map_err(|e| anyhow::anyhow!("Tensor creation error: {}", e))?;
        let attention_mask = Tensor::from_array((shape.clone(), vec![1_i64; n]))
            .map_err(|e| anyhow::anyhow!("Tensor creation error: {}", e))?;

        let outputs = if has_position_ids {
            let position_ids = Tensor::from_array((shape, (0..n as i64).collect::<Vec<_>>()))
                .map_err(|e| anyhow::anyhow!("Tensor creation error: {}", e))?;
            session.run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask,
                "position_ids" => position_ids
            ])
        } else {
            session.run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask
            ])
        }
        .map_err(|e| anyhow::anyhow!("ONNX inference error: {}", e))?;

        // Logits are the first output: [batch, seq, vocab]
        let (_, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| anyhow::anyhow!("Output tensor extract error: {}", e))?;

        if n == 0 || logits.len() % n != 0 {
            anyhow::bail!("unexpected logits length {} for {} tokens", logits.len(), n);
        }
        let vocab = logits.len() / n;
        let last = &logits[(n - 1) * vocab..];

        Ok(candle_core::Tensor::from_slice(
            last,
            vocab,
            &candle_core::Device::Cpu,
        )?)
    }
}

#[cfg(not(feature = "onnx"))]
mod inner {
    use crate::runtime::LoadedModel;
    use std::path::Path;

    pub(super) fn load(_dir: &Path) -> anyhow::Result<LoadedModel> {
        anyhow::bail!(
            "the onnx runtime requires the 'onnx' feature, rebuild with: cargo build --features onnx"
        )
    }
}
