//! Execution runtimes
//!
//! A [`Runtime`] names a backend; each backend turns a format variant
//! directory into a [`LoadedModel`]: a [`CausalLm`] that runs the generate
//! pass and a [`TextCodec`] that maps text to token ids and back.

pub mod device;
pub mod native;
pub mod onnx;
pub mod tokenizer;

pub use device::{DeviceKind, DevicePreference, DeviceProfile, DeviceSelector};
pub use native::NativeBackend;
pub use onnx::OnnxBackend;
pub use tokenizer::HfTextCodec;

use crate::models::ModelFormat;
use anyhow::Result;
use candle_core::{IndexOp, Tensor};
use candle_transformers::generation::LogitsProcessor;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

// ============================================================================
// Runtime
// ============================================================================

/// Execution backend a model can be resident under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Runtime {
    /// Dynamic computation runtime over the native snapshot (candle)
    #[default]
    Native,
    /// Graph-execution runtime over an exported ONNX graph
    Onnx { quantized: bool },
}

impl Runtime {
    /// Format variant this runtime loads from
    pub fn required_format(&self) -> ModelFormat {
        match self {
            Self::Native => ModelFormat::Native,
            Self::Onnx { quantized: false } => ModelFormat::Onnx,
            Self::Onnx { quantized: true } => ModelFormat::OnnxQuantized,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Onnx { quantized: false } => "onnx",
            Self::Onnx { quantized: true } => "onnx-quantized",
        }
    }
}

impl std::fmt::Display for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Runtime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" | "pytorch" => Ok(Self::Native),
            "onnx" => Ok(Self::Onnx { quantized: false }),
            "onnx-quantized" | "onnx_quantized" => Ok(Self::Onnx { quantized: true }),
            other => Err(format!(
                "unsupported runtime '{}' (expected native, onnx or onnx-quantized)",
                other
            )),
        }
    }
}

impl TryFrom<String> for Runtime {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Runtime> for String {
    fn from(runtime: Runtime) -> Self {
        runtime.as_str().to_string()
    }
}

// ============================================================================
// Backend Traits
// ============================================================================

/// Sampling settings for the generate pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sampling {
    /// None means greedy decoding
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub seed: u64,
}

impl Default for Sampling {
    fn default() -> Self {
        Self {
            temperature: None,
            top_p: None,
            seed: 299792458,
        }
    }
}

/// A loaded causal language model
pub trait CausalLm: Send {
    /// Generate up to `max_new_tokens` after `prompt_ids`.
    ///
    /// `on_token` is called with each new token in order; returning `false`
    /// stops generation at that token boundary. Stops early on EOS, which is
    /// not included in the returned ids.
    fn generate(
        &mut self,
        prompt_ids: &[u32],
        max_new_tokens: usize,
        sampling: &Sampling,
        on_token: &mut dyn FnMut(u32) -> bool,
    ) -> Result<Vec<u32>>;
}

/// Text <-> token id mapping for a loaded model
pub trait TextCodec: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Decode ids to text, skipping special tokens
    fn decode(&self, ids: &[u32]) -> Result<String>;
}

/// What a backend hands back after instantiating a format variant
pub struct LoadedModel {
    pub model: Box<dyn CausalLm>,
    pub codec: Arc<dyn TextCodec>,
    pub device: DeviceKind,
    pub resident_bytes: u64,
}

/// Instantiates model + tokenizer pairs from a variant directory
///
/// Loading is blocking work; callers run it off the async reactor.
pub trait RuntimeBackend: Send + Sync {
    fn load(&self, dir: &Path) -> Result<LoadedModel>;
}

/// One backend per runtime variant
#[derive(Clone)]
pub struct Backends {
    native: Arc<dyn RuntimeBackend>,
    onnx: Arc<dyn RuntimeBackend>,
}

impl Backends {
    pub fn new(native: Arc<dyn RuntimeBackend>, onnx: Arc<dyn RuntimeBackend>) -> Self {
        Self { native, onnx }
    }

    /// Production backends: candle for native snapshots, ONNX Runtime for graphs
    pub fn production(device: DevicePreference) -> Self {
        Self::new(
            Arc::new(NativeBackend::new(device)),
            Arc::new(OnnxBackend::new()),
        )
    }

    pub fn for_runtime(&self, runtime: Runtime) -> Arc<dyn RuntimeBackend> {
        match runtime {
            Runtime::Native => self.native.clone(),
            Runtime::Onnx { .. } => self.onnx.clone(),
        }
    }
}

// ============================================================================
// Shared decode loop
// ============================================================================

/// Autoregressive sampling loop shared by the backends.
///
/// `step(tokens, pos)` runs the model and returns logits for the last
/// position; `tokens[pos..]` are the ids not yet seen by the model, so a
/// KV-cached model feeds only those while a stateless one can feed all of
/// `tokens`.
pub(crate) fn run_decode_loop<F>(
    prompt_ids: &[u32],
    max_new_tokens: usize,
    sampling: &Sampling,
    eos_ids: &[u32],
    on_token: &mut dyn FnMut(u32) -> bool,
    mut step: F,
) -> Result<Vec<u32>>
where
    F: FnMut(&[u32], usize) -> Result<Tensor>,
{
    if prompt_ids.is_empty() {
        anyhow::bail!("prompt produced no tokens");
    }

    let mut processor = LogitsProcessor::new(sampling.seed, sampling.temperature, sampling.top_p);
    let mut tokens = prompt_ids.to_vec();
    let mut generated = Vec::new();
    let mut pos = 0;

    for _ in 0..max_new_tokens {
        let logits = step(&tokens, pos)?;
        pos = tokens.len();

        let next = processor.sample(&last_token_logits(&logits)?)?;
        if eos_ids.contains(&next) {
            break;
        }

        tokens.push(next);
        generated.push(next);

        if !on_token(next) {
            break;
        }
    }

    Ok(generated)
}

/// Reduce model output to the logits of the last position
fn last_token_logits(logits: &Tensor) -> Result<Tensor> {
    let logits = match logits.rank() {
        // [vocab]
        1 => logits.clone(),
        // [seq, vocab]
        2 => {
            let seq_len = logits.dim(0)?;
            logits.i(seq_len.saturating_sub(1))?
        }
        // [batch, seq, vocab]
        3 => {
            let seq_len = logits.dim(1)?;
            logits.i((0, seq_len.saturating_sub(1)))?
        }
        rank => anyhow::bail!(
            "unexpected logits rank {} with dims {:?}",
            rank,
            logits.dims()
        ),
    };
    Ok(logits)
}
