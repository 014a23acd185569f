//! HuggingFace tokenizer wrapper

use super::TextCodec;
use anyhow::{Context, Result};
use std::path::Path;
use tokenizers::Tokenizer;

/// End-of-sequence tokens tried when the model config names none
const EOS_CANDIDATES: [&str; 6] = [
    "</s>",
    "<|endoftext|>",
    "<|im_end|>",
    "<|end_of_text|>",
    "<|eot_id|>",
    "<eos>",
];

/// [`TextCodec`] over a `tokenizer.json`
pub struct HfTextCodec {
    inner: Tokenizer,
}

impl HfTextCodec {
    /// Load `tokenizer.json` from a model directory
    pub fn from_dir(model_dir: &Path) -> Result<Self> {
        let path = model_dir.join("tokenizer.json");
        if !path.is_file() {
            anyhow::bail!("No tokenizer.json found in {:?}", model_dir);
        }

        let inner = Tokenizer::from_file(&path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer {:?}: {}", path, e))?;
        tracing::debug!(path = ?path, "Loaded tokenizer");

        Ok(Self { inner })
    }

    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.inner.token_to_id(token)
    }

    /// Stop tokens: the configured ids, or well-known EOS tokens in the vocab
    pub fn resolve_eos_ids(&self, configured: &[u32]) -> Vec<u32> {
        if !configured.is_empty() {
            return configured.to_vec();
        }

        EOS_CANDIDATES
            .iter()
            .filter_map(|token| self.token_to_id(token))
            .collect()
    }
}

impl TextCodec for HfTextCodec {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("{}", e))
            .context("Failed to encode prompt")?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner
            .decode(ids, true)
            .map_err(|e| anyhow::anyhow!("{}", e))
            .context("Failed to decode tokens")
    }
}
