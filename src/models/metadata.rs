//! Model metadata parsing
//!
//! Parses model configuration from HuggingFace's config.json (and
//! generation_config.json when present) to extract the architecture and the
//! token ids generation needs to stop on.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Model metadata extracted from HuggingFace config.json
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HfModelMetadata {
    /// Model architecture type (e.g., "llama", "qwen2", "mistral")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,

    /// Hidden size
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden_size: Option<u32>,

    /// Maximum sequence length
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_position_embeddings: Option<u32>,

    /// Vocabulary size
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vocab_size: Option<u32>,

    /// Number of hidden layers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_hidden_layers: Option<u32>,

    /// Number of attention heads
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_attention_heads: Option<u32>,

    /// Token ids that end generation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub eos_token_ids: Vec<u32>,
}

/// `eos_token_id` is either a single id or a list of ids
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TokenIds {
    One(u32),
    Many(Vec<u32>),
}

impl TokenIds {
    fn into_vec(self) -> Vec<u32> {
        match self {
            TokenIds::One(id) => vec![id],
            TokenIds::Many(ids) => ids,
        }
    }
}

/// Raw config.json structure (partial)
#[derive(Debug, Deserialize)]
struct RawConfig {
    model_type: Option<String>,
    hidden_size: Option<u32>,
    max_position_embeddings: Option<u32>,
    vocab_size: Option<u32>,
    num_hidden_layers: Option<u32>,
    num_attention_heads: Option<u32>,
    eos_token_id: Option<TokenIds>,
    // Some models use different names
    d_model: Option<u32>,
    n_positions: Option<u32>,
    n_layer: Option<u32>,
    n_head: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawGenerationConfig {
    eos_token_id: Option<TokenIds>,
}

/// Parse model metadata from a snapshot directory's config.json
///
/// # Returns
/// * `Some(HfModelMetadata)` if config.json exists and is valid
/// * `None` if config.json doesn't exist or can't be parsed
pub fn parse_model_config(snapshot_path: &Path) -> Option<HfModelMetadata> {
    let content = std::fs::read_to_string(snapshot_path.join("config.json")).ok()?;
    let raw: RawConfig = serde_json::from_str(&content).ok()?;

    let mut eos_token_ids = raw.eos_token_id.map(TokenIds::into_vec).unwrap_or_default();

    // generation_config.json often carries the full list of stop tokens
    if let Some(generation) = parse_generation_config(snapshot_path) {
        for id in generation {
            if !eos_token_ids.contains(&id) {
                eos_token_ids.push(id);
            }
        }
    }

    Some(HfModelMetadata {
        model_type: raw.model_type,
        hidden_size: raw.hidden_size.or(raw.d_model),
        max_position_embeddings: raw.max_position_embeddings.or(raw.n_positions),
        vocab_size: raw.vocab_size,
        num_hidden_layers: raw.num_hidden_layers.or(raw.n_layer),
        num_attention_heads: raw.num_attention_heads.or(raw.n_head),
        eos_token_ids,
    })
}

fn parse_generation_config(snapshot_path: &Path) -> Option<Vec<u32>> {
    let content = std::fs::read_to_string(snapshot_path.join("generation_config.json")).ok()?;
    let raw: RawGenerationConfig = serde_json::from_str(&content).ok()?;
    raw.eos_token_id.map(TokenIds::into_vec)
}
