//! Model download functionality using hf-hub
//!
//! Fetches a native snapshot of a causal language model from the HuggingFace
//! Hub, pinned to a revision, into the storage root's hf-hub cache.

use anyhow::{Context, Result};
use async_trait::async_trait;
use hf_hub::api::tokio::{ApiBuilder, ApiRepo};
use hf_hub::{Repo, RepoType};
use std::path::PathBuf;

/// Where native snapshots come from
#[async_trait]
pub trait ModelSource: Send + Sync {
    /// Fetch a snapshot and return the directory holding its files
    async fn fetch(&self, model_id: &str, revision: &str) -> Result<PathBuf>;
}

/// Downloads snapshots from the HuggingFace Hub
pub struct HubSource {
    cache_dir: PathBuf,
    token: Option<String>,
}

impl HubSource {
    pub fn new(cache_dir: PathBuf, token: Option<String>) -> Self {
        Self { cache_dir, token }
    }
}

#[async_trait]
impl ModelSource for HubSource {
    async fn fetch(&self, model_id: &str, revision: &str) -> Result<PathBuf> {
        download_snapshot(model_id, revision, self.cache_dir.clone(), self.token.clone()).await
    }
}

/// Download a model snapshot to a specific cache directory
///
/// # Arguments
/// * `model_id` - The model identifier (e.g., "Qwen/Qwen2.5-0.5B-Instruct")
/// * `revision` - Branch, tag or commit to fetch
/// * `cache_dir` - hf-hub cache directory under the storage root
///
/// # Returns
/// * `Ok(PathBuf)` - Path to the downloaded model's snapshot directory
pub async fn download_snapshot(
    model_id: &str,
    revision: &str,
    cache_dir: PathBuf,
    token: Option<String>,
) -> Result<PathBuf> {
    tracing::info!(
        model_id = %model_id,
        revision = %revision,
        cache_dir = ?cache_dir,
        "Starting model download via hf-hub"
    );

    let api = ApiBuilder::new()
        .with_cache_dir(cache_dir)
        .with_token(token)
        .with_progress(false)
        .build()
        .context("Failed to create HF API client")?;

    let repo = api.repo(Repo::with_revision(
        model_id.to_string(),
        RepoType::Model,
        revision.to_string(),
    ));

    // Files every runtime needs: architecture config and the tokenizer
    let essential_files = ["config.json", "tokenizer.json"];

    let mut config_path: Option<PathBuf> = None;
    for file in &essential_files {
        tracing::debug!(model_id = %model_id, file = %file, "Downloading file");
        let path = repo
            .get(file)
            .await
            .with_context(|| format!("Failed to download {}", file))?;

        // Save config.json path to derive snapshot dir
        if *file == "config.json" {
            config_path = Some(path);
        }
    }

    // Sharded checkpoints publish an index; single-file ones do not
    match repo.get("model.safetensors.index.json").await {
        Ok(index_path) => download_sharded_weights(&repo, model_id, index_path).await?,
        Err(_) => {
            repo.get("model.safetensors")
                .await
                .context("Failed to download model.safetensors")?;
            tracing::debug!(model_id = %model_id, "Downloaded single-file weights");
        }
    }

    let optional_files = [
        "generation_config.json",
        "tokenizer_config.json",
        "special_tokens_map.json",
    ];

    for file in &optional_files {
        if repo.get(file).await.is_ok() {
            tracing::debug!(model_id = %model_id, file = %file, "Downloaded optional file");
        }
    }

    // Return the snapshot directory (parent of config.json)
    config_path
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .with_context(|| {
            format!(
                "Model downloaded but snapshot path not found for {}",
                model_id
            )
        })
}

/// Download sharded weight files referenced in an index file
async fn download_sharded_weights(repo: &ApiRepo, model_id: &str, index_path: PathBuf) -> Result<()> {
    let index_content = tokio::fs::read_to_string(&index_path)
        .await
        .context("Failed to read index file")?;

    let shards = shard_files(&index_content)?;

    tracing::info!(
        model_id = %model_id,
        shard_count = shards.len(),
        "Downloading sharded weights"
    );

    for shard in shards {
        tracing::debug!(model_id = %model_id, shard = %shard, "Downloading shard");
        repo.get(&shard)
            .await
            .with_context(|| format!("Failed to download shard {}", shard))?;
    }

    Ok(())
}

/// Unique shard file names from a safetensors index, sorted
pub(crate) fn shard_files(index_content: &str) -> Result<Vec<String>> {
    let index: serde_json::Value =
        serde_json::from_str(index_content).context("Failed to parse index file")?;

    let weight_map = index
        .get("weight_map")
        .and_then(|v| v.as_object())
        .context("Index file has no weight_map")?;

    let mut shards: Vec<String> = weight_map
        .values()
        .filter_map(|v| v.as_str().map(String::from))
        .collect();
    shards.sort();
    shards.dedup();

    Ok(shards)
}
