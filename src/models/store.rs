//! Metadata store: the durable catalog of known models
//!
//! The whole catalog is one JSON object (model id -> record) rewritten on every
//! mutation. Writes go to a temp file which is synced and renamed over the
//! metadata file, so a crash mid-save never corrupts previously stored records.

use super::record::ModelRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

// ============================================================================
// Trait Definitions
// ============================================================================

/// Trait for storage backend operations
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Save content to a file path atomically
    async fn save(&self, path: &Path, content: &str) -> Result<()>;

    /// Load content from a file path
    /// Returns None if file doesn't exist
    async fn load(&self, path: &Path) -> Result<Option<String>>;
}

// ============================================================================
// Production Implementation
// ============================================================================

/// Production storage backend using tokio::fs
pub struct FileSystemStorage;

impl FileSystemStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FileSystemStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for FileSystemStorage {
    async fn save(&self, path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create metadata directory: {:?}", parent))?;
        }

        // Atomic write: write to temp file, then rename
        let temp_file = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_file)
            .await
            .context("Failed to create temp metadata file")?;
        file.write_all(content.as_bytes())
            .await
            .context("Failed to write metadata file")?;
        file.sync_all()
            .await
            .context("Failed to sync metadata file")?;

        fs::rename(&temp_file, path)
            .await
            .context("Failed to rename temp metadata file")?;

        Ok(())
    }

    async fn load(&self, path: &Path) -> Result<Option<String>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read metadata file: {:?}", path))?;

        Ok(Some(content))
    }
}

// ============================================================================
// Metadata Store
// ============================================================================

/// Durable id -> record catalog
///
/// The in-memory map is the last successfully persisted state. Mutations hold
/// the write lock across serialization and the atomic save, so they are
/// serialized and a failed save leaves readers on the previous state.
pub struct MetadataStore {
    path: PathBuf,
    storage: Arc<dyn StorageBackend>,
    records: RwLock<BTreeMap<String, ModelRecord>>,
}

impl MetadataStore {
    /// Open the store backed by the filesystem
    pub async fn open(path: PathBuf) -> Result<Self> {
        Self::open_with_storage(path, Arc::new(FileSystemStorage::new())).await
    }

    /// Open the store with a custom storage backend
    /// FAILS HARD if the metadata file is corrupted - user must fix or delete
    pub async fn open_with_storage(path: PathBuf, storage: Arc<dyn StorageBackend>) -> Result<Self> {
        let records = match storage.load(&path).await? {
            Some(content) => serde_json::from_str(&content).with_context(|| {
                format!(
                    "Failed to parse metadata file: {:?}. File may be corrupted. \
                    Please delete or fix the file manually.",
                    path
                )
            })?,
            None => {
                tracing::info!(path = ?path, "No metadata file found, starting with an empty catalog");
                BTreeMap::new()
            }
        };

        tracing::debug!(path = ?path, models = records.len(), "Metadata store opened");

        Ok(Self {
            path,
            storage,
            records: RwLock::new(records),
        })
    }

    /// Get a record by model id
    pub async fn get(&self, model_id: &str) -> Option<ModelRecord> {
        self.records.read().await.get(model_id).cloned()
    }

    /// Insert or overwrite a record and persist the catalog before returning
    pub async fn put(&self, record: ModelRecord) -> Result<()> {
        let mut records = self.records.write().await;

        let mut next = records.clone();
        let model_id = record.id.clone();
        next.insert(model_id.clone(), record);

        let content =
            serde_json::to_string_pretty(&next).context("Failed to serialize metadata")?;
        self.storage.save(&self.path, &content).await?;

        *records = next;

        tracing::debug!(
            path = ?self.path,
            model_id = %model_id,
            models = records.len(),
            "Metadata saved"
        );

        Ok(())
    }

    /// List all model ids, sorted
    pub async fn list(&self) -> Vec<String> {
        self.records.read().await.keys().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================
