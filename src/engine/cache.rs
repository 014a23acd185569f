//! Model cache: what is resident right now
//!
//! At most one [`LoadedAsset`] per model id. Entries are published whole
//! behind an `Arc` and never mutated in place; an evicted asset is released
//! when its last in-flight request drops its handle.

use crate::runtime::{CausalLm, DeviceKind, LoadedModel, Runtime, TextCodec};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

/// A model instantiated under one runtime, with its tokenizer
pub struct LoadedAsset {
    pub model_id: String,
    pub runtime: Runtime,
    /// One generate pass at a time per asset
    model: Mutex<Box<dyn CausalLm>>,
    pub codec: Arc<dyn TextCodec>,
    pub device: DeviceKind,
    pub resident_bytes: u64,
    pub loaded_at: DateTime<Utc>,
}

impl LoadedAsset {
    pub fn new(model_id: impl Into<String>, runtime: Runtime, loaded: LoadedModel) -> Self {
        Self {
            model_id: model_id.into(),
            runtime,
            model: Mutex::new(loaded.model),
            codec: loaded.codec,
            device: loaded.device,
            resident_bytes: loaded.resident_bytes,
            loaded_at: Utc::now(),
        }
    }

    /// Run `f` with exclusive access to the model. Blocks; call from a
    /// blocking worker.
    pub fn with_model<R>(&self, f: impl FnOnce(&mut dyn CausalLm) -> Result<R>) -> Result<R> {
        let mut guard = self
            .model
            .lock()
            .map_err(|_| anyhow::anyhow!("model mutex poisoned for '{}'", self.model_id))?;
        f(guard.as_mut())
    }

    pub fn summary(&self) -> ResidentModel {
        ResidentModel {
            model_id: self.model_id.clone(),
            runtime: self.runtime,
            device: self.device,
            resident_bytes: self.resident_bytes,
            loaded_at: self.loaded_at,
        }
    }
}

impl std::fmt::Debug for LoadedAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedAsset")
            .field("model_id", &self.model_id)
            .field("runtime", &self.runtime)
            .field("device", &self.device)
            .field("resident_bytes", &self.resident_bytes)
            .finish_non_exhaustive()
    }
}

/// Snapshot of a cache entry for reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResidentModel {
    pub model_id: String,
    pub runtime: Runtime,
    pub device: DeviceKind,
    pub resident_bytes: u64,
    pub loaded_at: DateTime<Utc>,
}

/// In-memory table of resident models keyed by model id
#[derive(Default)]
pub struct ModelCache {
    entries: RwLock<HashMap<String, Arc<LoadedAsset>>>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, model_id: &str) -> Option<Arc<LoadedAsset>> {
        self.entries.read().await.get(model_id).cloned()
    }

    /// Install an asset, returning the entry it superseded
    pub async fn put(&self, asset: Arc<LoadedAsset>) -> Option<Arc<LoadedAsset>> {
        self.entries
            .write()
            .await
            .insert(asset.model_id.clone(), asset)
    }

    pub async fn remove(&self, model_id: &str) -> Option<Arc<LoadedAsset>> {
        self.entries.write().await.remove(model_id)
    }

    /// Resident entries sorted by model id
    pub async fn list(&self) -> Vec<ResidentModel> {
        let mut resident: Vec<ResidentModel> = self
            .entries
            .read()
            .await
            .values()
            .map(|asset| asset.summary())
            .collect();
        resident.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        resident
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn resident_bytes(&self) -> u64 {
        self.entries
            .read()
            .await
            .values()
            .map(|asset| asset.resident_bytes)
            .sum()
    }
}
