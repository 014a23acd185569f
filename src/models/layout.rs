//! Storage root layout
//!
//! Everything the core writes lives under one storage root:
//! ```text
//! <storage_root>/
//! ├── models_metadata.json          # id -> ModelRecord
//! └── models/
//!     ├── models--Qwen--Qwen2.5-0.5B/  # hf-hub snapshot cache (native)
//!     ├── Qwen%2FQwen2.5-0.5B-onnx/
//!     ├── Qwen%2FQwen2.5-0.5B-onnx-quantized/
//!     └── .staging/                  # in-flight conversions
//! ```

use super::record::ModelFormat;
use std::path::{Path, PathBuf};

pub const METADATA_FILE: &str = "models_metadata.json";

const MODELS_DIR: &str = "models";
const STAGING_DIR: &str = ".staging";

/// Resolved paths under a storage root
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn metadata_file(&self) -> PathBuf {
        self.root.join(METADATA_FILE)
    }

    /// Directory hf-hub uses as its cache for native snapshots
    pub fn models_dir(&self) -> PathBuf {
        self.root.join(MODELS_DIR)
    }

    /// Final location of a derived format variant
    pub fn variant_dir(&self, model_id: &str, format: ModelFormat) -> PathBuf {
        self.models_dir()
            .join(format!("{}-{}", model_id_to_dir_name(model_id), format))
    }

    /// Scratch location for a conversion in progress
    pub fn staging_dir(&self, model_id: &str, format: ModelFormat) -> PathBuf {
        let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S%f");
        self.models_dir().join(STAGING_DIR).join(format!(
            "{}-{}-{}",
            model_id_to_dir_name(model_id),
            format,
            stamp
        ))
    }
}

/// Convert model ID to a single path component
///
/// e.g., "Qwen/Qwen2.5-0.5B" -> "Qwen%2FQwen2.5-0.5B". Separators and `%`
/// are percent-escaped, so distinct ids never share a directory.
pub fn model_id_to_dir_name(model_id: &str) -> String {
    let mut name = String::with_capacity(model_id.len());
    for c in model_id.chars() {
        match c {
            '%' => name.push_str("%25"),
            '/' => name.push_str("%2F"),
            '\\' => name.push_str("%5C"),
            _ => name.push(c),
        }
    }
    name
}

/// Recursively calculate directory size
pub fn dir_size(path: &Path) -> u64 {
    let mut size = 0;

    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                size += dir_size(&path);
            } else if let Ok(metadata) = std::fs::metadata(&path) {
                size += metadata.len();
            }
        }
    }

    size
}

/// Locate the ONNX graph inside an exported variant directory
///
/// Prefers the file names optimum writes (`model.onnx`, `model_quantized.onnx`)
/// and falls back to the first `*.onnx` file in name order.
pub fn find_onnx_file(dir: &Path) -> Option<PathBuf> {
    for name in ["model.onnx", "model_quantized.onnx", "decoder_model.onnx"] {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    let mut graphs: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "onnx"))
        .collect();
    graphs.sort();
    graphs.into_iter().next()
}
