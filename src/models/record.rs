//! Durable model records and the format variants they track

use super::metadata::HfModelMetadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// On-disk serialization of a model, each suitable for one runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelFormat {
    /// Snapshot as published (safetensors + tokenizer), produced by download
    Native,
    /// ONNX graph exported from the native snapshot
    Onnx,
    /// Dynamically quantized ONNX graph
    OnnxQuantized,
}

impl ModelFormat {
    pub const ALL: [ModelFormat; 3] = [Self::Native, Self::Onnx, Self::OnnxQuantized];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Onnx => "onnx",
            Self::OnnxQuantized => "onnx-quantized",
        }
    }

    /// Resolve the format key for a conversion request.
    ///
    /// Quantization is a sub-mode of the ONNX export, so `(Onnx, true)` maps
    /// to its own key while `Native` has no quantized counterpart.
    pub fn with_quantization(self, quantize: bool) -> Self {
        match (self, quantize) {
            (Self::Onnx, true) => Self::OnnxQuantized,
            (other, _) => other,
        }
    }
}

impl std::fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" | "original" => Ok(Self::Native),
            "onnx" => Ok(Self::Onnx),
            "onnx-quantized" | "onnx_quantized" => Ok(Self::OnnxQuantized),
            other => Err(format!(
                "unsupported format '{}' (expected native, onnx or onnx-quantized)",
                other
            )),
        }
    }
}

/// Entry for a model in the metadata store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    /// Source identifier (e.g., "Qwen/Qwen2.5-0.5B-Instruct")
    pub id: String,
    /// Revision the native snapshot was fetched at
    pub revision: String,
    /// Native snapshot directory
    pub path: PathBuf,
    /// Available format variants; keys are only ever added
    pub formats: BTreeMap<ModelFormat, PathBuf>,
    /// Metadata from config.json
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HfModelMetadata>,
    /// Size of the native snapshot in bytes
    #[serde(default)]
    pub size_bytes: u64,
    /// When the native snapshot was fetched
    pub downloaded_at: DateTime<Utc>,
}

impl ModelRecord {
    /// Create a record for a freshly downloaded native snapshot
    pub fn new(id: impl Into<String>, revision: impl Into<String>, path: PathBuf) -> Self {
        let mut formats = BTreeMap::new();
        formats.insert(ModelFormat::Native, path.clone());

        Self {
            id: id.into(),
            revision: revision.into(),
            path,
            formats,
            metadata: None,
            size_bytes: 0,
            downloaded_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: Option<HfModelMetadata>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = size_bytes;
        self
    }

    /// Location of a format variant, if registered
    pub fn format_path(&self, format: ModelFormat) -> Option<&Path> {
        self.formats.get(&format).map(PathBuf::as_path)
    }

    pub fn has_format(&self, format: ModelFormat) -> bool {
        self.formats.contains_key(&format)
    }

    /// Point the record at a re-fetched native snapshot.
    ///
    /// Derived variants are kept; they were built from the previous revision
    /// and are returned so the caller can report them.
    pub fn refresh_native(&mut self, revision: &str, path: PathBuf) -> Vec<ModelFormat> {
        self.revision = revision.to_string();
        self.path = path.clone();
        self.formats.insert(ModelFormat::Native, path);
        self.downloaded_at = Utc::now();

        self.formats
            .keys()
            .copied()
            .filter(|format| *format != ModelFormat::Native)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_display() {
        assert_eq!(ModelFormat::Native.to_string(), "native");
        assert_eq!(ModelFormat::Onnx.to_string(), "onnx");
        assert_eq!(ModelFormat::OnnxQuantized.to_string(), "onnx-quantized");
    }

    #[test]
    fn test_format_parse_aliases() {
        assert_eq!("original".parse::<ModelFormat>(), Ok(ModelFormat::Native));
        assert_eq!(" ONNX ".parse::<ModelFormat>(), Ok(ModelFormat::Onnx));
        assert_eq!(
            "onnx_quantized".parse::<ModelFormat>(),
            Ok(ModelFormat::OnnxQuantized)
        );
        assert!("gguf".parse::<ModelFormat>().is_err());
    }

    #[test]
    fn test_with_quantization() {
        assert_eq!(
            ModelFormat::Onnx.with_quantization(true),
            ModelFormat::OnnxQuantized
        );
        assert_eq!(ModelFormat::Onnx.with_quantization(false), ModelFormat::Onnx);
        assert_eq!(
            ModelFormat::Native.with_quantization(true),
            ModelFormat::Native
        );
    }

    #[test]
    fn test_new_record_registers_native() {
        let record = ModelRecord::new("demo/tiny-model", "main", PathBuf::from("/m/tiny"));
        assert_eq!(record.formats.len(), 1);
        assert_eq!(
            record.format_path(ModelFormat::Native),
            Some(Path::new("/m/tiny"))
        );
        assert!(!record.has_format(ModelFormat::Onnx));
    }

    #[test]
    fn test_formats_serialize_with_string_keys() {
        let mut record = ModelRecord::new("demo/tiny-model", "main", PathBuf::from("/m/tiny"));
        record
            .formats
            .insert(ModelFormat::OnnxQuantized, PathBuf::from("/m/tiny-q"));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["formats"]["native"], "/m/tiny");
        assert_eq!(json["formats"]["onnx-quantized"], "/m/tiny-q");
        // Optional fields should be skipped when None
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn test_refresh_native_keeps_derived_formats() {
        let mut record = ModelRecord::new("demo/tiny-model", "v1", PathBuf::from("/m/v1"));
        record
            .formats
            .insert(ModelFormat::Onnx, PathBuf::from("/m/onnx"));

        let stale = record.refresh_native("v2", PathBuf::from("/m/v2"));

        assert_eq!(stale, vec![ModelFormat::Onnx]);
        assert_eq!(record.revision, "v2");
        assert_eq!(record.path, PathBuf::from("/m/v2"));
        assert_eq!(
            record.format_path(ModelFormat::Native),
            Some(Path::new("/m/v2"))
        );
        assert_eq!(
            record.format_path(ModelFormat::Onnx),
            Some(Path::new("/m/onnx"))
        );
    }
}
