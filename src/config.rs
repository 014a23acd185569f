//! Configuration structures and loading logic

use crate::models::StorageLayout;
use crate::runtime::{DevicePreference, Runtime, Sampling};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Quantization presets understood by `optimum-cli onnxruntime quantize`
pub const QUANTIZATION_PRESETS: [&str; 5] = ["arm64", "avx2", "avx512", "avx512_vnni", "tensorrt"];

/// Main configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ModelboxConfig {
    /// Root for the metadata file and every model variant
    pub storage_root: PathBuf,
    /// Runtime used when a request names none
    pub default_runtime: Runtime,
    /// Revision fetched when a download names none
    pub default_revision: String,
    pub device: DevicePreference,
    /// Capacity of the fragment channel between stream worker and consumer
    pub stream_buffer: usize,
    /// Default total token bound (prompt included) for blocking generation
    pub max_length: usize,
    /// Default new-token budget for streaming generation
    pub stream_max_length: usize,
    pub sampling: Sampling,
    pub exporter: ExporterConfig,

    /// HuggingFace token; read from the environment, never written out
    #[serde(skip_serializing)]
    pub hf_token: Option<String>,
}

impl Default for ModelboxConfig {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            default_runtime: Runtime::Native,
            default_revision: default_revision(),
            device: DevicePreference::Auto,
            stream_buffer: default_stream_buffer(),
            max_length: default_max_length(),
            stream_max_length: default_stream_max_length(),
            sampling: Sampling::default(),
            exporter: ExporterConfig::default(),
            hf_token: None,
        }
    }
}

impl ModelboxConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        // Environment variable overrides
        if let Ok(root) = std::env::var("MODELBOX_STORAGE_ROOT") {
            config.storage_root = PathBuf::from(root);
        }
        if let Ok(runtime) = std::env::var("MODELBOX_DEFAULT_RUNTIME") {
            config.default_runtime = runtime
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("Invalid MODELBOX_DEFAULT_RUNTIME value")?;
        }
        if let Ok(device) = std::env::var("MODELBOX_DEVICE") {
            config.device = device
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("Invalid MODELBOX_DEVICE value")?;
        }
        if let Ok(binary_path) = std::env::var("MODELBOX_OPTIMUM_CLI") {
            config.exporter.optimum_cli_path = binary_path;
        }
        if let Ok(token) = std::env::var("HF_TOKEN")
            && !token.is_empty()
        {
            config.hf_token = Some(token);
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.stream_buffer == 0 {
            anyhow::bail!("stream_buffer must be at least 1");
        }
        if self.max_length == 0 || self.stream_max_length == 0 {
            anyhow::bail!(
                "max lengths must be positive (got {} / {})",
                self.max_length,
                self.stream_max_length
            );
        }
        if self.default_revision.trim().is_empty() {
            anyhow::bail!("default_revision cannot be empty");
        }

        if let Some(temperature) = self.sampling.temperature
            && !(temperature >= 0.0 && temperature.is_finite())
        {
            anyhow::bail!("sampling.temperature must be >= 0 (got {})", temperature);
        }
        if let Some(top_p) = self.sampling.top_p
            && !(top_p > 0.0 && top_p <= 1.0)
        {
            anyhow::bail!("sampling.top_p must be in (0, 1] (got {})", top_p);
        }

        if !QUANTIZATION_PRESETS.contains(&self.exporter.quantization_preset.as_str()) {
            anyhow::bail!(
                "Unknown quantization preset '{}' (expected one of: {})",
                self.exporter.quantization_preset,
                QUANTIZATION_PRESETS.join(", ")
            );
        }

        // Ensure the storage root exists or can be created
        if !self.storage_root.exists() {
            std::fs::create_dir_all(&self.storage_root).with_context(|| {
                format!("Cannot create storage root: {:?}", self.storage_root)
            })?;
        }

        Ok(())
    }

    pub fn layout(&self) -> StorageLayout {
        StorageLayout::new(self.storage_root.clone())
    }
}

/// External conversion tool settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ExporterConfig {
    pub optimum_cli_path: String,
    pub quantization_preset: String,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            optimum_cli_path: default_optimum_cli_path(),
            quantization_preset: default_quantization_preset(),
        }
    }
}

// Default functions
fn default_storage_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("modelbox")
}
fn default_revision() -> String {
    "main".to_string()
}
fn default_stream_buffer() -> usize {
    1
}
fn default_max_length() -> usize {
    50
}
fn default_stream_max_length() -> usize {
    256
}
fn default_optimum_cli_path() -> String {
    "optimum-cli".to_string()
}
fn default_quantization_preset() -> String {
    "avx512_vnni".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ModelboxConfig::default();
        assert_eq!(config.default_runtime, Runtime::Native);
        assert_eq!(config.default_revision, "main");
        assert_eq!(config.stream_buffer, 1);
        assert_eq!(config.max_length, 50);
        assert_eq!(config.exporter.quantization_preset, "avx512_vnni");
        assert!(config.storage_root.ends_with("modelbox"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ModelboxConfig = toml::from_str(
            r#"
            default_runtime = "onnx-quantized"
            stream_buffer = 8

            [sampling]
            temperature = 0.7

            [exporter]
            quantization_preset = "avx2"
            "#,
        )
        .unwrap();

        assert_eq!(config.default_runtime, Runtime::Onnx { quantized: true });
        assert_eq!(config.stream_buffer, 8);
        assert_eq!(config.sampling.temperature, Some(0.7));
        assert_eq!(config.sampling.top_p, None);
        assert_eq!(config.exporter.quantization_preset, "avx2");
        assert_eq!(config.exporter.optimum_cli_path, "optimum-cli");
        assert_eq!(config.max_length, 50);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = ModelboxConfig {
            storage_root: temp_dir.path().to_path_buf(),
            ..Default::default()
        };
        assert!(base.validate().is_ok());

        let zero_buffer = ModelboxConfig {
            stream_buffer: 0,
            ..base.clone()
        };
        assert!(zero_buffer.validate().is_err());

        let mut bad_top_p = base.clone();
        bad_top_p.sampling.top_p = Some(1.5);
        assert!(bad_top_p.validate().is_err());

        let mut bad_preset = base.clone();
        bad_preset.exporter.quantization_preset = "avx9000".to_string();
        assert!(bad_preset.validate().is_err());
    }

    #[test]
    fn test_validate_creates_storage_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("nested/root");
        let config = ModelboxConfig {
            storage_root: root.clone(),
            ..Default::default()
        };
        config.validate().unwrap();
        assert!(root.is_dir());
    }

    #[test]
    fn test_token_is_not_serialized() {
        let config = ModelboxConfig {
            hf_token: Some("hf_secret".to_string()),
            ..Default::default()
        };
        let rendered = toml::to_string(&config).unwrap();
        assert!(!rendered.contains("hf_secret"));
    }
}
