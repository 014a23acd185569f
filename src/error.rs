//! Error taxonomy for the model lifecycle core
//!
//! Every public operation returns either a well-formed value or one of these
//! variants with the original cause attached. The core never retries; the
//! transport layer maps variants onto its own status codes.

use crate::models::ModelFormat;
use crate::runtime::Runtime;

/// Errors surfaced by the lifecycle and inference core
#[derive(Debug, thiserror::Error)]
pub enum ModelboxError {
    /// Unknown model id, or a format the operation depends on is absent
    #[error("model '{0}' not found")]
    NotFound(String),

    /// The on-disk variant required by a runtime is missing; never auto-converted
    #[error("format '{format}' is not available for model '{model_id}', convert it first")]
    FormatNotAvailable {
        model_id: String,
        format: ModelFormat,
    },

    /// Runtime instantiation failed; the model cache is unchanged
    #[error("failed to load model '{model_id}' with {runtime} runtime")]
    LoadFailure {
        model_id: String,
        runtime: Runtime,
        #[source]
        source: anyhow::Error,
    },

    /// Conversion did not complete; no format key was registered
    #[error("failed to convert model '{model_id}' to {format}")]
    ConversionFailure {
        model_id: String,
        format: ModelFormat,
        #[source]
        source: anyhow::Error,
    },

    /// Encoding, the generate pass or decoding failed
    #[error("generation failed for model '{model_id}'")]
    Generation {
        model_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// Fetching the model snapshot failed; the metadata store is unchanged
    #[error("failed to download model '{model_id}'")]
    Download {
        model_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// Reading or persisting the metadata file failed
    #[error("metadata storage error")]
    Storage {
        #[source]
        source: anyhow::Error,
    },

    /// The request itself is malformed (e.g. converting to the native format)
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ModelboxError {
    pub(crate) fn storage(source: anyhow::Error) -> Self {
        Self::Storage { source }
    }

    pub(crate) fn generation(model_id: &str, source: anyhow::Error) -> Self {
        Self::Generation {
            model_id: model_id.to_string(),
            source,
        }
    }

    /// True for the not-found class of errors (unknown model or missing format)
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::FormatNotAvailable { .. })
    }
}

/// Result alias used across the public API
pub type ModelboxResult<T> = Result<T, ModelboxError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_load_failure_preserves_cause() {
        let err = ModelboxError::LoadFailure {
            model_id: "demo/tiny-model".to_string(),
            runtime: Runtime::Native,
            source: anyhow::anyhow!("missing model.safetensors"),
        };

        assert_eq!(
            err.to_string(),
            "failed to load model 'demo/tiny-model' with native runtime"
        );
        let cause = err.source().expect("cause should be attached");
        assert!(cause.to_string().contains("model.safetensors"));
    }

    #[test]
    fn test_format_not_available_message() {
        let err = ModelboxError::FormatNotAvailable {
            model_id: "demo/tiny-model".to_string(),
            format: ModelFormat::Onnx,
        };
        assert!(err.to_string().contains("'onnx'"));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_is_not_found() {
        assert!(ModelboxError::NotFound("x".to_string()).is_not_found());
        assert!(!ModelboxError::InvalidRequest("x".to_string()).is_not_found());
    }
}
