//! modelbox - local model-serving core
//!
//! Keeps a catalog of downloaded language models and their format variants,
//! converts native snapshots to ONNX (optionally quantized), loads models into
//! interchangeable runtimes and serves blocking and streaming text generation.

pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod models;
pub mod runtime;

pub use config::ModelboxConfig;
pub use engine::{EngineOptions, GenerationStream, InferenceEngine, LoadedAsset, ResidentModel};
pub use error::{ModelboxError, ModelboxResult};
pub use models::{ModelFormat, ModelRecord};
pub use runtime::Runtime;
