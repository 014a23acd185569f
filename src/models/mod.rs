//! Model management module
//!
//! Provides functionality for:
//! - Tracking known models and their format variants in a durable store
//! - Downloading native snapshots from HuggingFace Hub
//! - Parsing model metadata from config.json
//! - Converting native snapshots to ONNX and quantized ONNX

pub mod convert;
pub mod download;
pub mod layout;
pub mod metadata;
pub mod record;
pub mod store;

pub use convert::{Exporter, FormatConverter, OptimumExporter};
pub use download::{HubSource, ModelSource, download_snapshot};
pub use layout::{StorageLayout, dir_size, find_onnx_file, model_id_to_dir_name};
pub use metadata::{HfModelMetadata, parse_model_config};
pub use record::{ModelFormat, ModelRecord};
pub use store::{FileSystemStorage, MetadataStore, StorageBackend};
