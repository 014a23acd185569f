//! Model cache, runtime loading and generation

pub mod cache;
pub mod inference;
pub mod loader;
pub mod stream;

pub use cache::{LoadedAsset, ModelCache, ResidentModel};
pub use inference::{EngineOptions, InferenceEngine};
pub use loader::RuntimeLoader;
pub use stream::{GenerationStream, StreamEvent, text_delta};
