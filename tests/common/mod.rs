//! Shared mocks for integration tests
//!
//! A scripted model stands in for real weights: it emits a fixed token
//! sequence, and a char-level codec maps text to ids so prompts round-trip.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use modelbox::engine::{EngineOptions, InferenceEngine};
use modelbox::models::{Exporter, ModelSource, StorageLayout, model_id_to_dir_name};
use modelbox::runtime::{
    Backends, CausalLm, DeviceKind, LoadedModel, RuntimeBackend, Sampling, TextCodec,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const EOS: u32 = 0;

/// Special and word-piece tokens; everything from `CHAR_BASE` up is a char
pub const VOCAB: [&str; 4] = ["<eos>", "Hel", "lo", " world"];
const CHAR_BASE: u32 = 1000;

/// Token ids spelling "Hello world"
pub const HELLO_WORLD: [u32; 3] = [1, 2, 3];

// ============================================================================
// Codec
// ============================================================================

pub struct ScriptCodec;

impl TextCodec for ScriptCodec {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Ok(text.chars().map(|c| CHAR_BASE + c as u32).collect())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        let mut text = String::new();
        for &id in ids {
            if id == EOS {
                continue;
            }
            if id >= CHAR_BASE {
                let c = char::from_u32(id - CHAR_BASE)
                    .ok_or_else(|| anyhow::anyhow!("invalid char token {}", id))?;
                text.push(c);
            } else {
                let piece = VOCAB
                    .get(id as usize)
                    .ok_or_else(|| anyhow::anyhow!("unknown token {}", id))?;
                text.push_str(piece);
            }
        }
        Ok(text)
    }
}

/// One id per UTF-8 byte; a partial character decodes as U+FFFD like a
/// byte-level BPE vocabulary does
pub struct ByteCodec;

impl TextCodec for ByteCodec {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Ok(text.bytes().map(u32::from).collect())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        let bytes = ids
            .iter()
            .filter(|&&id| id != EOS)
            .map(|&id| u8::try_from(id).map_err(|_| anyhow::anyhow!("not a byte token {}", id)))
            .collect::<Result<Vec<u8>>>()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Token ids for the bytes of `text`
pub fn byte_script(text: &str) -> Vec<u32> {
    text.bytes().map(u32::from).collect()
}

// ============================================================================
// Model + backend
// ============================================================================

/// Counters a test can observe after the model has been handed to the engine
#[derive(Default)]
pub struct ModelCounters {
    pub emitted: AtomicUsize,
    pub generations: AtomicUsize,
    pub finished: AtomicBool,
}

pub struct ScriptedModel {
    script: Vec<u32>,
    fail: bool,
    counters: Arc<ModelCounters>,
}

impl CausalLm for ScriptedModel {
    fn generate(
        &mut self,
        _prompt_ids: &[u32],
        max_new_tokens: usize,
        _sampling: &Sampling,
        on_token: &mut dyn FnMut(u32) -> bool,
    ) -> Result<Vec<u32>> {
        self.counters.generations.fetch_add(1, Ordering::SeqCst);
        self.counters.finished.store(false, Ordering::SeqCst);

        let mut generated = Vec::new();
        for &id in self.script.iter().take(max_new_tokens) {
            if id == EOS {
                break;
            }
            if self.fail && !generated.is_empty() {
                self.counters.finished.store(true, Ordering::SeqCst);
                anyhow::bail!("device lost mid-generation");
            }
            generated.push(id);
            self.counters.emitted.fetch_add(1, Ordering::SeqCst);
            if !on_token(id) {
                break;
            }
        }

        self.counters.finished.store(true, Ordering::SeqCst);
        Ok(generated)
    }
}

/// Backend producing scripted models; can be told to fail loads
pub struct MockBackend {
    pub loads: AtomicUsize,
    pub fail_load: AtomicBool,
    pub fail_generate: AtomicBool,
    pub byte_level: AtomicBool,
    pub loaded_from: Mutex<Vec<PathBuf>>,
    script: Mutex<Vec<u32>>,
    pub counters: Arc<ModelCounters>,
}

impl MockBackend {
    pub fn new(script: Vec<u32>) -> Self {
        Self {
            loads: AtomicUsize::new(0),
            fail_load: AtomicBool::new(false),
            fail_generate: AtomicBool::new(false),
            byte_level: AtomicBool::new(false),
            loaded_from: Mutex::new(Vec::new()),
            script: Mutex::new(script),
            counters: Arc::new(ModelCounters::default()),
        }
    }

    pub fn set_script(&self, script: Vec<u32>) {
        *self.script.lock().unwrap() = script;
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl RuntimeBackend for MockBackend {
    fn load(&self, dir: &Path) -> Result<LoadedModel> {
        if self.fail_load.load(Ordering::SeqCst) {
            anyhow::bail!("corrupt weights in {:?}", dir);
        }
        // Widen the race window for concurrent-load tests
        std::thread::sleep(std::time::Duration::from_millis(20));

        self.loads.fetch_add(1, Ordering::SeqCst);
        self.loaded_from.lock().unwrap().push(dir.to_path_buf());

        let codec: Arc<dyn TextCodec> = if self.byte_level.load(Ordering::SeqCst) {
            Arc::new(ByteCodec)
        } else {
            Arc::new(ScriptCodec)
        };

        Ok(LoadedModel {
            model: Box::new(ScriptedModel {
                script: self.script.lock().unwrap().clone(),
                fail: self.fail_generate.load(Ordering::SeqCst),
                counters: self.counters.clone(),
            }),
            codec,
            device: DeviceKind::Cpu,
            resident_bytes: 1024,
        })
    }
}

// ============================================================================
// Source + exporter
// ============================================================================

/// Writes a minimal snapshot (config + tokenizer placeholder) per fetch
pub struct MockSource {
    root: PathBuf,
    pub fetches: AtomicUsize,
    pub fail: AtomicBool,
}

impl MockSource {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            fetches: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelSource for MockSource {
    async fn fetch(&self, model_id: &str, revision: &str) -> Result<PathBuf> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("hub unreachable");
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let dir = self
            .root
            .join(model_id_to_dir_name(model_id))
            .join("snapshots")
            .join(revision);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(
            dir.join("config.json"),
            r#"{"model_type": "llama", "hidden_size": 64, "vocab_size": 1200, "eos_token_id": 0}"#,
        )
        .await?;
        tokio::fs::write(dir.join("tokenizer.json"), "{}").await?;
        tokio::fs::write(dir.join("model.safetensors"), vec![0u8; 256]).await?;
        Ok(dir)
    }
}

/// Writes a placeholder graph and counts invocations
#[derive(Default)]
pub struct MockExporter {
    pub exports: AtomicUsize,
    pub quantizations: AtomicUsize,
    pub fail: AtomicBool,
}

impl MockExporter {
    pub fn export_count(&self) -> usize {
        self.exports.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Exporter for MockExporter {
    async fn export_onnx(&self, _source: &Path, output: &Path) -> Result<()> {
        self.exports.fetch_add(1, Ordering::SeqCst);
        tokio::fs::create_dir_all(output).await?;
        if self.fail.load(Ordering::SeqCst) {
            tokio::fs::write(output.join("partial.bin"), b"half").await?;
            anyhow::bail!("exporter crashed");
        }
        tokio::fs::write(output.join("model.onnx"), b"graph").await?;
        Ok(())
    }

    async fn quantize(&self, _onnx_dir: &Path, output: &Path) -> Result<()> {
        self.quantizations.fetch_add(1, Ordering::SeqCst);
        tokio::fs::create_dir_all(output).await?;
        tokio::fs::write(output.join("model_quantized.onnx"), b"graph").await?;
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct TestEnv {
    pub engine: InferenceEngine,
    pub source: Arc<MockSource>,
    pub exporter: Arc<MockExporter>,
    pub native: Arc<MockBackend>,
    pub onnx: Arc<MockBackend>,
    pub temp_dir: TempDir,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_options(EngineOptions::default()).await
    }

    pub async fn with_options(options: EngineOptions) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let layout = StorageLayout::new(temp_dir.path().join("storage"));

        let source = Arc::new(MockSource::new(layout.models_dir()));
        let exporter = Arc::new(MockExporter::default());
        let native = Arc::new(MockBackend::new(HELLO_WORLD.to_vec()));
        let onnx = Arc::new(MockBackend::new(HELLO_WORLD.to_vec()));

        let engine = InferenceEngine::open(
            layout,
            source.clone(),
            exporter.clone(),
            Backends::new(native.clone(), onnx.clone()),
            options,
        )
        .await
        .unwrap();

        Self {
            engine,
            source,
            exporter,
            native,
            onnx,
            temp_dir,
        }
    }

    pub fn storage_root(&self) -> PathBuf {
        self.temp_dir.path().join("storage")
    }
}
