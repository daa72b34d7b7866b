#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

//! Text-to-vector embedding providers.
//!
//! The real provider runs an XLM-RoBERTa text encoder through candle
//! with mean pooling and L2 normalization. `MEDIAFUSE_USE_FAKE_EMBEDDINGS=1`
//! switches to a hash-based stand-in with the same contract, for fast
//! and deterministic tests without model files.

pub mod pool;

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use anyhow::anyhow;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use mediafuse_core::error::{Error, Result};
use mediafuse_core::traits::EmbeddingProvider;

use crate::pool::masked_mean_l2;

const MAX_TOKENS: usize = 256;

/// Caption/description encoder backed by a local XLM-RoBERTa model.
pub struct CaptionEncoder {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
    dim: usize,
}

impl CaptionEncoder {
    pub fn load() -> anyhow::Result<Self> {
        let device = Device::Cpu;
        let model_dir = resolve_model_dir()?;
        info!(dir = %model_dir.display(), "loading caption encoder");

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;

        let config_path = model_dir.join("config.json");
        let config: XLMRobertaConfig =
            serde_json::from_str(&std::fs::read_to_string(&config_path)?)?;
        let dim = config.hidden_size;

        let weights_path = model_dir.join("pytorch_model.bin");
        let weights = candle_core::pickle::read_all(&weights_path)?;
        let weights_map: std::collections::HashMap<String, Tensor> =
            weights.into_iter().collect();
        let vb = VarBuilder::from_tensors(weights_map, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb)?;
        info!(dim, "caption encoder ready");
        Ok(Self {
            model,
            tokenizer,
            device,
            dim,
        })
    }

    fn encode(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let start = Instant::now();
        let enc = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow!("Tokenization failed: {}", e))?;
        let mut ids = enc.get_ids().to_vec();
        let mut mask = enc.get_attention_mask().to_vec();
        if ids.len() > MAX_TOKENS {
            ids.truncate(MAX_TOKENS);
            mask.truncate(MAX_TOKENS);
        }
        if ids.len() < MAX_TOKENS {
            let pad = MAX_TOKENS - ids.len();
            ids.extend(std::iter::repeat(1).take(pad));
            mask.extend(std::iter::repeat(0).take(pad));
        }
        let input_ids = Tensor::from_iter(ids, &self.device)?.reshape((1, MAX_TOKENS))?;
        let attention_mask = Tensor::from_iter(mask, &self.device)?.reshape((1, MAX_TOKENS))?;
        let token_type_ids = Tensor::zeros((1, MAX_TOKENS), DType::I64, &self.device)?;
        let hidden =
            self.model
                .forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        let vector: Vec<f32> = pooled.to_device(&Device::Cpu)?.squeeze(0)?.to_vec1()?;
        if start.elapsed().as_millis() > 100 {
            warn!(ms = start.elapsed().as_millis(), "slow embedding");
        }
        Ok(vector)
    }
}

impl EmbeddingProvider for CaptionEncoder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(Error::Embedding("empty input text".into()));
        }
        self.encode(text).map_err(|e| Error::Embedding(e.to_string()))
    }
}

/// Deterministic hash-based embedder: each whitespace token bumps one
/// dimension picked by its hash, then the vector is L2-normalized.
/// Same contract as the real encoder, no model files needed.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(Error::Embedding("empty input text".into()));
        }
        use std::hash::{Hash, Hasher};
        use twox_hash::XxHash64;
        let mut v = vec![0f32; self.dim];
        for (i, token) in text.split_whitespace().enumerate() {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += val + (i as f32 % 3.0) * 0.01;
        }
        let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt().max(1e-6);
        for x in &mut v {
            *x /= norm;
        }
        Ok(v)
    }
}

const FAKE_DIM: usize = 512;

/// Pick the provider for this process: the hash fake when
/// `MEDIAFUSE_USE_FAKE_EMBEDDINGS` is set, the real encoder otherwise.
pub fn default_provider() -> Result<Arc<dyn EmbeddingProvider>> {
    let use_fake = std::env::var("MEDIAFUSE_USE_FAKE_EMBEDDINGS")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if use_fake {
        debug!("using hash embedder");
        return Ok(Arc::new(HashEmbedder::new(FAKE_DIM)));
    }
    Ok(Arc::new(
        CaptionEncoder::load().map_err(|e| Error::Embedding(e.to_string()))?,
    ))
}

static PROVIDER: OnceLock<Arc<dyn EmbeddingProvider>> = OnceLock::new();

/// Process-wide, read-only provider, loaded once and shared by every
/// request. A losing racer may load a second model that is immediately
/// dropped.
pub fn global_provider() -> Result<Arc<dyn EmbeddingProvider>> {
    if let Some(p) = PROVIDER.get() {
        return Ok(p.clone());
    }
    let p = default_provider()?;
    Ok(PROVIDER.get_or_init(|| p).clone())
}

fn resolve_model_dir() -> anyhow::Result<PathBuf> {
    if let Ok(dir) = std::env::var("MEDIAFUSE_MODEL_DIR") {
        let p = PathBuf::from(&dir);
        if p.exists() {
            return Ok(p);
        }
    }
    let root = Path::new("../models/text-encoder");
    if root.exists() {
        return Ok(root.to_path_buf());
    }
    let legacy = Path::new("models/text-encoder");
    if legacy.exists() {
        return Ok(legacy.to_path_buf());
    }
    Err(anyhow!("Could not locate the text encoder model directory"))
}
