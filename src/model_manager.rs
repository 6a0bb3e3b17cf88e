use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::{
    embedding::{Embedder, HASHING_MODEL_ID, HashingEmbedder},
    error::{Error, Result},
};

pub const DEFAULT_MODEL_ID: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const MODEL_ENV_VAR: &str = "PREPPAL_MODEL";

/// Setting key under which `model set` persists the default model.
pub const MODEL_SETTING: &str = "model_name";

/// Dimension used by the hashing embedder, matching the default model.
pub const HASHING_DIMENSION: usize = 384;

/// Longest token sequence fed to the encoder.
const MAX_TOKENS: usize = 256;

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

/// Resolves which embedding model the process uses and loads it.
#[derive(Debug, Clone)]
pub struct ModelManager {
    model_id: String,
}

impl Default for ModelManager {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModelManager {
    /// Creates a new `ModelManager`. The model ID is resolved from:
    /// 1. The `PREPPAL_MODEL` environment variable, if set
    /// 2. The stored setting, if any
    /// 3. Otherwise, the default model (`sentence-transformers/all-MiniLM-L6-v2`)
    pub fn new(stored: Option<String>) -> Self {
        let model_id = std::env::var(MODEL_ENV_VAR)
            .ok()
            .or(stored)
            .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string());

        Self { model_id }
    }

    /// Creates a `ModelManager` with an explicit model ID, bypassing
    /// environment variable resolution.
    pub fn with_model_id(model_id: String) -> Self {
        Self { model_id }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Load the embedder. Model files are read from a local directory when
    /// the ID names one, and fetched from the HuggingFace Hub otherwise.
    pub fn load(&self) -> Result<Box<dyn Embedder>> {
        if self.model_id == HASHING_MODEL_ID {
            debug!("using hashing embedder");
            return Ok(Box::new(HashingEmbedder::new(HASHING_DIMENSION)));
        }

        let files = ModelFiles::resolve(&self.model_id)?;
        let embedder =
            SentenceEmbedder::load(&self.model_id, &files, default_device())?;
        Ok(Box::new(embedder))
    }
}

struct ModelFiles {
    config: PathBuf,
    tokenizer: PathBuf,
    weights: PathBuf,
}

impl ModelFiles {
    fn resolve(model_id: &str) -> Result<Self> {
        let local = Path::new(model_id);
        if local.is_dir() {
            return Ok(Self {
                config: local.join("config.json"),
                tokenizer: local.join("tokenizer.json"),
                weights: local.join("model.safetensors"),
            });
        }

        let api = hf_hub::api::sync::Api::new()
            .map_err(|e| Error::ModelDownload(e.to_string()))?;
        let repo = api.model(model_id.to_string());
        let fetch = |name: &str| {
            debug!(model = model_id, file = name, "fetching model file");
            repo.get(name)
                .map_err(|e| Error::ModelDownload(format!("{name}: {e}")))
        };

        Ok(Self {
            config: fetch("config.json")?,
            tokenizer: fetch("tokenizer.json")?,
            weights: fetch("model.safetensors")?,
        })
    }
}

/// Sentence-transformers style BERT encoder: mean pooling over the
/// attention mask followed by L2 normalization.
pub struct SentenceEmbedder {
    model_id: String,
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dimension: usize,
}

impl SentenceEmbedder {
    fn load(model_id: &str, files: &ModelFiles, device: Device) -> Result<Self> {
        let config: Config =
            serde_json::from_str(&std::fs::read_to_string(&files.config)?)?;
        let dimension = hidden_size(&files.config)?;

        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| Error::Tokenizer(e.to_string()))?;

        // SAFETY: the weights file is memory-mapped read-only and is not
        // modified while the model is alive.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(
                std::slice::from_ref(&files.weights),
                DType::F32,
                &device,
            )?
        };
        let model = BertModel::load(vb, &config)?;

        info!(model = model_id, dimension, device = ?device, "loaded embedding model");

        Ok(Self {
            model_id: model_id.to_string(),
            model,
            tokenizer,
            device,
            dimension,
        })
    }

    fn encode(&self, texts: &[String]) -> Result<Tensor> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| Error::Tokenizer(e.to_string()))?;

        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .min(MAX_TOKENS);

        let batch = encodings.len();
        let mut ids = Vec::with_capacity(batch * max_len);
        let mut mask = Vec::with_capacity(batch * max_len);
        for encoding in &encodings {
            let tokens = encoding.get_ids();
            let len = tokens.len().min(max_len);
            ids.extend_from_slice(&tokens[..len]);
            ids.extend(std::iter::repeat_n(0u32, max_len - len));
            mask.extend(std::iter::repeat_n(1u32, len));
            mask.extend(std::iter::repeat_n(0u32, max_len - len));
        }

        let input_ids = Tensor::from_vec(ids, (batch, max_len), &self.device)?;
        let attention_mask =
            Tensor::from_vec(mask, (batch, max_len), &self.device)?;
        let token_type_ids = input_ids.zeros_like()?;

        let hidden = self.model.forward(
            &input_ids,
            &token_type_ids,
            Some(&attention_mask),
        )?;

        let pooled = mean_pool(&hidden, &attention_mask)?;
        normalize_rows(&pooled)
    }
}

impl Embedder for SentenceEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.encode(texts)?.to_vec2::<f32>()?)
    }
}

/// Average token embeddings `[B, T, D]` over the positions where the mask
/// `[B, T]` is set.
fn mean_pool(hidden: &Tensor, mask: &Tensor) -> Result<Tensor> {
    let mask = mask.to_dtype(DType::F32)?.unsqueeze(2)?;
    let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
    let counts = mask.sum(1)?.clamp(1e-9, f64::MAX)?;
    Ok(summed.broadcast_div(&counts)?)
}

fn normalize_rows(embeddings: &Tensor) -> Result<Tensor> {
    let norms = embeddings
        .sqr()?
        .sum_keepdim(1)?
        .sqrt()?
        .clamp(1e-12, f64::MAX)?;
    Ok(embeddings.broadcast_div(&norms)?)
}

fn hidden_size(config_path: &Path) -> Result<usize> {
    #[derive(serde::Deserialize)]
    struct Dimensions {
        hidden_size: usize,
    }

    let contents = std::fs::read_to_string(config_path)?;
    let dims: Dimensions = serde_json::from_str(&contents)?;
    Ok(dims.hidden_size)
}
