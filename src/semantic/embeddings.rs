//! Embedding gateway backed by fastembed.
//!
//! - Text goes through a sentence model producing 384-dimensional vectors
//! - Photos go through a vision model producing 768-dimensional vectors
//! - Models are downloaded into `<cache_dir>/models` on first start

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fastembed::{ImageEmbedding, ImageInitOptions, InitOptions, TextEmbedding};
use sha2::{Digest, Sha256};

use crate::config::EmbeddingsConfig;

pub const TEXT_DIMENSIONS: usize = 384;
pub const IMAGE_DIMENSIONS: usize = 768;

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),

    #[error("Model {model} produces {got}-dimensional vectors, {expected} required")]
    DimensionMismatch {
        model: String,
        expected: usize,
        got: usize,
    },
}

/// Turns descriptions and photos into vectors.
#[async_trait]
pub trait EmbeddingGateway: Send + Sync {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
    async fn embed_image(&self, image: &[u8]) -> Result<Vec<f32>, EmbeddingError>;
}

/// SHA256 of a model name; stamped into partition files so vectors from a
/// different model are never mixed in.
pub fn model_id_hash(model_name: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(model_name.to_lowercase().as_bytes());
    hasher.finalize().into()
}

/// fastembed's `embed` takes `&mut self`, so each model sits behind a mutex
/// and runs on the blocking pool.
pub struct FastembedGateway {
    text: Arc<Mutex<TextEmbedding>>,
    image: Arc<Mutex<ImageEmbedding>>,
    text_model: String,
    image_model: String,
}

impl FastembedGateway {
    /// Loads both models, downloading them if needed. Blocking; call it from
    /// `spawn_blocking` or before the runtime starts serving.
    pub fn new(config: &EmbeddingsConfig, cache_dir: PathBuf) -> Result<Self, EmbeddingError> {
        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        let text_options = InitOptions::new(parse_text_model(&config.text_model)?)
            .with_cache_dir(models_dir.clone())
            .with_show_download_progress(true);
        let mut text = TextEmbedding::try_new(text_options)
            .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;
        check_dimensions(&config.text_model, TEXT_DIMENSIONS, probe_text(&mut text)?)?;

        let image_options = ImageInitOptions::new(parse_image_model(&config.image_model)?)
            .with_cache_dir(models_dir)
            .with_show_download_progress(true);
        let mut image = ImageEmbedding::try_new(image_options)
            .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;
        check_dimensions(&config.image_model, IMAGE_DIMENSIONS, probe_image(&mut image)?)?;

        log::info!(
            "embedding models ready: text={} image={}",
            config.text_model,
            config.image_model
        );

        Ok(Self {
            text: Arc::new(Mutex::new(text)),
            image: Arc::new(Mutex::new(image)),
            text_model: config.text_model.clone(),
            image_model: config.image_model.clone(),
        })
    }

    pub fn text_model_id(&self) -> [u8; 32] {
        model_id_hash(&self.text_model)
    }

    pub fn image_model_id(&self) -> [u8; 32] {
        model_id_hash(&self.image_model)
    }
}

#[async_trait]
impl EmbeddingGateway for FastembedGateway {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let model = self.text.clone();
        let text = text.to_string();

        tokio::task::spawn_blocking(move || {
            let mut model = model.lock().map_err(|e| {
                EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
            })?;

            model
                .embed(vec![text], None)
                .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?
                .into_iter()
                .next()
                .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))
        })
        .await
        .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?
    }

    async fn embed_image(&self, image: &[u8]) -> Result<Vec<f32>, EmbeddingError> {
        let model = self.image.clone();
        let image = image.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut model = model.lock().map_err(|e| {
                EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
            })?;

            model
                .embed_bytes(&[image.as_slice()], None)
                .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?
                .into_iter()
                .next()
                .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))
        })
        .await
        .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?
    }
}

fn parse_text_model(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
    match name.to_lowercase().as_str() {
        "all-minilm-l6-v2" | "allminiml6v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "all-minilm-l6-v2-q" | "allminiml6v2q" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q),
        "bge-small-en-v1.5" | "bgesmallenv15" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-small-en-v1.5-q" | "bgesmallenv15q" => Ok(fastembed::EmbeddingModel::BGESmallENV15Q),
        _ => Err(EmbeddingError::InvalidModel(format!(
            "Unknown text model: {}. Supported models: all-MiniLM-L6-v2, bge-small-en-v1.5 (add -q suffix for quantized)",
            name
        ))),
    }
}

fn parse_image_model(name: &str) -> Result<fastembed::ImageEmbeddingModel, EmbeddingError> {
    match name.to_lowercase().as_str() {
        "nomic-embed-vision-v1.5" | "nomicembedvisionv15" => {
            Ok(fastembed::ImageEmbeddingModel::NomicEmbedVisionV15)
        }
        "unicom-vit-b16" | "unicomvitb16" => Ok(fastembed::ImageEmbeddingModel::UnicomVitB16),
        _ => Err(EmbeddingError::InvalidModel(format!(
            "Unknown image model: {}. Supported models: nomic-embed-vision-v1.5, unicom-vit-b16",
            name
        ))),
    }
}

fn check_dimensions(model: &str, expected: usize, got: usize) -> Result<(), EmbeddingError> {
    if got != expected {
        return Err(EmbeddingError::DimensionMismatch {
            model: model.to_string(),
            expected,
            got,
        });
    }
    Ok(())
}

fn probe_text(model: &mut TextEmbedding) -> Result<usize, EmbeddingError> {
    model
        .embed(vec!["probe"], None)
        .map_err(|e| EmbeddingError::InitFailed(format!("Failed to probe dimensions: {}", e)))?
        .first()
        .map(|v| v.len())
        .ok_or_else(|| EmbeddingError::InitFailed("Model returned no embedding".to_string()))
}

fn probe_image(model: &mut ImageEmbedding) -> Result<usize, EmbeddingError> {
    let pixel = image::RgbImage::from_pixel(8, 8, image::Rgb([127, 127, 127]));
    let mut png = Vec::new();
    pixel
        .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| EmbeddingError::InitFailed(format!("Failed to build probe image: {}", e)))?;

    model
        .embed_bytes(&[png.as_slice()], None)
        .map_err(|e| EmbeddingError::InitFailed(format!("Failed to probe dimensions: {}", e)))?
        .first()
        .map(|v| v.len())
        .ok_or_else(|| EmbeddingError::InitFailed("Model returned no embedding".to_string()))
}
