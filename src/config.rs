use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_PUBLIC_URL: &str = "http://localhost:8080";
const DEFAULT_UPLOAD_LIMIT_MB: usize = 20;

/// Number of candidates requested from each partition.
const DEFAULT_TOP_K: usize = 5;

const DEFAULT_DOWNSTREAM_TIMEOUT_SECS: u64 = 15;
/// Embedding runs locally on the CPU and can be slow for large photos
const DEFAULT_EMBEDDING_TIMEOUT_SECS: u64 = 120;

const DEFAULT_TEXT_MODEL: &str = "all-MiniLM-L6-v2";
const DEFAULT_IMAGE_MODEL: &str = "nomic-embed-vision-v1.5";

const DEFAULT_PUSH_ENDPOINT: &str = "https://exp.host/--/api/v2/push/send";
const DEFAULT_PUSH_TIMEOUT_SECS: u64 = 10;

const DEFAULT_MAX_DIMENSION: u32 = 1600;
const DEFAULT_QUALITY: u8 = 85;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Candidates requested per partition query
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Optional cosine similarity floor [0.0, 1.0]. Unset keeps every
    /// top-k candidate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f32>,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            min_score: None,
        }
    }
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Bound on document store, object store, index and push calls
    #[serde(default = "default_downstream_secs")]
    pub downstream_secs: u64,

    /// Bound on a single embedding computation
    #[serde(default = "default_embedding_secs")]
    pub embedding_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            downstream_secs: DEFAULT_DOWNSTREAM_TIMEOUT_SECS,
            embedding_secs: DEFAULT_EMBEDDING_TIMEOUT_SECS,
        }
    }
}

impl TimeoutsConfig {
    pub fn downstream(&self) -> Duration {
        Duration::from_secs(self.downstream_secs)
    }

    pub fn embedding(&self) -> Duration {
        Duration::from_secs(self.embedding_secs)
    }
}

fn default_downstream_secs() -> u64 {
    DEFAULT_DOWNSTREAM_TIMEOUT_SECS
}

fn default_embedding_secs() -> u64 {
    DEFAULT_EMBEDDING_TIMEOUT_SECS
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    /// Text model; must produce 384-dimensional vectors
    #[serde(default = "default_text_model")]
    pub text_model: String,

    /// Image model; must produce 768-dimensional vectors
    #[serde(default = "default_image_model")]
    pub image_model: String,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
        }
    }
}

fn default_text_model() -> String {
    DEFAULT_TEXT_MODEL.to_string()
}

fn default_image_model() -> String {
    DEFAULT_IMAGE_MODEL.to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImagesConfig {
    /// Re-encode stored photos as WebP
    #[serde(default = "default_true")]
    pub compress: bool,

    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,

    /// WebP quality, 1-100
    #[serde(default = "default_quality")]
    pub quality: u8,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            compress: true,
            max_dimension: DEFAULT_MAX_DIMENSION,
            quality: DEFAULT_QUALITY,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_dimension() -> u32 {
    DEFAULT_MAX_DIMENSION
}

fn default_quality() -> u8 {
    DEFAULT_QUALITY
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PushConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_push_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_push_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: DEFAULT_PUSH_ENDPOINT.to_string(),
            timeout_secs: DEFAULT_PUSH_TIMEOUT_SECS,
        }
    }
}

fn default_push_endpoint() -> String {
    DEFAULT_PUSH_ENDPOINT.to_string()
}

fn default_push_timeout_secs() -> u64 {
    DEFAULT_PUSH_TIMEOUT_SECS
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Base URL clients use to reach this server; stored image URLs start with it
    #[serde(default = "default_public_url")]
    pub public_url: String,

    #[serde(default = "default_upload_limit_mb")]
    pub upload_limit_mb: usize,

    /// Token lifetime; tokens never expire when unset
    #[serde(default)]
    pub token_ttl_hours: Option<u64>,

    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub images: ImagesConfig,
    #[serde(default)]
    pub push: PushConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            public_url: DEFAULT_PUBLIC_URL.to_string(),
            upload_limit_mb: DEFAULT_UPLOAD_LIMIT_MB,
            token_ttl_hours: None,
            matching: MatchingConfig::default(),
            timeouts: TimeoutsConfig::default(),
            embeddings: EmbeddingsConfig::default(),
            images: ImagesConfig::default(),
            push: PushConfig::default(),
            base_path: PathBuf::new(),
        }
    }
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

fn default_public_url() -> String {
    DEFAULT_PUBLIC_URL.to_string()
}

fn default_upload_limit_mb() -> usize {
    DEFAULT_UPLOAD_LIMIT_MB
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.listen_addr
            .parse::<std::net::SocketAddr>()
            .with_context(|| format!("listen_addr {:?} is not a socket address", self.listen_addr))?;

        url::Url::parse(&self.public_url)
            .with_context(|| format!("public_url {:?} is not a valid url", self.public_url))?;

        if self.upload_limit_mb == 0 {
            bail!("upload_limit_mb must be greater than 0");
        }

        if self.matching.top_k == 0 {
            bail!("matching.top_k must be greater than 0");
        }

        if let Some(min_score) = self.matching.min_score {
            if !(0.0..=1.0).contains(&min_score) {
                bail!("matching.min_score must be between 0.0 and 1.0, got {min_score}");
            }
        }

        if self.timeouts.downstream_secs == 0 || self.timeouts.embedding_secs == 0 {
            bail!("timeouts must be greater than 0");
        }

        if !(1..=100).contains(&self.images.quality) {
            bail!("images.quality must be between 1 and 100, got {}", self.images.quality);
        }

        if self.images.max_dimension == 0 {
            bail!("images.max_dimension must be greater than 0");
        }

        if self.push.enabled {
            url::Url::parse(&self.push.endpoint)
                .with_context(|| format!("push.endpoint {:?} is not a valid url", self.push.endpoint))?;
        }

        if self.token_ttl_hours == Some(0) {
            bail!("token_ttl_hours must be greater than 0 when set");
        }

        Ok(())
    }

    pub fn load_with(base_path: &str) -> anyhow::Result<Self> {
        let base = PathBuf::from(base_path);
        std::fs::create_dir_all(&base)
            .with_context(|| format!("failed to create base directory {base_path}"))?;

        let path = base.join(CONFIG_FILE);

        // create new if does not exist
        if !path.exists() {
            std::fs::write(&path, serde_yml::to_string(&Self::default())?)?;
        }

        let config_str = std::fs::read_to_string(&path).context("config file is not valid utf8")?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base;
        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_str = serde_yml::to_string(&self)?;
        std::fs::write(self.base_path.join(CONFIG_FILE), config_str)?;
        Ok(())
    }

    pub fn base_path(&self) -> &std::path::Path {
        &self.base_path
    }

    pub fn upload_limit_bytes(&self) -> usize {
        self.upload_limit_mb * 1024 * 1024
    }
}
