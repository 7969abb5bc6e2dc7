use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::search::OutputFormat;
use crate::error::ConfigError;

pub const DEFAULT_EMBEDDING_URL: &str = "http://localhost:11411";
pub const DEFAULT_MODEL_ID: &str = "all-mpnet-base-v1";
pub const DEFAULT_BUCKET_COUNT: u32 = 64;

pub const ENV_STORE: &str = "DOISTORE_STORE";
pub const ENV_EMBEDDING_URL: &str = "DOISTORE_EMBEDDING_URL";
pub const ENV_MODEL_ID: &str = "DOISTORE_MODEL_ID";
pub const ENV_PDF_DIR: &str = "DOISTORE_PDF_DIR";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub pdf: PdfConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("doistore").join("config.toml"))
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file yields defaults. Environment overrides are applied
    /// afterwards, then the result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::config_path(),
        };

        let mut config = match path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(&path)?;
                toml::from_str(&content)?
            }
            _ => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `DOISTORE_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(store) = lookup(ENV_STORE) {
            self.store.path = PathBuf::from(store);
        }
        if let Some(url) = lookup(ENV_EMBEDDING_URL) {
            self.embedding.url = url;
        }
        if let Some(model) = lookup(ENV_MODEL_ID) {
            self.embedding.model_id = model;
        }
        if let Some(dir) = lookup(ENV_PDF_DIR) {
            self.pdf.dir = Some(PathBuf::from(dir));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.bucket_count == 0 {
            return Err(ConfigError::ValidationError(
                "store.bucket_count must be at least 1".to_string(),
            ));
        }
        if self.store.flush_records == 0 {
            return Err(ConfigError::ValidationError(
                "store.flush_records must be at least 1".to_string(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "embedding.batch_size must be at least 1".to_string(),
            ));
        }
        if self.embedding.flush_embeddings == 0 {
            return Err(ConfigError::ValidationError(
                "embedding.flush_embeddings must be at least 1".to_string(),
            ));
        }
        if self.embedding.model_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "embedding.model_id must not be empty".to_string(),
            ));
        }
        if self.embedding.dimension == Some(0) {
            return Err(ConfigError::ValidationError(
                "embedding.dimension must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path().ok_or_else(|| {
                ConfigError::PathError("could not determine config directory".to_string())
            })?,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Directory holding cached PDFs; defaults to `<store>/pdfs`.
    pub fn pdf_dir(&self) -> PathBuf {
        self.pdf
            .dir
            .clone()
            .unwrap_or_else(|| self.store.path.join("pdfs"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Only read when a store is created; existing stores keep their manifest value.
    #[serde(default = "default_bucket_count")]
    pub bucket_count: u32,

    /// Distinct DOIs held in memory before the deduplicator flushes.
    #[serde(default = "default_flush_records")]
    pub flush_records: usize,
}

fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join("doistore"))
        .unwrap_or_else(|| PathBuf::from(".doistore"))
}

fn default_bucket_count() -> u32 {
    DEFAULT_BUCKET_COUNT
}

fn default_flush_records() -> usize {
    250_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            bucket_count: default_bucket_count(),
            flush_records: default_flush_records(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IngestConfig {
    /// Extraction worker threads; 0 means available parallelism.
    #[serde(default)]
    pub workers: usize,
}

impl IngestConfig {
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_url")]
    pub url: String,

    #[serde(default = "default_model_id")]
    pub model_id: String,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Expected vector length; when unset, the first stored vector fixes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<u32>,

    /// Vectors buffered before embedding partitions are rewritten.
    #[serde(default = "default_flush_embeddings")]
    pub flush_embeddings: usize,
}

fn default_embedding_url() -> String {
    DEFAULT_EMBEDDING_URL.to_string()
}

fn default_model_id() -> String {
    DEFAULT_MODEL_ID.to_string()
}

fn default_timeout() -> u64 {
    120
}

fn default_batch_size() -> u32 {
    32
}

fn default_flush_embeddings() -> usize {
    10_000
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: default_embedding_url(),
            model_id: default_model_id(),
            timeout_secs: default_timeout(),
            batch_size: default_batch_size(),
            dimension: None,
            flush_embeddings: default_flush_embeddings(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PdfConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutputConfig {
    #[serde(default)]
    pub default_format: OutputFormat,
}
