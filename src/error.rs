//! Error types for doistore.
//!
//! Per-record rejections are not errors; see [`crate::models::Rejection`].

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading a dump shard.
///
/// Only [`ExtractError::MalformedItem`] is item-level; every other variant
/// ends the shard it was raised in.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to open shard {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while reading shard: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected {found} at byte {offset}, expected {expected}")]
    Unexpected {
        found: String,
        offset: u64,
        expected: &'static str,
    },

    #[error("shard ended inside a JSON value")]
    Truncated,

    #[error("envelope object has no \"items\" array")]
    MissingItems,

    #[error("malformed item #{index}: {message}")]
    MalformedItem { index: u64, message: String },

    #[error("unsupported shard file: {0}")]
    Unsupported(PathBuf),
}

impl ExtractError {
    /// Whether the shard can keep going after this error.
    pub fn is_item_level(&self) -> bool {
        matches!(self, ExtractError::MalformedItem { .. })
    }
}

/// Errors related to the canonical store (partitions, manifest, lock, ledger).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("ledger error: {0}")]
    Ledger(#[from] rusqlite::Error),

    #[error("row encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("manifest parse error: {0}")]
    ManifestParse(#[from] toml::de::Error),

    #[error("manifest serialize error: {0}")]
    ManifestSerialize(#[from] toml::ser::Error),

    #[error("unsupported store format version {found} (expected {expected})")]
    FormatVersion { found: u32, expected: u32 },

    #[error("no store found at {0}; run `doistore transform` first")]
    NotInitialized(PathBuf),

    #[error("store at {0} is locked by another writer")]
    Locked(PathBuf),

    #[error("invalid store configuration: {0}")]
    Invalid(String),
}

/// Errors related to embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("failed to connect to embedding server: {0}")]
    ConnectionError(String),

    #[error("embedding server error: {0}")]
    ServerError(String),

    #[error("embedding request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("vector has {actual} dimensions, model expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding timeout")]
    Timeout,
}

impl EmbeddingError {
    /// Transient failures are expected to succeed on a later pass unchanged.
    pub fn is_transient(&self) -> bool {
        match self {
            EmbeddingError::ConnectionError(_) | EmbeddingError::Timeout => true,
            EmbeddingError::ServerError(msg) => {
                let msg = msg.to_lowercase();
                msg.contains("503")
                    || msg.contains("502")
                    || msg.contains("504")
                    || msg.contains("429")
                    || msg.contains("unavailable")
                    || msg.contains("too many requests")
            }
            EmbeddingError::RequestError(e) => e.is_timeout() || e.is_connect(),
            EmbeddingError::InvalidResponse(_) | EmbeddingError::DimensionMismatch { .. } => false,
        }
    }

    /// Owned copy for reporting one failure against every item of a batch.
    /// Request errors become connection errors with the same message.
    pub fn replicate(&self) -> Self {
        match self {
            EmbeddingError::ConnectionError(msg) => EmbeddingError::ConnectionError(msg.clone()),
            EmbeddingError::ServerError(msg) => EmbeddingError::ServerError(msg.clone()),
            EmbeddingError::RequestError(e) => EmbeddingError::ConnectionError(e.to_string()),
            EmbeddingError::InvalidResponse(msg) => EmbeddingError::InvalidResponse(msg.clone()),
            EmbeddingError::DimensionMismatch { expected, actual } => EmbeddingError::DimensionMismatch {
                expected: *expected,
                actual: *actual,
            },
            EmbeddingError::Timeout => EmbeddingError::Timeout,
        }
    }
}

/// Errors from the PDF retrieval collaborator and the local PDF cache.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transient fetch failure: {0}")]
    Transient(String),

    #[error("PDF cache IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("path error: {0}")]
    PathError(String),

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Top-level application error.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("extract error: {0}")]
    Extract(#[from] ExtractError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(EmbeddingError::Timeout.is_transient());
        assert!(EmbeddingError::ConnectionError("refused".into()).is_transient());
        assert!(EmbeddingError::ServerError("status 503 Service Unavailable".into()).is_transient());
        assert!(!EmbeddingError::ServerError("status 400: bad input".into()).is_transient());
        assert!(!EmbeddingError::InvalidResponse("not json".into()).is_transient());
        assert!(
            !EmbeddingError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
            .is_transient()
        );
    }

    #[test]
    fn test_replicate_keeps_classification() {
        let busy = EmbeddingError::ServerError("status 503".into());
        assert!(busy.replicate().is_transient());
        assert_eq!(busy.replicate().to_string(), busy.to_string());
        assert!(EmbeddingError::Timeout.replicate().is_transient());
        assert!(!EmbeddingError::InvalidResponse("x".into()).replicate().is_transient());
    }

    #[test]
    fn test_item_level_extract_errors() {
        let item = ExtractError::MalformedItem {
            index: 3,
            message: "EOF".into(),
        };
        assert!(item.is_item_level());
        assert!(!ExtractError::Truncated.is_item_level());
        assert!(!ExtractError::MissingItems.is_item_level());
    }

    #[test]
    fn test_app_error_wraps_domain_errors() {
        let err: AppError = StoreError::Invalid("bucket_count is 0".into()).into();
        assert!(matches!(err, AppError::Store(_)));
        assert_eq!(
            err.to_string(),
            "store error: invalid store configuration: bucket_count is 0"
        );

        let err: AppError = FetchError::Transient("timeout".into()).into();
        assert!(matches!(err, AppError::Fetch(_)));
    }
}
