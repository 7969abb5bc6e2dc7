mod config;
mod embedding;
mod record;
mod search;
mod stats;

pub use config::{
    Config, DEFAULT_BUCKET_COUNT, DEFAULT_EMBEDDING_URL, DEFAULT_MODEL_ID, ENV_EMBEDDING_URL,
    ENV_MODEL_ID, ENV_PDF_DIR, ENV_STORE, EmbeddingConfig, IngestConfig, OutputConfig, PdfConfig,
    StoreConfig,
};
pub use embedding::{EmbeddingRecord, ModelCoverage, PendingAbstract};
pub use record::{
    Author, CandidateRecord, CanonicalRecord, PartialDate, Rejection, SourceType, short_id,
};
pub use search::{OutputFormat, SearchHit, SearchQuery, SearchResults};
pub use stats::{
    EmbedStats, IngestStats, LedgerTotals, RejectionCounts, RunEntry, ShardFailure, ShardStats,
    StoreOverview,
};
