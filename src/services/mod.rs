mod attacher;
mod embedding;
mod extractor;
mod ingest;
mod ledger;
mod merge;
mod normalizer;
mod pdf;
pub mod store;

pub use attacher::{AttachOptions, Attacher};
pub use embedding::{Embedder, HealthResponse, HttpEmbedder};
pub use extractor::{ExtractCounts, Framing, RawItems, ShardSource, open_shard};
pub use ingest::{IngestOptions, IngestPipeline, ShardReport, process_shard};
pub use ledger::{KIND_EMBED, KIND_TRANSFORM, RunLedger};
pub use merge::{Deduplicator, MergeOutcome, merge, reconcile};
pub use normalizer::{normalize, normalize_doi};
pub use pdf::{FetchOutcome, PdfCache, PdfFetcher, doi_from_file_name, pdf_file_name};
pub use store::{Loader, PartitionWriter, Store, StoreLayout, StoreLock, StoreManifest};
