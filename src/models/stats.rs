//! Run counters.
//!
//! Each stage receives the counters it owns by `&mut` and the caller
//! aggregates them; nothing here is global.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::embedding::ModelCoverage;
use super::record::Rejection;

/// Per-reason rejection counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionCounts {
    pub missing_doi: u64,
    pub not_an_object: u64,
}

impl RejectionCounts {
    pub fn record(&mut self, rejection: Rejection) {
        match rejection {
            Rejection::MissingDoi => self.missing_doi += 1,
            Rejection::NotAnObject => self.not_an_object += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.missing_doi + self.not_an_object
    }

    pub fn absorb(&mut self, other: &RejectionCounts) {
        self.missing_doi += other.missing_doi;
        self.not_an_object += other.not_an_object;
    }
}

/// Counters for a single shard, produced by an extraction worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardStats {
    pub items_read: u64,
    pub malformed_items: u64,
    pub accepted: u64,
    pub rejected: RejectionCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Summary of one `transform` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    pub shards_total: u64,
    pub shards_ok: u64,
    pub shards_failed: u64,
    pub items_read: u64,
    pub malformed_items: u64,
    pub accepted: u64,
    pub rejected: RejectionCounts,
    /// Candidates that met another version of their DOI, in this run or in the store.
    pub deduplicated: u64,
    pub inserted: u64,
    pub replaced: u64,
    pub unchanged: u64,
    pub partitions_written: u64,
    pub cancelled: bool,
    pub duration_ms: u64,
    pub failures: Vec<ShardFailure>,
}

impl IngestStats {
    pub fn absorb_shard(&mut self, shard: &ShardStats) {
        self.items_read += shard.items_read;
        self.malformed_items += shard.malformed_items;
        self.accepted += shard.accepted;
        self.rejected.absorb(&shard.rejected);
    }

    /// Malformed items plus shards whose framing broke.
    pub fn structural_errors(&self) -> u64 {
        self.malformed_items + self.shards_failed
    }

    pub fn has_failed_shards(&self) -> bool {
        self.shards_failed > 0
    }
}

/// Summary of one `embed` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedStats {
    pub model_id: String,
    pub candidates: u64,
    pub embedded: u64,
    /// Subset of `embedded` that replaced a stale vector.
    pub refreshed: u64,
    pub failed_transient: u64,
    pub failed_permanent: u64,
    pub calls: u64,
    pub partitions_written: u64,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl EmbedStats {
    pub fn skipped(&self) -> u64 {
        self.failed_transient + self.failed_permanent
    }
}

/// One row of the run ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEntry {
    pub id: i64,
    pub kind: String,
    pub started_at: String,
    pub duration_ms: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub deduplicated: u64,
    pub embedded: u64,
    pub skipped: u64,
    pub failed_shards: u64,
    pub cancelled: bool,
}

/// Cumulative ledger counters across all runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTotals {
    pub runs: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub deduplicated: u64,
    pub embedded: u64,
    pub skipped: u64,
}

/// Snapshot of the store for the `stats` command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreOverview {
    pub store_path: PathBuf,
    pub bucket_count: u32,
    pub records: u64,
    pub with_abstract: u64,
    pub with_date: u64,
    pub by_source_type: Vec<(String, u64)>,
    pub embeddings: Vec<ModelCoverage>,
    pub active_model: String,
    pub missing_active: u64,
    pub totals: LedgerTotals,
    pub recent_runs: Vec<RunEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absorb_shard() {
        let mut stats = IngestStats::default();
        let mut shard = ShardStats {
            items_read: 3,
            malformed_items: 1,
            accepted: 1,
            ..Default::default()
        };
        shard.rejected.record(Rejection::MissingDoi);

        stats.absorb_shard(&shard);
        stats.absorb_shard(&shard);

        assert_eq!(stats.items_read, 6);
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.rejected.total(), 2);
        assert_eq!(stats.structural_errors(), 2);
        assert!(!stats.has_failed_shards());
    }

    #[test]
    fn test_embed_skipped() {
        let stats = EmbedStats {
            failed_transient: 2,
            failed_permanent: 1,
            ..Default::default()
        };
        assert_eq!(stats.skipped(), 3);
    }
}
