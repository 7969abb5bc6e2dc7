//! Shard ingestion: extract and normalize in parallel, then merge and write
//! on a single task.
//!
//! Workers hand candidates over a bounded channel in chunks, so memory is
//! bounded by the flush window rather than by shard size.

use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::extractor::open_shard;
use super::merge::{Deduplicator, MergeOutcome, reconcile};
use super::normalizer::normalize;
use super::store::{Loader, PartitionWriter, Store};
use crate::error::StoreError;
use crate::models::{CandidateRecord, CanonicalRecord, IngestStats, ShardFailure, ShardStats};
use crate::utils::CancelFlag;

/// Candidates per message sent from an extraction worker.
const CANDIDATE_CHUNK: usize = 1_024;

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Shards extracted concurrently.
    pub workers: usize,
    /// Distinct DOIs held in memory before a flush.
    pub flush_records: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            flush_records: 250_000,
        }
    }
}

/// Counters and outcome of one shard; candidates travel separately.
#[derive(Debug, Default)]
pub struct ShardReport {
    pub path: PathBuf,
    pub stats: ShardStats,
    /// Set when the shard stopped early on a structural error.
    pub fatal: Option<String>,
}

enum ShardEvent {
    Candidates(Vec<CandidateRecord>),
    Finished(ShardReport),
}

/// Read and normalize one shard, passing accepted candidates to `emit` in
/// chunks of at most `chunk`. Reading stops when `emit` returns `false`.
///
/// Never fails: problems are reported in the result.
pub fn process_shard<F>(path: &Path, chunk: usize, mut emit: F) -> ShardReport
where
    F: FnMut(Vec<CandidateRecord>) -> bool,
{
    let mut report = ShardReport {
        path: path.to_path_buf(),
        ..Default::default()
    };

    let items = match open_shard(path) {
        Ok(items) => items,
        Err(e) => {
            warn!(shard = %path.display(), error = %e, "Cannot read shard");
            report.fatal = Some(e.to_string());
            return report;
        }
    };

    let chunk = chunk.max(1);
    let mut pending = Vec::new();
    for item in items {
        match item {
            Ok(raw) => match normalize(&raw) {
                Ok(candidate) => {
                    report.stats.items_read += 1;
                    report.stats.accepted += 1;
                    pending.push(candidate);
                    if pending.len() >= chunk && !emit(std::mem::take(&mut pending)) {
                        report.fatal = Some("ingest stopped before the shard was read".to_string());
                        return report;
                    }
                }
                Err(rejection) => {
                    report.stats.items_read += 1;
                    debug!(shard = %path.display(), reason = %rejection, "Rejected item");
                    report.stats.rejected.record(rejection);
                }
            },
            Err(e) if e.is_item_level() => {
                warn!(shard = %path.display(), error = %e, "Skipping malformed item");
                report.stats.items_read += 1;
                report.stats.malformed_items += 1;
            }
            Err(e) => {
                warn!(shard = %path.display(), error = %e, "Shard stopped early");
                report.fatal = Some(e.to_string());
                break;
            }
        }
    }

    if !pending.is_empty() {
        emit(pending);
    }

    debug!(
        shard = %path.display(),
        accepted = report.stats.accepted,
        rejected = report.stats.rejected.total(),
        malformed = report.stats.malformed_items,
        "Shard processed"
    );
    report
}

/// Drives a `transform` run against one store.
pub struct IngestPipeline {
    store: Store,
    loader: Loader,
    writer: PartitionWriter,
    options: IngestOptions,
    cancel: CancelFlag,
    progress: Option<ProgressBar>,
}

impl IngestPipeline {
    pub fn new(store: &Store, options: IngestOptions, cancel: CancelFlag) -> Result<Self, StoreError> {
        Ok(Self {
            store: store.clone(),
            loader: Loader::open(store)?,
            writer: PartitionWriter::new(store)?,
            options,
            cancel,
            progress: None,
        })
    }

    /// Tick `progress` once per finished shard.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub async fn run(&mut self, shards: Vec<PathBuf>) -> Result<IngestStats, StoreError> {
        let start = Instant::now();
        let mut stats = IngestStats {
            shards_total: shards.len() as u64,
            ..Default::default()
        };
        let mut dedup = Deduplicator::new();

        let workers = self.options.workers.max(1);
        let chunk = CANDIDATE_CHUNK.min(self.options.flush_records.max(1));
        let (tx, mut rx) = mpsc::channel(workers * 2);

        let cancel = self.cancel.clone();
        let producer = tokio::spawn(async move {
            stream::iter(shards.into_iter().take_while(move |_| !cancel.is_cancelled()))
                .for_each_concurrent(workers, move |path| {
                    let tx = tx.clone();
                    async move {
                        let shard = path.clone();
                        let chunks = tx.clone();
                        let report = tokio::task::spawn_blocking(move || {
                            process_shard(&shard, chunk, |candidates| {
                                chunks.blocking_send(ShardEvent::Candidates(candidates)).is_ok()
                            })
                        })
                        .await
                        .unwrap_or_else(|e| ShardReport {
                            fatal: Some(format!("worker failed: {e}")),
                            path,
                            ..Default::default()
                        });
                        let _ = tx.send(ShardEvent::Finished(report)).await;
                    }
                })
                .await;
        });

        if let Err(e) = self.consume(&mut rx, &mut dedup, &mut stats).await {
            producer.abort();
            return Err(e);
        }
        if let Err(e) = producer.await {
            warn!(error = %e, "Shard producer ended abnormally");
        }

        self.flush(&mut dedup, &mut stats)?;

        stats.cancelled = self.cancel.is_cancelled();
        stats.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            shards = stats.shards_total,
            failed = stats.shards_failed,
            accepted = stats.accepted,
            rejected = stats.rejected.total(),
            deduplicated = stats.deduplicated,
            inserted = stats.inserted,
            replaced = stats.replaced,
            cancelled = stats.cancelled,
            "Ingest finished"
        );
        Ok(stats)
    }

    /// Merge worker output as it arrives, flushing whenever the window fills.
    async fn consume(
        &mut self,
        rx: &mut mpsc::Receiver<ShardEvent>,
        dedup: &mut Deduplicator,
        stats: &mut IngestStats,
    ) -> Result<(), StoreError> {
        while let Some(event) = rx.recv().await {
            match event {
                ShardEvent::Candidates(candidates) => {
                    for candidate in candidates {
                        dedup.add(candidate);
                    }
                    if dedup.len() >= self.options.flush_records {
                        self.flush(dedup, stats)?;
                    }
                }
                ShardEvent::Finished(report) => {
                    stats.absorb_shard(&report.stats);
                    match report.fatal {
                        Some(error) => {
                            stats.shards_failed += 1;
                            stats.failures.push(ShardFailure {
                                path: report.path,
                                error,
                            });
                        }
                        None => stats.shards_ok += 1,
                    }

                    if let Some(progress) = &self.progress {
                        progress.inc(1);
                    }
                }
            }
        }
        Ok(())
    }

    /// Merge the collapsed candidates into their partitions and rewrite the
    /// partitions that changed.
    fn flush(&mut self, dedup: &mut Deduplicator, stats: &mut IngestStats) -> Result<(), StoreError> {
        if dedup.is_empty() {
            return Ok(());
        }

        stats.deduplicated += dedup.deduplicated();
        let mut buckets: BTreeMap<u32, Vec<CanonicalRecord>> = BTreeMap::new();
        for record in dedup.drain() {
            buckets
                .entry(self.store.bucket_for(&record.doi))
                .or_default()
                .push(record);
        }

        let models = self.loader.embedding_models()?;
        for (bucket, incoming) in buckets {
            let mut partition: HashMap<String, CanonicalRecord> = self
                .loader
                .read_bucket(bucket)?
                .into_iter()
                .map(|r| (r.doi.clone(), r))
                .collect();

            let mut changed = false;
            let mut lost_abstract = HashSet::new();
            for record in incoming {
                let existing = partition.remove(&record.doi);
                let had_abstract = existing.as_ref().is_some_and(|r| r.abstract_hash.is_some());
                if existing.is_some() {
                    stats.deduplicated += 1;
                }

                let (merged, outcome) = reconcile(existing, record);
                match outcome {
                    MergeOutcome::Inserted => {
                        stats.inserted += 1;
                        changed = true;
                    }
                    MergeOutcome::Replaced => {
                        stats.replaced += 1;
                        changed = true;
                    }
                    MergeOutcome::Unchanged => stats.unchanged += 1,
                }
                if had_abstract && merged.abstract_hash.is_none() {
                    lost_abstract.insert(merged.doi.clone());
                }
                partition.insert(merged.doi.clone(), merged);
            }

            if changed {
                let records: Vec<CanonicalRecord> = partition.into_values().collect();
                self.writer.write_records(bucket, &records)?;
                stats.partitions_written += 1;
            }
            if !lost_abstract.is_empty() {
                self.drop_embeddings(&models, bucket, &lost_abstract)?;
            }
        }

        self.loader.refresh()?;
        Ok(())
    }

    /// Remove the vectors of `dois` from every model's partition for `bucket`.
    fn drop_embeddings(
        &self,
        models: &[String],
        bucket: u32,
        dois: &HashSet<String>,
    ) -> Result<(), StoreError> {
        for model_id in models {
            let stored = self.loader.read_embedding_partition(model_id, bucket)?;
            let before = stored.len();
            let kept: Vec<_> = stored
                .into_iter()
                .filter(|e| !dois.contains(&e.doi))
                .collect();
            if kept.len() < before {
                self.writer.write_embeddings(model_id, bucket, &kept)?;
                debug!(
                    model_id,
                    bucket,
                    dropped = before - kept.len(),
                    "Dropped embeddings of records without an abstract"
                );
            }
        }
        Ok(())
    }
}
