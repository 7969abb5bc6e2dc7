//! Incremental embedding of abstracts for the active model.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::embedding::Embedder;
use super::store::{Loader, PartitionWriter, Store};
use crate::error::{EmbeddingError, StoreError};
use crate::models::{EmbedStats, EmbeddingConfig, EmbeddingRecord, PendingAbstract};
use crate::utils::CancelFlag;

#[derive(Debug, Clone)]
pub struct AttachOptions {
    pub model_id: String,
    pub batch_size: usize,
    /// Bound on each external call.
    pub timeout: Duration,
    /// Expected vector length; learned from the store or the first vector when unset.
    pub dimension: Option<u32>,
    /// Stop after this many candidates.
    pub limit: Option<usize>,
    /// Buffered vectors held before partitions are rewritten.
    pub flush_embeddings: usize,
}

impl AttachOptions {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            model_id: config.model_id.clone(),
            batch_size: config.batch_size as usize,
            timeout: Duration::from_secs(config.timeout_secs),
            dimension: config.dimension,
            limit: None,
            flush_embeddings: config.flush_embeddings,
        }
    }
}

/// Drives an `embed` run: selects stale or missing embeddings, calls the
/// embedder per batch and writes the vectors back by partition.
pub struct Attacher<E: Embedder> {
    embedder: E,
    store: Store,
    loader: Loader,
    writer: PartitionWriter,
    options: AttachOptions,
    cancel: CancelFlag,
}

impl<E: Embedder> Attacher<E> {
    pub fn new(
        store: &Store,
        embedder: E,
        options: AttachOptions,
        cancel: CancelFlag,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            embedder,
            store: store.clone(),
            loader: Loader::open(store)?,
            writer: PartitionWriter::new(store)?,
            options,
            cancel,
        })
    }

    pub async fn run(&mut self) -> Result<EmbedStats, StoreError> {
        let start = Instant::now();
        let mut stats = EmbedStats {
            model_id: self.options.model_id.clone(),
            ..Default::default()
        };

        let mut dimension = match self.options.dimension {
            Some(d) => Some(d as usize),
            None => self
                .loader
                .model_dimension(&self.options.model_id)?
                .map(|d| d as usize),
        };

        let batch_size = self.options.batch_size.max(1);
        let mut cursor: Option<String> = None;
        let mut buffer: BTreeMap<u32, Vec<EmbeddingRecord>> = BTreeMap::new();
        let mut buffered = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                stats.cancelled = true;
                break;
            }

            let take = match self.options.limit {
                Some(limit) => batch_size.min(limit.saturating_sub(stats.candidates as usize)),
                None => batch_size,
            };
            if take == 0 {
                break;
            }

            let batch =
                self.loader
                    .pending_embeddings(&self.options.model_id, cursor.as_deref(), take)?;
            let Some(last) = batch.last() else {
                break;
            };
            cursor = Some(last.doi.clone());
            stats.candidates += batch.len() as u64;

            for (pending, result) in self.embed_batch(batch, &mut stats).await {
                match result.and_then(|vector| check_dimension(vector, &mut dimension)) {
                    Ok(vector) => {
                        let record = EmbeddingRecord::new(&pending, &self.options.model_id, vector);
                        buffer
                            .entry(self.store.bucket_for(&record.doi))
                            .or_default()
                            .push(record);
                        buffered += 1;
                    }
                    Err(e) if e.is_transient() => {
                        debug!(doi = %pending.doi, error = %e, "Embedding deferred");
                        stats.failed_transient += 1;
                    }
                    Err(e) => {
                        warn!(doi = %pending.doi, error = %e, "Embedding rejected");
                        stats.failed_permanent += 1;
                    }
                }
            }

            if buffered >= self.options.flush_embeddings.max(1) {
                self.flush(&mut buffer, &mut stats)?;
                buffered = 0;
            }
        }

        self.flush(&mut buffer, &mut stats)?;

        stats.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            model_id = %stats.model_id,
            candidates = stats.candidates,
            embedded = stats.embedded,
            refreshed = stats.refreshed,
            skipped = stats.skipped(),
            calls = stats.calls,
            cancelled = stats.cancelled,
            "Embedding pass finished"
        );
        Ok(stats)
    }

    /// Embed one batch. A transient failure defers the whole batch to a later
    /// pass; any other failure retries every item on its own once to isolate
    /// the input at fault.
    async fn embed_batch(
        &self,
        batch: Vec<PendingAbstract>,
        stats: &mut EmbedStats,
    ) -> Vec<(PendingAbstract, Result<Vec<f32>, EmbeddingError>)> {
        let texts: Vec<String> = batch.iter().map(|p| p.abstract_text.clone()).collect();
        let error = match self.call(&texts, stats).await {
            Ok(vectors) if vectors.len() == batch.len() => {
                return batch.into_iter().zip(vectors.into_iter().map(Ok)).collect();
            }
            Ok(vectors) => EmbeddingError::InvalidResponse(format!(
                "expected {} vectors, got {}",
                batch.len(),
                vectors.len()
            )),
            Err(e) => e,
        };

        if error.is_transient() {
            debug!(size = batch.len(), error = %error, "Batch deferred");
            return batch
                .into_iter()
                .map(|p| (p, Err(error.replicate())))
                .collect();
        }

        if batch.len() == 1 {
            return batch
                .into_iter()
                .next()
                .map(|p| (p, Err(error)))
                .into_iter()
                .collect();
        }

        debug!(size = batch.len(), error = %error, "Batch failed, retrying items one by one");
        let mut results = Vec::with_capacity(batch.len());
        for pending in batch {
            let text = [pending.abstract_text.clone()];
            let result = match self.call(&text, stats).await {
                Ok(mut vectors) if vectors.len() == 1 => Ok(vectors.remove(0)),
                Ok(vectors) => Err(EmbeddingError::InvalidResponse(format!(
                    "expected 1 vector, got {}",
                    vectors.len()
                ))),
                Err(e) => Err(e),
            };
            results.push((pending, result));
        }
        results
    }

    async fn call(
        &self,
        texts: &[String],
        stats: &mut EmbedStats,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        stats.calls += 1;
        tokio::time::timeout(
            self.options.timeout,
            self.embedder.embed(texts, &self.options.model_id),
        )
        .await
        .unwrap_or(Err(EmbeddingError::Timeout))
    }

    /// Replace the (doi, model_id) rows of each touched partition.
    fn flush(
        &mut self,
        buffer: &mut BTreeMap<u32, Vec<EmbeddingRecord>>,
        stats: &mut EmbedStats,
    ) -> Result<(), StoreError> {
        if buffer.is_empty() {
            return Ok(());
        }

        for (bucket, fresh) in std::mem::take(buffer) {
            let mut partition: HashMap<String, EmbeddingRecord> = self
                .loader
                .read_embedding_partition(&self.options.model_id, bucket)?
                .into_iter()
                .map(|e| (e.doi.clone(), e))
                .collect();

            for record in fresh {
                stats.embedded += 1;
                if partition.insert(record.doi.clone(), record).is_some() {
                    stats.refreshed += 1;
                }
            }

            let rows: Vec<EmbeddingRecord> = partition.into_values().collect();
            self.writer
                .write_embeddings(&self.options.model_id, bucket, &rows)?;
            stats.partitions_written += 1;
        }

        self.loader.refresh()?;
        Ok(())
    }
}

/// Reject empty vectors and vectors whose length disagrees with the model's.
fn check_dimension(
    vector: Vec<f32>,
    dimension: &mut Option<usize>,
) -> Result<Vec<f32>, EmbeddingError> {
    if vector.is_empty() {
        return Err(EmbeddingError::InvalidResponse("empty vector".to_string()));
    }
    match *dimension {
        Some(expected) if expected != vector.len() => Err(EmbeddingError::DimensionMismatch {
            expected,
            actual: vector.len(),
        }),
        Some(_) => Ok(vector),
        None => {
            *dimension = Some(vector.len());
            Ok(vector)
        }
    }
}
