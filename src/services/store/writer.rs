use duckdb::Connection;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::schema::{Columns, EMBEDDING_COLUMNS, RECORD_COLUMNS, RecordRow, column_names, json_column_spec};
use super::{Store, StoreLayout, sql_literal};
use crate::error::StoreError;
use crate::models::{CanonicalRecord, EmbeddingRecord};
use crate::utils::file::{replace_file, temp_sibling};

/// Rewrites whole partitions.
///
/// Rows are staged as JSONL, converted to Parquet by DuckDB into a temp file
/// next to the target, then renamed over it. Readers see either the old or
/// the new partition, never a partial one.
pub struct PartitionWriter {
    conn: Connection,
    layout: StoreLayout,
}

impl PartitionWriter {
    pub fn new(store: &Store) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn,
            layout: store.layout().clone(),
        })
    }

    /// Replace the records partition for `bucket` with `records`.
    pub fn write_records(&self, bucket: u32, records: &[CanonicalRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let rows = records
            .iter()
            .map(RecordRow::from_record)
            .collect::<Result<Vec<_>, _>>()?;

        let staging = self.staging_file(&format!("records-{bucket:03}"));
        let target = self.layout.record_partition(bucket);
        self.write_partition(&staging, &target, &rows, RECORD_COLUMNS)?;

        debug!(bucket, rows = rows.len(), "Wrote records partition");
        Ok(())
    }

    /// Replace the embeddings partition of `model_id` for `bucket` with
    /// `embeddings`. An empty slice removes the partition.
    pub fn write_embeddings(
        &self,
        model_id: &str,
        bucket: u32,
        embeddings: &[EmbeddingRecord],
    ) -> Result<(), StoreError> {
        if embeddings.is_empty() {
            let target = self.layout.embedding_partition(model_id, bucket);
            match fs::remove_file(&target) {
                Ok(()) => debug!(model_id, bucket, "Removed empty embeddings partition"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            return Ok(());
        }

        fs::create_dir_all(self.layout.embeddings_dir(model_id))?;
        let staging = self.staging_file(&format!("embeddings-{bucket:03}"));
        let target = self.layout.embedding_partition(model_id, bucket);
        self.write_partition(&staging, &target, embeddings, EMBEDDING_COLUMNS)?;

        debug!(model_id, bucket, rows = embeddings.len(), "Wrote embeddings partition");
        Ok(())
    }

    fn staging_file(&self, name: &str) -> PathBuf {
        self.layout
            .staging_dir()
            .join(format!("{name}-{}.jsonl", std::process::id()))
    }

    fn write_partition<T: Serialize>(
        &self,
        staging: &Path,
        target: &Path,
        rows: &[T],
        columns: Columns,
    ) -> Result<(), StoreError> {
        if let Some(parent) = staging.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut out = BufWriter::new(File::create(staging)?);
        for row in rows {
            serde_json::to_writer(&mut out, row)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
        drop(out);

        let tmp = temp_sibling(target);
        let sql = format!(
            "COPY (SELECT {cols} FROM read_json({src}, format = 'newline_delimited', columns = {spec}) ORDER BY doi) \
             TO {dst} (FORMAT PARQUET, COMPRESSION ZSTD);",
            cols = column_names(columns),
            src = sql_literal(staging),
            spec = json_column_spec(columns),
            dst = sql_literal(&tmp),
        );

        let result = self
            .conn
            .execute_batch(&sql)
            .map_err(StoreError::from)
            .and_then(|_| replace_file(&tmp, target).map_err(StoreError::from));

        let _ = fs::remove_file(staging);
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }
}
