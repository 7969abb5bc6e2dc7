use duckdb::types::Value as SqlValue;
use duckdb::{Connection, params, params_from_iter};
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::debug;
use walkdir::WalkDir;

use super::schema::{
    EMBEDDING_COLUMNS, RECORD_COLUMNS, RecordRow, column_names, create_table_sql, decode_vector,
    embedding_from_row, embedding_projection, qualified_columns,
};
use super::{Store, StoreLayout, sql_literal};
use crate::error::StoreError;
use crate::models::{
    CanonicalRecord, EmbeddingRecord, ModelCoverage, PendingAbstract, SearchHit, SearchQuery,
    SearchResults, SourceType, StoreOverview,
};

/// Read-only relational view of a store.
///
/// `records` and `embeddings` are DuckDB views over the Parquet partitions;
/// nothing is copied in. Call [`Loader::refresh`] after partitions are
/// written so newly created files are picked up.
pub struct Loader {
    conn: Connection,
    layout: StoreLayout,
}

impl Loader {
    pub fn open(store: &Store) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(&create_table_sql("empty_records", RECORD_COLUMNS))?;
        conn.execute_batch(&create_table_sql("empty_embeddings", EMBEDDING_COLUMNS))?;
        conn.execute_batch("CREATE OR REPLACE TABLE local_pdfs (doi VARCHAR);")?;

        let loader = Self {
            conn,
            layout: store.layout().clone(),
        };
        loader.refresh()?;
        Ok(loader)
    }

    /// Re-point the views at the partitions currently on disk.
    pub fn refresh(&self) -> Result<(), StoreError> {
        let records_dir = self.layout.records_dir();
        let records_source = if has_partitions(&records_dir, 1) {
            format!("read_parquet({})", sql_literal(&records_dir.join("*.parquet")))
        } else {
            "empty_records".to_string()
        };

        let embeddings_root = self.layout.embeddings_root();
        let embeddings_source = if has_partitions(&embeddings_root, 2) {
            format!(
                "read_parquet({})",
                sql_literal(&embeddings_root.join("*").join("*.parquet"))
            )
        } else {
            "empty_embeddings".to_string()
        };

        self.conn.execute_batch(&format!(
            "CREATE OR REPLACE VIEW records AS SELECT {rc} FROM {records_source};
             CREATE OR REPLACE VIEW embeddings AS SELECT {ec} FROM {embeddings_source};",
            rc = column_names(RECORD_COLUMNS),
            ec = column_names(EMBEDDING_COLUMNS),
        ))?;
        Ok(())
    }

    /// Stored records of one partition, for merging against.
    pub fn read_bucket(&self, bucket: u32) -> Result<Vec<CanonicalRecord>, StoreError> {
        let path = self.layout.record_partition(bucket);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {} FROM read_parquet({}) ORDER BY doi",
            column_names(RECORD_COLUMNS),
            sql_literal(&path)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], RecordRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RecordRow::into_record).collect()
    }

    /// Stored embeddings of one model partition.
    pub fn read_embedding_partition(
        &self,
        model_id: &str,
        bucket: u32,
    ) -> Result<Vec<EmbeddingRecord>, StoreError> {
        let path = self.layout.embedding_partition(model_id, bucket);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {} FROM read_parquet({}) ORDER BY doi",
            embedding_projection(""),
            sql_literal(&path)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| embedding_from_row(row, 0))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(decode_vector).collect()
    }

    /// Records with an abstract but no current embedding for `model_id`,
    /// ordered by DOI and starting strictly after `after`.
    pub fn pending_embeddings(
        &self,
        model_id: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<PendingAbstract>, StoreError> {
        let sql = format!(
            "SELECT r.doi, r.\"abstract\", r.abstract_hash FROM records r {} \
             AND r.doi > ? ORDER BY r.doi LIMIT ?",
            PENDING_FILTER
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![model_id, after.unwrap_or(""), limit as i64],
                |row| {
                    Ok(PendingAbstract {
                        doi: row.get(0)?,
                        abstract_text: row.get(1)?,
                        abstract_hash: row.get(2)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_pending(&self, model_id: &str) -> Result<u64, StoreError> {
        let sql = format!("SELECT count(*) FROM records r {PENDING_FILTER}");
        let count: i64 = self.conn.query_row(&sql, params![model_id], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Vector length already established for `model_id`, if any vector is stored.
    pub fn model_dimension(&self, model_id: &str) -> Result<Option<u32>, StoreError> {
        let dimension: Option<i32> = self.conn.query_row(
            "SELECT max(dimension) FROM embeddings WHERE model_id = ?",
            params![model_id],
            |row| row.get(0),
        )?;
        Ok(dimension.map(|d| d.max(0) as u32))
    }

    /// Model ids with at least one stored vector.
    pub fn embedding_models(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT model_id FROM embeddings ORDER BY model_id")?;
        let models = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(models)
    }

    /// Records joined with their current embedding for `model_id`, ordered by DOI.
    ///
    /// Vectors computed from a different abstract than the record now holds
    /// are left out.
    pub fn joined_embeddings(
        &self,
        model_id: &str,
        limit: usize,
    ) -> Result<Vec<(CanonicalRecord, EmbeddingRecord)>, StoreError> {
        let sql = format!(
            "SELECT {}, {} FROM records r JOIN embeddings e \
             ON e.doi = r.doi AND e.abstract_hash IS NOT DISTINCT FROM r.abstract_hash \
             WHERE e.model_id = ? ORDER BY r.doi LIMIT ?",
            qualified_columns("r", RECORD_COLUMNS),
            embedding_projection("e"),
        );
        let offset = RECORD_COLUMNS.len();
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![model_id, limit as i64], |row| {
                Ok((RecordRow::from_row(row)?, embedding_from_row(row, offset)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(record, embedding)| {
                Ok::<_, StoreError>((record.into_record()?, decode_vector(embedding)?))
            })
            .collect()
    }

    /// Keyword search over titles and abstracts.
    pub fn search(&self, query: &SearchQuery) -> Result<SearchResults, StoreError> {
        let start = Instant::now();

        let mut conditions = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();

        for keyword in &query.keywords {
            conditions.push(
                "regexp_matches(coalesce(title, '') || ' ' || coalesce(\"abstract\", ''), ?, 'i')",
            );
            values.push(SqlValue::Text(regex::escape(keyword)));
        }
        if let Some(source_type) = query.source_type {
            conditions.push("source_type = ?");
            values.push(SqlValue::Text(source_type.as_str().to_string()));
        }
        if let Some(from) = query.from_year {
            conditions.push("pub_year >= ?");
            values.push(SqlValue::Int(from));
        }
        if let Some(to) = query.to_year {
            conditions.push("pub_year <= ?");
            values.push(SqlValue::Int(to));
        }
        if query.require_abstract {
            conditions.push("\"abstract\" IS NOT NULL");
        }

        let filter = if conditions.is_empty() {
            "true".to_string()
        } else {
            conditions.join(" AND ")
        };

        let total: i64 = self.conn.query_row(
            &format!("SELECT count(*) FROM records WHERE {filter}"),
            params_from_iter(values.clone()),
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT doi, short_id, title, first_author, pub_year, source_type, container_title, \"abstract\" \
             FROM records WHERE {filter} ORDER BY pub_year DESC NULLS LAST, doi LIMIT ?"
        );
        values.push(SqlValue::BigInt(i64::from(query.limit)));

        let mut stmt = self.conn.prepare(&sql)?;
        let hits = stmt
            .query_map(params_from_iter(values), |row| {
                let source_type: Option<String> = row.get(5)?;
                let Ok(source_type) = source_type.unwrap_or_default().parse::<SourceType>();
                Ok(SearchHit {
                    doi: row.get(0)?,
                    short_id: row.get(1)?,
                    title: row.get(2)?,
                    first_author: row.get(3)?,
                    year: row.get(4)?,
                    source_type,
                    container_title: row.get(6)?,
                    abstract_text: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SearchResults {
            keywords: query.keywords.clone(),
            hits,
            total: total as u64,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Record and embedding counts; ledger fields are left for the caller.
    pub fn overview(&self, active_model: &str) -> Result<StoreOverview, StoreError> {
        let (records, with_abstract, with_date): (i64, i64, i64) = self.conn.query_row(
            "SELECT count(*), count(\"abstract\"), count(pub_year) FROM records",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let mut stmt = self.conn.prepare(
            "SELECT coalesce(source_type, 'other'), count(*) FROM records GROUP BY 1 ORDER BY 2 DESC, 1",
        )?;
        let by_source_type = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT model_id, count(*), max(dimension) FROM embeddings GROUP BY model_id ORDER BY model_id",
        )?;
        let embeddings = stmt
            .query_map([], |row| {
                Ok(ModelCoverage {
                    model_id: row.get(0)?,
                    embeddings: row.get::<_, i64>(1)? as u64,
                    dimension: row.get::<_, Option<i32>>(2)?.map(|d| d.max(0) as u32),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(StoreOverview {
            store_path: self.layout.root().to_path_buf(),
            records: records as u64,
            with_abstract: with_abstract as u64,
            with_date: with_date as u64,
            by_source_type,
            embeddings,
            active_model: active_model.to_string(),
            missing_active: self.count_pending(active_model)?,
            ..Default::default()
        })
    }

    /// DOIs in the store that are not in `local`, ordered by DOI.
    pub fn dois_missing_pdf<'a, I>(&self, local: I, limit: Option<usize>) -> Result<Vec<String>, StoreError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.conn.execute_batch("DELETE FROM local_pdfs;")?;
        {
            let mut insert = self.conn.prepare("INSERT INTO local_pdfs VALUES (?)")?;
            for doi in local {
                insert.execute(params![doi])?;
            }
        }

        let limit = limit.map(|l| l as i64).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(
            "SELECT r.doi FROM records r \
             WHERE NOT EXISTS (SELECT 1 FROM local_pdfs l WHERE l.doi = r.doi) \
             ORDER BY r.doi LIMIT ?",
        )?;
        let dois = stmt
            .query_map(params![limit], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        debug!(missing = dois.len(), "Computed DOIs without a local PDF");
        Ok(dois)
    }
}

/// `WHERE` clause selecting records that need an embedding for the model bound to the first `?`.
const PENDING_FILTER: &str = "LEFT JOIN (SELECT doi, abstract_hash FROM embeddings WHERE model_id = ?) e \
     ON e.doi = r.doi \
     WHERE r.\"abstract\" IS NOT NULL AND r.abstract_hash IS NOT NULL \
     AND (e.doi IS NULL OR e.abstract_hash IS DISTINCT FROM r.abstract_hash)";

/// Whether `dir` holds at least one `.parquet` file exactly `depth` levels down.
fn has_partitions(dir: &Path, depth: usize) -> bool {
    if fs::metadata(dir).is_err() {
        return false;
    }
    WalkDir::new(dir)
        .min_depth(depth)
        .max_depth(depth)
        .into_iter()
        .filter_map(Result::ok)
        .any(|entry| {
            entry.file_type().is_file()
                && entry.path().extension().is_some_and(|ext| ext == "parquet")
        })
}
