//! Column layout of the Parquet partitions and row conversions.
//!
//! Partitions are built from JSONL staging files, so each table is described
//! once as `(column, DuckDB type)` pairs and reused for the `read_json`
//! column spec, the empty placeholder tables and the read-back projection.

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::models::{Author, CanonicalRecord, EmbeddingRecord, PartialDate, SourceType};

pub type Columns = &'static [(&'static str, &'static str)];

pub const RECORD_COLUMNS: Columns = &[
    ("doi", "VARCHAR"),
    ("short_id", "VARCHAR"),
    ("title", "VARCHAR"),
    ("authors_json", "VARCHAR"),
    ("first_author", "VARCHAR"),
    ("abstract", "VARCHAR"),
    ("abstract_hash", "VARCHAR"),
    ("pub_year", "INTEGER"),
    ("pub_month", "INTEGER"),
    ("pub_day", "INTEGER"),
    ("source_type", "VARCHAR"),
    ("container_title", "VARCHAR"),
    ("publisher", "VARCHAR"),
    ("url", "VARCHAR"),
    ("volume", "VARCHAR"),
    ("issue", "VARCHAR"),
    ("language", "VARCHAR"),
    ("reference_count", "BIGINT"),
    ("cited_by_count", "BIGINT"),
    ("raw_hash", "VARCHAR"),
];

pub const EMBEDDING_COLUMNS: Columns = &[
    ("doi", "VARCHAR"),
    ("model_id", "VARCHAR"),
    ("abstract_hash", "VARCHAR"),
    ("dimension", "INTEGER"),
    ("vector", "FLOAT[]"),
    ("computed_at", "VARCHAR"),
];

/// `"doi", "short_id", ...`
pub fn column_names(columns: Columns) -> String {
    columns
        .iter()
        .map(|(name, _)| format!("\"{name}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `{'doi': 'VARCHAR', ...}` for `read_json(columns = ...)`.
pub fn json_column_spec(columns: Columns) -> String {
    let fields = columns
        .iter()
        .map(|(name, ty)| format!("'{name}': '{ty}'"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{{fields}}}")
}

pub fn create_table_sql(table: &str, columns: Columns) -> String {
    let fields = columns
        .iter()
        .map(|(name, ty)| format!("\"{name}\" {ty}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE OR REPLACE TABLE {table} ({fields});")
}

/// Flat row of the `records` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordRow {
    pub doi: String,
    pub short_id: String,
    pub title: Option<String>,
    pub authors_json: String,
    pub first_author: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub abstract_hash: Option<String>,
    pub pub_year: Option<i32>,
    pub pub_month: Option<i32>,
    pub pub_day: Option<i32>,
    pub source_type: String,
    pub container_title: Option<String>,
    pub publisher: Option<String>,
    pub url: Option<String>,
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub language: Option<String>,
    pub reference_count: Option<i64>,
    pub cited_by_count: Option<i64>,
    pub raw_hash: String,
}

impl RecordRow {
    pub fn from_record(record: &CanonicalRecord) -> Result<Self, StoreError> {
        Ok(Self {
            doi: record.doi.clone(),
            short_id: record.short_id(),
            title: record.title.clone(),
            authors_json: serde_json::to_string(&record.authors)?,
            first_author: record.first_author(),
            abstract_text: record.abstract_text.clone(),
            abstract_hash: record.abstract_hash.clone(),
            pub_year: record.published.map(|d| d.year),
            pub_month: record.published.and_then(|d| d.month).map(|m| m as i32),
            pub_day: record.published.and_then(|d| d.day).map(|d| d as i32),
            source_type: record.source_type.as_str().to_string(),
            container_title: record.container_title.clone(),
            publisher: record.publisher.clone(),
            url: record.url.clone(),
            volume: record.volume.clone(),
            issue: record.issue.clone(),
            language: record.language.clone(),
            reference_count: record.reference_count,
            cited_by_count: record.cited_by_count,
            raw_hash: record.raw_hash.clone(),
        })
    }

    /// Read a row selected with [`RECORD_COLUMNS`] in order.
    pub fn from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            doi: row.get(0)?,
            short_id: row.get(1)?,
            title: row.get(2)?,
            authors_json: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            first_author: row.get(4)?,
            abstract_text: row.get(5)?,
            abstract_hash: row.get(6)?,
            pub_year: row.get(7)?,
            pub_month: row.get(8)?,
            pub_day: row.get(9)?,
            source_type: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
            container_title: row.get(11)?,
            publisher: row.get(12)?,
            url: row.get(13)?,
            volume: row.get(14)?,
            issue: row.get(15)?,
            language: row.get(16)?,
            reference_count: row.get(17)?,
            cited_by_count: row.get(18)?,
            raw_hash: row.get(19)?,
        })
    }

    pub fn into_record(self) -> Result<CanonicalRecord, StoreError> {
        let authors: Vec<Author> = if self.authors_json.is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&self.authors_json)?
        };

        let published = self.pub_year.map(|year| PartialDate {
            year,
            month: self.pub_month.and_then(|m| u32::try_from(m).ok()),
            day: self.pub_day.and_then(|d| u32::try_from(d).ok()),
        });

        let Ok(source_type) = self.source_type.parse::<SourceType>();

        Ok(CanonicalRecord {
            doi: self.doi,
            title: self.title,
            authors,
            abstract_text: self.abstract_text,
            abstract_hash: self.abstract_hash,
            published,
            source_type,
            container_title: self.container_title,
            publisher: self.publisher,
            url: self.url,
            volume: self.volume,
            issue: self.issue,
            language: self.language,
            reference_count: self.reference_count,
            cited_by_count: self.cited_by_count,
            raw_hash: self.raw_hash,
        })
    }
}

/// Column list qualified with a table alias, e.g. `r."doi", r."title"`.
pub fn qualified_columns(alias: &str, columns: Columns) -> String {
    columns
        .iter()
        .map(|(name, _)| format!("{alias}.\"{name}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Projection used to read embeddings back; the vector comes out as JSON text.
pub fn embedding_projection(alias: &str) -> String {
    let p = if alias.is_empty() {
        String::new()
    } else {
        format!("{alias}.")
    };
    format!(
        "{p}doi, {p}model_id, {p}abstract_hash, {p}dimension, \
         CAST(to_json({p}vector) AS VARCHAR), {p}computed_at"
    )
}

/// Read an embedding selected with [`embedding_projection`], starting at column `offset`.
pub fn embedding_from_row(
    row: &duckdb::Row<'_>,
    offset: usize,
) -> duckdb::Result<(EmbeddingRecord, String)> {
    let dimension: i32 = row.get(offset + 3)?;
    let vector_json: String = row.get(offset + 4)?;
    Ok((
        EmbeddingRecord {
            doi: row.get(offset)?,
            model_id: row.get(offset + 1)?,
            abstract_hash: row.get(offset + 2)?,
            dimension: dimension.max(0) as u32,
            vector: Vec::new(),
            computed_at: row.get(offset + 5)?,
        },
        vector_json,
    ))
}

/// Finish a row read with [`embedding_from_row`] by decoding its vector.
pub fn decode_vector(
    (mut record, vector_json): (EmbeddingRecord, String),
) -> Result<EmbeddingRecord, StoreError> {
    record.vector = serde_json::from_str(&vector_json)?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CanonicalRecord {
        CanonicalRecord {
            doi: "10.1/x".into(),
            title: Some("Title".into()),
            authors: vec![Author {
                given: Some("Ada".into()),
                family: Some("Lovelace".into()),
                affiliations: vec!["Analytical Society".into()],
            }],
            abstract_text: Some("Text".into()),
            abstract_hash: Some("h".into()),
            published: Some(PartialDate::year(2021).with_month(5)),
            source_type: SourceType::BookChapter,
            reference_count: Some(3),
            raw_hash: "r".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_record_row_conversion() {
        let record = sample();
        let row = RecordRow::from_record(&record).unwrap();

        assert_eq!(row.first_author.as_deref(), Some("Lovelace, Ada"));
        assert_eq!(row.short_id, record.short_id());
        assert_eq!(row.pub_year, Some(2021));
        assert_eq!(row.pub_day, None);
        assert_eq!(row.source_type, "book-chapter");
        assert_eq!(row.into_record().unwrap(), record);
    }

    #[test]
    fn test_column_specs() {
        assert_eq!(RECORD_COLUMNS.len(), 20);
        assert!(column_names(EMBEDDING_COLUMNS).starts_with(r#""doi", "model_id", "abstract_hash""#));
        assert!(json_column_spec(EMBEDDING_COLUMNS).contains("'vector': 'FLOAT[]'"));
        assert!(create_table_sql("t", EMBEDDING_COLUMNS).contains(r#""dimension" INTEGER"#));
        assert!(qualified_columns("r", RECORD_COLUMNS).starts_with(r#"r."doi", r."short_id""#));
        assert!(embedding_projection("e").contains("CAST(to_json(e.vector) AS VARCHAR)"));
        assert!(embedding_projection("").starts_with("doi, model_id"));
    }

    #[test]
    fn test_row_serializes_abstract_column() {
        let row = RecordRow::from_record(&sample()).unwrap();
        let json: serde_json::Value = serde_json::to_value(&row).unwrap();
        assert_eq!(json["abstract"], "Text");
        assert!(json.get("abstract_text").is_none());
    }
}
