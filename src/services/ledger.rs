use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};

use crate::error::StoreError;
use crate::models::{EmbedStats, IngestStats, LedgerTotals, RunEntry};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    started_at TEXT NOT NULL,
    duration_ms INTEGER NOT NULL,
    accepted INTEGER NOT NULL DEFAULT 0,
    rejected INTEGER NOT NULL DEFAULT 0,
    deduplicated INTEGER NOT NULL DEFAULT 0,
    embedded INTEGER NOT NULL DEFAULT 0,
    skipped INTEGER NOT NULL DEFAULT 0,
    failed_shards INTEGER NOT NULL DEFAULT 0,
    cancelled INTEGER NOT NULL DEFAULT 0,
    details TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at);
"#;

pub const KIND_TRANSFORM: &str = "transform";
pub const KIND_EMBED: &str = "embed";

/// Append-only history of transform and embed runs.
pub struct RunLedger {
    conn: Connection,
}

impl RunLedger {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn record_ingest(
        &self,
        started_at: DateTime<Utc>,
        stats: &IngestStats,
    ) -> Result<i64, StoreError> {
        let entry = RunEntry {
            id: 0,
            kind: KIND_TRANSFORM.to_string(),
            started_at: timestamp(started_at),
            duration_ms: stats.duration_ms,
            accepted: stats.accepted,
            rejected: stats.rejected.total(),
            deduplicated: stats.deduplicated,
            embedded: 0,
            skipped: 0,
            failed_shards: stats.shards_failed,
            cancelled: stats.cancelled,
        };
        self.insert(&entry, &serde_json::to_string(stats)?)
    }

    pub fn record_embed(
        &self,
        started_at: DateTime<Utc>,
        stats: &EmbedStats,
    ) -> Result<i64, StoreError> {
        let entry = RunEntry {
            id: 0,
            kind: KIND_EMBED.to_string(),
            started_at: timestamp(started_at),
            duration_ms: stats.duration_ms,
            accepted: 0,
            rejected: 0,
            deduplicated: 0,
            embedded: stats.embedded,
            skipped: stats.skipped(),
            failed_shards: 0,
            cancelled: stats.cancelled,
        };
        self.insert(&entry, &serde_json::to_string(stats)?)
    }

    fn insert(&self, entry: &RunEntry, details: &str) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO runs (kind, started_at, duration_ms, accepted, rejected, deduplicated,
                               embedded, skipped, failed_shards, cancelled, details)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                entry.kind,
                entry.started_at,
                entry.duration_ms as i64,
                entry.accepted as i64,
                entry.rejected as i64,
                entry.deduplicated as i64,
                entry.embedded as i64,
                entry.skipped as i64,
                entry.failed_shards as i64,
                entry.cancelled as i32,
                details,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Latest `limit` runs, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<RunEntry>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, kind, started_at, duration_ms, accepted, rejected, deduplicated,
                    embedded, skipped, failed_shards, cancelled
             FROM runs ORDER BY id DESC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map(params![limit as i64], |row| {
                Ok(RunEntry {
                    id: row.get(0)?,
                    kind: row.get(1)?,
                    started_at: row.get(2)?,
                    duration_ms: row.get::<_, i64>(3)? as u64,
                    accepted: row.get::<_, i64>(4)? as u64,
                    rejected: row.get::<_, i64>(5)? as u64,
                    deduplicated: row.get::<_, i64>(6)? as u64,
                    embedded: row.get::<_, i64>(7)? as u64,
                    skipped: row.get::<_, i64>(8)? as u64,
                    failed_shards: row.get::<_, i64>(9)? as u64,
                    cancelled: row.get::<_, i32>(10)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn totals(&self) -> Result<LedgerTotals, StoreError> {
        let totals = self.conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(accepted), 0),
                    COALESCE(SUM(rejected), 0),
                    COALESCE(SUM(deduplicated), 0),
                    COALESCE(SUM(embedded), 0),
                    COALESCE(SUM(skipped), 0)
             FROM runs",
            [],
            |row| {
                Ok(LedgerTotals {
                    runs: row.get::<_, i64>(0)? as u64,
                    accepted: row.get::<_, i64>(1)? as u64,
                    rejected: row.get::<_, i64>(2)? as u64,
                    deduplicated: row.get::<_, i64>(3)? as u64,
                    embedded: row.get::<_, i64>(4)? as u64,
                    skipped: row.get::<_, i64>(5)? as u64,
                })
            },
        )?;
        Ok(totals)
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RejectionCounts;

    #[test]
    fn test_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = RunLedger::open(&dir.path().join("ledger.sqlite")).unwrap();
        assert!(ledger.recent(5).unwrap().is_empty());
        assert_eq!(ledger.totals().unwrap(), LedgerTotals::default());
    }

    #[test]
    fn test_records_and_totals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.sqlite");
        let ledger = RunLedger::open(&path).unwrap();

        let ingest = IngestStats {
            accepted: 10,
            rejected: RejectionCounts {
                missing_doi: 2,
                not_an_object: 0,
            },
            deduplicated: 3,
            shards_failed: 1,
            ..Default::default()
        };
        let embed = EmbedStats {
            embedded: 7,
            failed_transient: 2,
            cancelled: true,
            ..Default::default()
        };
        ledger.record_ingest(Utc::now(), &ingest).unwrap();
        ledger.record_embed(Utc::now(), &embed).unwrap();

        let reopened = RunLedger::open(&path).unwrap();
        let recent = reopened.recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].kind, KIND_EMBED);
        assert!(recent[0].cancelled);
        assert_eq!(recent[0].skipped, 2);
        assert_eq!(recent[1].kind, KIND_TRANSFORM);
        assert_eq!(recent[1].failed_shards, 1);

        let totals = reopened.totals().unwrap();
        assert_eq!(totals.runs, 2);
        assert_eq!(totals.accepted, 10);
        assert_eq!(totals.rejected, 2);
        assert_eq!(totals.deduplicated, 3);
        assert_eq!(totals.embedded, 7);
        assert_eq!(totals.skipped, 2);

        assert_eq!(reopened.recent(1).unwrap().len(), 1);
    }
}
