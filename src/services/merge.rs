//! Deterministic reconciliation of records sharing a DOI.
//!
//! Records are ranked by `(published, populated fields, raw_hash)`, with a
//! missing date ranking lowest. `merge` keeps the maximum, so the result does
//! not depend on the order versions are seen in.

use std::collections::HashMap;

use crate::models::{CandidateRecord, CanonicalRecord, PartialDate};

/// Ranking key of a record version.
pub fn precedence(record: &CandidateRecord) -> (Option<PartialDate>, usize, &str) {
    (
        record.published,
        record.populated_fields(),
        record.raw_hash.as_str(),
    )
}

/// Pick the preferred of two versions of the same DOI.
///
/// Equal keys imply equal `raw_hash`, i.e. identical source content.
pub fn merge(a: CandidateRecord, b: CandidateRecord) -> CanonicalRecord {
    debug_assert_eq!(a.doi, b.doi);
    if precedence(&b) > precedence(&a) { b } else { a }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// First sighting of the DOI in the store.
    Inserted,
    /// The incoming version displaced the stored one.
    Replaced,
    /// The stored version stays as it is.
    Unchanged,
}

/// Merge an incoming record against the stored version, if any.
pub fn reconcile(
    existing: Option<CanonicalRecord>,
    incoming: CandidateRecord,
) -> (CanonicalRecord, MergeOutcome) {
    match existing {
        None => (incoming, MergeOutcome::Inserted),
        Some(existing) => {
            let before = existing.clone();
            let merged = merge(existing, incoming);
            let outcome = if merged == before {
                MergeOutcome::Unchanged
            } else {
                MergeOutcome::Replaced
            };
            (merged, outcome)
        }
    }
}

/// In-memory collapse of a run's candidates, one entry per DOI.
#[derive(Debug, Default)]
pub struct Deduplicator {
    pending: HashMap<String, CandidateRecord>,
    deduplicated: u64,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, candidate: CandidateRecord) {
        match self.pending.remove(&candidate.doi) {
            Some(previous) => {
                self.deduplicated += 1;
                let merged = merge(previous, candidate);
                self.pending.insert(merged.doi.clone(), merged);
            }
            None => {
                self.pending.insert(candidate.doi.clone(), candidate);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Candidates collapsed into an earlier version since the last drain.
    pub fn deduplicated(&self) -> u64 {
        self.deduplicated
    }

    /// Take the collapsed records, sorted by DOI, and reset the counter.
    pub fn drain(&mut self) -> Vec<CanonicalRecord> {
        self.deduplicated = 0;
        let mut records: Vec<_> = self.pending.drain().map(|(_, r)| r).collect();
        records.sort_by(|a, b| a.doi.cmp(&b.doi));
        records
    }
}
