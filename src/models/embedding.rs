use serde::{Deserialize, Serialize};

/// One stored abstract embedding; unique per (`doi`, `model_id`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub doi: String,
    pub model_id: String,
    /// Hash of the abstract the vector was computed from.
    pub abstract_hash: String,
    pub dimension: u32,
    pub vector: Vec<f32>,
    /// RFC 3339, UTC.
    pub computed_at: String,
}

impl EmbeddingRecord {
    pub fn new(pending: &PendingAbstract, model_id: &str, vector: Vec<f32>) -> Self {
        Self {
            doi: pending.doi.clone(),
            model_id: model_id.to_string(),
            abstract_hash: pending.abstract_hash.clone(),
            dimension: vector.len() as u32,
            vector,
            computed_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        }
    }
}

/// A canonical record whose abstract needs an embedding for the active model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAbstract {
    pub doi: String,
    pub abstract_text: String,
    pub abstract_hash: String,
}

/// Embedding count for one model, as reported by `stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCoverage {
    pub model_id: String,
    pub embeddings: u64,
    pub dimension: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_record_new() {
        let pending = PendingAbstract {
            doi: "10.1/x".into(),
            abstract_text: "text".into(),
            abstract_hash: "abc".into(),
        };
        let record = EmbeddingRecord::new(&pending, "mini", vec![0.5, 0.25, 0.0]);
        assert_eq!(record.dimension, 3);
        assert_eq!(record.abstract_hash, "abc");
        assert_eq!(record.model_id, "mini");
        assert!(record.computed_at.ends_with('Z'));
    }
}
