//! End-to-end runs over small dump shards.

use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use doistore::error::EmbeddingError;
use doistore::models::{CanonicalRecord, IngestStats, PartialDate};
use doistore::services::{
    AttachOptions, Attacher, Embedder, IngestOptions, IngestPipeline, Loader, Store,
};
use doistore::utils::CancelFlag;

const SHARD_A: &str = concat!(
    r#"{"DOI":"10.1/x","title":["Early version"],"issued":{"date-parts":[[2020]]}}"#,
    "\n",
    r#"{"DOI":"10.1/y","title":["Graph methods"],"abstract":"<jats:p>We study graphs.</jats:p>","type":"journal-article"}"#,
    "\n",
    r#"{"title":["No identifier"]}"#,
    "\n",
);

const SHARD_B: &str = r#"{"message":{"items":[
    {"DOI":"https://doi.org/10.1/X","title":["Final version"],"abstract":"Now with text.","issued":{"date-parts":[[2021,3]]}},
    {"DOI":"10.1/z","title":["Proceedings paper"],"type":"proceedings-article","abstract":"Short."},
    {"DOI":"10.1/y","title":["Graph methods"],"abstract":"<jats:p>We study graphs.</jats:p>","type":"journal-article"}
]}}"#;

fn write_shard(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

async fn ingest(store: &Store, shards: Vec<PathBuf>) -> IngestStats {
    let options = IngestOptions {
        workers: 2,
        flush_records: 1_000,
    };
    IngestPipeline::new(store, options, CancelFlag::new())
        .unwrap()
        .run(shards)
        .await
        .unwrap()
}

fn all_records(store: &Store) -> Vec<CanonicalRecord> {
    let loader = Loader::open(store).unwrap();
    let mut records: Vec<CanonicalRecord> = (0..store.bucket_count())
        .flat_map(|bucket| loader.read_bucket(bucket).unwrap())
        .collect();
    records.sort_by(|a, b| a.doi.cmp(&b.doi));
    records
}

struct CountingEmbedder {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Embedder for CountingEmbedder {
    async fn embed(
        &self,
        texts: &[String],
        _model_id: &str,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
    }
}

fn attach_options() -> AttachOptions {
    AttachOptions {
        model_id: "test-model".into(),
        batch_size: 2,
        timeout: Duration::from_secs(5),
        dimension: None,
        limit: None,
        flush_embeddings: 10_000,
    }
}

#[tokio::test]
async fn test_later_dated_record_wins() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_shard(dir.path(), "a.jsonl", SHARD_A);
    let b = write_shard(dir.path(), "b.json", SHARD_B);
    let store = Store::open_or_create(&dir.path().join("store"), 4).unwrap();

    let stats = ingest(&store, vec![a, b]).await;
    assert_eq!(stats.shards_ok, 2);
    assert_eq!(stats.accepted, 5);
    assert_eq!(stats.rejected.missing_doi, 1);
    assert_eq!(stats.deduplicated, 2);

    let records = all_records(&store);
    let dois: Vec<&str> = records.iter().map(|r| r.doi.as_str()).collect();
    assert_eq!(dois, vec!["10.1/x", "10.1/y", "10.1/z"]);

    let x = &records[0];
    assert_eq!(x.published, Some(PartialDate::year(2021).with_month(3)));
    assert_eq!(x.title.as_deref(), Some("Final version"));
    assert_eq!(x.abstract_text.as_deref(), Some("Now with text."));
    assert_eq!(records[1].abstract_text.as_deref(), Some("We study graphs."));
}

#[tokio::test]
async fn test_ingest_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_shard(dir.path(), "a.jsonl", SHARD_A);
    let store = Store::open_or_create(&dir.path().join("store"), 4).unwrap();

    ingest(&store, vec![a.clone()]).await;
    let once = all_records(&store);

    let stats = ingest(&store, vec![a]).await;
    assert_eq!(stats.inserted, 0);
    assert_eq!(stats.replaced, 0);
    assert_eq!(stats.unchanged, 2);
    assert_eq!(stats.partitions_written, 0);
    assert_eq!(all_records(&store), once);
}

#[tokio::test]
async fn test_shard_order_does_not_matter() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_shard(dir.path(), "a.jsonl", SHARD_A);
    let b = write_shard(dir.path(), "b.json", SHARD_B);

    let forward = Store::open_or_create(&dir.path().join("forward"), 4).unwrap();
    ingest(&forward, vec![a.clone()]).await;
    ingest(&forward, vec![b.clone()]).await;

    let backward = Store::open_or_create(&dir.path().join("backward"), 4).unwrap();
    ingest(&backward, vec![b]).await;
    ingest(&backward, vec![a]).await;

    assert_eq!(all_records(&forward), all_records(&backward));
}

#[tokio::test]
async fn test_corrupt_entry_is_counted_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let shard = write_shard(
        dir.path(),
        "c.jsonl",
        "{\"DOI\":\"10.2/a\"}\n{\"DOI\": \"10.2/b\", oops}\n{\"DOI\":\"10.2/c\"}\n",
    );
    let store = Store::open_or_create(&dir.path().join("store"), 2).unwrap();

    let stats = ingest(&store, vec![shard]).await;
    assert!(!stats.has_failed_shards());
    assert_eq!(stats.structural_errors(), 1);
    assert_eq!(stats.accepted, 2);
    assert_eq!(
        stats.items_read,
        stats.accepted + stats.rejected.total() + stats.malformed_items
    );
    assert_eq!(all_records(&store).len(), 2);
}

#[tokio::test]
async fn test_truncated_shard_fails_but_others_continue() {
    let dir = tempfile::tempdir().unwrap();
    let good = write_shard(dir.path(), "good.jsonl", SHARD_A);
    let bad = write_shard(dir.path(), "bad.json", r#"{"items":[{"DOI":"10.3/a"},"#);
    let store = Store::open_or_create(&dir.path().join("store"), 2).unwrap();

    let stats = ingest(&store, vec![bad, good]).await;
    assert!(stats.has_failed_shards());
    assert_eq!(stats.shards_ok, 1);
    assert_eq!(stats.failures.len(), 1);
    assert!(stats.failures[0].path.ends_with("bad.json"));

    let dois: Vec<String> = all_records(&store).into_iter().map(|r| r.doi).collect();
    assert!(dois.contains(&"10.3/a".to_string()));
    assert!(dois.contains(&"10.1/y".to_string()));
}

#[tokio::test]
async fn test_embedding_coverage_and_quiet_rerun() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_shard(dir.path(), "a.jsonl", SHARD_A);
    let b = write_shard(dir.path(), "b.json", SHARD_B);
    let store = Store::open_or_create(&dir.path().join("store"), 4).unwrap();
    ingest(&store, vec![a, b]).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let embedder = CountingEmbedder {
        calls: calls.clone(),
    };
    let stats = Attacher::new(&store, embedder, attach_options(), CancelFlag::new())
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(stats.embedded, 3);
    assert_eq!(stats.skipped(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let loader = Loader::open(&store).unwrap();
    let joined = loader.joined_embeddings("test-model", 100).unwrap();
    assert_eq!(joined.len(), 3);
    for (record, embedding) in &joined {
        assert_eq!(record.abstract_hash.as_deref(), Some(embedding.abstract_hash.as_str()));
        assert_eq!(embedding.dimension, 2);
    }

    let embedder = CountingEmbedder {
        calls: calls.clone(),
    };
    let rerun = Attacher::new(&store, embedder, attach_options(), CancelFlag::new())
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(rerun.calls, 0);
    assert_eq!(rerun.partitions_written, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
