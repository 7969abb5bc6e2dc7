//! On-disk layout of the canonical store.
//!
//! ```text
//! <store>/manifest.toml
//! <store>/.lock
//! <store>/ledger.sqlite
//! <store>/records/bucket-NNN.parquet
//! <store>/embeddings/<model-slug>/bucket-NNN.parquet
//! <store>/staging/
//! ```

mod loader;
mod schema;
mod writer;

pub use loader::Loader;
pub use schema::{EMBEDDING_COLUMNS, RECORD_COLUMNS, RecordRow};
pub use writer::PartitionWriter;

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::utils::{sanitize_filename, write_atomic};

pub const FORMAT_VERSION: u32 = 1;

const MANIFEST_FILE: &str = "manifest.toml";
const LOCK_FILE: &str = ".lock";
const LEDGER_FILE: &str = "ledger.sqlite";

/// Partition a DOI falls into: first 8 bytes of SHA-256(doi), big-endian, modulo `bucket_count`.
pub fn bucket_for(doi: &str, bucket_count: u32) -> u32 {
    let hash = Sha256::digest(doi.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash[..8]);
    (u64::from_be_bytes(prefix) % u64::from(bucket_count.max(1))) as u32
}

/// Directory name for a model's embeddings: readable and collision-free.
pub fn model_slug(model_id: &str) -> String {
    let readable = sanitize_filename(model_id);
    let digest = hex::encode(Sha256::digest(model_id.as_bytes()));
    if readable.is_empty() {
        digest[..8].to_string()
    } else {
        format!("{readable}-{}", &digest[..8])
    }
}

/// Quote a path as a SQL string literal.
pub fn sql_literal(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', "''"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreManifest {
    pub format_version: u32,
    pub bucket_count: u32,
    pub created_at: String,
}

/// Paths inside one store directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    pub fn ledger(&self) -> PathBuf {
        self.root.join(LEDGER_FILE)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("staging")
    }

    pub fn records_dir(&self) -> PathBuf {
        self.root.join("records")
    }

    pub fn embeddings_root(&self) -> PathBuf {
        self.root.join("embeddings")
    }

    pub fn embeddings_dir(&self, model_id: &str) -> PathBuf {
        self.embeddings_root().join(model_slug(model_id))
    }

    pub fn record_partition(&self, bucket: u32) -> PathBuf {
        self.records_dir().join(partition_file(bucket))
    }

    pub fn embedding_partition(&self, model_id: &str, bucket: u32) -> PathBuf {
        self.embeddings_dir(model_id).join(partition_file(bucket))
    }
}

fn partition_file(bucket: u32) -> String {
    format!("bucket-{bucket:03}.parquet")
}

/// An opened store: its layout plus the manifest it was created with.
#[derive(Debug, Clone)]
pub struct Store {
    layout: StoreLayout,
    manifest: StoreManifest,
}

impl Store {
    /// Open the store at `root`, creating it with `bucket_count` partitions if absent.
    pub fn open_or_create(root: &Path, bucket_count: u32) -> Result<Self, StoreError> {
        if bucket_count == 0 {
            return Err(StoreError::Invalid(
                "bucket_count must be at least 1".to_string(),
            ));
        }

        let layout = StoreLayout::new(root);
        if layout.manifest().exists() {
            return Self::open(root);
        }

        for dir in [
            layout.root().to_path_buf(),
            layout.records_dir(),
            layout.embeddings_root(),
            layout.staging_dir(),
        ] {
            fs::create_dir_all(&dir)?;
        }

        let manifest = StoreManifest {
            format_version: FORMAT_VERSION,
            bucket_count,
            created_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        };
        write_atomic(
            &layout.manifest(),
            toml::to_string_pretty(&manifest)?.as_bytes(),
        )?;
        info!(path = %root.display(), bucket_count, "Created store");

        Ok(Self { layout, manifest })
    }

    /// Open an existing store.
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        let layout = StoreLayout::new(root);
        let manifest_path = layout.manifest();
        if !manifest_path.exists() {
            return Err(StoreError::NotInitialized(root.to_path_buf()));
        }

        let manifest: StoreManifest = toml::from_str(&fs::read_to_string(&manifest_path)?)?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(StoreError::FormatVersion {
                found: manifest.format_version,
                expected: FORMAT_VERSION,
            });
        }
        if manifest.bucket_count == 0 {
            return Err(StoreError::Invalid(
                "manifest bucket_count is 0".to_string(),
            ));
        }

        fs::create_dir_all(layout.staging_dir())?;
        debug!(path = %root.display(), bucket_count = manifest.bucket_count, "Opened store");
        Ok(Self { layout, manifest })
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn manifest(&self) -> &StoreManifest {
        &self.manifest
    }

    pub fn bucket_count(&self) -> u32 {
        self.manifest.bucket_count
    }

    pub fn bucket_for(&self, doi: &str) -> u32 {
        bucket_for(doi, self.manifest.bucket_count)
    }

    /// Take the exclusive writer lock, failing fast if another process holds it.
    pub fn lock(&self) -> Result<StoreLock, StoreError> {
        StoreLock::try_acquire(&self.layout)
    }
}

/// Exclusive advisory lock on `<store>/.lock`, released on drop.
#[derive(Debug)]
pub struct StoreLock {
    _file: File,
    path: PathBuf,
}

impl StoreLock {
    fn try_acquire(layout: &StoreLayout) -> Result<Self, StoreError> {
        let path = layout.lock_file();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(path = %path.display(), "Acquired store lock");
                Ok(Self { _file: file, path })
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                Err(StoreError::Locked(layout.root().to_path_buf()))
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
