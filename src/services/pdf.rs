//! Local PDF cache and the boundary to whatever retrieves PDFs.
//!
//! Files live flat in one directory as `<percent-encoded doi>.pdf`, so the
//! DOI can be recovered from the file name.

use async_trait::async_trait;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::FetchError;
use crate::utils::write_atomic;

const PDF_EXTENSION: &str = "pdf";

/// Bytes kept verbatim in cache file names.
const FILENAME_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'.').remove(b'-').remove(b'_');

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Found(Vec<u8>),
    NotFound,
}

/// Given a DOI, return the PDF bytes or report that none exist.
#[async_trait]
pub trait PdfFetcher: Send + Sync {
    async fn fetch(&self, doi: &str) -> Result<FetchOutcome, FetchError>;
}

/// Cache file name for `doi`.
pub fn pdf_file_name(doi: &str) -> String {
    format!("{}.{PDF_EXTENSION}", utf8_percent_encode(doi, FILENAME_SET))
}

/// DOI a cache file name was made from, if it is one.
pub fn doi_from_file_name(name: &str) -> Option<String> {
    let stem = name.strip_suffix(".pdf")?;
    let doi = percent_decode_str(stem).decode_utf8().ok()?;
    (!doi.is_empty()).then(|| doi.into_owned())
}

#[derive(Debug, Clone)]
pub struct PdfCache {
    dir: PathBuf,
}

impl PdfCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, doi: &str) -> PathBuf {
        self.dir.join(pdf_file_name(doi))
    }

    pub fn contains(&self, doi: &str) -> bool {
        self.path_for(doi).is_file()
    }

    /// Write fetched bytes for `doi`, replacing any previous copy.
    pub fn store(&self, doi: &str, bytes: &[u8]) -> Result<PathBuf, FetchError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(doi);
        write_atomic(&path, bytes)?;
        debug!(doi, path = %path.display(), bytes = bytes.len(), "Cached PDF");
        Ok(path)
    }

    /// DOIs with a cached PDF. A missing directory is an empty cache.
    pub fn local_dois(&self) -> Result<Vec<String>, FetchError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut dois = Vec::new();
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| FetchError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(doi) = entry.file_name().to_str().and_then(doi_from_file_name) {
                dois.push(doi);
            }
        }
        dois.sort();
        Ok(dois)
    }

    /// Ask `fetcher` for `doi` unless it is already cached. Returns whether a
    /// PDF is present afterwards.
    pub async fn fetch_into<F: PdfFetcher + ?Sized>(
        &self,
        fetcher: &F,
        doi: &str,
    ) -> Result<bool, FetchError> {
        if self.contains(doi) {
            return Ok(true);
        }
        match fetcher.fetch(doi).await? {
            FetchOutcome::Found(bytes) => {
                self.store(doi, &bytes)?;
                Ok(true)
            }
            FetchOutcome::NotFound => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PdfFetcher for StaticFetcher {
        async fn fetch(&self, doi: &str) -> Result<FetchOutcome, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match doi {
                "10.1/flaky" => Err(FetchError::Transient("mirror timed out".into())),
                "10.1/none" => Ok(FetchOutcome::NotFound),
                _ => Ok(FetchOutcome::Found(b"%PDF-1.7".to_vec())),
            }
        }
    }

    #[test]
    fn test_file_name_roundtrip() {
        let doi = "10.1002/(SICI)1097-4636:a b";
        let name = pdf_file_name(doi);
        assert!(name.ends_with(".pdf"));
        assert!(!name.contains('/'));
        assert!(!name.contains(' '));
        assert_eq!(doi_from_file_name(&name).as_deref(), Some(doi));
        assert_eq!(pdf_file_name("10.1/a.b-c_d"), "10.1%2Fa.b-c_d.pdf");
    }

    #[test]
    fn test_ignores_foreign_files() {
        assert_eq!(doi_from_file_name("notes.txt"), None);
        assert_eq!(doi_from_file_name(".pdf"), None);
    }

    #[test]
    fn test_store_and_scan() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PdfCache::new(dir.path().join("pdfs"));
        assert!(cache.local_dois().unwrap().is_empty());

        cache.store("10.1/b", b"%PDF").unwrap();
        cache.store("10.1/a", b"%PDF").unwrap();
        fs::write(cache.dir().join("readme.txt"), "x").unwrap();

        assert!(cache.contains("10.1/a"));
        assert!(!cache.contains("10.1/c"));
        assert_eq!(cache.local_dois().unwrap(), vec!["10.1/a", "10.1/b"]);
    }

    #[tokio::test]
    async fn test_fetch_into() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PdfCache::new(dir.path());
        let fetcher = StaticFetcher {
            calls: AtomicUsize::new(0),
        };

        assert!(cache.fetch_into(&fetcher, "10.1/a").await.unwrap());
        assert!(cache.fetch_into(&fetcher, "10.1/a").await.unwrap());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        assert!(!cache.fetch_into(&fetcher, "10.1/none").await.unwrap());
        assert!(matches!(
            cache.fetch_into(&fetcher, "10.1/flaky").await,
            Err(FetchError::Transient(_))
        ));
        assert_eq!(cache.local_dois().unwrap(), vec!["10.1/a"]);
    }
}
