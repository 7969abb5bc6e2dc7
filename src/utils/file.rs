//! File utilities for shard discovery and store writes.

use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Calculate SHA-256 checksum of content.
pub fn calculate_checksum(content: &str) -> String {
    calculate_bytes_checksum(content.as_bytes())
}

pub fn calculate_bytes_checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Extensions recognised as dump shards, after an optional `.gz`.
const SHARD_EXTENSIONS: &[&str] = &["json", "jsonl", "ndjson"];

/// Whether `path` looks like a dump shard (`.json`, `.jsonl`, `.ndjson`, optionally `.gz`).
pub fn is_shard_file(path: &Path) -> bool {
    let name = match path.file_name() {
        Some(n) => n.to_string_lossy().to_lowercase(),
        None => return false,
    };
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    Path::new(name)
        .extension()
        .map(|ext| SHARD_EXTENSIONS.contains(&ext.to_string_lossy().as_ref()))
        .unwrap_or(false)
}

/// Expand files and directories into shard paths in sorted order.
///
/// Directories are walked recursively; explicit files are kept even when
/// their extension is unknown so the extractor can report them.
pub fn discover_shards(inputs: &[PathBuf]) -> io::Result<Vec<PathBuf>> {
    let mut shards = Vec::new();

    for input in inputs {
        let metadata = fs::metadata(input)
            .map_err(|e| io::Error::new(e.kind(), format!("{}: {}", input.display(), e)))?;

        if metadata.is_file() {
            shards.push(input.clone());
            continue;
        }

        for entry in WalkDir::new(input).follow_links(true) {
            let entry = entry.map_err(io::Error::other)?;
            if entry.file_type().is_file() && is_shard_file(entry.path()) {
                shards.push(entry.into_path());
            }
        }
    }

    shards.sort();
    shards.dedup();
    Ok(shards)
}

/// Replace `target` with `tmp` in one rename.
pub fn replace_file(tmp: &Path, target: &Path) -> io::Result<()> {
    fs::rename(tmp, target)
}

/// Temp sibling used while a file is rebuilt.
pub fn temp_sibling(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    target.with_file_name(name)
}

/// Write `content` to `path` through a temp file and rename.
pub fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = temp_sibling(path);
    fs::write(&tmp, content)?;
    replace_file(&tmp, path)
}

/// Sanitize a filename by replacing invalid characters.
///
/// Replaces characters that are not allowed in filenames on common operating
/// systems with hyphens.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_control() || c.is_whitespace() => '-',
            c => c,
        })
        .collect::<String>()
        .trim_matches('-')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_checksum() {
        let checksum = calculate_checksum("hello world");
        assert_eq!(checksum.len(), 64);
        assert_eq!(checksum, calculate_bytes_checksum(b"hello world"));
    }

    #[test]
    fn test_is_shard_file() {
        assert!(is_shard_file(Path::new("0.json.gz")));
        assert!(is_shard_file(Path::new("dump/part-1.JSONL")));
        assert!(is_shard_file(Path::new("part.ndjson.gz")));
        assert!(!is_shard_file(Path::new("notes.txt")));
        assert!(!is_shard_file(Path::new("archive.gz")));
    }

    #[test]
    fn test_discover_shards_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("2.jsonl"), "").unwrap();
        fs::write(dir.path().join("1.json.gz"), "").unwrap();
        fs::write(dir.path().join("readme.md"), "").unwrap();

        let shards = discover_shards(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(shards.len(), 2);
        assert!(shards[0].ends_with("1.json.gz"));
        assert!(shards[1].ends_with("b/2.jsonl"));
    }

    #[test]
    fn test_discover_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_shards(&[dir.path().join("nope")]).is_err());
    }

    #[test]
    fn test_write_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("manifest.toml");
        write_atomic(&path, b"a = 1").unwrap();
        write_atomic(&path, b"a = 2").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "a = 2");
        assert!(!temp_sibling(&path).exists());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("sentence-transformers/all mpnet"), "sentence-transformers-all-mpnet");
        assert_eq!(sanitize_filename("/model:"), "model");
    }
}
