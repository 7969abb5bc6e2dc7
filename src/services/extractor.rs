//! Streaming reader for dump shards.
//!
//! A shard is newline-delimited JSON (`.jsonl`, `.ndjson`) or a single JSON
//! document (`.json`) holding either a top-level array of items or an
//! envelope object whose `items` array (possibly under `message`) holds them.
//! Any of these may be gzip-compressed (`.gz`). Items are yielded one at a
//! time; a shard is never held in memory.

use flate2::read::MultiGzDecoder;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::ExtractError;

const READ_BUFFER: usize = 256 * 1024;
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// One item per line.
    Lines,
    /// A JSON array, or an object carrying an `items` array.
    Json,
}

/// A shard file and how to read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardSource {
    pub path: PathBuf,
    pub framing: Framing,
    pub compressed: bool,
}

impl ShardSource {
    /// Detect framing and compression from the file name.
    pub fn detect(path: &Path) -> Result<Self, ExtractError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .ok_or_else(|| ExtractError::Unsupported(path.to_path_buf()))?;

        let (name, compressed) = match name.strip_suffix(".gz") {
            Some(stripped) => (stripped.to_string(), true),
            None => (name, false),
        };

        let framing = match Path::new(&name).extension().and_then(|e| e.to_str()) {
            Some("jsonl" | "ndjson") => Framing::Lines,
            Some("json") => Framing::Json,
            _ => return Err(ExtractError::Unsupported(path.to_path_buf())),
        };

        Ok(Self {
            path: path.to_path_buf(),
            framing,
            compressed,
        })
    }

    pub fn open(&self) -> Result<RawItems, ExtractError> {
        let file = File::open(&self.path).map_err(|source| ExtractError::Open {
            path: self.path.clone(),
            source,
        })?;

        let reader: Box<dyn BufRead + Send> = if self.compressed {
            Box::new(BufReader::with_capacity(
                READ_BUFFER,
                MultiGzDecoder::new(BufReader::new(file)),
            ))
        } else {
            Box::new(BufReader::with_capacity(READ_BUFFER, file))
        };

        let frames = match self.framing {
            Framing::Lines => Frames::Lines(LineFrames::new(reader)),
            Framing::Json => Frames::Json(JsonFrames::new(reader)),
        };

        Ok(RawItems {
            frames,
            counts: ExtractCounts::default(),
            finished: false,
        })
    }
}

/// Open a shard, detecting its format from the file name.
pub fn open_shard(path: &Path) -> Result<RawItems, ExtractError> {
    ShardSource::detect(path)?.open()
}

/// Items and item-level errors seen so far in one shard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractCounts {
    pub items: u64,
    pub malformed: u64,
}

/// Lazy iterator over the raw items of one shard.
///
/// Yields `Err(MalformedItem)` for an item that cannot be parsed and keeps
/// going; any other error is yielded once and ends the iteration.
pub struct RawItems {
    frames: Frames,
    counts: ExtractCounts,
    finished: bool,
}

impl RawItems {
    pub fn counts(&self) -> ExtractCounts {
        self.counts
    }
}

impl Iterator for RawItems {
    type Item = Result<Value, ExtractError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let frame = match &mut self.frames {
            Frames::Lines(lines) => lines.next_frame(),
            Frames::Json(json) => json.next_frame(),
        };

        let bytes = match frame {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.finished = true;
                return None;
            }
            Err(e) => {
                self.finished = true;
                return Some(Err(e));
            }
        };

        let index = self.counts.items + self.counts.malformed;
        match parse_item(&bytes, index) {
            Ok(value) => {
                self.counts.items += 1;
                Some(Ok(value))
            }
            Err(e) => {
                self.counts.malformed += 1;
                Some(Err(e))
            }
        }
    }
}

fn parse_item(bytes: &[u8], index: u64) -> Result<Value, ExtractError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| ExtractError::MalformedItem {
            index,
            message: e.to_string(),
        })?;

    if !value.is_object() {
        return Err(ExtractError::MalformedItem {
            index,
            message: format!("expected an object, found {}", json_kind(&value)),
        });
    }
    Ok(value)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

enum Frames {
    Lines(LineFrames),
    Json(JsonFrames<Box<dyn BufRead + Send>>),
}

struct LineFrames {
    reader: Box<dyn BufRead + Send>,
    buf: Vec<u8>,
}

impl LineFrames {
    fn new(reader: Box<dyn BufRead + Send>) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(8 * 1024),
        }
    }

    /// Next non-blank line, without its terminator.
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>, ExtractError> {
        loop {
            self.buf.clear();
            if self.reader.read_until(b'\n', &mut self.buf)? == 0 {
                return Ok(None);
            }

            let line = self.buf.strip_prefix(UTF8_BOM).unwrap_or(&self.buf);
            let line = line.trim_ascii();
            if !line.is_empty() {
                return Ok(Some(line.to_vec()));
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JsonState {
    Start,
    /// Inside the items array; `first` until an element has been read.
    InArray { first: bool },
    Done,
}

/// Byte-level scanner that slices one JSON document into array elements.
///
/// Elements are delimited by tracking brackets and strings only; their
/// content is validated later by `serde_json`, so a syntax error inside a
/// balanced element stays local to that element.
struct JsonFrames<R> {
    reader: R,
    offset: u64,
    state: JsonState,
}

impl<R: BufRead> JsonFrames<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            offset: 0,
            state: JsonState::Start,
        }
    }

    fn next_frame(&mut self) -> Result<Option<Vec<u8>>, ExtractError> {
        loop {
            match self.state {
                JsonState::Done => return Ok(None),
                JsonState::Start => {
                    self.skip_bom()?;
                    self.skip_ws()?;
                    match self.peek()? {
                        None => {
                            self.state = JsonState::Done;
                        }
                        Some(b'[') => {
                            self.bump();
                            self.state = JsonState::InArray { first: true };
                        }
                        Some(b'{') => {
                            self.bump();
                            self.find_items()?;
                            self.state = JsonState::InArray { first: true };
                        }
                        Some(other) => return Err(self.unexpected(other, "'[' or '{'")),
                    }
                }
                JsonState::InArray { first } => {
                    self.skip_ws()?;
                    match self.peek()? {
                        None => return Err(ExtractError::Truncated),
                        Some(b']') => {
                            self.bump();
                            self.state = JsonState::Done;
                            continue;
                        }
                        Some(b',') if !first => {
                            self.bump();
                            self.skip_ws()?;
                        }
                        Some(other) if !first => {
                            return Err(self.unexpected(other, "',' or ']'"));
                        }
                        Some(_) => {}
                    }

                    let mut item = Vec::new();
                    self.scan_value(Some(&mut item))?;
                    self.state = JsonState::InArray { first: false };
                    return Ok(Some(item));
                }
            }
        }
    }

    /// Walk an envelope object up to the opening bracket of its `items`
    /// array, descending into a `message` object. The opening `{` has been
    /// consumed.
    fn find_items(&mut self) -> Result<(), ExtractError> {
        let mut depth = 1usize;

        loop {
            self.skip_ws()?;
            match self.peek()? {
                None => return Err(ExtractError::Truncated),
                Some(b'}') => {
                    self.bump();
                    depth -= 1;
                    if depth == 0 {
                        return Err(ExtractError::MissingItems);
                    }
                    self.after_member()?;
                    continue;
                }
                Some(b'"') => {}
                Some(other) => return Err(self.unexpected(other, "object key")),
            }

            let key = self.read_key()?;
            self.skip_ws()?;
            self.expect(b':', "':'")?;
            self.skip_ws()?;

            match (key.as_str(), self.peek()?) {
                ("items", Some(b'[')) => {
                    self.bump();
                    return Ok(());
                }
                ("message", Some(b'{')) => {
                    self.bump();
                    depth += 1;
                    continue;
                }
                _ => {
                    self.scan_value(None)?;
                    self.after_member()?;
                }
            }
        }
    }

    /// Consume the separator after an object member, leaving a closing `}` in place.
    fn after_member(&mut self) -> Result<(), ExtractError> {
        self.skip_ws()?;
        match self.peek()? {
            Some(b',') => {
                self.bump();
                Ok(())
            }
            Some(b'}') => Ok(()),
            Some(other) => Err(self.unexpected(other, "',' or '}'")),
            None => Err(ExtractError::Truncated),
        }
    }

    fn read_key(&mut self) -> Result<String, ExtractError> {
        let mut raw = Vec::new();
        self.scan_string(Some(&mut raw))?;
        serde_json::from_slice(&raw).map_err(|e| ExtractError::Unexpected {
            found: format!("invalid key ({e})"),
            offset: self.offset,
            expected: "string key",
        })
    }

    /// Consume one JSON value, copying its bytes into `out` when given.
    fn scan_value(&mut self, mut out: Option<&mut Vec<u8>>) -> Result<(), ExtractError> {
        match self.peek()? {
            None => Err(ExtractError::Truncated),
            Some(b'"') => self.scan_string(out),
            Some(b'{' | b'[') => {
                let mut closers: Vec<u8> = Vec::new();
                loop {
                    let byte = self.peek()?.ok_or(ExtractError::Truncated)?;
                    match byte {
                        b'"' => {
                            self.scan_string(out.as_deref_mut())?;
                            continue;
                        }
                        b'{' => closers.push(b'}'),
                        b'[' => closers.push(b']'),
                        b'}' | b']' => {
                            if closers.pop() != Some(byte) {
                                return Err(self.unexpected(byte, "matching bracket"));
                            }
                        }
                        _ => {}
                    }
                    self.bump();
                    if let Some(buf) = out.as_deref_mut() {
                        buf.push(byte);
                    }
                    if closers.is_empty() {
                        return Ok(());
                    }
                }
            }
            Some(_) => {
                let mut len = 0usize;
                while let Some(byte) = self.peek()? {
                    if matches!(byte, b',' | b']' | b'}') || byte.is_ascii_whitespace() {
                        break;
                    }
                    self.bump();
                    if let Some(buf) = out.as_deref_mut() {
                        buf.push(byte);
                    }
                    len += 1;
                }
                if len == 0 {
                    return match self.peek()? {
                        Some(byte) => Err(self.unexpected(byte, "value")),
                        None => Err(ExtractError::Truncated),
                    };
                }
                Ok(())
            }
        }
    }

    /// Consume a string literal including its quotes.
    fn scan_string(&mut self, mut out: Option<&mut Vec<u8>>) -> Result<(), ExtractError> {
        self.expect_into(b'"', "'\"'", out.as_deref_mut())?;
        let mut escaped = false;
        loop {
            let byte = self.peek()?.ok_or(ExtractError::Truncated)?;
            self.bump();
            if let Some(buf) = out.as_deref_mut() {
                buf.push(byte);
            }
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                return Ok(());
            }
        }
    }

    fn expect(&mut self, wanted: u8, expected: &'static str) -> Result<(), ExtractError> {
        self.expect_into(wanted, expected, None)
    }

    fn expect_into(
        &mut self,
        wanted: u8,
        expected: &'static str,
        out: Option<&mut Vec<u8>>,
    ) -> Result<(), ExtractError> {
        match self.peek()? {
            Some(byte) if byte == wanted => {
                self.bump();
                if let Some(buf) = out {
                    buf.push(byte);
                }
                Ok(())
            }
            Some(byte) => Err(self.unexpected(byte, expected)),
            None => Err(ExtractError::Truncated),
        }
    }

    fn skip_bom(&mut self) -> Result<(), ExtractError> {
        let buf = self.reader.fill_buf()?;
        if buf.starts_with(UTF8_BOM) {
            self.reader.consume(UTF8_BOM.len());
            self.offset += UTF8_BOM.len() as u64;
        }
        Ok(())
    }

    fn skip_ws(&mut self) -> Result<(), ExtractError> {
        while let Some(byte) = self.peek()? {
            if !byte.is_ascii_whitespace() {
                break;
            }
            self.bump();
        }
        Ok(())
    }

    fn peek(&mut self) -> Result<Option<u8>, ExtractError> {
        Ok(self.reader.fill_buf()?.first().copied())
    }

    /// Advance past a byte previously returned by `peek`.
    fn bump(&mut self) {
        self.reader.consume(1);
        self.offset += 1;
    }

    fn unexpected(&self, byte: u8, expected: &'static str) -> ExtractError {
        ExtractError::Unexpected {
            found: format!("{:?}", byte as char),
            offset: self.offset,
            expected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn write_shard(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        if name.ends_with(".gz") {
            let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
            encoder.write_all(content.as_bytes()).unwrap();
            encoder.finish().unwrap();
        } else {
            std::fs::write(&path, content).unwrap();
        }
        path
    }

    fn collect(path: &Path) -> (Vec<Value>, Vec<ExtractError>) {
        let mut items = Vec::new();
        let mut errors = Vec::new();
        for result in open_shard(path).unwrap() {
            match result {
                Ok(value) => items.push(value),
                Err(e) => errors.push(e),
            }
        }
        (items, errors)
    }

    #[test]
    fn test_detect_framing() {
        let lines = ShardSource::detect(Path::new("a/part-0.jsonl.gz")).unwrap();
        assert_eq!(lines.framing, Framing::Lines);
        assert!(lines.compressed);

        let json = ShardSource::detect(Path::new("0.JSON")).unwrap();
        assert_eq!(json.framing, Framing::Json);
        assert!(!json.compressed);

        assert!(matches!(
            ShardSource::detect(Path::new("notes.txt")),
            Err(ExtractError::Unsupported(_))
        ));
    }

    #[test]
    fn test_lines_with_corrupt_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_shard(
            dir.path(),
            "s.jsonl",
            "{\"DOI\":\"10.1/a\"}\n{\"DOI\": \"10.1/b\",\n\n{\"DOI\":\"10.1/c\"}\n",
        );

        let mut items = open_shard(&path).unwrap();
        let first = items.next().unwrap().unwrap();
        assert_eq!(first["DOI"], "10.1/a");
        assert!(matches!(
            items.next(),
            Some(Err(ExtractError::MalformedItem { index: 1, .. }))
        ));
        assert_eq!(items.next().unwrap().unwrap()["DOI"], "10.1/c");
        assert!(items.next().is_none());
        assert_eq!(
            items.counts(),
            ExtractCounts {
                items: 2,
                malformed: 1
            }
        );
    }

    #[test]
    fn test_gzip_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_shard(
            dir.path(),
            "0.json.gz",
            r#"{"status": "ok", "meta": {"n": [1, 2]}, "items": [{"DOI": "10.1/a", "title": ["A ] tricky \" title"]}, {"DOI": "10.1/b"}], "trailing": true}"#,
        );

        let (items, errors) = collect(&path);
        assert!(errors.is_empty());
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["title"][0], "A ] tricky \" title");
    }

    #[test]
    fn test_api_message_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_shard(
            dir.path(),
            "works.json",
            r#"{"status":"ok","message-type":"work-list","message":{"total-results":2,"items":[{"DOI":"10.1/a"},{"DOI":"10.1/b"}]}}"#,
        );

        let (items, errors) = collect(&path);
        assert!(errors.is_empty());
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_array_with_malformed_and_non_object_elements() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_shard(
            dir.path(),
            "a.json",
            r#"[{"DOI":"10.1/a"}, {"DOI": 10.1/b}, 42, {"DOI":"10.1/c"}]"#,
        );

        let (items, errors) = collect(&path);
        assert_eq!(items.len(), 2);
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(ExtractError::is_item_level));
    }

    #[test]
    fn test_truncated_array_keeps_earlier_items() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_shard(dir.path(), "t.json", r#"[{"DOI":"10.1/a"}, {"DOI":"10.1"#);

        let (items, errors) = collect(&path);
        assert_eq!(items.len(), 1);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ExtractError::Truncated));
    }

    #[test]
    fn test_unexpected_byte_between_elements() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_shard(dir.path(), "u.json", r#"[{"DOI":"10.1/a"} x {"DOI":"10.1/b"}]"#);

        let (items, errors) = collect(&path);
        assert_eq!(items.len(), 1);
        assert!(matches!(
            errors.as_slice(),
            [ExtractError::Unexpected { offset: 18, .. }]
        ));
    }

    #[test]
    fn test_envelope_without_items() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_shard(dir.path(), "e.json", r#"{"status":"ok","message":{"total":0}}"#);

        let (items, errors) = collect(&path);
        assert!(items.is_empty());
        assert!(matches!(errors.as_slice(), [ExtractError::MissingItems]));
    }

    #[test]
    fn test_corrupt_gzip_is_shard_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl.gz");
        std::fs::write(&path, b"definitely not gzip").unwrap();

        let (items, errors) = collect(&path);
        assert!(items.is_empty());
        assert_eq!(errors.len(), 1);
        assert!(!errors[0].is_item_level());
    }

    #[test]
    fn test_empty_shards() {
        let dir = tempfile::tempdir().unwrap();
        let (items, errors) = collect(&write_shard(dir.path(), "e.jsonl", "\n\n"));
        assert!(items.is_empty() && errors.is_empty());

        let (items, errors) = collect(&write_shard(dir.path(), "e.json", " [ ] "));
        assert!(items.is_empty() && errors.is_empty());
    }
}
