//! Utility modules.

pub mod cancel;
pub mod file;
pub mod json;
pub mod text;

pub use cancel::CancelFlag;
pub use file::{
    calculate_bytes_checksum, calculate_checksum, discover_shards, is_shard_file,
    sanitize_filename, write_atomic,
};
pub use json::{canonical_json, fingerprint};
pub use text::{clean_abstract, clean_inline, collapse_whitespace};
