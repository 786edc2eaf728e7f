//! Error types for the NetCDF ingest core.
//!
//! Mirrors the error kinds described in the specification's error-handling
//! design: structural/binary problems abort the current dataset, while
//! parse-level problems in free-form history text are accumulated on the
//! owning process record instead (see `history::process::Process::errors`).

use thiserror::Error;

/// Errors raised while decoding a NetCDF-3 classic header.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("bad magic: expected 'CDF\\x01'")]
    BadMagic,

    #[error("negative length where a non-negative integer was expected")]
    NegativeLength,

    #[error("premature end of file")]
    PrematureEof,

    #[error("unexpected tag {tag} with non-zero count {count}")]
    UnexpectedTag { tag: i32, count: i32 },
}

/// Main error type for the ingest core's operations.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("NetCDF header format error in '{path}': {source}")]
    Format {
        path: String,
        #[source]
        source: FormatError,
    },

    #[error(
        "volume variable mismatch between shards: '{path}' does not agree with the first shard"
    )]
    VolumeMismatch { path: String },

    #[error("cached data for '{path}' is stale: file changed on disk")]
    CacheStale { path: String },

    #[error("attempted read beyond the cache limit of {limit} bytes for '{path}'")]
    CacheLimitExceeded { path: String, limit: u64 },

    #[error("no NetCDF files found at '{path}'")]
    NoShards { path: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("on-disk cache decode error: {0}")]
    CacheDecode(String),
}

pub type Result<T> = std::result::Result<T, IngestError>;
