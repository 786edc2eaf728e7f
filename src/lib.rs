//! NetCDF-3 classic volume ingestion: header parsing, shard discovery,
//! z-slab streaming, slice/histogram assembly, PNG encoding, and
//! provenance extraction from embedded processing history.

pub mod config;
pub mod error;
pub mod histogram;
pub mod history;
pub mod image;
pub mod nc3;
pub mod orchestrator;
pub mod shard;
pub mod slab;
pub mod slice;
pub mod upload;
pub mod volume;

pub use config::Config;
pub use error::{IngestError, Result};
