//! NetCDF-3 classic-format header parsing: the byte reader and fingerprint
//! tap (C1), the persistent header cache (C2), the header decoder (C3),
//! and a textual CDL dump of a parsed header.

pub mod cache;
pub mod cdl;
pub mod decoder;
pub mod reader;
pub mod types;

pub use decoder::decode_header;
pub use types::{Attribute, AttributeValue, Dimension, Header, NcType, Variable};
