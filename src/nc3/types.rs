//! The data model of a parsed NetCDF-3 classic-format header (spec §3).

use std::rc::Rc;

/// The six element types a NetCDF-3 classic header can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NcType {
    Byte,
    Char,
    Short,
    Long,
    Float,
    Double,
}

impl NcType {
    pub fn from_tag(tag: i32) -> Option<NcType> {
        match tag {
            1 => Some(NcType::Byte),
            2 => Some(NcType::Char),
            3 => Some(NcType::Short),
            4 => Some(NcType::Long),
            5 => Some(NcType::Float),
            6 => Some(NcType::Double),
            _ => None,
        }
    }

    pub fn tag(self) -> i32 {
        match self {
            NcType::Byte => 1,
            NcType::Char => 2,
            NcType::Short => 3,
            NcType::Long => 4,
            NcType::Float => 5,
            NcType::Double => 6,
        }
    }

    /// Size in bytes of one element on disk.
    pub fn element_size(self) -> usize {
        match self {
            NcType::Byte => 1,
            NcType::Char => 1,
            NcType::Short => 2,
            NcType::Long => 4,
            NcType::Float => 4,
            NcType::Double => 8,
        }
    }
}

/// One attribute value: either a raw (undecoded) byte string for CHAR-typed
/// attributes, or a sequence of big-endian-decoded numeric values of a
/// single `NcType`.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Text(Vec<u8>),
    Numeric { nc_type: NcType, values: Vec<f64> },
}

impl AttributeValue {
    /// Value as a UTF-8-lossy string, for CHAR-typed attributes. Trailing
    /// NUL bytes (common in legacy writers) are trimmed.
    pub fn as_text(&self) -> Option<String> {
        match self {
            AttributeValue::Text(bytes) => {
                let trimmed = bytes
                    .iter()
                    .rposition(|&b| b != 0)
                    .map(|i| &bytes[..=i])
                    .unwrap_or(&[]);
                Some(String::from_utf8_lossy(trimmed).into_owned())
            }
            AttributeValue::Numeric { .. } => None,
        }
    }

    /// Values as a sequence of `i64`, for integer-typed attributes used as
    /// dimension/index references (e.g. `zdim_total`, `zdim_range`).
    pub fn as_ints(&self) -> Option<Vec<i64>> {
        match self {
            AttributeValue::Numeric { values, .. } => {
                Some(values.iter().map(|&v| v as i64).collect())
            }
            AttributeValue::Text(_) => None,
        }
    }

    /// Values as a sequence of `f64`, regardless of the underlying numeric
    /// `NcType` (used for geometry attributes like `voxel_size_xyz`).
    pub fn as_floats(&self) -> Option<Vec<f64>> {
        match self {
            AttributeValue::Numeric { values, .. } => Some(values.clone()),
            AttributeValue::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: AttributeValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    pub name: String,
    pub value: i64,
}

/// One variable description. `dimensions` holds shared references into the
/// header's dimension list, preserving the "reference, not copy" invariant
/// from spec §3.
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub dimensions: Vec<Rc<Dimension>>,
    pub attributes: Vec<Attribute>,
    pub nc_type: NcType,
    pub data_size: i64,
    pub data_start: i64,
}

impl Variable {
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// The complete header data parsed from one NetCDF-3 classic file.
#[derive(Debug, Clone)]
pub struct Header {
    pub num_records: i64,
    pub dimensions: Vec<Rc<Dimension>>,
    pub attributes: Vec<Attribute>,
    pub variables: Vec<Variable>,
    pub header_size: u64,
    /// Lowercase-hex MD5 digest of the first `header_size` bytes of the file.
    pub fingerprint: String,
}

impl Header {
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }
}
