//! C3: the NetCDF-3 classic header decoder (spec §4.3).
//!
//! Grounded line-for-line on the Python prototype's `nc3header.py`:
//! `read_values`/`read_integer`/`read_non_negative`/`read_string`/
//! `read_dimensions`/`read_attributes`/`read_variables`/`NC3File.__init__`.
//! All multi-byte numeric values in the file are big-endian (spec §3).

use crate::error::{FormatError, IngestError, Result};
use crate::nc3::reader::{ByteSource, FingerprintReader};
use crate::nc3::types::{Attribute, AttributeValue, Dimension, Header, NcType, Variable};
use std::rc::Rc;

const TAG_DIMENSION: i32 = 10;
const TAG_VARIABLE: i32 = 11;
const TAG_ATTRIBUTE: i32 = 12;

struct Cursor<'a, S> {
    reader: &'a mut FingerprintReader<S>,
    path: String,
}

impl<'a, S: ByteSource> Cursor<'a, S> {
    fn err(&self, source: FormatError) -> IngestError {
        IngestError::Format {
            path: self.path.clone(),
            source,
        }
    }

    fn take(&mut self, n: usize) -> Result<Vec<u8>> {
        let buf = self.reader.read_exact(n)?;
        if buf.len() < n {
            return Err(self.err(FormatError::PrematureEof));
        }
        Ok(buf)
    }

    /// Reads a run of `count` values of `nc_type`, followed by alignment
    /// padding to a 4-byte boundary (spec §4.3 step 4 / §3 "on-disk
    /// padding"). CHAR values are returned raw; everything else is decoded
    /// as big-endian.
    fn read_values(&mut self, nc_type: NcType, count: usize) -> Result<AttributeValue> {
        let elem_size = nc_type.element_size();
        let size = elem_size * count;
        let bytes = self.take(size)?;
        let pad = (4 - size % 4) % 4;
        if pad > 0 {
            self.take(pad)?;
        }

        if matches!(nc_type, NcType::Char) {
            return Ok(AttributeValue::Text(bytes));
        }

        let mut values = Vec::with_capacity(count);
        for chunk in bytes.chunks_exact(elem_size) {
            let v = match nc_type {
                NcType::Byte => chunk[0] as i8 as f64,
                NcType::Short => i16::from_be_bytes([chunk[0], chunk[1]]) as f64,
                NcType::Long => i32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64,
                NcType::Float => {
                    f32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64
                }
                NcType::Double => f64::from_be_bytes([
                    chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
                ]),
                NcType::Char => unreachable!(),
            };
            values.push(v);
        }
        Ok(AttributeValue::Numeric { nc_type, values })
    }

    fn read_integer(&mut self) -> Result<i32> {
        let value = self.read_values(NcType::Long, 1)?;
        match value {
            AttributeValue::Numeric { values, .. } => Ok(values[0] as i32),
            AttributeValue::Text(_) => unreachable!(),
        }
    }

    fn read_non_negative(&mut self) -> Result<i32> {
        let n = self.read_integer()?;
        if n < 0 {
            return Err(self.err(FormatError::NegativeLength));
        }
        Ok(n)
    }

    fn read_string(&mut self) -> Result<String> {
        let size = self.read_non_negative()? as usize;
        let value = self.read_values(NcType::Char, size)?;
        match value {
            AttributeValue::Text(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            AttributeValue::Numeric { .. } => unreachable!(),
        }
    }

    fn read_dimensions(&mut self) -> Result<Vec<Rc<Dimension>>> {
        let tag = self.read_integer()?;
        let count = self.read_non_negative()?;
        if tag == TAG_DIMENSION {
            let mut dims = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let name = self.read_string()?;
                let value = self.read_non_negative()? as i64;
                dims.push(Rc::new(Dimension { name, value }));
            }
            Ok(dims)
        } else if tag != 0 || count != 0 {
            Err(self.err(FormatError::UnexpectedTag { tag, count }))
        } else {
            Ok(Vec::new())
        }
    }

    fn read_attributes(&mut self) -> Result<Vec<Attribute>> {
        let tag = self.read_integer()?;
        let count = self.read_non_negative()?;
        if tag == TAG_ATTRIBUTE {
            let mut attrs = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let name = self.read_string()?;
                let type_tag = self.read_integer()?;
                let nc_type = NcType::from_tag(type_tag)
                    .ok_or_else(|| self.err(FormatError::UnexpectedTag {
                        tag: type_tag,
                        count: 0,
                    }))?;
                let elem_count = self.read_non_negative()? as usize;
                let value = self.read_values(nc_type, elem_count)?;
                attrs.push(Attribute { name, value });
            }
            Ok(attrs)
        } else if tag != 0 || count != 0 {
            Err(self.err(FormatError::UnexpectedTag { tag, count }))
        } else {
            Ok(Vec::new())
        }
    }

    fn read_variables(&mut self, dimensions: &[Rc<Dimension>]) -> Result<Vec<Variable>> {
        let tag = self.read_integer()?;
        let count = self.read_non_negative()?;
        if tag == TAG_VARIABLE {
            let mut vars = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let name = self.read_string()?;
                let ndims = self.read_non_negative()? as usize;
                let mut dims = Vec::with_capacity(ndims);
                for _ in 0..ndims {
                    let idx = self.read_non_negative()? as usize;
                    let dim = dimensions
                        .get(idx)
                        .ok_or_else(|| self.err(FormatError::UnexpectedTag {
                            tag: idx as i32,
                            count: dimensions.len() as i32,
                        }))?;
                    dims.push(Rc::clone(dim));
                }
                let attributes = self.read_attributes()?;
                let type_tag = self.read_integer()?;
                let nc_type = NcType::from_tag(type_tag)
                    .ok_or_else(|| self.err(FormatError::UnexpectedTag {
                        tag: type_tag,
                        count: 0,
                    }))?;
                let data_size = self.read_non_negative()? as i64;
                let data_start = self.read_non_negative()? as i64;
                vars.push(Variable {
                    name,
                    dimensions: dims,
                    attributes,
                    nc_type,
                    data_size,
                    data_start,
                });
            }
            Ok(vars)
        } else if tag != 0 || count != 0 {
            Err(self.err(FormatError::UnexpectedTag { tag, count }))
        } else {
            Ok(Vec::new())
        }
    }
}

/// Parses a complete NetCDF-3 classic header from `source`, returning the
/// in-memory `Header` plus its fingerprint. `path` is used only to label
/// errors.
pub fn decode_header<S: ByteSource>(source: S, path: &str) -> Result<Header> {
    let mut reader = FingerprintReader::new(source);
    let mut cursor = Cursor {
        reader: &mut reader,
        path: path.to_string(),
    };

    let magic = cursor.take(4)?;
    if magic != b"CDF\x01" {
        return Err(cursor.err(FormatError::BadMagic));
    }

    let num_records = cursor.read_non_negative()? as i64;
    let dimensions = cursor.read_dimensions()?;
    let attributes = cursor.read_attributes()?;
    let variables = cursor.read_variables(&dimensions)?;

    let header_size = reader.bytes_read();
    let fingerprint = reader.fingerprint();

    Ok(Header {
        num_records,
        dimensions,
        attributes,
        variables,
        header_size,
        fingerprint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nc3::reader::hex_encode;
    use md5::{Digest, Md5};

    struct VecSource {
        data: Vec<u8>,
        pos: usize,
    }

    impl ByteSource for VecSource {
        fn read(&mut self, n: usize) -> Result<Vec<u8>> {
            let end = (self.pos + n).min(self.data.len());
            let out = self.data[self.pos..end].to_vec();
            self.pos = end;
            Ok(out)
        }
    }

    fn be_i32(v: i32) -> [u8; 4] {
        v.to_be_bytes()
    }

    fn pad_to_4(buf: &mut Vec<u8>, len: usize) {
        let pad = (4 - len % 4) % 4;
        buf.extend(std::iter::repeat(0u8).take(pad));
    }

    fn write_string(buf: &mut Vec<u8>, s: &str) {
        buf.extend_from_slice(&be_i32(s.len() as i32));
        buf.extend_from_slice(s.as_bytes());
        pad_to_4(buf, s.len());
    }

    /// Builds a minimal valid header: no dimensions, no global attributes,
    /// no variables.
    fn minimal_header_bytes() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"CDF\x01");
        buf.extend_from_slice(&be_i32(0)); // num_records
        buf.extend_from_slice(&be_i32(0)); // dim tag
        buf.extend_from_slice(&be_i32(0)); // dim count
        buf.extend_from_slice(&be_i32(0)); // attr tag
        buf.extend_from_slice(&be_i32(0)); // attr count
        buf.extend_from_slice(&be_i32(0)); // var tag
        buf.extend_from_slice(&be_i32(0)); // var count
        buf
    }

    #[test]
    fn rejects_bad_magic() {
        let data = b"XXXXrestofheader".to_vec();
        let src = VecSource { data, pos: 0 };
        let err = decode_header(src, "test").unwrap_err();
        assert!(matches!(
            err,
            IngestError::Format {
                source: FormatError::BadMagic,
                ..
            }
        ));
    }

    #[test]
    fn parses_minimal_header_and_fingerprint_matches_literal_bytes() {
        let data = minimal_header_bytes();
        let src = VecSource {
            data: data.clone(),
            pos: 0,
        };
        let header = decode_header(src, "test").unwrap();
        assert_eq!(header.num_records, 0);
        assert!(header.dimensions.is_empty());
        assert!(header.attributes.is_empty());
        assert!(header.variables.is_empty());
        assert_eq!(header.header_size, data.len() as u64);

        let mut md5 = Md5::new();
        md5.update(&data[..header.header_size as usize]);
        assert_eq!(header.fingerprint, hex_encode(&md5.finalize()));
    }

    #[test]
    fn parses_dimensions_and_attributes() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"CDF\x01");
        buf.extend_from_slice(&be_i32(0));

        // one dimension: "x" = 16
        buf.extend_from_slice(&be_i32(10));
        buf.extend_from_slice(&be_i32(1));
        write_string(&mut buf, "x");
        buf.extend_from_slice(&be_i32(16));

        // one global attribute: "title" = "vol" (CHAR)
        buf.extend_from_slice(&be_i32(12));
        buf.extend_from_slice(&be_i32(1));
        write_string(&mut buf, "title");
        buf.extend_from_slice(&be_i32(2)); // NC_CHAR
        buf.extend_from_slice(&be_i32(3));
        buf.extend_from_slice(b"vol");
        pad_to_4(&mut buf, 3);

        // no variables
        buf.extend_from_slice(&be_i32(0));
        buf.extend_from_slice(&be_i32(0));

        let src = VecSource {
            data: buf,
            pos: 0,
        };
        let header = decode_header(src, "test").unwrap();
        assert_eq!(header.dimensions.len(), 1);
        assert_eq!(header.dimensions[0].name, "x");
        assert_eq!(header.dimensions[0].value, 16);
        assert_eq!(header.attributes.len(), 1);
        assert_eq!(
            header.attributes[0].value.as_text().unwrap(),
            "vol"
        );
    }

    #[test]
    fn fails_on_premature_eof() {
        let mut data = minimal_header_bytes();
        data.truncate(data.len() - 2);
        let src = VecSource { data, pos: 0 };
        let err = decode_header(src, "test").unwrap_err();
        assert!(matches!(
            err,
            IngestError::Format {
                source: FormatError::PrematureEof,
                ..
            }
        ));
    }
}
