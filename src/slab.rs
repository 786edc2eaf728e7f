//! C6: z-slab streamer — reads one volume variable's data plane by plane
//! from a shard file, decoding it into a logical `(y, x)` row-major grid
//! per z (spec §4.6). Transparently decompresses `.bz2` shards. Grounded
//! on the Python prototype's `make_slices.py::z_slices`.

use crate::error::{IngestError, Result};
use crate::nc3::types::Header;
use crate::volume::{shard_z_range, Dtype, VolumeDescriptor};
use bzip2::read::BzDecoder;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// One decoded z-plane: `y * x` samples, row-major, widened to `f64` for
/// uniform downstream processing (histogram binning, slice assembly).
pub struct ZPlane {
    pub z: i64,
    pub data: Vec<f64>,
}

enum ShardReader {
    Plain(File),
    Bz2(BzDecoder<File>),
}

impl Read for ShardReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            ShardReader::Plain(f) => f.read(buf),
            ShardReader::Bz2(d) => d.read(buf),
        }
    }
}

/// Streams the z-planes of `descriptor`'s volume variable out of the
/// shard at `path`, whose header is `header` and whose matching `Variable`
/// is `var_index` into `header.variables`.
///
/// `header` must describe the *same* volume variable as `descriptor` —
/// callers are expected to have already checked this via
/// [`crate::volume::describe_volume`] equivalence (spec §4.6 "variable
/// mismatch between files" check).
pub struct ZSlabStream {
    reader: ShardReader,
    bytes_per_plane: usize,
    remaining: std::ops::Range<i64>,
    dtype: Dtype,
}

impl ZSlabStream {
    pub fn open(
        path: &Path,
        header: &Header,
        descriptor: &VolumeDescriptor,
    ) -> Result<ZSlabStream> {
        let var = header
            .variables
            .iter()
            .find(|v| v.name == descriptor.name)
            .ok_or_else(|| IngestError::VolumeMismatch {
                path: path.display().to_string(),
            })?;

        let (x, y, z_total) = descriptor.size;
        let (lo, hi) = shard_z_range(header, var, z_total);

        let file = File::open(path)?;
        let is_bz2 = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("bz2"))
            .unwrap_or(false);

        let mut reader = if is_bz2 {
            ShardReader::Bz2(BzDecoder::new(file))
        } else {
            ShardReader::Plain(file)
        };

        // BZ2 shards must be streamed from the start; seeking to
        // data_start means reading-and-discarding that many bytes.
        match &mut reader {
            ShardReader::Plain(f) => {
                f.seek(SeekFrom::Start(var.data_start as u64))?;
            }
            ShardReader::Bz2(d) => {
                skip_bytes(d, var.data_start as u64)?;
            }
        }

        Ok(ZSlabStream {
            reader,
            bytes_per_plane: (x * y) as usize * descriptor.dtype.element_size(),
            remaining: lo..(hi + 1),
            dtype: descriptor.dtype,
        })
    }

    /// Pulls the next z-plane, or `None` once the shard's z-range is
    /// exhausted. Returns `Ok(Some((z, None)))`-shaped information as an
    /// `Err` is inappropriate here: short reads are surfaced as
    /// `Ok(None)` paired with a caller-visible z via `next_z()`, mirroring
    /// the prototype's `(z, None, "insufficient data")` sentinel — callers
    /// that need to log the z of a short read should call `next_z()`
    /// before `next()`.
    pub fn next_plane(&mut self) -> Result<Option<ZPlane>> {
        let z = match self.remaining.next() {
            Some(z) => z,
            None => return Ok(None),
        };

        let mut buf = vec![0u8; self.bytes_per_plane];
        let mut filled = 0;
        while filled < buf.len() {
            let read = self.reader.read(&mut buf[filled..])?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        if filled < buf.len() {
            return Ok(None);
        }

        let data = decode_plane(&buf, self.dtype);
        Ok(Some(ZPlane { z, data }))
    }

    pub fn next_z(&self) -> Option<i64> {
        self.remaining.clone().next()
    }
}

fn skip_bytes<R: Read>(reader: &mut R, mut n: u64) -> Result<()> {
    let mut buf = [0u8; 64 * 1024];
    while n > 0 {
        let chunk = n.min(buf.len() as u64) as usize;
        let read = reader.read(&mut buf[..chunk])?;
        if read == 0 {
            break;
        }
        n -= read as u64;
    }
    Ok(())
}

fn decode_plane(bytes: &[u8], dtype: Dtype) -> Vec<f64> {
    let elem = dtype.element_size();
    bytes
        .chunks_exact(elem)
        .map(|chunk| match dtype {
            Dtype::U8 => chunk[0] as f64,
            Dtype::U16 => u16::from_be_bytes([chunk[0], chunk[1]]) as f64,
            Dtype::I32 => i32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64,
            Dtype::F32 => f32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nc3::types::{Dimension, NcType, Variable};
    use std::rc::Rc;

    fn make_descriptor() -> (VolumeDescriptor, Header) {
        let z = Rc::new(Dimension {
            name: "z".into(),
            value: 2,
        });
        let y = Rc::new(Dimension {
            name: "y".into(),
            value: 2,
        });
        let x = Rc::new(Dimension {
            name: "x".into(),
            value: 2,
        });
        let var = Variable {
            name: "tomo".into(),
            dimensions: vec![z, y, x],
            attributes: vec![],
            nc_type: NcType::Byte,
            data_size: 8,
            data_start: 0,
        };
        let header = Header {
            num_records: 0,
            dimensions: vec![],
            attributes: vec![],
            variables: vec![var],
            header_size: 0,
            fingerprint: String::new(),
        };
        let descriptor = VolumeDescriptor {
            name: "tomo".into(),
            size: (2, 2, 2),
            origin: (0.0, 0.0, 0.0),
            dtype: Dtype::U8,
        };
        (descriptor, header)
    }

    #[test]
    fn streams_planes_from_plain_file() {
        let (descriptor, header) = make_descriptor();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shard.nc");
        std::fs::write(&path, [1u8, 2, 3, 4, 5, 6, 7, 8]).unwrap();

        let mut stream = ZSlabStream::open(&path, &header, &descriptor).unwrap();
        let p0 = stream.next_plane().unwrap().unwrap();
        assert_eq!(p0.z, 0);
        assert_eq!(p0.data, vec![1.0, 2.0, 3.0, 4.0]);
        let p1 = stream.next_plane().unwrap().unwrap();
        assert_eq!(p1.z, 1);
        assert_eq!(p1.data, vec![5.0, 6.0, 7.0, 8.0]);
        assert!(stream.next_plane().unwrap().is_none());
    }

    #[test]
    fn short_final_plane_yields_none() {
        let (descriptor, header) = make_descriptor();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shard.nc");
        std::fs::write(&path, [1u8, 2, 3, 4, 5]).unwrap();

        let mut stream = ZSlabStream::open(&path, &header, &descriptor).unwrap();
        assert!(stream.next_plane().unwrap().is_some());
        assert!(stream.next_plane().unwrap().is_none());
    }
}
