//! C1: a positioned byte source that tees every byte it returns into a
//! running MD5 digest, exposing the digest as the header "fingerprint"
//! once parsing has consumed the whole header (spec §4.1).
//!
//! Grounded on the Python prototype's `MD5Wrapper` in `nc3header.py`: a
//! thin decorator around a file-like object that accumulates `hashlib.md5`
//! state on every `read()` call, regardless of subsequent `seek()`s.

use crate::error::Result;
use md5::{Digest, Md5};

/// A source of bytes read sequentially from some position. `read` may
/// return fewer bytes than requested only once the source is exhausted
/// (spec §4.1), mirroring the Python prototype's file-like `read(n)`.
pub trait ByteSource {
    fn read(&mut self, n: usize) -> Result<Vec<u8>>;
}

/// Wraps any `ByteSource`, accumulating an MD5 digest over every byte
/// actually returned by `read`. Seeking the underlying source (which is
/// outside this type's API — sources that support it do so on themselves)
/// does not rewind the digest: it is defined purely over the sequence of
/// bytes `read()` has produced so far, in order.
pub struct FingerprintReader<S> {
    inner: S,
    digest: Md5,
    count: u64,
}

impl<S: ByteSource> FingerprintReader<S> {
    pub fn new(inner: S) -> Self {
        FingerprintReader {
            inner,
            digest: Md5::new(),
            count: 0,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.count
    }

    /// Current hex-encoded digest of all bytes read so far.
    pub fn fingerprint(&self) -> String {
        let digest = self.digest.clone().finalize();
        hex_encode(&digest)
    }

    /// Reads exactly `n` bytes, tee-ing them into the digest as they come
    /// back, and fails with a premature-EOF-shaped error if fewer than `n`
    /// bytes were available.
    pub fn read_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        let buf = self.inner.read(n)?;
        self.digest.update(&buf);
        self.count += buf.len() as u64;
        Ok(buf)
    }
}

pub fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// A `ByteSource` reading straight from a plain file handle, with no
/// caching and no artificial limit — used for shard data streaming (C6),
/// which must never flow through the header cache (spec §4.2).
pub struct DirectSource {
    file: std::fs::File,
}

impl DirectSource {
    pub fn new(file: std::fs::File) -> Self {
        DirectSource { file }
    }
}

impl ByteSource for DirectSource {
    fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        use std::io::Read;
        let mut buf = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            let read = self.file.read(&mut buf[filled..])?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        buf.truncate(filled);
        Ok(buf)
    }
}
