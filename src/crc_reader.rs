//! A reader wrapper that checks a CRC32 at end-of-stream.
//!
//! Every entry stream this crate hands out is wrapped in one of these,
//! so a corrupted payload surfaces as an error on the final read rather
//! than as silently wrong bytes.

use std::io;
use std::io::prelude::*;

use crc32fast::Hasher;

/// Validates the stored CRC32 once the inner reader reaches EOF.
pub struct Crc32Reader<R> {
    inner: R,
    hasher: Hasher,
    expected: u32,
}

impl<R> Crc32Reader<R> {
    pub fn new(inner: R, expected: u32) -> Crc32Reader<R> {
        Crc32Reader {
            inner,
            hasher: Hasher::new(),
            expected,
        }
    }

    fn matches(&self) -> bool {
        self.hasher.clone().finalize() == self.expected
    }
}

impl<R: Read> Read for Crc32Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        if count == 0 {
            if !buf.is_empty() && !self.matches() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "CRC32 mismatch",
                ));
            }
            return Ok(0);
        }
        self.hasher.update(&buf[..count]);
        Ok(count)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn matching_checksum_reads_cleanly() {
        let payload: &[u8] = b"nested archives all the way down";
        let expected = {
            let mut h = Hasher::new();
            h.update(payload);
            h.finalize()
        };
        let mut reader = Crc32Reader::new(payload, expected);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, payload);
        // EOF can be hit again without complaint.
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn wrong_checksum_fails_at_eof() {
        let mut reader = Crc32Reader::new(&b"abc"[..], 0xDEAD_BEEF);
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn empty_stream_with_zero_crc_is_fine() {
        let mut reader = Crc32Reader::new(&b""[..], 0);
        let mut buf = [0u8; 1];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }
}
