//! Random-access byte ranges over a single underlying source.
//!
//! Every archive, nested archive, and entry payload in this crate is a
//! [`RandomAccessData`]: a `(source, offset, length)` triple. Sub-ranges
//! share the source through an `Arc`, so a nested archive is a view of its
//! parent's bytes, never a copy. The file handle is released when the last
//! view drops; an explicit [`close`] poisons every view sharing the source
//! so stale handles fail fast instead of reading a reused descriptor.
//!
//! Reads are positional (`pread`-style), so concurrent readers never race
//! on a shared cursor.
//!
//! [`close`]: RandomAccessData::close

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::arch::usize;
use crate::result::*;

/// A handle over a contiguous byte range of an underlying file or buffer.
///
/// Cloning is cheap and `sub_range` never copies data. The length is fixed
/// at construction.
#[derive(Clone)]
pub struct RandomAccessData {
    source: Arc<Source>,
    offset: u64,
    len: u64,
}

struct Source {
    backing: Backing,
    closed: AtomicBool,
}

enum Backing {
    File { file: File, path: Utf8PathBuf },
    Bytes(Box<[u8]>),
}

impl RandomAccessData {
    /// Opens a file and wraps the whole of it.
    pub fn open<P: AsRef<Path>>(path: P) -> ZipResult<Self> {
        let path = path.as_ref();
        let utf8 = Utf8Path::from_path(path)
            .ok_or_else(|| ZipError::InvalidPath(path.display().to_string()))?;
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            source: Arc::new(Source {
                backing: Backing::File {
                    file,
                    path: utf8.to_path_buf(),
                },
                closed: AtomicBool::new(false),
            }),
            offset: 0,
            len,
        })
    }

    /// Wraps an in-memory buffer. Handy for tests and small archives.
    pub fn from_bytes<B: Into<Box<[u8]>>>(bytes: B) -> Self {
        let bytes = bytes.into();
        let len = bytes.len() as u64;
        Self {
            source: Arc::new(Source {
                backing: Backing::Bytes(bytes),
                closed: AtomicBool::new(false),
            }),
            offset: 0,
            len,
        }
    }

    /// Length of this range in bytes.
    pub fn size(&self) -> u64 {
        self.len
    }

    /// The path of the underlying file, if this data is file-backed.
    ///
    /// Views keep the path of their root so composite URLs can be rebuilt
    /// from any depth.
    pub fn file_path(&self) -> Option<&Utf8Path> {
        match &self.source.backing {
            Backing::File { path, .. } => Some(path),
            Backing::Bytes(_) => None,
        }
    }

    /// Creates a view of `[offset, offset + len)` within this range.
    /// No bytes are copied; the view shares the underlying source.
    pub fn sub_range(&self, offset: u64, len: u64) -> ZipResult<Self> {
        let end = offset
            .checked_add(len)
            .ok_or(ZipError::MalformedOffset("sub-range overflows u64"))?;
        if end > self.len {
            return Err(ZipError::Truncated {
                offset,
                wanted: len,
                available: self.len.saturating_sub(offset),
            });
        }
        Ok(Self {
            source: Arc::clone(&self.source),
            offset: self.offset + offset,
            len,
        })
    }

    /// Fills `buf` from `offset` within this range.
    ///
    /// Fails with `Truncated` if the range ends first, and `Closed` if the
    /// source has been closed.
    pub fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> ZipResult<()> {
        if self.source.closed.load(Ordering::Acquire) {
            return Err(ZipError::Closed);
        }
        let wanted = buf.len() as u64;
        if offset.checked_add(wanted).map_or(true, |end| end > self.len) {
            return Err(ZipError::Truncated {
                offset,
                wanted,
                available: self.len.saturating_sub(offset),
            });
        }
        let absolute = self.offset + offset;
        match &self.source.backing {
            Backing::File { file, .. } => positioned_read(file, absolute, buf)?,
            Backing::Bytes(bytes) => {
                let start = usize(absolute)?;
                buf.copy_from_slice(&bytes[start..start + buf.len()]);
            }
        }
        Ok(())
    }

    /// Reads exactly `len` bytes starting at `offset`.
    pub fn read(&self, offset: u64, len: usize) -> ZipResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact_at(offset, &mut buf)?;
        Ok(buf)
    }

    /// A sequential reader over this range, for streaming consumers.
    pub fn input_stream(&self) -> DataReader {
        DataReader {
            data: self.clone(),
            pos: 0,
        }
    }

    /// Marks the underlying source closed. Every view sharing it fails
    /// subsequent reads with `Closed`. The file handle itself is released
    /// when the last view drops.
    pub fn close(&self) {
        self.source.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.source.closed.load(Ordering::Acquire)
    }
}

#[cfg(unix)]
fn positioned_read(file: &File, offset: u64, buf: &mut [u8]) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn positioned_read(file: &File, mut offset: u64, mut buf: &mut [u8]) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "read past end of file",
                ))
            }
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Sequential `io::Read` over a [`RandomAccessData`] range.
///
/// Dropping the reader does not close the underlying archive.
pub struct DataReader {
    data: RandomAccessData,
    pos: u64,
}

impl io::Read for DataReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.data.size() - self.pos;
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let take = remaining.min(buf.len() as u64) as usize;
        self.data
            .read_exact_at(self.pos, &mut buf[..take])
            .map_err(|e| match e {
                ZipError::Io(io) => io,
                ZipError::Closed => io::Error::new(io::ErrorKind::Other, "archive is closed"),
                other => io::Error::new(io::ErrorKind::UnexpectedEof, other.to_string()),
            })?;
        self.pos += take as u64;
        Ok(take)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Read;

    #[test]
    fn sub_ranges_are_transparent() {
        let data = RandomAccessData::from_bytes(&b"0123456789"[..]);
        let view = data.sub_range(2, 6).unwrap();
        assert_eq!(view.size(), 6);
        assert_eq!(view.read(0, 6).unwrap(), b"234567");

        let inner = view.sub_range(1, 3).unwrap();
        assert_eq!(inner.read(0, 3).unwrap(), b"345");
    }

    #[test]
    fn reads_past_the_end_are_truncated() {
        let data = RandomAccessData::from_bytes(&b"abc"[..]);
        match data.read(1, 5) {
            Err(ZipError::Truncated {
                offset,
                wanted,
                available,
            }) => {
                assert_eq!(offset, 1);
                assert_eq!(wanted, 5);
                assert_eq!(available, 2);
            }
            other => panic!("expected Truncated, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn close_poisons_every_view() {
        let data = RandomAccessData::from_bytes(&b"abcdef"[..]);
        let view = data.sub_range(0, 3).unwrap();
        data.close();
        assert!(matches!(view.read(0, 1), Err(ZipError::Closed)));
        assert!(view.is_closed());
    }

    #[test]
    fn input_stream_reads_the_whole_range() {
        let data = RandomAccessData::from_bytes(&b"hello, nested world"[..]);
        let mut out = Vec::new();
        data.sub_range(7, 6)
            .unwrap()
            .input_stream()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, b"nested");
    }
}
