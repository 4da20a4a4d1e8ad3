//! An in-memory ZIP writer for building test fixtures.
#![allow(dead_code)] // each test binary uses a different slice of this
//!
//! Just enough of the format to exercise the reader: stored and deflated
//! entries, entry comments and extra fields (central and local
//! independently), archive comments, executable prefixes, and Zip64
//! end-of-central-directory records with selectable sentinel fields.

use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::Write;

pub struct EntrySpec {
    pub name: String,
    pub data: Vec<u8>,
    pub deflate: bool,
    pub comment: Vec<u8>,
    pub local_extra: Vec<u8>,
    pub central_extra: Vec<u8>,
}

impl EntrySpec {
    pub fn stored(name: &str, data: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            data: data.to_vec(),
            deflate: false,
            comment: Vec::new(),
            local_extra: Vec::new(),
            central_extra: Vec::new(),
        }
    }

    pub fn deflated(name: &str, data: &[u8]) -> Self {
        Self {
            deflate: true,
            ..Self::stored(name, data)
        }
    }

    /// A directory entry; `name` should end in `/`.
    pub fn dir(name: &str) -> Self {
        assert!(name.ends_with('/'));
        Self::stored(name, b"")
    }

    pub fn with_comment(mut self, comment: &[u8]) -> Self {
        self.comment = comment.to_vec();
        self
    }

    pub fn with_local_extra(mut self, extra: &[u8]) -> Self {
        self.local_extra = extra.to_vec();
        self
    }

    pub fn with_central_extra(mut self, extra: &[u8]) -> Self {
        self.central_extra = extra.to_vec();
        self
    }
}

/// Which classic end-of-central-directory fields to replace with Zip64
/// sentinels. Setting any of them emits the Zip64 record and locator.
#[derive(Debug, Default, Clone, Copy)]
pub struct Zip64Sentinels {
    pub entries: bool,
    pub cd_size: bool,
    pub cd_offset: bool,
}

impl Zip64Sentinels {
    pub fn any(self) -> bool {
        self.entries || self.cd_size || self.cd_offset
    }
}

#[derive(Default)]
pub struct ArchiveSpec {
    pub entries: Vec<EntrySpec>,
    pub comment: Vec<u8>,
    pub prefix: Vec<u8>,
    pub zip64: Zip64Sentinels,
}

impl ArchiveSpec {
    pub fn new(entries: Vec<EntrySpec>) -> Self {
        Self {
            entries,
            ..Self::default()
        }
    }

    pub fn with_comment(mut self, comment: &[u8]) -> Self {
        self.comment = comment.to_vec();
        self
    }

    pub fn with_prefix(mut self, prefix: &[u8]) -> Self {
        self.prefix = prefix.to_vec();
        self
    }

    pub fn with_zip64(mut self, zip64: Zip64Sentinels) -> Self {
        self.zip64 = zip64;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        build_archive(self)
    }
}

/// Convenience for the common case: stored/deflated entries, no frills.
pub fn build_zip(entries: Vec<EntrySpec>) -> Vec<u8> {
    ArchiveSpec::new(entries).build()
}

fn u16le(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn u32le(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn u64le(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn build_archive(spec: &ArchiveSpec) -> Vec<u8> {
    let mut archive = Vec::new();
    let mut records = Vec::new();

    for entry in &spec.entries {
        let crc = crc32fast::hash(&entry.data);
        let payload = if entry.deflate {
            deflate(&entry.data)
        } else {
            entry.data.clone()
        };
        let method: u16 = if entry.deflate { 8 } else { 0 };
        let header_offset = archive.len() as u32;

        // Local file header
        archive.extend_from_slice(b"PK\x03\x04");
        u16le(&mut archive, 20); // version needed
        u16le(&mut archive, 0); // flags
        u16le(&mut archive, method);
        u16le(&mut archive, 0); // mod time
        u16le(&mut archive, 0); // mod date
        u32le(&mut archive, crc);
        u32le(&mut archive, payload.len() as u32);
        u32le(&mut archive, entry.data.len() as u32);
        u16le(&mut archive, entry.name.len() as u16);
        u16le(&mut archive, entry.local_extra.len() as u16);
        archive.extend_from_slice(entry.name.as_bytes());
        archive.extend_from_slice(&entry.local_extra);
        archive.extend_from_slice(&payload);

        records.push((entry, crc, payload.len() as u32, header_offset));
    }

    let cd_offset = archive.len() as u32;
    for (entry, crc, compressed_len, header_offset) in &records {
        let method: u16 = if entry.deflate { 8 } else { 0 };
        archive.extend_from_slice(b"PK\x01\x02");
        u16le(&mut archive, 20); // version made by
        u16le(&mut archive, 20); // version needed
        u16le(&mut archive, 0); // flags
        u16le(&mut archive, method);
        u16le(&mut archive, 0); // mod time
        u16le(&mut archive, 0); // mod date
        u32le(&mut archive, *crc);
        u32le(&mut archive, *compressed_len);
        u32le(&mut archive, entry.data.len() as u32);
        u16le(&mut archive, entry.name.len() as u16);
        u16le(&mut archive, entry.central_extra.len() as u16);
        u16le(&mut archive, entry.comment.len() as u16);
        u16le(&mut archive, 0); // disk number start
        u16le(&mut archive, 0); // internal attributes
        u32le(&mut archive, 0); // external attributes
        u32le(&mut archive, *header_offset);
        archive.extend_from_slice(entry.name.as_bytes());
        archive.extend_from_slice(&entry.central_extra);
        archive.extend_from_slice(&entry.comment);
    }
    let cd_size = (archive.len() as u32) - cd_offset;
    let count = records.len() as u64;

    if spec.zip64.any() {
        let zip64_offset = archive.len() as u64;
        // Zip64 end of central directory record
        archive.extend_from_slice(b"PK\x06\x06");
        u64le(&mut archive, 44); // size of the remaining record
        u16le(&mut archive, 45); // version made by
        u16le(&mut archive, 45); // version needed
        u32le(&mut archive, 0); // disk number
        u32le(&mut archive, 0); // disk with central directory
        u64le(&mut archive, count);
        u64le(&mut archive, count);
        u64le(&mut archive, cd_size as u64);
        u64le(&mut archive, cd_offset as u64);
        // Zip64 end of central directory locator
        archive.extend_from_slice(b"PK\x06\x07");
        u32le(&mut archive, 0); // disk with the zip64 EOCD
        u64le(&mut archive, zip64_offset);
        u32le(&mut archive, 1); // total disks
    }

    // Classic end of central directory record
    archive.extend_from_slice(b"PK\x05\x06");
    u16le(&mut archive, 0); // disk number
    u16le(&mut archive, 0); // disk with central directory
    let classic_count = if spec.zip64.entries {
        0xFFFF
    } else {
        count as u16
    };
    u16le(&mut archive, classic_count);
    u16le(&mut archive, classic_count);
    u32le(
        &mut archive,
        if spec.zip64.cd_size { 0xFFFF_FFFF } else { cd_size },
    );
    u32le(
        &mut archive,
        if spec.zip64.cd_offset {
            0xFFFF_FFFF
        } else {
            cd_offset
        },
    );
    u16le(&mut archive, spec.comment.len() as u16);
    archive.extend_from_slice(&spec.comment);

    if spec.prefix.is_empty() {
        archive
    } else {
        let mut prefixed = spec.prefix.clone();
        prefixed.extend_from_slice(&archive);
        prefixed
    }
}

/// A manifest fixture with the given main-section lines.
pub fn manifest_bytes(lines: &[&str]) -> Vec<u8> {
    let mut out = String::from("Manifest-Version: 1.0\r\n");
    for line in lines {
        out.push_str(line);
        out.push_str("\r\n");
    }
    out.into_bytes()
}
