//! The entry index: every entry of an archive, parsed once from the
//! central directory and addressable by name in O(1).
//!
//! The index owns the central directory bytes and keeps three parallel
//! arrays in central-directory order plus a linear-probe hash table over
//! them. Names are never copied out at build time — they are referenced
//! by `(offset, length)` into the owned buffer, and full [`Entry`]
//! records are materialised lazily on lookup.

use std::borrow::Cow;

use chrono::NaiveDateTime;

use crate::arch::usize;
use crate::locate::CentralDirectoryLocation;
use crate::parse::CentralDirectoryVisitor;
use crate::result::*;
use crate::spec::{self, CentralDirectoryFileHeader, CompressionMethod};

/// Entry comments starting with this marker request extraction to a
/// temporary file instead of an in-place view.
pub const UNPACK_MARKER: &[u8] = b"UNPACK:";

/// A logical record for one entry, materialised from its central
/// directory file header.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Full name as stored, decoded to UTF-8. Directories end in `/`.
    pub name: String,
    pub method: CompressionMethod,
    /// Uncompressed size in bytes
    pub size: u64,
    /// Compressed size in bytes (equal to `size` for stored entries)
    pub compressed_size: u64,
    /// CRC-32 of the uncompressed bytes
    pub crc32: u32,
    /// Offset of the local file header, relative to the archive start
    pub local_header_offset: u64,
    pub last_modified: Option<NaiveDateTime>,
    pub extra: Vec<u8>,
    pub comment: Vec<u8>,
}

impl Entry {
    /// An entry is a directory iff its name ends in `/`.
    pub fn is_directory(&self) -> bool {
        self.name.ends_with('/')
    }

    /// True if the entry's comment marks it for extraction to disk.
    pub fn unpack_requested(&self) -> bool {
        self.comment.starts_with(UNPACK_MARKER)
    }
}

/// Entries are equal by full name, nothing else.
impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Entry {}

impl std::hash::Hash for Entry {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// Case-sensitive byte-wise hash over a name's UTF-8 bytes.
///
/// `h = h*31 + byte`, seeded at zero. CP437 names are decoded before
/// hashing so lookups by `&str` land on the same slot.
fn hash_bytes(seed: u32, bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(seed, |h, &b| h.wrapping_mul(31).wrapping_add(b as u32))
}

const EMPTY_SLOT: u32 = u32::MAX;
/// Table capacity keeps the load factor at or below this.
const MAX_LOAD_NUM: usize = 3;
const MAX_LOAD_DEN: usize = 4;

/// Immutable table of an archive's entries.
///
/// Freely shareable across threads once built. Iteration order is
/// central-directory order, which consumers rely on for deterministic
/// classpath output.
#[derive(Debug)]
pub struct EntryIndex {
    /// The raw central directory.
    cd: Box<[u8]>,
    /// Per-entry name hashes, central-directory order.
    hashes: Vec<u32>,
    /// Per-entry record offsets within `cd`.
    header_offsets: Vec<u32>,
    /// Per-entry `(offset, length)` of the raw name within `cd`.
    name_positions: Vec<(u32, u16)>,
    /// Linear-probe table of slots into the arrays above.
    table: Box<[u32]>,
}

impl EntryIndex {
    /// Number of entries.
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Looks up an entry by its full decoded name.
    pub fn get(&self, name: &str) -> Option<Entry> {
        self.get_with_prefix("", name)
    }

    /// Looks up `prefix + name` without concatenating the two.
    ///
    /// Nested directory views prepend their directory prefix to every
    /// lookup; doing it here keeps the miss path allocation-free.
    pub fn get_with_prefix(&self, prefix: &str, name: &str) -> Option<Entry> {
        let slot = self.find_slot(prefix, name)?;
        self.entry_at(slot).ok()
    }

    /// True if an entry with this full name exists. Never allocates.
    pub fn contains(&self, name: &str) -> bool {
        self.contains_with_prefix("", name)
    }

    pub fn contains_with_prefix(&self, prefix: &str, name: &str) -> bool {
        self.find_slot(prefix, name).is_some()
    }

    fn find_slot(&self, prefix: &str, name: &str) -> Option<usize> {
        if self.table.is_empty() {
            return None;
        }
        let hash = hash_bytes(hash_bytes(0, prefix.as_bytes()), name.as_bytes());
        let mask = self.table.len() - 1;
        let mut probe = hash as usize & mask;
        loop {
            match self.table[probe] {
                EMPTY_SLOT => return None,
                slot => {
                    let slot = slot as usize;
                    if self.hashes[slot] == hash && self.name_matches(slot, prefix, name) {
                        return Some(slot);
                    }
                }
            }
            probe = (probe + 1) & mask;
        }
    }

    fn raw_name(&self, slot: usize) -> &[u8] {
        let (pos, len) = self.name_positions[slot];
        &self.cd[pos as usize..pos as usize + len as usize]
    }

    fn name_matches(&self, slot: usize, prefix: &str, name: &str) -> bool {
        let raw = self.raw_name(slot);
        let (p, n) = (prefix.as_bytes(), name.as_bytes());
        if raw.len() == p.len() + n.len() && raw[..p.len()] == *p && raw[p.len()..] == *n {
            return true;
        }
        // Names that aren't byte-identical can still match once a CP437
        // name is decoded.
        match self.decoded_name(slot) {
            Ok(Cow::Owned(decoded)) => {
                decoded.strip_prefix(prefix).map_or(false, |rest| rest == name)
            }
            _ => false,
        }
    }

    fn decoded_name(&self, slot: usize) -> ZipResult<Cow<'_, str>> {
        let offset = self.header_offsets[slot] as usize;
        let mut record = &self.cd[offset..];
        let header = CentralDirectoryFileHeader::parse_and_consume(&mut record)?;
        spec::decode_name(header.name, header.flags)
    }

    /// Materialises the entry in the given central-directory slot.
    pub(crate) fn entry_at(&self, slot: usize) -> ZipResult<Entry> {
        let offset = self.header_offsets[slot] as usize;
        let mut record = &self.cd[offset..];
        let header = CentralDirectoryFileHeader::parse_and_consume(&mut record)?;
        let name = spec::decode_name(header.name, header.flags)?.into_owned();
        Ok(Entry {
            name,
            method: CompressionMethod::from_u16(header.compression_method),
            size: header.uncompressed_size,
            compressed_size: header.compressed_size,
            crc32: header.crc32,
            local_header_offset: header.header_offset,
            last_modified: spec::parse_msdos(header.last_modified_time, header.last_modified_date),
            extra: header.extra_field.to_vec(),
            comment: header.file_comment.to_vec(),
        })
    }

    /// Iterates entries in central-directory order.
    pub fn iter(&self) -> Entries<'_> {
        Entries {
            index: self,
            slot: 0,
        }
    }
}

/// Iterates an index's entries in central-directory order.
pub struct Entries<'a> {
    index: &'a EntryIndex,
    slot: usize,
}

impl Iterator for Entries<'_> {
    type Item = ZipResult<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.slot >= self.index.len() {
            return None;
        }
        let entry = self.index.entry_at(self.slot);
        self.slot += 1;
        Some(entry)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.index.len() - self.slot;
        (left, Some(left))
    }
}

/// Central-directory visitor that accumulates the index arrays.
///
/// `finish` takes ownership of the central directory bytes and lays out
/// the probe table, inserting in central-directory order so the table is
/// byte-for-byte reproducible for identical input.
#[derive(Debug, Default)]
pub struct EntryIndexBuilder {
    hashes: Vec<u32>,
    header_offsets: Vec<u32>,
    name_positions: Vec<(u32, u16)>,
}

impl EntryIndexBuilder {
    pub fn with_capacity(entries: usize) -> Self {
        Self {
            hashes: Vec::with_capacity(entries),
            header_offsets: Vec::with_capacity(entries),
            name_positions: Vec::with_capacity(entries),
        }
    }

    pub fn finish(self, cd: Box<[u8]>) -> EntryIndex {
        let n = self.hashes.len();
        let capacity = if n == 0 {
            0
        } else {
            (n * MAX_LOAD_DEN / MAX_LOAD_NUM + 1).next_power_of_two()
        };
        let mut table = vec![EMPTY_SLOT; capacity].into_boxed_slice();
        if capacity > 0 {
            let mask = capacity - 1;
            for (slot, &hash) in self.hashes.iter().enumerate() {
                let mut probe = hash as usize & mask;
                while table[probe] != EMPTY_SLOT {
                    probe = (probe + 1) & mask;
                }
                table[probe] = slot as u32;
            }
        }
        EntryIndex {
            cd,
            hashes: self.hashes,
            header_offsets: self.header_offsets,
            name_positions: self.name_positions,
            table,
        }
    }
}

impl CentralDirectoryVisitor for EntryIndexBuilder {
    fn visit_start(&mut self, location: &CentralDirectoryLocation, cd: &[u8]) {
        debug_assert_eq!(cd.len() as u64, location.central_directory_size);
        let entries = usize(location.entries).unwrap_or(0);
        self.hashes.reserve(entries);
        self.header_offsets.reserve(entries);
        self.name_positions.reserve(entries);
    }

    fn visit_file_header(
        &mut self,
        header: &CentralDirectoryFileHeader<'_>,
        record_offset: u64,
    ) -> ZipResult<()> {
        if header.disk_number != 0 {
            return Err(ZipError::Unsupported(format!(
                "No support for multi-disk archives: entry claims to be on disk {}",
                header.disk_number
            )));
        }
        if record_offset + spec::CENTRAL_DIRECTORY_HEADER_SIZE > u32::MAX as u64 {
            return Err(ZipError::MalformedSize(
                "Central directory too large to index",
            ));
        }
        let name = spec::decode_name(header.name, header.flags)?;
        self.hashes.push(hash_bytes(0, name.as_bytes()));
        self.header_offsets.push(record_offset as u32);
        self.name_positions.push((
            (record_offset + spec::CENTRAL_DIRECTORY_HEADER_SIZE) as u32,
            header.name.len() as u16,
        ));
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hashes_are_case_sensitive_and_slash_aware() {
        assert_ne!(hash_bytes(0, b"lib/A.jar"), hash_bytes(0, b"lib/a.jar"));
        assert_ne!(hash_bytes(0, b"classes"), hash_bytes(0, b"classes/"));
    }

    #[test]
    fn prefixed_hashing_matches_concatenation() {
        assert_eq!(
            hash_bytes(hash_bytes(0, b"BOOT-INF/classes/"), b"app/Main.class"),
            hash_bytes(0, b"BOOT-INF/classes/app/Main.class"),
        );
    }
}
