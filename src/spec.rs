//! Code specific to the ZIP file format specification.
//!
//! The nitty gritty lives here; locating structures is the [`locate`]
//! module's job and higher-level archive semantics live in [`archive`].
//! Most comments quote the ZIP spec, [`APPNOTE.TXT`].
//!
//! [`locate`]: ../locate/index.html
//! [`archive`]: ../archive/index.html
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.6.TXT

use std::borrow::Cow;
use std::convert::TryInto;

use chrono::{NaiveDate, NaiveDateTime};
use codepage_437::*;

use crate::arch::usize;
use crate::result::*;

// Magic numbers denoting various sections of a ZIP archive

/// End of central directory magic number
pub const EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 5, 6];
/// Zip64 end of central directory magic number
pub const ZIP64_EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 6, 6];
/// Zip64 end of central directory locator magic number
pub const ZIP64_EOCDR_LOCATOR_MAGIC: [u8; 4] = [b'P', b'K', 6, 7];
/// Central directory file header magic number
pub const CENTRAL_DIRECTORY_MAGIC: [u8; 4] = [b'P', b'K', 1, 2];
/// Local file header magic number
pub const LOCAL_FILE_HEADER_MAGIC: [u8; 4] = [b'P', b'K', 3, 4];

/// Minimum size of the End of central directory record (empty comment)
pub const EOCDR_MIN_SIZE: u64 = 22;
/// Maximum size of the End of central directory record
/// (the comment length field is 16 bits)
pub const EOCDR_MAX_SIZE: u64 = EOCDR_MIN_SIZE + 0xFFFF;
/// Fixed size of the Zip64 end of central directory locator
pub const ZIP64_EOCDR_LOCATOR_SIZE: u64 = 20;
/// Fixed portion of a central directory file header
pub const CENTRAL_DIRECTORY_HEADER_SIZE: u64 = 46;
/// Fixed portion of a local file header
pub const LOCAL_FILE_HEADER_SIZE: u64 = 30;

/// Sentinel in a 16-bit field meaning "see the Zip64 record"
pub const U16_SENTINEL: u16 = 0xFFFF;
/// Sentinel in a 32-bit field meaning "see the Zip64 record or extra block"
pub const U32_SENTINEL: u32 = 0xFFFF_FFFF;
/// Extra-field tag of the Zip64 extended information block
pub const ZIP64_EXTRA_TAG: u16 = 0x0001;

/// The compression method used to store an entry
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompressionMethod {
    /// The entry is uncompressed. Inner archives must be stored this way.
    Stored,
    /// The entry is [DEFLATE](https://en.wikipedia.org/wiki/DEFLATE)d.
    Deflate,
    /// The entry is compressed with a yet-unsupported format.
    /// (The u16 indicates the internal format code.)
    Unsupported(u16),
}

impl CompressionMethod {
    pub fn from_u16(u: u16) -> Self {
        match u {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            v => CompressionMethod::Unsupported(v),
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unsupported(v) => v,
        }
    }
}

// Straight from the Rust docs:

/// Reads a little-endian u64 from the front of the provided slice, shrinking it.
fn read_u64(input: &mut &[u8]) -> u64 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u64>());
    *input = rest;
    u64::from_le_bytes(int_bytes.try_into().expect("less than eight bytes for u64"))
}

/// Reads a little-endian u32 from the front of the provided slice, shrinking it.
fn read_u32(input: &mut &[u8]) -> u32 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u32>());
    *input = rest;
    u32::from_le_bytes(int_bytes.try_into().expect("less than four bytes for u32"))
}

/// Reads a little-endian u16 from the front of the provided slice, shrinking it.
fn read_u16(input: &mut &[u8]) -> u16 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u16>());
    *input = rest;
    u16::from_le_bytes(int_bytes.try_into().expect("less than two bytes for u16"))
}

/// Data from the End of central directory record
///
/// Found at the back of the archive; provides offsets for finding the
/// central directory, along with disk bookkeeping that stopped being
/// relevant when archives stopped spanning multiple floppies.
#[derive(Debug)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_central_directory: u16,
    pub entries_on_this_disk: u16,
    pub entries: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
    pub comment_length: u16,
}

impl EndOfCentralDirectory {
    /// Tests whether `window` (at least 22 bytes) holds a valid EOCD for a
    /// record of `size` total bytes. Validity means the signature matches
    /// AND the comment length field accounts for every byte after the
    /// fixed part — this is what disambiguates a real EOCD from
    /// signature-look-alike bytes inside the archive comment.
    pub fn is_valid(window: &[u8], size: u64) -> bool {
        window.len() >= EOCDR_MIN_SIZE as usize
            && window[..4] == EOCDR_MAGIC
            && EOCDR_MIN_SIZE + u16::from_le_bytes([window[20], window[21]]) as u64 == size
    }

    pub fn parse(mut eocdr: &[u8]) -> ZipResult<Self> {
        // 4.3.16  End of central directory record:
        //
        // end of central dir signature    4 bytes  (0x06054b50)
        // number of this disk             2 bytes
        // number of the disk with the
        // start of the central directory  2 bytes
        // total number of entries in
        // the central dir on this disk    2 bytes
        // total number of entries in
        // the central dir                 2 bytes
        // size of the central directory   4 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        4 bytes
        // zipfile comment length          2 bytes
        if eocdr.len() < EOCDR_MIN_SIZE as usize {
            return Err(ZipError::Truncated {
                offset: 0,
                wanted: EOCDR_MIN_SIZE,
                available: eocdr.len() as u64,
            });
        }
        // The search already validated the magic.
        assert_eq!(eocdr[..4], EOCDR_MAGIC);
        eocdr = &eocdr[4..];
        let disk_number = read_u16(&mut eocdr);
        let disk_with_central_directory = read_u16(&mut eocdr);
        let entries_on_this_disk = read_u16(&mut eocdr);
        let entries = read_u16(&mut eocdr);
        let central_directory_size = read_u32(&mut eocdr);
        let central_directory_offset = read_u32(&mut eocdr);
        let comment_length = read_u16(&mut eocdr);

        Ok(Self {
            disk_number,
            disk_with_central_directory,
            entries_on_this_disk,
            entries,
            central_directory_size,
            central_directory_offset,
            comment_length,
        })
    }

    /// True if any of the classic 32-bit totals is a sentinel deferring to
    /// the Zip64 end of central directory record.
    pub fn has_zip64_sentinel(&self) -> bool {
        self.entries == U16_SENTINEL
            || self.central_directory_size == U32_SENTINEL
            || self.central_directory_offset == U32_SENTINEL
    }
}

/// Data from the Zip64 end of central directory locator
///
/// When present it immediately precedes the End of central directory
/// record and tells us where to find the Zip64 end of central directory.
#[derive(Debug)]
pub struct Zip64EndOfCentralDirectoryLocator {
    pub disk_with_central_directory: u32,
    pub zip64_eocdr_offset: u64,
    pub disks: u32,
}

impl Zip64EndOfCentralDirectoryLocator {
    pub fn parse(mut mapping: &[u8]) -> Option<Self> {
        // 4.3.15 Zip64 end of central directory locator
        //
        // zip64 end of central dir locator
        // signature                       4 bytes  (0x07064b50)
        // number of the disk with the
        // start of the zip64 end of
        // central directory               4 bytes
        // relative offset of the zip64
        // end of central directory record 8 bytes
        // total number of disks           4 bytes
        if mapping.len() < ZIP64_EOCDR_LOCATOR_SIZE as usize
            || mapping[..4] != ZIP64_EOCDR_LOCATOR_MAGIC
        {
            return None;
        }
        mapping = &mapping[4..];
        let disk_with_central_directory = read_u32(&mut mapping);
        let zip64_eocdr_offset = read_u64(&mut mapping);
        let disks = read_u32(&mut mapping);

        Some(Self {
            disk_with_central_directory,
            zip64_eocdr_offset,
            disks,
        })
    }
}

/// Data from the Zip64 end of central directory record
///
/// Carries the authoritative totals when the classic record's 32-bit
/// fields are sentinels.
#[derive(Debug)]
pub struct Zip64EndOfCentralDirectory {
    pub source_version: u16,
    pub minimum_extract_version: u16,
    pub disk_number: u32,
    pub disk_with_central_directory: u32,
    pub entries_on_this_disk: u64,
    pub entries: u64,
    pub central_directory_size: u64,
    pub central_directory_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    pub fn parse(mut eocdr: &[u8]) -> ZipResult<Self> {
        // 4.3.14  Zip64 end of central directory record
        //
        // zip64 end of central dir
        // signature                       4 bytes  (0x06064b50)
        // size of zip64 end of central
        // directory record                8 bytes
        // version made by                 2 bytes
        // version needed to extract       2 bytes
        // number of this disk             4 bytes
        // number of the disk with the
        // start of the central directory  4 bytes
        // total number of entries in the
        // central directory on this disk  8 bytes
        // total number of entries in the
        // central directory               8 bytes
        // size of the central directory   8 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        8 bytes
        // zip64 extensible data sector    (variable size)
        if eocdr.len() < Self::fixed_size_in_file() {
            return Err(ZipError::Truncated {
                offset: 0,
                wanted: Self::fixed_size_in_file() as u64,
                available: eocdr.len() as u64,
            });
        }
        // The search already validated the magic.
        assert_eq!(eocdr[..4], ZIP64_EOCDR_MAGIC);
        eocdr = &eocdr[4..];
        let eocdr_size = read_u64(&mut eocdr);
        let source_version = read_u16(&mut eocdr);
        let minimum_extract_version = read_u16(&mut eocdr);
        let disk_number = read_u32(&mut eocdr);
        let disk_with_central_directory = read_u32(&mut eocdr);
        let entries_on_this_disk = read_u64(&mut eocdr);
        let entries = read_u64(&mut eocdr);
        let central_directory_size = read_u64(&mut eocdr);
        let central_directory_offset = read_u64(&mut eocdr);

        // 4.3.14.1 The value stored into the "size of zip64 end of central
        // directory record" SHOULD be the size of the remaining
        // record and SHOULD NOT include the leading 12 bytes.
        let eocdr_size = usize(eocdr_size)?;
        if eocdr_size + 12 < Self::fixed_size_in_file() {
            return Err(ZipError::MalformedSize(
                "Zip64 End Of Central Directory Record too small for its fixed fields",
            ));
        }

        Ok(Self {
            source_version,
            minimum_extract_version,
            disk_number,
            disk_with_central_directory,
            entries_on_this_disk,
            entries,
            central_directory_size,
            central_directory_offset,
        })
    }

    fn fixed_size_in_file() -> usize {
        56
    }
}

/// Data from a central directory file header
///
/// One of these records exists for every file or folder stored in the
/// archive. The 32-bit size/offset fields have already been widened from
/// the Zip64 extended information extra block when they were sentinels.
#[derive(Debug)]
pub struct CentralDirectoryFileHeader<'a> {
    pub source_version: u16,
    pub minimum_extract_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub disk_number: u32,
    pub internal_file_attributes: u16,
    pub external_file_attributes: u32,
    pub header_offset: u64,
    pub name: &'a [u8],
    pub extra_field: &'a [u8],
    pub file_comment: &'a [u8],
}

impl<'a> CentralDirectoryFileHeader<'a> {
    pub fn parse_and_consume(entry: &mut &'a [u8]) -> ZipResult<Self> {
        // 4.3.12  Central directory structure:
        //
        //   central file header signature   4 bytes  (0x02014b50)
        //   version made by                 2 bytes
        //   version needed to extract       2 bytes
        //   general purpose bit flag        2 bytes
        //   compression method              2 bytes
        //   last mod file time              2 bytes
        //   last mod file date              2 bytes
        //   crc-32                          4 bytes
        //   compressed size                 4 bytes
        //   uncompressed size               4 bytes
        //   file name length                2 bytes
        //   extra field length              2 bytes
        //   file comment length             2 bytes
        //   disk number start               2 bytes
        //   internal file attributes        2 bytes
        //   external file attributes        4 bytes
        //   relative offset of local header 4 bytes
        //
        //   file name (variable size)
        //   extra field (variable size)
        //   file comment (variable size)
        if entry.len() < CENTRAL_DIRECTORY_HEADER_SIZE as usize {
            return Err(ZipError::Truncated {
                offset: 0,
                wanted: CENTRAL_DIRECTORY_HEADER_SIZE,
                available: entry.len() as u64,
            });
        }
        if entry[..4] != CENTRAL_DIRECTORY_MAGIC {
            return Err(ZipError::MalformedField("Invalid central directory entry"));
        }
        *entry = &entry[4..];
        let source_version = read_u16(entry);
        let minimum_extract_version = read_u16(entry);
        let flags = read_u16(entry);
        let compression_method = read_u16(entry);
        let last_modified_time = read_u16(entry);
        let last_modified_date = read_u16(entry);
        let crc32 = read_u32(entry);
        let compressed_size_32 = read_u32(entry);
        let uncompressed_size_32 = read_u32(entry);
        let name_length = usize(read_u16(entry))?;
        let extra_field_length = usize(read_u16(entry))?;
        let file_comment_length = usize(read_u16(entry))?;
        let disk_number_16 = read_u16(entry);
        let internal_file_attributes = read_u16(entry);
        let external_file_attributes = read_u32(entry);
        let header_offset_32 = read_u32(entry);
        if entry.len() < name_length + extra_field_length + file_comment_length {
            return Err(ZipError::MalformedSize(
                "Central directory entry overruns the central directory",
            ));
        }
        let (name, remaining) = entry.split_at(name_length);
        let (extra_field, remaining) = remaining.split_at(extra_field_length);
        let (file_comment, remaining) = remaining.split_at(file_comment_length);
        *entry = remaining;

        let mut header = Self {
            source_version,
            minimum_extract_version,
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size: compressed_size_32 as u64,
            uncompressed_size: uncompressed_size_32 as u64,
            disk_number: disk_number_16 as u32,
            internal_file_attributes,
            external_file_attributes,
            header_offset: header_offset_32 as u64,
            name,
            extra_field,
            file_comment,
        };
        header.apply_zip64_extra(
            uncompressed_size_32,
            compressed_size_32,
            header_offset_32,
            disk_number_16,
        )?;
        Ok(header)
    }

    /// Widens sentinel fields from the Zip64 extended information block.
    ///
    /// 4.5.3: the block holds one 8-byte value per sentinel field, in the
    /// fixed order uncompressed size, compressed size, local header
    /// offset, then a 4-byte disk number. Non-sentinel fields are absent.
    fn apply_zip64_extra(
        &mut self,
        uncompressed_32: u32,
        compressed_32: u32,
        offset_32: u32,
        disk_16: u16,
    ) -> ZipResult<()> {
        let mut extra = self.extra_field;
        while extra.len() >= 4 {
            let tag = read_u16(&mut extra);
            let block_len = usize(read_u16(&mut extra))?;
            if extra.len() < block_len {
                return Err(ZipError::MalformedSize(
                    "Extra field block overruns the extra field",
                ));
            }
            if tag != ZIP64_EXTRA_TAG {
                extra = &extra[block_len..];
                continue;
            }
            let mut block = &extra[..block_len];
            if uncompressed_32 == U32_SENTINEL {
                if block.len() < 8 {
                    return Err(ZipError::MalformedField("Zip64 extra missing size"));
                }
                self.uncompressed_size = read_u64(&mut block);
            }
            if compressed_32 == U32_SENTINEL {
                if block.len() < 8 {
                    return Err(ZipError::MalformedField(
                        "Zip64 extra missing compressed size",
                    ));
                }
                self.compressed_size = read_u64(&mut block);
            }
            if offset_32 == U32_SENTINEL {
                if block.len() < 8 {
                    return Err(ZipError::MalformedField("Zip64 extra missing header offset"));
                }
                self.header_offset = read_u64(&mut block);
            }
            if disk_16 == U16_SENTINEL {
                if block.len() < 4 {
                    return Err(ZipError::MalformedField("Zip64 extra missing disk number"));
                }
                self.disk_number = read_u32(&mut block);
            }
            return Ok(());
        }
        Ok(())
    }

    /// An entry is a directory iff its name ends in `/`.
    pub fn is_directory(&self) -> bool {
        self.name.last() == Some(&b'/')
    }
}

/// Extracts the "is this text UTF-8?" bit from the 16-bit flags field.
///
/// If false, text is assumed to be CP437.
pub fn is_utf8(flags: u16) -> bool {
    // Bit 11: Language encoding flag (EFS).  If this bit is set,
    //         the filename and comment fields for this file
    //         MUST be encoded using UTF-8. (see APPENDIX D)
    flags & (1 << 11) != 0
}

/// Extracts the "sizes and CRC live in a trailing data descriptor" bit.
pub fn has_data_descriptor(flags: u16) -> bool {
    // Bit 3: the fields crc-32, compressed size and uncompressed size
    //        are set to zero in the local header
    flags & (1 << 3) != 0
}

/// Decodes an entry name per its flags: UTF-8 when bit 11 is set,
/// CP437 otherwise.
pub fn decode_name<'a>(raw: &'a [u8], flags: u16) -> ZipResult<Cow<'a, str>> {
    if is_utf8(flags) {
        Ok(Cow::Borrowed(std::str::from_utf8(raw).map_err(ZipError::Encoding)?))
    } else {
        Ok(Cow::borrow_from_cp437(raw, &CP437_CONTROL))
    }
}

/// Converts an MS-DOS date/time pair to a `NaiveDateTime`.
///
/// Zeroed or otherwise out-of-range fields (common in generated archives)
/// yield `None` rather than a panic.
pub fn parse_msdos(time: u16, date: u16) -> Option<NaiveDateTime> {
    let seconds = (0b0000_0000_0001_1111 & time) as u32 * 2; // MSDOS uses 2-second precision
    let minutes = (0b0000_0111_1110_0000 & time) as u32 >> 5;
    let hours = (0b1111_1000_0000_0000 & time) as u32 >> 11;

    let days = (0b0000_0000_0001_1111 & date) as u32;
    let months = (0b0000_0001_1110_0000 & date) as u32 >> 5;
    // MSDOS uses years since 1980; always interpreted as a positive value
    let years = ((0b1111_1110_0000_0000 & date) >> 9) as i32 + 1980;

    NaiveDate::from_ymd_opt(years, months, days)
        .and_then(|d| d.and_hms_opt(hours, minutes, seconds))
}

/// Data from a local file header
///
/// Each entry's payload bytes are preceded by this header. Its name and
/// extra lengths are local to it — they may differ from the central
/// directory's values, and *they* govern where the payload starts.
#[derive(Debug)]
pub struct LocalFileHeader {
    pub minimum_extract_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub name_length: u16,
    pub extra_field_length: u16,
}

impl LocalFileHeader {
    /// Parses the 30-byte fixed portion of a local file header.
    ///
    /// The name and extra field themselves are not needed to find the
    /// payload, only their lengths, so callers can read just 30 bytes.
    pub fn parse(mut header: &[u8]) -> ZipResult<Self> {
        // 4.3.7  Local file header:
        //
        // local file header signature     4 bytes  (0x04034b50)
        // version needed to extract       2 bytes
        // general purpose bit flag        2 bytes
        // compression method              2 bytes
        // last mod file time              2 bytes
        // last mod file date              2 bytes
        // crc-32                          4 bytes
        // compressed size                 4 bytes
        // uncompressed size               4 bytes
        // file name length                2 bytes
        // extra field length              2 bytes
        //
        // file name (variable size)
        // extra field (variable size)
        if header.len() < LOCAL_FILE_HEADER_SIZE as usize {
            return Err(ZipError::Truncated {
                offset: 0,
                wanted: LOCAL_FILE_HEADER_SIZE,
                available: header.len() as u64,
            });
        }
        if header[..4] != LOCAL_FILE_HEADER_MAGIC {
            return Err(ZipError::MalformedOffset(
                "Local header offset doesn't point at a local file header",
            ));
        }
        header = &header[4..];
        let minimum_extract_version = read_u16(&mut header);
        let flags = read_u16(&mut header);
        let compression_method = read_u16(&mut header);
        let last_modified_time = read_u16(&mut header);
        let last_modified_date = read_u16(&mut header);
        let crc32 = read_u32(&mut header);
        let compressed_size = read_u32(&mut header);
        let uncompressed_size = read_u32(&mut header);
        let name_length = read_u16(&mut header);
        let extra_field_length = read_u16(&mut header);

        Ok(Self {
            minimum_extract_version,
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size,
            uncompressed_size,
            name_length,
            extra_field_length,
        })
    }

    /// Bytes between the header offset and the first payload byte.
    pub fn payload_delta(&self) -> u64 {
        LOCAL_FILE_HEADER_SIZE + self.name_length as u64 + self.extra_field_length as u64
    }
}
