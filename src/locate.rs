//! Locating the End of central directory record and, from it, the real
//! start of the archive.
//!
//! A ZIP archive's metadata sits at the back of the file, behind an
//! optional comment of up to 64 KiB, and the archive itself may be
//! prepended with arbitrary bytes (a launch stub in an executable JAR, an
//! extractor in a self-extracting archive). Neither the comment nor the
//! prefix is length-delimited up front, so locating the archive means
//! scanning backwards for the EOCD and then reconciling the stored
//! (logical) offsets with where the structures actually are.

use log::*;
use memchr::memmem;

use crate::arch::usize;
use crate::data::RandomAccessData;
use crate::result::*;
use crate::spec;

/// How much more of the file tail to fetch each time the EOCD search
/// exhausts its buffer.
const READ_BLOCK_SIZE: u64 = 256;

/// Where the central directory lives, with every offset made absolute
/// within the data the locator was handed.
#[derive(Debug)]
pub struct CentralDirectoryLocation {
    /// Length of the executable prefix: the byte offset at which the
    /// logical archive begins. Zero for an unadorned ZIP file.
    pub archive_start: u64,
    /// Absolute offset of the first central directory record.
    pub central_directory_offset: u64,
    /// Size of the central directory in bytes.
    pub central_directory_size: u64,
    /// Number of entries in the central directory.
    pub entries: u64,
    /// Absolute offset of the classic End of central directory record.
    pub eocd_offset: u64,
    /// The archive comment bytes.
    pub comment: Vec<u8>,
    /// True if the totals came from a Zip64 end of central directory.
    pub zip64: bool,
}

/// Finds the End of central directory record (and its Zip64 variants) by
/// scanning backwards, then computes where the archive actually starts.
pub fn locate(data: &RandomAccessData) -> ZipResult<CentralDirectoryLocation> {
    let file_size = data.size();
    if file_size < spec::EOCDR_MIN_SIZE {
        return Err(ZipError::NotAZipArchive(
            "Too small for an End Of Central Directory Record",
        ));
    }

    let (eocd_size, block) = find_eocdr(data, file_size)?;
    let eocd_offset = file_size - eocd_size;
    let window_start = block.len() as u64 - eocd_size;
    let window = &block[usize(window_start)?..];
    let eocd = spec::EndOfCentralDirectory::parse(window)?;
    trace!("{:?} at offset {}", eocd, eocd_offset);
    let comment = window[spec::EOCDR_MIN_SIZE as usize..].to_vec();

    if eocd.disk_number != eocd.disk_with_central_directory {
        return Err(ZipError::Unsupported(format!(
            "No support for multi-disk archives: disk ({}) != disk with central directory ({})",
            eocd.disk_number, eocd.disk_with_central_directory
        )));
    }
    if eocd.entries != eocd.entries_on_this_disk {
        return Err(ZipError::Unsupported(format!(
            "No support for multi-disk archives: entries ({}) != entries on this disk ({})",
            eocd.entries, eocd.entries_on_this_disk
        )));
    }

    if let Some(location) = try_zip64(data, &eocd, eocd_offset, comment.clone())? {
        return Ok(location);
    }

    // Classic record. A prepended stub shifts every actual position by a
    // constant while the stored offsets stay logical, so:
    //
    //   archive_start = file_size - eocd_size - cd_size - cd_offset
    //                 = eocd_offset - cd_size - cd_offset
    let cd_size = eocd.central_directory_size as u64;
    let cd_offset = eocd.central_directory_offset as u64;
    let archive_start = eocd_offset
        .checked_sub(cd_size)
        .and_then(|o| o.checked_sub(cd_offset))
        .ok_or(ZipError::MalformedOffset(
            "Central directory size and offset overrun the front of the file",
        ))?;

    Ok(CentralDirectoryLocation {
        archive_start,
        central_directory_offset: archive_start + cd_offset,
        central_directory_size: cd_size,
        entries: eocd.entries as u64,
        eocd_offset,
        comment,
        zip64: false,
    })
}

/// Scans backwards for a valid EOCD, growing the tail buffer as needed.
///
/// Returns the total record size (22 + comment length) and the tail block
/// that contains it. Validity requires the signature AND the comment
/// length field to account for every byte behind the fixed part, which is
/// what rejects signature-look-alike bytes inside the comment.
fn find_eocdr(data: &RandomAccessData, file_size: u64) -> ZipResult<(u64, Vec<u8>)> {
    let max_size = spec::EOCDR_MAX_SIZE.min(file_size);
    let mut block_size = READ_BLOCK_SIZE.min(file_size);
    loop {
        let block = data.read(file_size - block_size, usize(block_size)?)?;
        let mut size = spec::EOCDR_MIN_SIZE;
        while size <= block_size {
            let window_start = usize(block_size - size)?;
            if spec::EndOfCentralDirectory::is_valid(&block[window_start..], size) {
                return Ok((size, block));
            }
            size += 1;
        }
        if block_size >= max_size {
            return Err(ZipError::NotAZipArchive(
                "Couldn't find End Of Central Directory Record",
            ));
        }
        block_size = (block_size + READ_BLOCK_SIZE).min(max_size);
    }
}

/// Probes for the Zip64 locator just before the classic EOCD and, when
/// it's really there, takes the authoritative totals from the Zip64 end
/// of central directory record.
fn try_zip64(
    data: &RandomAccessData,
    eocd: &spec::EndOfCentralDirectory,
    eocd_offset: u64,
    comment: Vec<u8>,
) -> ZipResult<Option<CentralDirectoryLocation>> {
    let Some(locator_offset) = eocd_offset.checked_sub(spec::ZIP64_EOCDR_LOCATOR_SIZE) else {
        return Ok(None);
    };
    let locator_bytes = data.read(locator_offset, spec::ZIP64_EOCDR_LOCATOR_SIZE as usize)?;
    let Some(locator) = spec::Zip64EndOfCentralDirectoryLocator::parse(&locator_bytes) else {
        return Ok(None);
    };
    if !eocd.has_zip64_sentinel() {
        // Twenty bytes of entry data that happen to start with PK\x06\x07.
        // A real Zip64 archive leaves at least one sentinel in the classic
        // record, so this "locator" can't be one.
        warn!("Ignoring a Zip64 locator signature with no sentinel in the classic EOCD");
        return Ok(None);
    }
    trace!("{:?}", locator);

    if locator.disks > 1 {
        return Err(ZipError::Unsupported(format!(
            "No support for multi-disk archives: Zip64 EOCDR locator reports {} disks",
            locator.disks
        )));
    }

    // The locator's stored offset is logical. With a prepended stub the
    // record actually sits `prefix` bytes later, somewhere in
    // [logical_offset, locator_offset). Searching that span for the magic
    // hands us the prefix length for free.
    let search_start = locator.zip64_eocdr_offset;
    if search_start >= locator_offset {
        return Err(ZipError::MalformedOffset(
            "Zip64 EOCDR offset points past its locator",
        ));
    }
    let search_space = data.read(search_start, usize(locator_offset - search_start)?)?;
    let found = memmem::find(&search_space, &spec::ZIP64_EOCDR_MAGIC).ok_or(
        ZipError::MalformedOffset("Couldn't find Zip64 End Of Central Directory Record"),
    )?;
    let archive_start = found as u64;
    let zip64 = spec::Zip64EndOfCentralDirectory::parse(&search_space[found..])?;
    trace!("{:?}", zip64);

    Ok(Some(CentralDirectoryLocation {
        archive_start,
        central_directory_offset: archive_start + zip64.central_directory_offset,
        central_directory_size: zip64.central_directory_size,
        entries: zip64.entries,
        eocd_offset,
        comment,
        zip64: true,
    }))
}
