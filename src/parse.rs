//! Visitor-driven walk of the central directory.
//!
//! The central directory is parsed exactly once per archive; everything
//! that wants a look at the records during that pass (the entry index,
//! the signed-archive detector) registers a visitor rather than
//! re-scanning the buffer.

use log::*;

use crate::locate::CentralDirectoryLocation;
use crate::result::*;
use crate::spec::CentralDirectoryFileHeader;

/// Callbacks invoked while walking the central directory.
///
/// Visitors are invoked in registration order: `visit_start` once, then
/// `visit_file_header` per record with the record's offset within the
/// central directory, then `visit_end` once.
pub trait CentralDirectoryVisitor {
    fn visit_start(&mut self, _location: &CentralDirectoryLocation, _cd: &[u8]) {}

    fn visit_file_header(
        &mut self,
        header: &CentralDirectoryFileHeader<'_>,
        record_offset: u64,
    ) -> ZipResult<()>;

    fn visit_end(&mut self) -> ZipResult<()> {
        Ok(())
    }
}

/// Walks `location.entries` file-header records in `cd`, feeding each to
/// every visitor.
///
/// Each record is `46 + name + extra + comment` bytes; anything left over
/// after the last record (a digital-signature block, typically) is
/// ignored.
pub fn parse_central_directory(
    location: &CentralDirectoryLocation,
    cd: &[u8],
    visitors: &mut [&mut dyn CentralDirectoryVisitor],
) -> ZipResult<()> {
    for visitor in visitors.iter_mut() {
        visitor.visit_start(location, cd);
    }

    let mut remaining = cd;
    let mut record_offset = 0u64;
    for _ in 0..location.entries {
        let before = remaining.len();
        let header = CentralDirectoryFileHeader::parse_and_consume(&mut remaining)?;
        trace!("{:?}", header);
        for visitor in visitors.iter_mut() {
            visitor.visit_file_header(&header, record_offset)?;
        }
        record_offset += (before - remaining.len()) as u64;
    }

    for visitor in visitors.iter_mut() {
        visitor.visit_end()?;
    }
    Ok(())
}

/// Marks an archive signed iff any entry is a `META-INF/` signature file.
///
/// Signed state is informational; this crate never verifies signatures.
#[derive(Debug, Default)]
pub struct SignedArchiveVisitor {
    pub signed: bool,
}

impl CentralDirectoryVisitor for SignedArchiveVisitor {
    fn visit_file_header(
        &mut self,
        header: &CentralDirectoryFileHeader<'_>,
        _record_offset: u64,
    ) -> ZipResult<()> {
        self.signed |= header.name.starts_with(b"META-INF/") && header.name.ends_with(b".SF");
        Ok(())
    }
}
