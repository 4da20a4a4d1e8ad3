//! Error types and the related `Result<T>`

use thiserror::Error;

pub type ZipResult<T> = Result<T, ZipError>;

#[derive(Debug, Error)]
pub enum ZipError {
    /// An error from underlying I/O
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    /// No End of central directory record was found within the
    /// format-permitted range. The file is not a ZIP archive.
    #[error("Not a ZIP archive: {0}")]
    NotAZipArchive(&'static str),

    /// A field's bytes contradict another field.
    #[error("Malformed field: {0}")]
    MalformedField(&'static str),

    /// An offset points outside the archive or underflows.
    #[error("Malformed offset: {0}")]
    MalformedOffset(&'static str),

    /// A stored size contradicts the data that is actually present.
    #[error("Malformed size: {0}")]
    MalformedSize(&'static str),

    /// A read reached the end of the data before `wanted` bytes arrived.
    #[error("Truncated read at offset {offset}: wanted {wanted} bytes, {available} available")]
    Truncated {
        offset: u64,
        wanted: u64,
        available: u64,
    },

    /// An inner archive entry is stored with compression.
    /// Only uncompressed entries can be viewed in place as nested archives.
    #[error("Nested archive entry {0} is compressed; it must be stored")]
    NestedEntryCompressed(String),

    /// Decoding a UTF-8 name or comment failed
    #[error("Invalid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    /// The archive uses a feature this crate doesn't support
    /// (multi-disk, encryption, an exotic compression method).
    #[error("Unsupported archive: {0}")]
    Unsupported(String),

    /// A segment of a composite URL named an entry that doesn't exist.
    #[error("No entry named {0}")]
    EntryNotFound(String),

    /// A user-provided path (not one from an archive) was invalid.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// A composite `jar:` URL didn't match the expected grammar.
    #[error("Invalid composite URL: {0}")]
    InvalidUrl(String),

    /// Operation attempted on a closed archive or view.
    #[error("Archive is closed")]
    Closed,

    /// A cast from a 64-bit int to a usize failed, probably on a
    /// 32-bit system.
    #[error("Archive too large for address space")]
    InsufficientAddressSpace,
}
