//! zipnest reads self-contained executable ZIP/JAR archives whose
//! dependencies ride along as *uncompressed* inner archives, and resolves
//! class/resource lookups across them — all without extracting anything.
//!
//! ```no_run
//! # use zipnest::*;
//! let outer = Archive::open("app.jar")?;
//!
//! // Each inner archive is a view of the outer file's bytes.
//! // Which entries join the classpath is the caller's policy:
//! let search = |e: &Entry| !e.name.starts_with("META-INF/");
//! let include = |e: &Entry| e.name.ends_with(".jar") && e.name.starts_with("lib/");
//! let resolver = ClassPathResolver::from_nested(&outer, &search, &include)?;
//!
//! // Lookups walk the classpath in order; the winner is a composite URL
//! // that addresses the entry through every level of nesting:
//! if let Some(url) = resolver.find_resource("com/x/Y.class")? {
//!     assert!(url.starts_with("jar:file:"));    // ...app.jar!/lib/foo.jar!/com/x/Y.class
//! }
//! # Ok::<(), zipnest::ZipError>(())
//! ```
//!
//! ZIP makes this cheap in a way few archive formats do: a central
//! directory at the back of the file indexes every entry, so an archive
//! can be mapped without reading its payloads, and an *uncompressed*
//! inner archive is itself a well-formed archive occupying a contiguous
//! sub-range of the outer file. zipnest leans on both properties: the
//! outer file is opened once, every nested archive is a
//! [`RandomAccessData`] view into it, and entry bytes are streamed on
//! demand from whatever depth they live at.
//!
//! The format contract this crate enforces rather than works around:
//! inner archives must be STORED. A deflated inner archive can't be
//! viewed in place, so opening one as a nested archive fails with
//! [`ZipError::NestedEntryCompressed`] — the entry itself stays readable
//! as an ordinary stream.

pub mod archive;
pub mod data;
pub mod index;
pub mod locate;
pub mod manifest;
pub mod parse;
pub mod resolver;
pub mod result;
pub mod spec;
pub mod url;

pub use archive::{Archive, ArchiveKind};
pub use data::RandomAccessData;
pub use index::{Entry, EntryIndex};
pub use manifest::Manifest;
pub use resolver::{ClassPathResolver, PackageInfo};
pub use result::{ZipError, ZipResult};
pub use spec::CompressionMethod;

mod arch;
mod crc_reader;
