//! The composite `jar:` URL scheme.
//!
//! A composite URL chains archive-into-archive descents with the `!/`
//! separator:
//!
//! ```text
//! jar:file:/tmp/app.jar!/lib/foo.jar!/com/x/Y.class
//! ```
//!
//! Segments may contain `/` but never `!/`. A trailing `!/` (an empty
//! final segment) denotes the archive itself rather than an entry in it.
//!
//! The grammar lives here as a pure parser/emitter pair; nothing in this
//! module touches global state except [`register`], the idempotent
//! process-wide registration a launcher performs once before handing
//! URLs to anything else.

use std::io::Read;
use std::sync::OnceLock;

use camino::{Utf8Path, Utf8PathBuf};

use crate::archive::Archive;
use crate::result::*;

/// The descent separator.
pub const SEPARATOR: &str = "!/";

const JAR_SCHEME: &str = "jar:";
const FILE_SCHEME: &str = "file:";

/// A parsed composite URL: the outer file plus the descent segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeUrl {
    pub root: Utf8PathBuf,
    /// Descent segments. An empty string is only legal as the final
    /// segment, where it means "the archive itself".
    pub segments: Vec<String>,
}

/// Renders a composite URL from a root file and descent segments.
pub fn compose<S: AsRef<str>>(root: &Utf8Path, segments: &[S]) -> String {
    let mut out = String::with_capacity(
        JAR_SCHEME.len()
            + FILE_SCHEME.len()
            + root.as_str().len()
            + segments
                .iter()
                .map(|s| s.as_ref().len() + SEPARATOR.len())
                .sum::<usize>(),
    );
    out.push_str(JAR_SCHEME);
    out.push_str(FILE_SCHEME);
    out.push_str(root.as_str());
    for segment in segments {
        out.push_str(SEPARATOR);
        out.push_str(segment.as_ref());
    }
    out
}

/// Parses a composite URL back into its root and segments.
///
/// `parse(&compose(root, segments))` round-trips for every valid pair.
/// `file:////` (a UNC-flavoured over-slashed authority) is canonicalised
/// to `file://`.
pub fn parse(url: &str) -> ZipResult<CompositeUrl> {
    let rest = url
        .strip_prefix(JAR_SCHEME)
        .ok_or_else(|| ZipError::InvalidUrl(format!("{url} does not start with {JAR_SCHEME}")))?;
    let rest = rest
        .strip_prefix(FILE_SCHEME)
        .ok_or_else(|| ZipError::InvalidUrl(format!("{url} is not backed by a {FILE_SCHEME} URL")))?;
    // UNC-path compatibility: file:////server/share -> file://server/share
    let rest = if let Some(over_slashed) = rest.strip_prefix("////") {
        format!("//{over_slashed}")
    } else {
        rest.to_string()
    };

    let mut pieces = rest.split(SEPARATOR);
    let root = match pieces.next() {
        Some(root) if !root.is_empty() => Utf8PathBuf::from(root),
        _ => return Err(ZipError::InvalidUrl(format!("{url} has no root file"))),
    };
    let segments: Vec<String> = pieces.map(str::to_string).collect();
    for (position, segment) in segments.iter().enumerate() {
        if segment.is_empty() && position + 1 != segments.len() {
            return Err(ZipError::InvalidUrl(format!(
                "{url} has an empty segment before the end"
            )));
        }
    }
    Ok(CompositeUrl { root, segments })
}

/// What opening a composite URL yields: a whole archive view (URLs ending
/// in `!/`) or a single entry's byte stream.
pub enum Resource {
    Archive(Archive),
    Stream(Box<dyn Read + Send>),
}

/// Opens a composite URL, walking its segments left to right.
///
/// Non-terminal segments descend: a directory entry becomes a filtered
/// view, a stored file entry becomes a nested archive. The final segment
/// opens an entry stream, or hands back the archive itself when empty.
pub fn open(url: &str) -> ZipResult<Resource> {
    let parsed = parse(url)?;
    let mut archive = Archive::open(parsed.root.as_std_path())?;
    let count = parsed.segments.len();
    for (position, segment) in parsed.segments.iter().enumerate() {
        let terminal = position + 1 == count;
        if segment.is_empty() {
            // Only legal in final position, per parse().
            return Ok(Resource::Archive(archive));
        }
        let entry = lookup_segment(&archive, segment)?;
        if terminal && !entry.is_directory() {
            return Ok(Resource::Stream(archive.input_stream(&entry)?));
        }
        archive = archive.nested_archive(&entry)?;
    }
    Ok(Resource::Archive(archive))
}

/// Finds the entry a segment names, trying the directory spelling too.
fn lookup_segment(archive: &Archive, segment: &str) -> ZipResult<crate::index::Entry> {
    if let Some(entry) = archive.get(segment)? {
        return Ok(entry);
    }
    if !segment.ends_with('/') {
        if let Some(entry) = archive.get(&format!("{segment}/"))? {
            return Ok(entry);
        }
    }
    Err(ZipError::EntryNotFound(segment.to_string()))
}

static REGISTRATION: OnceLock<()> = OnceLock::new();

/// Registers the `jar:` handler with the process.
///
/// Idempotent: the first call installs, every later call is a no-op.
/// Returns true when this call performed the installation.
pub fn register() -> bool {
    REGISTRATION.set(()).is_ok()
}

pub fn is_registered() -> bool {
    REGISTRATION.get().is_some()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn composes_the_documented_shape() {
        let url = compose(
            Utf8Path::new("/tmp/app.jar"),
            &["lib/foo.jar", "com/x/Y.class"],
        );
        assert_eq!(url, "jar:file:/tmp/app.jar!/lib/foo.jar!/com/x/Y.class");
    }

    #[test]
    fn round_trips() {
        let cases: &[(&str, &[&str])] = &[
            ("/tmp/app.jar", &[]),
            ("/tmp/app.jar", &["lib/foo.jar"]),
            ("/tmp/app.jar", &["lib/foo.jar", "m/r.txt"]),
            ("/tmp/app.jar", &["lib/foo.jar", ""]),
            ("/tmp/app.jar", &["classes", ""]),
        ];
        for (root, segments) in cases {
            let root = Utf8Path::new(root);
            let parsed = parse(&compose(root, segments)).unwrap();
            assert_eq!(parsed.root, root);
            assert_eq!(parsed.segments, *segments);
        }
    }

    #[test]
    fn trailing_separator_is_the_archive_itself() {
        let parsed = parse("jar:file:/a.jar!/lib/x.jar!/").unwrap();
        assert_eq!(parsed.segments, vec!["lib/x.jar".to_string(), String::new()]);
    }

    #[test]
    fn over_slashed_file_urls_are_canonicalised() {
        let parsed = parse("jar:file:////server/share/app.jar!/e.txt").unwrap();
        assert_eq!(parsed.root, Utf8Path::new("//server/share/app.jar"));
    }

    #[test]
    fn rejects_foreign_schemes_and_interior_empty_segments() {
        assert!(matches!(
            parse("http://example.com/a.jar"),
            Err(ZipError::InvalidUrl(_))
        ));
        assert!(matches!(
            parse("jar:file:/a.jar!/!/x"),
            Err(ZipError::InvalidUrl(_))
        ));
    }

    #[test]
    fn segments_may_contain_plain_slashes() {
        let parsed = parse("jar:file:/a.jar!/deep/path/to/entry.txt").unwrap();
        assert_eq!(parsed.segments, vec!["deep/path/to/entry.txt".to_string()]);
    }
}
