//! Archives and the views into them.
//!
//! An [`Archive`] is a live view of a ZIP archive rooted somewhere in a
//! [`RandomAccessData`]: the outer file itself, a stored entry of an
//! enclosing archive, a directory entry filtered out of its parent's
//! index, or an exploded directory tree on disk. Nested views share the
//! outer file's handle; nothing is ever extracted to read it.
//!
//! The archive graph is a strict tree. Children never hold a reference
//! back to their parent — anything they need from it (the manifest
//! supplier, the shared index) is handed over at construction.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::DeflateDecoder;
use log::*;
use tempfile::TempDir;

use crate::arch::usize;
use crate::crc_reader::Crc32Reader;
use crate::data::RandomAccessData;
use crate::index::{Entry, EntryIndex, EntryIndexBuilder};
use crate::locate;
use crate::manifest::{Manifest, MANIFEST_NAME};
use crate::parse::{parse_central_directory, SignedArchiveVisitor};
use crate::result::*;
use crate::spec::{self, CompressionMethod};
use crate::url;

/// Produces the manifest a child view should inherit when it has none of
/// its own. Passed down at construction so children need no back-reference.
pub type ManifestSupplier = Arc<dyn Fn() -> ZipResult<Option<Arc<Manifest>>> + Send + Sync>;

/// Caller-supplied predicate selecting entries, e.g. a layout convention
/// like "everything under `lib/`".
pub type EntryFilter<'a> = &'a (dyn Fn(&Entry) -> bool + Sync);

/// How an archive view is rooted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    /// The outer file itself.
    Direct,
    /// A stored entry of an enclosing archive, viewed in place.
    NestedJar,
    /// A directory entry: a filtered view of the parent's own index.
    NestedDirectory,
    /// A directory tree on disk.
    ExplodedDirectory,
}

/// A readable archive view. See the module docs for the four kinds.
pub struct Archive {
    kind: ArchiveKind,
    /// Path segments from the root archive down to this view.
    segments: Vec<String>,
    closed: AtomicBool,
    backing: Backing,
    manifest_cache: Mutex<Weak<Manifest>>,
    parent_manifest: Option<ManifestSupplier>,
}

#[derive(Clone)]
enum Backing {
    Zip(ZipView),
    Dir(DirView),
}

#[derive(Clone)]
struct ZipView {
    /// The whole outer file.
    root: RandomAccessData,
    /// The sub-range of `root` holding this archive.
    data: RandomAccessData,
    index: Arc<EntryIndex>,
    /// Directory prefix for nested-directory views, `""` otherwise.
    entry_prefix: String,
    signed: bool,
}

#[derive(Clone)]
struct DirView {
    path: Utf8PathBuf,
}

impl Archive {
    /// Opens the archive in the given file.
    ///
    /// The file may carry an executable prefix; the locator finds the
    /// real archive start.
    pub fn open<P: AsRef<Path>>(path: P) -> ZipResult<Self> {
        let root = RandomAccessData::open(path)?;
        Self::direct(root)
    }

    /// Reads an archive from an in-memory buffer.
    pub fn from_bytes<B: Into<Box<[u8]>>>(bytes: B) -> ZipResult<Self> {
        Self::direct(RandomAccessData::from_bytes(bytes))
    }

    /// Treats a directory tree on disk as an exploded archive.
    pub fn explode<P: AsRef<Path>>(dir: P) -> ZipResult<Self> {
        let dir = dir.as_ref();
        let path = Utf8Path::from_path(dir)
            .ok_or_else(|| ZipError::InvalidPath(dir.display().to_string()))?;
        if !path.as_std_path().is_dir() {
            return Err(ZipError::InvalidPath(format!("{path} is not a directory")));
        }
        Ok(Self {
            kind: ArchiveKind::ExplodedDirectory,
            segments: Vec::new(),
            closed: AtomicBool::new(false),
            backing: Backing::Dir(DirView {
                path: path.to_path_buf(),
            }),
            manifest_cache: Mutex::new(Weak::new()),
            parent_manifest: None,
        })
    }

    fn direct(root: RandomAccessData) -> ZipResult<Self> {
        let view = load_view(&root, &root)?;
        debug!(
            "Opened archive with {} entries{}",
            view.index.len(),
            if view.signed { " (signed)" } else { "" }
        );
        Ok(Self {
            kind: ArchiveKind::Direct,
            segments: Vec::new(),
            closed: AtomicBool::new(false),
            backing: Backing::Zip(view),
            manifest_cache: Mutex::new(Weak::new()),
            parent_manifest: None,
        })
    }

    pub fn kind(&self) -> ArchiveKind {
        self.kind
    }

    /// True if the archive carries a `META-INF/*.SF` signature file.
    /// Informational only; nothing is verified.
    pub fn is_signed(&self) -> bool {
        match &self.backing {
            Backing::Zip(v) => v.signed,
            Backing::Dir(_) => false,
        }
    }

    /// `""` for the outer archive, `!/a.jar!/b.jar` for views beneath it.
    pub fn path_from_root(&self) -> String {
        self.segments
            .iter()
            .map(|s| format!("{}{}", url::SEPARATOR, s))
            .collect()
    }

    /// The filesystem path this view is ultimately rooted in, if any.
    pub fn root_file_path(&self) -> Option<&Utf8Path> {
        match &self.backing {
            Backing::Zip(v) => v.root.file_path(),
            Backing::Dir(v) => Some(&v.path),
        }
    }

    /// The composite URL of this archive view, ending in `!/` (or a
    /// `file:` URL ending in `/` for exploded directories).
    pub fn url(&self) -> ZipResult<String> {
        match &self.backing {
            Backing::Zip(v) => {
                let root = v.root.file_path().ok_or_else(|| {
                    ZipError::InvalidUrl("in-memory archives have no URL".to_string())
                })?;
                let mut segments: Vec<&str> = self.segments.iter().map(String::as_str).collect();
                segments.push("");
                Ok(url::compose(root, &segments))
            }
            Backing::Dir(v) => Ok(format!("file:{}/", v.path)),
        }
    }

    fn check_open(&self) -> ZipResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ZipError::Closed);
        }
        if let Backing::Zip(v) = &self.backing {
            if v.data.is_closed() {
                return Err(ZipError::Closed);
            }
        }
        Ok(())
    }

    /// All entries, in central-directory order (sorted walk for exploded
    /// directories). Nested-directory views see their prefix stripped.
    pub fn entries(&self) -> ZipResult<Vec<Entry>> {
        self.check_open()?;
        match &self.backing {
            Backing::Zip(v) => {
                let mut out = Vec::with_capacity(v.index.len());
                for entry in v.index.iter() {
                    let entry = entry?;
                    if v.entry_prefix.is_empty() {
                        out.push(entry);
                    } else if let Some(stripped) = entry.name.strip_prefix(&v.entry_prefix) {
                        if !stripped.is_empty() {
                            out.push(Entry {
                                name: stripped.to_string(),
                                ..entry
                            });
                        }
                    }
                }
                Ok(out)
            }
            Backing::Dir(v) => {
                let mut out = Vec::new();
                walk_dir(&v.path, &v.path, &mut out)?;
                Ok(out)
            }
        }
    }

    /// Looks up an entry by name. Absence is `Ok(None)`, not an error.
    pub fn get(&self, name: &str) -> ZipResult<Option<Entry>> {
        self.check_open()?;
        match &self.backing {
            Backing::Zip(v) => Ok(v.index.get_with_prefix(&v.entry_prefix, name)),
            Backing::Dir(v) => {
                let path = safe_join(&v.path, name.trim_end_matches('/'))?;
                match fs::metadata(path.as_std_path()) {
                    Ok(meta) if meta.is_dir() => {
                        let name = if name.ends_with('/') {
                            name.to_string()
                        } else {
                            format!("{name}/")
                        };
                        Ok(Some(dir_entry(name, Some(&meta))))
                    }
                    Ok(meta) if !name.ends_with('/') => Ok(Some(file_entry(name, &meta))),
                    _ => Ok(None),
                }
            }
        }
    }

    /// True if an entry with this name exists. The miss path is
    /// allocation-free — resolvers probe this constantly.
    pub fn contains(&self, name: &str) -> ZipResult<bool> {
        self.check_open()?;
        match &self.backing {
            Backing::Zip(v) => Ok(v.index.contains_with_prefix(&v.entry_prefix, name)),
            Backing::Dir(v) => {
                let path = safe_join(&v.path, name)?;
                Ok(path.as_std_path().exists())
            }
        }
    }

    /// Streams an entry's bytes: stored entries come straight from the
    /// underlying range, deflated ones through an inflater, both behind a
    /// CRC check. Dropping the reader does not close the archive.
    pub fn input_stream(&self, entry: &Entry) -> ZipResult<Box<dyn Read + Send>> {
        self.check_open()?;
        match &self.backing {
            Backing::Zip(v) => zip_entry_reader(v, entry),
            Backing::Dir(v) => {
                let path = safe_join(&v.path, &entry.name)?;
                Ok(Box::new(File::open(path.as_std_path())?))
            }
        }
    }

    /// Convenience: `get` + `input_stream`. Absence is `Ok(None)`.
    pub fn input_stream_named(&self, name: &str) -> ZipResult<Option<Box<dyn Read + Send>>> {
        match self.get(name)? {
            Some(entry) => Ok(Some(self.input_stream(&entry)?)),
            None => Ok(None),
        }
    }

    /// Reads an entry fully into memory.
    pub fn read_entry(&self, entry: &Entry) -> ZipResult<Vec<u8>> {
        let mut out = Vec::with_capacity(usize(entry.size)?);
        self.input_stream(entry)?.read_to_end(&mut out)?;
        Ok(out)
    }

    /// The archive's manifest: its own `META-INF/MANIFEST.MF` if present,
    /// else whatever the parent supplier provides. Nested-directory views
    /// always inherit (their "own" manifest belongs to the enclosing
    /// archive). The result is held weakly; rebuilding after collection
    /// yields an equal manifest.
    pub fn manifest(&self) -> ZipResult<Option<Arc<Manifest>>> {
        self.check_open()?;
        let mut cache = self
            .manifest_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = cache.upgrade() {
            return Ok(Some(cached));
        }
        let built = compute_manifest(&self.backing, self.kind, &self.parent_manifest)?;
        if let Some(manifest) = &built {
            *cache = Arc::downgrade(manifest);
        }
        Ok(built)
    }

    fn manifest_supplier(&self) -> ManifestSupplier {
        let backing = self.backing.clone();
        let kind = self.kind;
        let parent = self.parent_manifest.clone();
        Arc::new(move || compute_manifest(&backing, kind, &parent))
    }

    /// Opens the archive stored in `entry`.
    ///
    /// File entries must be stored uncompressed — a deflated inner
    /// archive fails with `NestedEntryCompressed`, which poisons nothing:
    /// the parent and its other entries stay fully usable. Directory
    /// entries become filtered views of this archive's own index, with no
    /// re-parse. Entries marked `UNPACK:` are extracted to a process-wide
    /// temporary directory and opened from disk.
    pub fn nested_archive(&self, entry: &Entry) -> ZipResult<Archive> {
        self.check_open()?;
        let mut segments = self.segments.clone();
        segments.push(entry.name.trim_end_matches('/').to_string());
        match &self.backing {
            Backing::Zip(v) => {
                if entry.is_directory() {
                    let mut prefix = v.entry_prefix.clone();
                    prefix.push_str(&entry.name);
                    return Ok(Archive {
                        kind: ArchiveKind::NestedDirectory,
                        segments,
                        closed: AtomicBool::new(false),
                        backing: Backing::Zip(ZipView {
                            root: v.root.clone(),
                            data: v.data.clone(),
                            index: Arc::clone(&v.index),
                            entry_prefix: prefix,
                            signed: v.signed,
                        }),
                        manifest_cache: Mutex::new(Weak::new()),
                        parent_manifest: Some(self.manifest_supplier()),
                    });
                }
                if entry.method != CompressionMethod::Stored {
                    return Err(ZipError::NestedEntryCompressed(entry.name.clone()));
                }
                if entry.unpack_requested() {
                    let unpacked = unpack_to_temp(v, entry, &self.path_from_root())?;
                    debug!("Unpacked {} to {}", entry.name, unpacked);
                    return Archive::open(unpacked.as_std_path());
                }
                let payload = zip_entry_payload(v, entry)?;
                let child = load_view(&v.root, &payload)?;
                Ok(Archive {
                    kind: ArchiveKind::NestedJar,
                    segments,
                    closed: AtomicBool::new(false),
                    backing: Backing::Zip(child),
                    manifest_cache: Mutex::new(Weak::new()),
                    parent_manifest: Some(self.manifest_supplier()),
                })
            }
            Backing::Dir(v) => {
                let path = safe_join(&v.path, entry.name.trim_end_matches('/'))?;
                if entry.is_directory() {
                    Ok(Archive {
                        kind: ArchiveKind::ExplodedDirectory,
                        segments,
                        closed: AtomicBool::new(false),
                        backing: Backing::Dir(DirView { path }),
                        manifest_cache: Mutex::new(Weak::new()),
                        parent_manifest: Some(self.manifest_supplier()),
                    })
                } else {
                    // A real archive file inside the exploded tree.
                    Archive::open(path.as_std_path())
                }
            }
        }
    }

    /// One child archive per entry accepted by both filters, in entry
    /// order. Both predicates are caller-supplied: the layout convention
    /// lives with the caller, not here.
    pub fn nested_archives<'a>(
        &'a self,
        search_filter: EntryFilter<'a>,
        include_filter: EntryFilter<'a>,
    ) -> ZipResult<NestedArchives<'a>> {
        self.check_open()?;
        Ok(NestedArchives {
            archive: self,
            entries: self.entries()?.into_iter(),
            search_filter,
            include_filter,
        })
    }

    /// Closes this view. Closing the outermost (direct) archive releases
    /// the file and invalidates every view derived from it; closing a
    /// nested view only invalidates that view.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if self.kind == ArchiveKind::Direct {
            if let Backing::Zip(v) = &self.backing {
                v.data.close();
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.check_open().is_err()
    }
}

/// Iterator over the child archives selected by a pair of filters.
pub struct NestedArchives<'a> {
    archive: &'a Archive,
    entries: std::vec::IntoIter<Entry>,
    search_filter: EntryFilter<'a>,
    include_filter: EntryFilter<'a>,
}

impl Iterator for NestedArchives<'_> {
    type Item = ZipResult<Archive>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = self.entries.next()?;
            if (self.search_filter)(&entry) && (self.include_filter)(&entry) {
                return Some(self.archive.nested_archive(&entry));
            }
        }
    }
}

/// Locates, reads, and indexes the archive contained in `data`.
fn load_view(root: &RandomAccessData, data: &RandomAccessData) -> ZipResult<ZipView> {
    let location = locate::locate(data)?;
    trace!("{:?}", location);
    let view = data.sub_range(location.archive_start, data.size() - location.archive_start)?;
    let cd = view.read(
        location.central_directory_offset - location.archive_start,
        usize(location.central_directory_size)?,
    )?;
    let mut builder = EntryIndexBuilder::with_capacity(usize(location.entries)?);
    let mut signed = SignedArchiveVisitor::default();
    parse_central_directory(&location, &cd, &mut [&mut builder, &mut signed])?;
    Ok(ZipView {
        root: root.clone(),
        data: view,
        index: Arc::new(builder.finish(cd.into_boxed_slice())),
        entry_prefix: String::new(),
        signed: signed.signed,
    })
}

/// The byte range of an entry's payload within the archive view.
///
/// The local header's own name/extra lengths govern where the payload
/// starts; they may differ from the central directory's.
fn zip_entry_payload(v: &ZipView, entry: &Entry) -> ZipResult<RandomAccessData> {
    let header_bytes = v.data.read(
        entry.local_header_offset,
        spec::LOCAL_FILE_HEADER_SIZE as usize,
    )?;
    let local = spec::LocalFileHeader::parse(&header_bytes)?;
    #[cfg(feature = "check-local-metadata")]
    check_local_metadata(&local, entry)?;
    v.data.sub_range(
        entry.local_header_offset + local.payload_delta(),
        entry.compressed_size,
    )
}

fn zip_entry_reader(v: &ZipView, entry: &Entry) -> ZipResult<Box<dyn Read + Send>> {
    let payload = zip_entry_payload(v, entry)?;
    match entry.method {
        CompressionMethod::Stored => Ok(Box::new(Crc32Reader::new(
            payload.input_stream(),
            entry.crc32,
        ))),
        CompressionMethod::Deflate => Ok(Box::new(Crc32Reader::new(
            DeflateDecoder::new(payload.input_stream()),
            entry.crc32,
        ))),
        CompressionMethod::Unsupported(method) => Err(ZipError::Unsupported(format!(
            "Compression method {method} not supported"
        ))),
    }
}

#[cfg(feature = "check-local-metadata")]
fn check_local_metadata(local: &spec::LocalFileHeader, entry: &Entry) -> ZipResult<()> {
    if local.compression_method != entry.method.as_u16() {
        return Err(ZipError::MalformedField(
            "Local header method disagrees with the central directory",
        ));
    }
    // With a data descriptor the local CRC and sizes are zero; with Zip64
    // they may be sentinels. Neither case is a contradiction.
    if spec::has_data_descriptor(local.flags) {
        return Ok(());
    }
    if local.crc32 != entry.crc32 {
        return Err(ZipError::MalformedField(
            "Local header CRC disagrees with the central directory",
        ));
    }
    if local.compressed_size != spec::U32_SENTINEL
        && local.compressed_size as u64 != entry.compressed_size
    {
        return Err(ZipError::MalformedField(
            "Local header compressed size disagrees with the central directory",
        ));
    }
    if local.uncompressed_size != spec::U32_SENTINEL
        && local.uncompressed_size as u64 != entry.size
    {
        return Err(ZipError::MalformedField(
            "Local header size disagrees with the central directory",
        ));
    }
    Ok(())
}

fn compute_manifest(
    backing: &Backing,
    kind: ArchiveKind,
    parent: &Option<ManifestSupplier>,
) -> ZipResult<Option<Arc<Manifest>>> {
    // A nested directory view is part of the enclosing archive; its
    // manifest is whatever the parent supplies.
    if kind != ArchiveKind::NestedDirectory {
        match backing {
            Backing::Zip(v) => {
                if let Some(entry) = v.index.get(MANIFEST_NAME) {
                    let reader = zip_entry_reader(v, &entry)?;
                    return Ok(Some(Arc::new(Manifest::parse(reader)?)));
                }
            }
            Backing::Dir(v) => {
                let path = v.path.join(MANIFEST_NAME);
                if path.as_std_path().is_file() {
                    let bytes = fs::read(path.as_std_path())?;
                    return Ok(Some(Arc::new(Manifest::parse_bytes(&bytes)?)));
                }
            }
        }
    }
    match parent {
        Some(supplier) => supplier(),
        None => Ok(None),
    }
}

/// Rejects names that would escape an exploded root.
fn safe_join(base: &Utf8Path, name: &str) -> ZipResult<Utf8PathBuf> {
    if name.is_empty()
        || name.starts_with('/')
        || name.contains('\\')
        || name.split('/').any(|component| component == "..")
    {
        return Err(ZipError::InvalidPath(name.to_string()));
    }
    Ok(base.join(name))
}

fn file_entry(name: impl Into<String>, meta: &fs::Metadata) -> Entry {
    Entry {
        name: name.into(),
        method: CompressionMethod::Stored,
        size: meta.len(),
        compressed_size: meta.len(),
        crc32: 0,
        local_header_offset: 0,
        last_modified: None,
        extra: Vec::new(),
        comment: Vec::new(),
    }
}

fn dir_entry(name: impl Into<String>, _meta: Option<&fs::Metadata>) -> Entry {
    Entry {
        name: name.into(),
        method: CompressionMethod::Stored,
        size: 0,
        compressed_size: 0,
        crc32: 0,
        local_header_offset: 0,
        last_modified: None,
        extra: Vec::new(),
        comment: Vec::new(),
    }
}

/// Sorted recursive walk of an exploded tree, relative names with `/`
/// separators, directories ending in `/`.
fn walk_dir(root: &Utf8Path, dir: &Utf8Path, out: &mut Vec<Entry>) -> ZipResult<()> {
    let mut children = Vec::new();
    for child in fs::read_dir(dir.as_std_path())? {
        let path = child?.path();
        let utf8 = Utf8PathBuf::from_path_buf(path)
            .map_err(|p| ZipError::InvalidPath(p.display().to_string()))?;
        children.push(utf8);
    }
    children.sort();
    for child in children {
        let meta = fs::metadata(child.as_std_path())?;
        let rel = child
            .strip_prefix(root)
            .map_err(|_| ZipError::InvalidPath(child.to_string()))?
            .as_str()
            .to_string();
        if meta.is_dir() {
            out.push(dir_entry(format!("{rel}/"), Some(&meta)));
            walk_dir(root, &child, out)?;
        } else {
            out.push(file_entry(rel, &meta));
        }
    }
    Ok(())
}

// Unpacking of entries whose comment requests it. One temp root per
// process; entries land under a subfolder keyed by the enclosing
// archive's path so sibling archives can't collide.

static UNPACK_ROOT: OnceLock<TempDir> = OnceLock::new();

fn unpack_root() -> ZipResult<&'static Utf8Path> {
    if UNPACK_ROOT.get().is_none() {
        let fresh = tempfile::Builder::new().prefix("zipnest-").tempdir()?;
        restrict_permissions(fresh.path(), true)?;
        // If another thread won the race, `fresh` is dropped and cleaned.
        let _ = UNPACK_ROOT.get_or_init(move || fresh);
    }
    match UNPACK_ROOT.get() {
        Some(dir) => Utf8Path::from_path(dir.path())
            .ok_or_else(|| ZipError::InvalidPath(dir.path().display().to_string())),
        None => Err(ZipError::InvalidPath("unpack root unavailable".to_string())),
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, directory: bool) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = if directory { 0o700 } else { 0o600 };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _directory: bool) -> io::Result<()> {
    Ok(())
}

fn unpack_to_temp(v: &ZipView, entry: &Entry, enclosing_path: &str) -> ZipResult<Utf8PathBuf> {
    let root = unpack_root()?;
    let sub = root.join(format!("{:08x}", crc32fast::hash(enclosing_path.as_bytes())));
    if !sub.as_std_path().is_dir() {
        fs::create_dir_all(sub.as_std_path())?;
        restrict_permissions(sub.as_std_path(), true)?;
    }
    let base = entry.name.rsplit('/').next().unwrap_or(entry.name.as_str());
    let target = sub.join(base);
    if !target.as_std_path().exists() {
        let payload = zip_entry_payload(v, entry)?;
        let mut reader = Crc32Reader::new(payload.input_stream(), entry.crc32);
        let mut file = File::create(target.as_std_path())?;
        io::copy(&mut reader, &mut file)?;
        restrict_permissions(target.as_std_path(), false)?;
    }
    Ok(target)
}
