//! Ordered class/resource resolution over a list of archive views and
//! exploded directories.
//!
//! A resolver holds classpath entries in a fixed order assigned at
//! construction. Lookups walk that order; the first entry containing a
//! name wins. Missing resources are the dominant probe in practice, so
//! the miss path stays allocation-free: a miss is a cheap `None`, never
//! an error.

use std::io::Read;
use std::sync::Arc;

use camino::Utf8Path;
use log::*;

use crate::archive::{Archive, EntryFilter};
use crate::manifest::{self, Manifest};
use crate::result::*;
use crate::url;

/// Where the classpath-index sidecar lives unless the manifest's
/// `Spring-Boot-Classpath-Index` attribute says otherwise.
pub const DEFAULT_CLASSPATH_INDEX: &str = "BOOT-INF/classpath.idx";

/// The classpath-index sidecar: inner-archive entry names, one per line,
/// YAML-list style, in the order they should appear on the classpath.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassPathIndex {
    names: Vec<String>,
}

impl ClassPathIndex {
    /// Parses lines of the form `- "lib/foo.jar"`. Blank lines and
    /// anything not shaped like a list item are ignored.
    pub fn parse(text: &str) -> Self {
        let names = text
            .lines()
            .filter_map(|line| {
                let item = line.trim().strip_prefix("- ")?;
                let name = item.trim().trim_matches('"');
                (!name.is_empty()).then(|| name.to_string())
            })
            .collect();
        Self { names }
    }

    /// Reads the sidecar out of an archive (or exploded directory view),
    /// honouring the manifest attribute that can relocate it.
    pub fn from_archive(archive: &Archive) -> ZipResult<Option<Self>> {
        let location = archive
            .manifest()?
            .and_then(|m| m.get(manifest::CLASSPATH_INDEX).map(str::to_string))
            .unwrap_or_else(|| DEFAULT_CLASSPATH_INDEX.to_string());
        match archive.input_stream_named(&location)? {
            Some(mut reader) => {
                let mut text = String::new();
                reader.read_to_string(&mut text)?;
                Ok(Some(Self::parse(&text)))
            }
            None => Ok(None),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// One classpath root: an archive view (or exploded directory) plus its
/// position. Order is assigned at construction and never changes.
pub struct ClassPathEntry {
    url: String,
    ordinal: usize,
    archive: Arc<Archive>,
}

impl ClassPathEntry {
    /// The root URL: a composite `jar:` URL ending in `!/`, or a `file:`
    /// URL ending in `/` for exploded directories.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }
}

/// Package attributes recovered from the enclosing archive's manifest,
/// for runtimes that define packages as they define classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    /// Dotted package name, e.g. `com.example.app`
    pub package: String,
    pub implementation_title: Option<String>,
    pub implementation_version: Option<String>,
    pub sealed: bool,
}

/// An ordered list of classpath roots with first-match resolution.
pub struct ClassPathResolver {
    entries: Vec<ClassPathEntry>,
}

impl ClassPathResolver {
    /// Builds a classpath from an outer archive's children: one root per
    /// entry accepted by both filters, in entry order.
    ///
    /// The URL handler is registered (idempotently) before any URL is
    /// produced.
    pub fn from_nested(
        outer: &Archive,
        search_filter: EntryFilter<'_>,
        include_filter: EntryFilter<'_>,
    ) -> ZipResult<Self> {
        url::register();
        let mut entries = Vec::new();
        for child in outer.nested_archives(search_filter, include_filter)? {
            let child = child?;
            let url = child.url()?;
            debug!("classpath[{}] = {}", entries.len(), url);
            entries.push(ClassPathEntry {
                url,
                ordinal: entries.len(),
                archive: Arc::new(child),
            });
        }
        Ok(Self { entries })
    }

    /// Builds a classpath from an exploded (unpacked-to-disk) layout.
    ///
    /// The classes root always comes first. Library archives found under
    /// `lib_dirs` follow: those listed by the classpath-index sidecar in
    /// the sidecar's order, then unlisted discoveries in discovery
    /// (sorted) order.
    pub fn from_exploded_root(
        root: &Utf8Path,
        classes_root: &str,
        lib_dirs: &[&str],
    ) -> ZipResult<Self> {
        url::register();
        let root_view = Archive::explode(root)?;
        let index = ClassPathIndex::from_archive(&root_view)?;

        let mut discovered: Vec<String> = Vec::new();
        for lib in lib_dirs {
            let dir = root.join(lib);
            if !dir.as_std_path().is_dir() {
                continue;
            }
            let mut names: Vec<String> = std::fs::read_dir(dir.as_std_path())?
                .filter_map(|dirent| {
                    let dirent = dirent.ok()?;
                    if !dirent.file_type().ok()?.is_file() {
                        return None;
                    }
                    let file_name = dirent.file_name().into_string().ok()?;
                    Some(format!("{}/{}", lib.trim_end_matches('/'), file_name))
                })
                .collect();
            names.sort();
            discovered.append(&mut names);
        }

        let mut ordered: Vec<String> = Vec::new();
        match &index {
            Some(index) => {
                for name in index.names() {
                    if discovered.iter().any(|d| d == name) {
                        ordered.push(name.clone());
                    } else {
                        debug!("classpath index lists {name}, which is not on disk; skipping");
                    }
                }
                for name in &discovered {
                    if index.position(name).is_none() {
                        ordered.push(name.clone());
                    }
                }
            }
            None => ordered.extend(discovered),
        }

        let mut entries = Vec::new();
        let classes = Archive::explode(root.join(classes_root).as_std_path())?;
        entries.push(ClassPathEntry {
            url: classes.url()?,
            ordinal: 0,
            archive: Arc::new(classes),
        });
        for name in ordered {
            let archive = Archive::open(root.join(&name).as_std_path())?;
            let url = archive.url()?;
            debug!("classpath[{}] = {}", entries.len(), url);
            entries.push(ClassPathEntry {
                url,
                ordinal: entries.len(),
                archive: Arc::new(archive),
            });
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ClassPathEntry] {
        &self.entries
    }

    /// The URL of the first classpath entry containing `name`, or `None`.
    pub fn find_resource(&self, name: &str) -> ZipResult<Option<String>> {
        match self.find_resources(name).next() {
            Some(found) => found.map(Some),
            None => Ok(None),
        }
    }

    /// URLs of every classpath entry containing `name`, in classpath
    /// order, duplicates included. The empty name yields each classpath
    /// root exactly once, in order.
    pub fn find_resources<'a>(&'a self, name: &'a str) -> Resources<'a> {
        Resources {
            resolver: self,
            name,
            position: 0,
        }
    }

    /// Opens the first classpath entry containing `name` for reading.
    pub fn open_resource(&self, name: &str) -> ZipResult<Option<Box<dyn std::io::Read + Send>>> {
        for entry in &self.entries {
            if let Some(found) = entry.archive.get(name)? {
                return Ok(Some(entry.archive.input_stream(&found)?));
            }
        }
        Ok(None)
    }

    /// Translates `a.b.C` to `a/b/C.class` and reads the first match.
    pub fn load_class_bytes(&self, binary_name: &str) -> ZipResult<Option<Vec<u8>>> {
        let resource = class_resource_name(binary_name);
        for entry in &self.entries {
            if let Some(found) = entry.archive.get(&resource)? {
                return entry.archive.read_entry(&found).map(Some);
            }
        }
        Ok(None)
    }

    /// Recovers package attributes for a class about to be defined.
    ///
    /// Walks the classpath entries containing the class, in order, and
    /// returns attributes from the first whose manifest has any — this is
    /// how an exploded layout keeps its package-to-manifest association.
    /// A per-package manifest section overrides the main attributes.
    pub fn define_package_for(&self, binary_name: &str) -> ZipResult<Option<PackageInfo>> {
        let resource = class_resource_name(binary_name);
        let package = binary_name
            .rsplit_once('.')
            .map(|(package, _)| package)
            .unwrap_or("");
        let section_name = format!("{}/", package.replace('.', "/"));

        for entry in &self.entries {
            if !entry.archive.contains(&resource)? {
                continue;
            }
            let Some(found) = entry.archive.manifest()? else {
                continue;
            };
            return Ok(Some(package_info(&found, package, &section_name)));
        }
        Ok(None)
    }
}

fn package_info(found: &Manifest, package: &str, section_name: &str) -> PackageInfo {
    let attribute = |name: &str| -> Option<String> {
        found
            .section(section_name)
            .and_then(|section| section.get(name))
            .or_else(|| found.get(name))
            .map(str::to_string)
    };
    PackageInfo {
        package: package.to_string(),
        implementation_title: attribute(manifest::IMPLEMENTATION_TITLE),
        implementation_version: attribute(manifest::IMPLEMENTATION_VERSION),
        sealed: attribute(manifest::SEALED).as_deref() == Some("true"),
    }
}

fn class_resource_name(binary_name: &str) -> String {
    format!("{}.class", binary_name.replace('.', "/"))
}

/// Iterator over the URLs of every classpath entry containing a name.
///
/// Each `next` re-evaluates from the entry after the previous match, so
/// interleaved consumers each see a consistent walk.
pub struct Resources<'a> {
    resolver: &'a ClassPathResolver,
    name: &'a str,
    position: usize,
}

impl Iterator for Resources<'_> {
    type Item = ZipResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.position < self.resolver.entries.len() {
            let entry = &self.resolver.entries[self.position];
            self.position += 1;
            if self.name.is_empty() {
                return Some(Ok(entry.url.clone()));
            }
            match entry.archive.contains(self.name) {
                Ok(true) => return Some(Ok(format!("{}{}", entry.url, self.name))),
                Ok(false) => {}
                Err(error) => return Some(Err(error)),
            }
        }
        None
    }
}
