//! Parsing `META-INF/MANIFEST.MF` and the attribute names this crate
//! cares about.
//!
//! A manifest is a sequence of sections separated by blank lines. The
//! first (main) section carries archive-wide attributes; later sections
//! start with a `Name:` attribute and scope the rest of their attributes
//! to that entry or package. Physical lines beginning with a single
//! space continue the previous line. Attribute names compare
//! case-insensitively.

use std::io::Read;

use crate::result::*;

/// Where a manifest lives inside an archive.
pub const MANIFEST_NAME: &str = "META-INF/MANIFEST.MF";

/// Binary name of the application entry point, consumed by launchers.
pub const START_CLASS: &str = "Start-Class";
/// Path of the classpath-index sidecar within the archive.
pub const CLASSPATH_INDEX: &str = "Spring-Boot-Classpath-Index";
pub const AUTOMATIC_MODULE_NAME: &str = "Automatic-Module-Name";
pub const IMPLEMENTATION_TITLE: &str = "Implementation-Title";
pub const IMPLEMENTATION_VERSION: &str = "Implementation-Version";
pub const BUILT_BY: &str = "Built-By";
pub const BUILD_JDK_SPEC: &str = "Build-Jdk-Spec";
/// Package sealing marker, either archive-wide or per package section.
pub const SEALED: &str = "Sealed";

/// One section's attributes.
///
/// Lookup is case-insensitive; equality compares the normalised set, so
/// two parses of the same bytes are equal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    // (name as written, value), in file order
    entries: Vec<(String, String)>,
}

impl Attributes {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn insert(&mut self, name: String, value: String) {
        match self
            .entries
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&name))
        {
            Some((_, v)) => *v = value,
            None => self.entries.push((name, value)),
        }
    }
}

/// A parsed manifest: the main attribute section plus named sections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    main: Attributes,
    sections: Vec<(String, Attributes)>,
}

impl Manifest {
    /// Parses a manifest from a reader (typically an entry stream).
    pub fn parse<R: Read>(mut reader: R) -> ZipResult<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::parse_bytes(&bytes)
    }

    pub fn parse_bytes(bytes: &[u8]) -> ZipResult<Self> {
        let text = std::str::from_utf8(bytes).map_err(ZipError::Encoding)?;
        let mut manifest = Manifest::default();

        let mut current = Attributes::default();
        let mut current_name: Option<String> = None;
        let mut in_main = true;
        let mut pending: Option<(String, String)> = None;

        let finish_section =
            |manifest: &mut Manifest, name: Option<String>, attrs: Attributes, main: bool| {
                if main {
                    manifest.main = attrs;
                } else if let Some(name) = name {
                    manifest.sections.push((name, attrs));
                }
            };

        for line in text.split_terminator('\n').map(|l| l.trim_end_matches('\r')) {
            if line.is_empty() {
                if let Some((k, v)) = pending.take() {
                    if k.eq_ignore_ascii_case("Name") && !in_main {
                        current_name = Some(v);
                    } else {
                        current.insert(k, v);
                    }
                }
                if in_main || current_name.is_some() || !current.is_empty() {
                    finish_section(
                        &mut manifest,
                        current_name.take(),
                        std::mem::take(&mut current),
                        in_main,
                    );
                    in_main = false;
                }
                continue;
            }
            if let Some(continuation) = line.strip_prefix(' ') {
                match &mut pending {
                    Some((_, v)) => v.push_str(continuation),
                    None => {
                        return Err(ZipError::MalformedField(
                            "Manifest continuation line with nothing to continue",
                        ))
                    }
                }
                continue;
            }
            if let Some((k, v)) = pending.take() {
                if k.eq_ignore_ascii_case("Name") && !in_main {
                    current_name = Some(v);
                } else {
                    current.insert(k, v);
                }
            }
            let (name, value) = line
                .split_once(':')
                .ok_or(ZipError::MalformedField("Manifest line without a colon"))?;
            pending = Some((name.to_string(), value.trim_start().to_string()));
        }
        if let Some((k, v)) = pending.take() {
            if k.eq_ignore_ascii_case("Name") && !in_main {
                current_name = Some(v);
            } else {
                current.insert(k, v);
            }
        }
        if in_main || current_name.is_some() || !current.is_empty() {
            finish_section(&mut manifest, current_name.take(), current, in_main);
        }

        Ok(manifest)
    }

    /// Archive-wide attributes.
    pub fn main_attributes(&self) -> &Attributes {
        &self.main
    }

    /// Attributes of the section named `name` (an entry or package path).
    pub fn section(&self, name: &str) -> Option<&Attributes> {
        self.sections
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, attrs)| attrs)
    }

    /// Main-section attribute lookup, case-insensitive.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.main.get(name)
    }

    /// The declared application entry point, if any.
    pub fn start_class(&self) -> Option<&str> {
        self.get(START_CLASS)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const SAMPLE: &str = "\
Manifest-Version: 1.0\r\n\
Start-Class: com.example.App\r\n\
Implementation-Title: demo\r\n\
Implementation-Version: 1.2.3\r\n\
Long-Value: starts here\r\n\
\x20and continues here\r\n\
\r\n\
Name: com/example/sealed/\r\n\
Sealed: true\r\n";

    #[test]
    fn parses_main_attributes() {
        let manifest = Manifest::parse_bytes(SAMPLE.as_bytes()).unwrap();
        assert_eq!(manifest.start_class(), Some("com.example.App"));
        assert_eq!(manifest.get(IMPLEMENTATION_TITLE), Some("demo"));
        assert_eq!(manifest.get("implementation-version"), Some("1.2.3"));
        assert_eq!(
            manifest.get("Long-Value"),
            Some("starts hereand continues here")
        );
    }

    #[test]
    fn parses_named_sections() {
        let manifest = Manifest::parse_bytes(SAMPLE.as_bytes()).unwrap();
        let section = manifest.section("com/example/sealed/").unwrap();
        assert_eq!(section.get(SEALED), Some("true"));
        assert!(manifest.section("com/example/open/").is_none());
    }

    #[test]
    fn reparsing_is_idempotent() {
        let once = Manifest::parse_bytes(SAMPLE.as_bytes()).unwrap();
        let twice = Manifest::parse_bytes(SAMPLE.as_bytes()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn bare_newlines_work_too() {
        let manifest = Manifest::parse_bytes(b"Start-Class: a.B\n").unwrap();
        assert_eq!(manifest.start_class(), Some("a.B"));
    }
}
