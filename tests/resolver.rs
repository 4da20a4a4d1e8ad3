//! Classpath resolution: ordering, first-match and all-matches lookups,
//! the classpath-index sidecar, and package attribute recovery.

mod common;

use std::fs;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};

use common::EntrySpec;
use zipnest::index::Entry;
use zipnest::{url, Archive, ClassPathResolver, ZipResult};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn write_file(path: &Utf8Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path())?;
    }
    fs::write(path.as_std_path(), bytes)?;
    Ok(())
}

fn utf8(path: std::path::PathBuf) -> Result<Utf8PathBuf> {
    Utf8PathBuf::from_path_buf(path).map_err(|p| anyhow::anyhow!("non-UTF-8 path {}", p.display()))
}

/// classes/ + lib/x.jar + lib/y.jar inside one outer jar.
fn layered_outer() -> Vec<u8> {
    let x = common::build_zip(vec![
        EntrySpec::stored("shared.txt", b"from x"),
        EntrySpec::stored("only-x.txt", b"x"),
    ]);
    let y = common::build_zip(vec![EntrySpec::stored("shared.txt", b"from y")]);
    common::build_zip(vec![
        EntrySpec::dir("classes/"),
        EntrySpec::stored("classes/app/Main.class", b"\xCA\xFE\xBA\xBE"),
        EntrySpec::dir("lib/"),
        EntrySpec::stored("lib/x.jar", &x),
        EntrySpec::stored("lib/y.jar", &y),
    ])
}

fn layered_resolver(path: &Utf8Path) -> ZipResult<ClassPathResolver> {
    let outer = Archive::open(path)?;
    let search = |e: &Entry| !e.name.starts_with("META-INF/");
    let include = |e: &Entry| {
        e.name == "classes/" || (e.name.starts_with("lib/") && e.name.ends_with(".jar"))
    };
    ClassPathResolver::from_nested(&outer, &search, &include)
}

#[test]
fn classpath_urls_follow_entry_order() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let path = utf8(dir.path().join("outer.jar"))?;
    fs::write(path.as_std_path(), layered_outer())?;

    let resolver = layered_resolver(&path)?;
    let urls: Vec<&str> = resolver.entries().iter().map(|e| e.url()).collect();
    assert_eq!(
        urls,
        [
            format!("jar:file:{path}!/classes!/"),
            format!("jar:file:{path}!/lib/x.jar!/"),
            format!("jar:file:{path}!/lib/y.jar!/"),
        ]
    );
    Ok(())
}

#[test]
fn first_match_wins_and_all_matches_keep_order() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let path = utf8(dir.path().join("outer.jar"))?;
    fs::write(path.as_std_path(), layered_outer())?;
    let resolver = layered_resolver(&path)?;

    // shared.txt lives in both lib jars; x.jar comes first.
    let first = resolver.find_resource("shared.txt")?.context("shared")?;
    assert_eq!(first, format!("jar:file:{path}!/lib/x.jar!/shared.txt"));

    let all: Vec<String> = resolver
        .find_resources("shared.txt")
        .collect::<ZipResult<_>>()?;
    assert_eq!(
        all,
        [
            format!("jar:file:{path}!/lib/x.jar!/shared.txt"),
            format!("jar:file:{path}!/lib/y.jar!/shared.txt"),
        ]
    );

    assert_eq!(resolver.find_resource("nowhere.txt")?, None);
    assert_eq!(resolver.find_resources("nowhere.txt").count(), 0);
    Ok(())
}

#[test]
fn empty_name_yields_one_url_per_root() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let path = utf8(dir.path().join("outer.jar"))?;
    fs::write(path.as_std_path(), layered_outer())?;
    let resolver = layered_resolver(&path)?;

    let roots: Vec<String> = resolver.find_resources("").collect::<ZipResult<_>>()?;
    let from_entries: Vec<String> = resolver
        .entries()
        .iter()
        .map(|e| e.url().to_string())
        .collect();
    assert_eq!(roots, from_entries);
    assert_eq!(roots.len(), 3);
    Ok(())
}

#[test]
fn resolved_urls_round_trip_and_open() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let path = utf8(dir.path().join("outer.jar"))?;
    fs::write(path.as_std_path(), layered_outer())?;
    let resolver = layered_resolver(&path)?;

    let found = resolver.find_resource("only-x.txt")?.context("only-x")?;
    let parsed = url::parse(&found)?;
    assert_eq!(parsed.root, path);
    assert_eq!(parsed.segments, ["lib/x.jar", "only-x.txt"]);
    assert_eq!(url::compose(&parsed.root, &parsed.segments), found);

    match url::open(&found)? {
        url::Resource::Stream(mut reader) => {
            let mut bytes = Vec::new();
            std::io::Read::read_to_end(&mut reader, &mut bytes)?;
            assert_eq!(bytes, b"x");
        }
        url::Resource::Archive(_) => panic!("expected a stream"),
    }
    Ok(())
}

#[test]
fn load_class_bytes_translates_binary_names() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let path = utf8(dir.path().join("outer.jar"))?;
    fs::write(path.as_std_path(), layered_outer())?;
    let resolver = layered_resolver(&path)?;

    let bytes = resolver
        .load_class_bytes("app.Main")?
        .context("app.Main should load")?;
    assert_eq!(bytes, b"\xCA\xFE\xBA\xBE");
    assert_eq!(resolver.load_class_bytes("app.Missing")?, None);
    Ok(())
}

#[test]
fn exploded_layout_honours_the_classpath_index() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let root = utf8(dir.path().to_path_buf())?;

    write_file(
        &root.join("META-INF/MANIFEST.MF"),
        &common::manifest_bytes(&["Spring-Boot-Classpath-Index: classpath.idx"]),
    )?;
    write_file(
        &root.join("classpath.idx"),
        b"- \"lib/x.jar\"\n- \"lib/y.jar\"\n- \"lib/z.jar\"\n",
    )?;
    write_file(&root.join("classes/app/Main.class"), b"\xCA\xFE\xBA\xBE")?;

    let jar = |marker: &str| {
        common::build_zip(vec![EntrySpec::stored(
            &format!("marker-{marker}.txt"),
            marker.as_bytes(),
        )])
    };
    // Written out of index order on purpose; discovery alone would sort
    // extra before x/y/z.
    write_file(&root.join("lib/z.jar"), &jar("z"))?;
    write_file(&root.join("lib/extra.jar"), &jar("extra"))?;
    write_file(&root.join("lib/x.jar"), &jar("x"))?;
    write_file(&root.join("lib/y.jar"), &jar("y"))?;

    let resolver = ClassPathResolver::from_exploded_root(&root, "classes", &["lib"])?;
    let urls: Vec<&str> = resolver.entries().iter().map(|e| e.url()).collect();
    assert_eq!(
        urls,
        [
            format!("file:{root}/classes/"),
            format!("jar:file:{root}/lib/x.jar!/"),
            format!("jar:file:{root}/lib/y.jar!/"),
            format!("jar:file:{root}/lib/z.jar!/"),
            format!("jar:file:{root}/lib/extra.jar!/"),
        ]
    );

    // The classes root resolves through the filesystem.
    let class_url = resolver
        .find_resource("app/Main.class")?
        .context("class in exploded root")?;
    assert_eq!(class_url, format!("file:{root}/classes/app/Main.class"));

    // Indexed and leftover jars all resolve.
    assert!(resolver.find_resource("marker-extra.txt")?.is_some());
    assert!(resolver.find_resource("marker-y.txt")?.is_some());
    Ok(())
}

#[test]
fn exploded_layout_without_an_index_uses_discovery_order() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let root = utf8(dir.path().to_path_buf())?;
    write_file(&root.join("classes/app/Main.class"), b"\xCA\xFE")?;
    write_file(
        &root.join("lib/b.jar"),
        &common::build_zip(vec![EntrySpec::stored("b.txt", b"b")]),
    )?;
    write_file(
        &root.join("lib/a.jar"),
        &common::build_zip(vec![EntrySpec::stored("a.txt", b"a")]),
    )?;

    let resolver = ClassPathResolver::from_exploded_root(&root, "classes", &["lib"])?;
    let urls: Vec<&str> = resolver.entries().iter().map(|e| e.url()).collect();
    assert_eq!(
        urls,
        [
            format!("file:{root}/classes/"),
            format!("jar:file:{root}/lib/a.jar!/"),
            format!("jar:file:{root}/lib/b.jar!/"),
        ]
    );
    Ok(())
}

#[test]
fn package_attributes_come_from_the_enclosing_manifest() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let path = utf8(dir.path().join("outer.jar"))?;

    let manifest = common::manifest_bytes(&[
        "Implementation-Title: acme-lib",
        "Implementation-Version: 2.1.0",
        "",
        "Name: com/acme/sealed/",
        "Sealed: true",
    ]);
    let lib = common::build_zip(vec![
        EntrySpec::stored("META-INF/MANIFEST.MF", &manifest),
        EntrySpec::stored("com/acme/sealed/Thing.class", b"\xCA\xFE"),
        EntrySpec::stored("com/acme/open/Other.class", b"\xCA\xFE"),
    ]);
    fs::write(
        path.as_std_path(),
        common::build_zip(vec![EntrySpec::stored("lib/acme.jar", &lib)]),
    )?;

    let outer = Archive::open(&path)?;
    let search = |e: &Entry| !e.is_directory();
    let include = |e: &Entry| e.name.ends_with(".jar");
    let resolver = ClassPathResolver::from_nested(&outer, &search, &include)?;

    let sealed = resolver
        .define_package_for("com.acme.sealed.Thing")?
        .context("sealed package")?;
    assert_eq!(sealed.package, "com.acme.sealed");
    assert_eq!(sealed.implementation_title.as_deref(), Some("acme-lib"));
    assert_eq!(sealed.implementation_version.as_deref(), Some("2.1.0"));
    assert!(sealed.sealed);

    let open = resolver
        .define_package_for("com.acme.open.Other")?
        .context("open package")?;
    assert!(!open.sealed);
    assert_eq!(open.implementation_title.as_deref(), Some("acme-lib"));

    assert_eq!(resolver.define_package_for("no.such.Class")?, None);
    Ok(())
}

#[test]
fn handler_registration_is_idempotent() {
    init_logging();
    // Other tests may already have registered; all that matters is that
    // repeated calls are no-ops and the state sticks.
    url::register();
    assert!(url::is_registered());
    assert!(!url::register());
    assert!(url::is_registered());
}
