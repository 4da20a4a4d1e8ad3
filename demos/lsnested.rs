use std::io;
use std::path::PathBuf;

use anyhow::*;
use log::*;
use structopt::*;

use zipnest::index::Entry;
use zipnest::*;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "lsnested",
    about = "Lists a nested archive's classpath, or streams one resource from it"
)]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbosity: usize,

    /// Resolve this resource and copy its bytes to stdout.
    #[structopt(short, long)]
    resource: Option<String>,

    /// Directory holding inner archives (entries outside it are ignored).
    #[structopt(short, long, default_value = "lib/")]
    lib_dir: String,

    #[structopt(name("JAR file"))]
    jar_path: PathBuf,
}

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    info!("Opening {:#?}", &args.jar_path);
    let outer = Archive::open(&args.jar_path).context("Couldn't open archive")?;
    if outer.is_signed() {
        debug!("Archive carries signature files");
    }

    let lib_dir = args.lib_dir;
    let search = move |e: &Entry| !e.name.starts_with("META-INF/");
    let include = move |e: &Entry| !e.is_directory() && e.name.starts_with(lib_dir.as_str());
    let resolver = ClassPathResolver::from_nested(&outer, &search, &include)
        .context("Couldn't build a classpath from the archive")?;

    match args.resource {
        Some(resource) => stream_resource(&resolver, &resource),
        None => print_classpath(&outer, &resolver),
    }
}

fn print_classpath(outer: &Archive, resolver: &ClassPathResolver) -> Result<()> {
    if let Some(manifest) = outer.manifest()? {
        if let Some(start_class) = manifest.start_class() {
            println!("Start-Class: {start_class}");
        }
    }
    for entry in resolver.entries() {
        println!("{}", entry.url());
        let archive = entry.archive();
        for inner in archive.entries()? {
            println!("    {} ({} bytes)", inner.name, inner.size);
        }
    }
    Ok(())
}

fn stream_resource(resolver: &ClassPathResolver, resource: &str) -> Result<()> {
    match resolver.open_resource(resource)? {
        Some(mut reader) => {
            io::copy(&mut reader, &mut io::stdout().lock())?;
            Ok(())
        }
        None => bail!("{resource} is not on the classpath"),
    }
}
