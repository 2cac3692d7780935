mod error;
mod owner;
mod packages;

use std::path::PathBuf;

use clap::Parser;
use crashlog_symbols::{
    BlameFilter, CrashReport, PackageProvider, SymbolMaps, Symbolicator,
};
use log::info;

use error::CliError;
use owner::LocalSymbolOwner;
use packages::JsonPackageDb;

#[derive(Debug, Parser)]
#[command(
    name = "crashlog",
    version,
    about = r#"
crashlog parses a mobile-OS crash log, resolves its backtrace addresses to
symbols, attributes the crash to the most likely responsible binary, and
writes the annotated report back out.

EXAMPLES:
    # Symbolicate and blame, print to stdout:
    crashlog MyApp.crash

    # Use binaries under a mounted system root and write a property list:
    crashlog MyApp.crash --system-root /mnt/device --plist -o MyApp.plist

    # Exclude your own app from blame to find a misbehaving tweak:
    crashlog MyApp.crash --exclude-path /var/mobile/Applications/*
"#
)]
struct Opt {
    /// Path to the crash log (text or property-list form, auto-detected).
    report: PathBuf,

    /// Write the result here instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Emit the property-list form regardless of the input form.
    #[arg(long)]
    plist: bool,

    /// Resolve binary image paths under this directory.
    #[arg(long)]
    system_root: Option<PathBuf>,

    /// JSON file with override symbol maps, keyed by image path or UUID.
    #[arg(long)]
    symbol_maps: Option<PathBuf>,

    /// JSON package database mapping binary paths to package metadata.
    #[arg(long)]
    package_db: Option<PathBuf>,

    /// Exclude images matching this path (exact, or prefix with a trailing
    /// '*') from blame. Repeatable.
    #[arg(long = "exclude-path", conflicts_with = "exclude_package")]
    exclude_path: Vec<String>,

    /// Exclude images installed by this package from blame. Repeatable.
    #[arg(long = "exclude-package")]
    exclude_package: Vec<String>,

    /// Skip the symbolication pass.
    #[arg(long)]
    no_symbolicate: bool,

    /// Skip the blame pass.
    #[arg(long)]
    no_blame: bool,
}

fn main() {
    env_logger::init();
    let opt = Opt::parse();
    if let Err(err) = run(opt) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run(opt: Opt) -> Result<(), CliError> {
    let mut report = CrashReport::from_file(&opt.report)?;

    if !opt.no_symbolicate {
        let owner = LocalSymbolOwner;
        let symbolicator = match &opt.system_root {
            Some(root) => Symbolicator::with_system_root(&owner, root.clone()),
            None => Symbolicator::new(&owner),
        };
        let symbol_maps = match &opt.symbol_maps {
            Some(path) => packages::load_symbol_maps(path)?,
            None => SymbolMaps::new(),
        };
        if report.symbolicate(&symbolicator, &symbol_maps)? {
            info!("symbolicated {} threads", report.threads.len());
        } else {
            info!("report was already symbolicated");
        }
    }

    if !opt.no_blame {
        let package_db = match &opt.package_db {
            Some(path) => Some(JsonPackageDb::from_file(path)?),
            None => None,
        };
        let filter = if !opt.exclude_path.is_empty() {
            BlameFilter::ByPath(opt.exclude_path.iter().cloned().collect())
        } else if !opt.exclude_package.is_empty() {
            BlameFilter::ByPackage(opt.exclude_package.iter().cloned().collect())
        } else {
            BlameFilter::None
        };
        let provider = package_db
            .as_ref()
            .map(|db| db as &dyn PackageProvider);
        report.blame(&filter, provider)?;
        match &report.blame_info {
            Some(blame) => info!("blamed {}", blame.path),
            None => info!("no binary image to blame"),
        }
    }

    match &opt.output {
        Some(path) => report.write_to_file(path, opt.plist)?,
        None => print!("{}", report.render(opt.plist || report.is_property_list)?),
    }
    Ok(())
}
