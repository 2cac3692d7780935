//! This crate parses mobile-OS crash logs, resolves the raw instruction
//! addresses in their stack backtraces into human-meaningful symbols, and
//! attributes ("blames") a crash to the loaded binary image most likely
//! responsible for it.
//!
//! The main entry point is [`CrashReport`]: parse one from text or
//! property-list bytes, run [`CrashReport::symbolicate`] and
//! [`CrashReport::blame`] over it (in either order, or not at all), and
//! render it back out in either serialization.
//!
//! # Design constraints
//!
//! This crate operates under the following design constraints:
//!
//!  - No executable-header decoding: section tables, load commands and
//!    shared-cache file mapping stay outside. Everything the crate knows
//!    about a binary's on-disk layout comes through the caller-implemented
//!    [`SymbolOwner`] trait, and package metadata comes through
//!    [`PackageProvider`]. The `crashlog` CLI crate ships implementations
//!    of both.
//!  - "Best effort" basis: partial symbolication is a normal outcome.
//!    Frames whose image is missing, or whose address no symbol covers,
//!    are carried through and rendered as raw addresses rather than
//!    failing the report.
//!  - No shared global state: the [`Symbolicator`] is an explicit context
//!    object built once per run, so independent reports can be processed
//!    in parallel. Per-image symbol tables are built at most once and are
//!    read-only afterwards.
//!
//! # Example
//!
//! ```rust
//! use crashlog_symbols::{BlameFilter, CrashReport, NullSymbolOwner, ReportFormat, Symbolicator};
//!
//! # fn run(log_bytes: &[u8]) -> Result<(), crashlog_symbols::Error> {
//! let mut report = CrashReport::parse(log_bytes, ReportFormat::Auto)?;
//! let owner = NullSymbolOwner;
//! let symbolicator = Symbolicator::new(&owner);
//! report.symbolicate(&symbolicator, &Default::default())?;
//! report.blame(&BlameFilter::None, None)?;
//! println!("{}", report.render(false)?);
//! # Ok(())
//! # }
//! ```

pub use uuid;

mod blame;
mod demangle;
mod error;
mod image;
mod plist_format;
mod registry;
mod report;
mod shared;
mod symbol_table;
mod symbolicator;
mod text_format;

pub use blame::{BlameFilter, BlameInfo};
pub use demangle::demangle;
pub use error::Error;
pub use image::BinaryImage;
pub use registry::ImageRegistry;
pub use report::{
    Backtrace, CrashReport, Exception, ProcessInfo, ReportFormat, StackFrame, SymbolMaps, Thread,
};
pub use shared::{
    NullSymbolOwner, PackageProvider, SharedCacheInfo, SourceLocation, SymbolInfo, SymbolOwner,
};
pub use symbol_table::{SymbolTable, SymbolTableEntry};
pub use symbolicator::{OverrideMap, Symbolicator};
