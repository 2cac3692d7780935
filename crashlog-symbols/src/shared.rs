use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::image::BinaryImage;

/// The result of resolving one raw stack frame address against its owning
/// binary image.
///
/// `name == None` means the address fell inside a known image but no symbol
/// covers it. A frame with no owning image at all gets no `SymbolInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolInfo {
    pub name: Option<String>,
    pub offset: u64,
    pub source_path: Option<String>,
    pub source_line: Option<u32>,
}

/// A source file / line pair supplied by the [`SymbolOwner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub path: String,
    pub line: u32,
}

/// Describes the shared system cache mapping, if the symbol owner has one.
///
/// Addresses inside `range` belong to system libraries that were mapped
/// together; they slide as a unit, by `slide`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedCacheInfo {
    pub range: Range<u64>,
    pub slide: i64,
}

/// External collaborator that decodes executable headers on our behalf.
///
/// The core never parses load commands or section tables itself; everything
/// it knows about a binary's on-disk layout comes through this trait. All
/// methods receive the image path already adjusted for the caller's system
/// root, see [`Symbolicator::with_system_root`](crate::Symbolicator::with_system_root).
///
/// Implementations must tolerate being asked about binaries they cannot
/// find; returning `None` leaves the affected frames unresolved.
pub trait SymbolOwner: Send + Sync {
    /// The base address declared in the image's executable header
    /// (pre-slide). `None` if the binary cannot be inspected.
    fn declared_base_address(&self, path: &Path, image: &BinaryImage) -> Option<u64>;

    /// The exported symbols of the image, as (declared address, raw name)
    /// pairs. Order and duplicates don't matter; the index construction
    /// sorts and dedups.
    fn symbol_entries(&self, path: &Path, image: &BinaryImage) -> Vec<(u64, String)>;

    /// Source file and line for an unslid address, if debug info is
    /// available.
    fn source_location(&self, path: &Path, image: &BinaryImage, address: u64)
        -> Option<SourceLocation>;

    /// The shared system cache mapping, if one is established.
    fn shared_cache(&self) -> Option<SharedCacheInfo> {
        None
    }
}

/// A [`SymbolOwner`] that knows nothing. Parsing and re-rendering a report
/// needs no binary inspection, so this is the default collaborator.
pub struct NullSymbolOwner;

impl SymbolOwner for NullSymbolOwner {
    fn declared_base_address(&self, _path: &Path, _image: &BinaryImage) -> Option<u64> {
        None
    }

    fn symbol_entries(&self, _path: &Path, _image: &BinaryImage) -> Vec<(u64, String)> {
        Vec::new()
    }

    fn source_location(
        &self,
        _path: &Path,
        _image: &BinaryImage,
        _address: u64,
    ) -> Option<SourceLocation> {
        None
    }
}

/// External collaborator that supplies OS package metadata for a binary
/// path. Consulted by the blame engine for `ByPackage` filtering and for
/// the install-date annotation on the blamed image.
pub trait PackageProvider {
    /// The identifier of the package that installed `path`, if any.
    fn package_identifier(&self, path: &Path) -> Option<String>;

    /// Human-readable install date of the package owning `path`.
    fn install_date(&self, path: &Path) -> Option<String>;
}

/// Applies an ASLR slide in reverse: maps a runtime address back into the
/// image's declared address space.
pub(crate) fn unslid(address: u64, slide: i64) -> u64 {
    if slide >= 0 {
        address.wrapping_sub(slide as u64)
    } else {
        address.wrapping_add(slide.unsigned_abs())
    }
}

/// Prefixes `path` with `system_root`, if one is set.
pub(crate) fn rooted_path(system_root: Option<&Path>, path: &str) -> PathBuf {
    match system_root {
        Some(root) => root.join(path.trim_start_matches('/')),
        None => PathBuf::from(path),
    }
}
