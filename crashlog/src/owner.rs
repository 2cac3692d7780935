use std::fs::File;
use std::path::Path;

use crashlog_symbols::{BinaryImage, SourceLocation, SymbolOwner};
use log::{debug, warn};
use memmap2::Mmap;
use object::{Object, ObjectSegment, ObjectSymbol, SymbolKind};

/// A [`SymbolOwner`] backed by the binaries on the local file system.
///
/// Maps the file at the image's (system-root-adjusted) path and reads its
/// text symbols and declared base address. Images whose files are missing
/// or unreadable simply stay unresolved; that's the expected situation for
/// reports captured on another device.
///
/// Source-line info would require debug-data decoding, which this tool does
/// not do; `source_location` always answers `None`.
pub struct LocalSymbolOwner;

fn mmap_file(path: &Path) -> Option<Mmap> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) => {
            warn!("cannot open {}: {err}", path.display());
            return None;
        }
    };
    match unsafe { Mmap::map(&file) } {
        Ok(mmap) => Some(mmap),
        Err(err) => {
            warn!("cannot map {}: {err}", path.display());
            None
        }
    }
}

impl SymbolOwner for LocalSymbolOwner {
    fn declared_base_address(&self, path: &Path, _image: &BinaryImage) -> Option<u64> {
        let mmap = mmap_file(path)?;
        let object = object::File::parse(&*mmap).ok()?;
        object.segments().map(|segment| segment.address()).min()
    }

    fn symbol_entries(&self, path: &Path, _image: &BinaryImage) -> Vec<(u64, String)> {
        let Some(mmap) = mmap_file(path) else {
            return Vec::new();
        };
        let object = match object::File::parse(&*mmap) {
            Ok(object) => object,
            Err(err) => {
                warn!("cannot parse {}: {err}", path.display());
                return Vec::new();
            }
        };
        let mut entries: Vec<(u64, String)> = object
            .symbols()
            .filter(|symbol| symbol.kind() == SymbolKind::Text && symbol.address() != 0)
            .filter_map(|symbol| Some((symbol.address(), symbol.name().ok()?.to_string())))
            .collect();
        if entries.is_empty() {
            // Stripped binaries often still export through the dynamic
            // table.
            entries = object
                .dynamic_symbols()
                .filter(|symbol| symbol.kind() == SymbolKind::Text && symbol.address() != 0)
                .filter_map(|symbol| Some((symbol.address(), symbol.name().ok()?.to_string())))
                .collect();
        }
        debug!("{}: {} text symbols", path.display(), entries.len());
        entries
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
