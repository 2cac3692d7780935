use std::collections::BTreeMap;
use std::ops::Range;
use std::path::PathBuf;

use crate::demangle::demangle;
use crate::image::BinaryImage;
use crate::shared::{rooted_path, unslid, SymbolInfo, SymbolOwner};

/// A caller-supplied per-image override map: unslid address to symbol name.
/// Entries here always win over the image's compiled-in symbol table, since
/// they typically carry more complete debug data.
pub type OverrideMap = BTreeMap<u64, String>;

/// Resolves raw backtrace addresses to symbols.
///
/// One `Symbolicator` is constructed per run and passed to whatever needs
/// it; there is deliberately no process-wide shared instance. It borrows
/// the symbol owner collaborator and, optionally, a system root under which
/// image paths are resolved (for symbolicating reports captured on another
/// system).
pub struct Symbolicator<'a> {
    owner: &'a dyn SymbolOwner,
    system_root: Option<PathBuf>,
}

impl<'a> Symbolicator<'a> {
    pub fn new(owner: &'a dyn SymbolOwner) -> Self {
        Self {
            owner,
            system_root: None,
        }
    }

    pub fn with_system_root(owner: &'a dyn SymbolOwner, system_root: PathBuf) -> Self {
        Self {
            owner,
            system_root: Some(system_root),
        }
    }

    /// The address range of the shared system cache, if the owner has one
    /// mapped.
    pub fn shared_cache_range(&self) -> Option<Range<u64>> {
        self.owner.shared_cache().map(|cache| cache.range)
    }

    /// The image path as handed to the symbol owner, adjusted for the
    /// system root.
    pub fn resolved_path(&self, image: &BinaryImage) -> PathBuf {
        rooted_path(self.system_root.as_deref(), &image.path)
    }

    /// Resolves `address` against `image`.
    ///
    /// The override map, when present, takes precedence over the image's
    /// own symbol table. An address that falls below every known symbol
    /// yields `name = None` with the offset taken from the image base.
    pub fn resolve(
        &self,
        address: u64,
        image: &BinaryImage,
        override_map: Option<&OverrideMap>,
    ) -> SymbolInfo {
        let path = self.resolved_path(image);
        let slide = image.slide(&path, self.owner);
        let adjusted = unslid(address, slide);

        if let Some(map) = override_map {
            if let Some((&symbol_address, name)) = map.range(..=adjusted).next_back() {
                return SymbolInfo {
                    name: Some(demangle(name)),
                    offset: adjusted - symbol_address,
                    source_path: None,
                    source_line: None,
                };
            }
        }

        match image.symbol_table(&path, self.owner).lookup(adjusted) {
            Some(entry) => {
                let source = self.owner.source_location(&path, image, adjusted);
                SymbolInfo {
                    name: Some(demangle(&entry.name)),
                    offset: adjusted - entry.address,
                    source_path: source.as_ref().map(|s| s.path.clone()),
                    source_line: source.map(|s| s.line),
                }
            }
            // No covering symbol: report the frame's offset within the
            // loaded image instead.
            None => SymbolInfo {
                name: None,
                offset: address.saturating_sub(image.address),
                source_path: None,
                source_line: None,
            },
        }
    }
}
