use std::path::Path;
use std::sync::{Arc, OnceLock};

use log::debug;
use uuid::Uuid;

use crate::shared::SymbolOwner;
use crate::symbol_table::SymbolTable;

/// One binary image loaded into the crashed process's address space.
///
/// The symbol table and the ASLR slide are computed lazily, at most once per
/// image, and shared read-only across all frames resolved against this
/// image. The one-time cells make concurrent first use safe.
#[derive(Debug, Clone)]
pub struct BinaryImage {
    pub path: String,
    pub address: u64,
    pub size: u64,
    pub architecture: String,
    pub uuid: Uuid,
    /// Set by the blame engine; true only on the image blamed last.
    pub blamable: bool,
    /// True if this image is the crashed process's own executable.
    pub crashed_process_image: bool,
    symbol_table: OnceLock<Arc<SymbolTable>>,
    slide: OnceLock<i64>,
}

impl BinaryImage {
    pub fn new(path: String, address: u64, size: u64, architecture: String, uuid: Uuid) -> Self {
        Self {
            path,
            address,
            size,
            architecture,
            uuid,
            blamable: false,
            crashed_process_image: false,
            symbol_table: OnceLock::new(),
            slide: OnceLock::new(),
        }
    }

    /// The last path component, as written in frame lines.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Last address covered by this image (inclusive).
    pub fn end_address(&self) -> u64 {
        self.address + self.size.saturating_sub(1)
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.address && address < self.address.saturating_add(self.size)
    }

    /// True for images that live in OS territory; such images are never
    /// blamed unless they are the crashed process itself.
    pub fn is_system_image(&self) -> bool {
        !self.crashed_process_image
            && (self.path.starts_with("/System/") || self.path.starts_with("/usr/lib/"))
    }

    /// The image's symbol table, built from the symbol owner on first use.
    ///
    /// `resolved_path` is the image path already adjusted for any system
    /// root.
    pub fn symbol_table(&self, resolved_path: &Path, owner: &dyn SymbolOwner) -> &Arc<SymbolTable> {
        self.symbol_table.get_or_init(|| {
            let table = SymbolTable::new(owner.symbol_entries(resolved_path, self));
            debug!(
                "built symbol table for {} ({} entries)",
                self.path,
                table.len()
            );
            Arc::new(table)
        })
    }

    /// Runtime load offset of this image: loaded address minus the base
    /// address declared in its header. Images inside the shared cache slide
    /// as a unit, by the cache's slide.
    pub fn slide(&self, resolved_path: &Path, owner: &dyn SymbolOwner) -> i64 {
        *self.slide.get_or_init(|| {
            if let Some(base) = owner.declared_base_address(resolved_path, self) {
                return self.address.wrapping_sub(base) as i64;
            }
            if let Some(cache) = owner.shared_cache() {
                if cache.range.contains(&self.address) {
                    return cache.slide;
                }
            }
            0
        })
    }
}

// Equality over the captured metadata; the lazily built caches are
// derived state and don't participate.
impl PartialEq for BinaryImage {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
            && self.address == other.address
            && self.size == other.size
            && self.architecture == other.architecture
            && self.uuid == other.uuid
            && self.blamable == other.blamable
            && self.crashed_process_image == other.crashed_process_image
    }
}

impl Eq for BinaryImage {}
