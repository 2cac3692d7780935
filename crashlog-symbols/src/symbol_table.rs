/// One exported symbol of a binary image, in the image's declared (unslid)
/// address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolTableEntry {
    pub address: u64,
    pub name: String,
}

/// Ordered index over a binary image's exported symbol addresses.
///
/// Ordering policy: entries are kept sorted by *descending* address, so the
/// nearest-preceding symbol for a target address is the first entry whose
/// address is `<= target`. When several input entries share an address, the
/// first-seen one wins and the rest are discarded.
///
/// The table is built once per image and never mutated afterwards, so
/// concurrent lookups are safe.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SymbolTable {
    entries: Vec<SymbolTableEntry>,
}

impl SymbolTable {
    pub fn new(entries: impl IntoIterator<Item = (u64, String)>) -> Self {
        let mut entries: Vec<SymbolTableEntry> = entries
            .into_iter()
            .map(|(address, name)| SymbolTableEntry { address, name })
            .collect();
        // Stable sort, so entries at the same address keep their input
        // order and dedup keeps the first-seen one.
        entries.sort_by(|a, b| b.address.cmp(&a.address));
        entries.dedup_by_key(|entry| entry.address);
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns the entry with the greatest address `<= target`, or `None`
    /// if `target` is below the lowest entry. O(log n).
    pub fn lookup(&self, target: u64) -> Option<&SymbolTableEntry> {
        let index = self.entries.partition_point(|entry| entry.address > target);
        self.entries.get(index)
    }

    /// Iterates entries in descending address order.
    pub fn iter(&self) -> impl Iterator<Item = &SymbolTableEntry> {
        self.entries.iter()
    }
}
