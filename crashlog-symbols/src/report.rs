use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use log::warn;

use crate::blame::{self, BlameFilter, BlameInfo};
use crate::error::Error;
use crate::image::BinaryImage;
use crate::registry::ImageRegistry;
use crate::shared::PackageProvider;
use crate::symbolicator::{OverrideMap, Symbolicator};
use crate::{plist_format, text_format};

/// Ordered process metadata from the report header (`Process`, `Path`,
/// `Identifier`, `Version`, `OS Version`, ...). Insertion order is the
/// render order.
pub type ProcessInfo = IndexMap<String, String>;

/// Override symbol maps, keyed by binary image identity: the image path or
/// its UUID (with or without hyphens).
pub type SymbolMaps = HashMap<String, OverrideMap>;

/// An ordered stack unwind; depth 0 is the innermost, faulting frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Backtrace {
    pub frames: Vec<StackFrame>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub depth: u32,
    /// Raw runtime address. 0 if the captured token wasn't valid hex; such
    /// frames stay unresolved.
    pub address: u64,
    /// Load address of the owning binary image, 0 if unknown.
    pub image_address: u64,
    pub symbol_info: Option<crate::shared::SymbolInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    pub exception_type: String,
    pub backtrace: Backtrace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thread {
    /// The thread number as captured in the report. Numbering need not be
    /// contiguous; render order follows the vector, labels follow this.
    pub number: u32,
    pub name: Option<String>,
    pub crashed: bool,
    pub backtrace: Backtrace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    /// Sniff the input: property lists start with `bplist00`, `<?xml` or
    /// `<plist`; everything else is treated as text.
    Auto,
    Text,
    PropertyList,
}

/// A parsed crash report: the typed object graph plus the annotations the
/// symbolicator and the blame engine write back into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashReport {
    pub process_info: ProcessInfo,
    pub exception: Option<Exception>,
    /// Exactly one entry has `crashed == true`.
    pub threads: Vec<Thread>,
    pub register_state: Vec<(String, String)>,
    /// Keyed by load address; ranges are pairwise non-overlapping.
    pub binary_images: BTreeMap<u64, BinaryImage>,
    /// Which serialization the report was parsed from.
    pub is_property_list: bool,
    pub is_symbolicated: bool,
    pub is_blamed: bool,
    pub blame_info: Option<BlameInfo>,
}

impl CrashReport {
    pub fn parse(data: &[u8], format: ReportFormat) -> Result<Self, Error> {
        let format = match format {
            ReportFormat::Auto => detect_format(data),
            other => other,
        };
        match format {
            ReportFormat::PropertyList => plist_format::parse(data),
            ReportFormat::Text | ReportFormat::Auto => {
                let text =
                    std::str::from_utf8(data).map_err(|_| Error::UnrecognizedFormat)?;
                text_format::parse(text)
            }
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let data = fs::read(path)?;
        Self::parse(&data, ReportFormat::Auto)
    }

    /// Serializes the report, reflecting whatever subset of symbolication
    /// and blame annotations is present.
    pub fn render(&self, as_property_list: bool) -> Result<String, Error> {
        if as_property_list {
            plist_format::render(self)
        } else {
            Ok(text_format::render(self))
        }
    }

    /// Writes the rendered report to `path`. The property-list form is used
    /// if the report was parsed from one, or if `force_property_list` is
    /// set.
    pub fn write_to_file(
        &self,
        path: impl AsRef<Path>,
        force_property_list: bool,
    ) -> Result<(), Error> {
        let rendered = self.render(force_property_list || self.is_property_list)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    pub fn crashed_thread(&self) -> Option<&Thread> {
        self.threads.iter().find(|thread| thread.crashed)
    }

    /// Resolves every stack frame in the report.
    ///
    /// Frames whose address falls outside every registered image are left
    /// unresolved; that is expected, not an error. Returns `false` if the
    /// report was already symbolicated (the pass is skipped).
    pub fn symbolicate(
        &mut self,
        symbolicator: &Symbolicator,
        symbol_maps: &SymbolMaps,
    ) -> Result<bool, Error> {
        if self.is_symbolicated {
            return Ok(false);
        }
        let registry =
            ImageRegistry::new(self.binary_images.values(), symbolicator.shared_cache_range())?;
        if let Some(exception) = &mut self.exception {
            resolve_backtrace(
                &mut exception.backtrace,
                &self.binary_images,
                &registry,
                symbolicator,
                symbol_maps,
            );
        }
        for thread in &mut self.threads {
            resolve_backtrace(
                &mut thread.backtrace,
                &self.binary_images,
                &registry,
                symbolicator,
                symbol_maps,
            );
        }
        self.is_symbolicated = true;
        Ok(true)
    }

    /// Attributes the crash to one binary image, writing the result into
    /// `blame_info` and the image's `blamable` flag. Re-running with
    /// different filters overwrites the previous outcome. Returns whether a
    /// culprit was found; finding none is a valid outcome.
    pub fn blame(
        &mut self,
        filter: &BlameFilter,
        packages: Option<&dyn PackageProvider>,
    ) -> Result<bool, Error> {
        let blamed = blame::run(self, filter, packages)?;
        self.is_blamed = blamed.is_some();
        Ok(blamed.is_some())
    }
}

fn detect_format(data: &[u8]) -> ReportFormat {
    let head = data
        .iter()
        .position(|byte| !byte.is_ascii_whitespace())
        .map_or(&b""[..], |start| &data[start..]);
    if data.starts_with(b"bplist00")
        || head.starts_with(b"<?xml")
        || head.starts_with(b"<plist")
    {
        ReportFormat::PropertyList
    } else {
        ReportFormat::Text
    }
}

fn override_map_for<'m>(
    symbol_maps: &'m SymbolMaps,
    image: &BinaryImage,
) -> Option<&'m OverrideMap> {
    symbol_maps
        .get(&image.path)
        .or_else(|| symbol_maps.get(&image.uuid.simple().to_string()))
        .or_else(|| symbol_maps.get(&image.uuid.hyphenated().to_string()))
}

fn resolve_backtrace(
    backtrace: &mut Backtrace,
    images: &BTreeMap<u64, BinaryImage>,
    registry: &ImageRegistry,
    symbolicator: &Symbolicator,
    symbol_maps: &SymbolMaps,
) {
    for frame in &mut backtrace.frames {
        if frame.address == 0 {
            frame.symbol_info = None;
            continue;
        }
        let key = if frame.image_address != 0 && images.contains_key(&frame.image_address) {
            Some(frame.image_address)
        } else {
            registry.image_containing(frame.address)
        };
        match key.and_then(|key| images.get(&key)) {
            Some(image) => {
                frame.image_address = image.address;
                let map = override_map_for(symbol_maps, image);
                frame.symbol_info = Some(symbolicator.resolve(frame.address, image, map));
            }
            None => {
                warn!(
                    "no binary image covers frame {} at {:#x}",
                    frame.depth, frame.address
                );
                frame.symbol_info = None;
            }
        }
    }
}
