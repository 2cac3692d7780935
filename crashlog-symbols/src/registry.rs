use std::ops::Range;

use crate::error::Error;
use crate::image::BinaryImage;

/// Maps the address space of one crash report to its loaded images.
///
/// Built from the report's binary-image list; construction validates that
/// image ranges are pairwise non-overlapping, because address attribution
/// would otherwise be ambiguous. Lookups return the owning image's load
/// address, which is the key into `CrashReport::binary_images`.
pub struct ImageRegistry {
    /// (start, end exclusive, load address), sorted by start.
    ranges: Vec<(u64, u64, u64)>,
    /// The shared system cache mapping, when one is known. Addresses inside
    /// it are matched by nearest-preceding image start instead of declared
    /// size, since cache members commonly underreport their sizes.
    shared_cache: Option<Range<u64>>,
}

impl ImageRegistry {
    pub fn new<'a>(
        images: impl IntoIterator<Item = &'a BinaryImage>,
        shared_cache: Option<Range<u64>>,
    ) -> Result<Self, Error> {
        let mut ranges: Vec<(u64, u64, u64)> = images
            .into_iter()
            .map(|image| {
                (
                    image.address,
                    image.address.saturating_add(image.size),
                    image.address,
                )
            })
            .collect();
        ranges.sort_unstable_by_key(|&(start, _, _)| start);
        // Compare each range against the furthest end seen so far, not just
        // its sorted neighbor: a zero-sized entry sorted between two
        // colliding ranges must not mask the collision.
        let mut covered: Option<(u64, u64)> = None;
        for &(start, end, _) in &ranges {
            if end <= start {
                // Zero-sized ranges are empty and can't collide.
                continue;
            }
            if let Some((covered_start, covered_end)) = covered {
                if start < covered_end {
                    return Err(Error::OverlappingImageRanges(
                        covered_start,
                        covered_end,
                        start,
                        end,
                    ));
                }
            }
            if covered.map_or(true, |(_, covered_end)| end > covered_end) {
                covered = Some((start, end));
            }
        }
        // Empty ranges can't contain an address; keeping them around would
        // only shadow the preceding real image during lookup.
        ranges.retain(|&(start, end, _)| end > start);
        Ok(Self {
            ranges,
            shared_cache,
        })
    }

    /// The load address of the image containing `address`, if any.
    pub fn image_containing(&self, address: u64) -> Option<u64> {
        let index = self
            .ranges
            .partition_point(|&(start, _, _)| start <= address);
        if index == 0 {
            return None;
        }
        let (start, end, key) = self.ranges[index - 1];
        if address < end {
            return Some(key);
        }
        // Inside the shared cache, trust the nearest-preceding image start
        // over its declared size.
        if let Some(cache) = &self.shared_cache {
            if cache.contains(&address) && cache.contains(&start) {
                return Some(key);
            }
        }
        None
    }

    pub fn is_in_shared_cache(&self, address: u64) -> bool {
        self.shared_cache
            .as_ref()
            .is_some_and(|cache| cache.contains(&address))
    }
}
