use std::collections::HashSet;
use std::path::Path;

use log::{debug, warn};

use crate::error::Error;
use crate::registry::ImageRegistry;
use crate::report::CrashReport;
use crate::shared::PackageProvider;

/// Selects which images are exempt from blame, beyond the baseline rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BlameFilter {
    /// Baseline rules only: skip frames without an owning image, system
    /// images, and the symbolication library itself.
    #[default]
    None,
    /// Additionally skip images whose path matches one of these patterns.
    /// A pattern is an exact path, or a prefix when it ends in `*`.
    ByPath(HashSet<String>),
    /// Additionally skip images installed by one of these packages.
    ByPackage(HashSet<String>),
}

/// Diagnostic annotations recorded for the blamed image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlameInfo {
    pub path: String,
    pub install_date: Option<String>,
}

/// The library must never blame the binary that hosts it.
const HOST_LIBRARY_SUFFIXES: &[&str] = &["/libcrashlog.dylib"];

fn is_host_library(path: &str) -> bool {
    HOST_LIBRARY_SUFFIXES
        .iter()
        .any(|suffix| path.ends_with(suffix))
}

fn path_matches(pattern: &str, path: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => path.starts_with(prefix),
        None => pattern == path,
    }
}

/// Walks the crash's backtrace and picks the first image that survives the
/// baseline rules and `filter`. The exception's backtrace takes precedence
/// over the crashed thread's when both exist, since it represents the
/// actual fault point.
///
/// Clears any earlier blame annotations first, so re-running with different
/// filters overwrites rather than accumulates. Returns the load address of
/// the blamed image.
pub(crate) fn run(
    report: &mut CrashReport,
    filter: &BlameFilter,
    packages: Option<&dyn PackageProvider>,
) -> Result<Option<u64>, Error> {
    for image in report.binary_images.values_mut() {
        image.blamable = false;
    }
    report.blame_info = None;

    let registry = ImageRegistry::new(report.binary_images.values(), None)?;

    let frames: Vec<(u64, u64)> = {
        let backtrace = match &report.exception {
            Some(exception) if !exception.backtrace.frames.is_empty() => &exception.backtrace,
            _ => match report.crashed_thread() {
                Some(thread) => &thread.backtrace,
                None => return Ok(None),
            },
        };
        backtrace
            .frames
            .iter()
            .map(|frame| (frame.address, frame.image_address))
            .collect()
    };

    for (address, image_address) in frames {
        let key = if image_address != 0 && report.binary_images.contains_key(&image_address) {
            Some(image_address)
        } else {
            registry.image_containing(address)
        };
        let Some(key) = key else {
            continue;
        };
        let Some(image) = report.binary_images.get(&key) else {
            continue;
        };

        if is_host_library(&image.path) || image.is_system_image() {
            continue;
        }

        match filter {
            BlameFilter::None => {}
            BlameFilter::ByPath(excluded) => {
                if excluded
                    .iter()
                    .any(|pattern| path_matches(pattern, &image.path))
                {
                    debug!("blame: {} excluded by path filter", image.path);
                    continue;
                }
            }
            BlameFilter::ByPackage(excluded) => match packages {
                Some(provider) => {
                    let identifier = provider.package_identifier(Path::new(&image.path));
                    if identifier.is_some_and(|id| excluded.contains(&id)) {
                        debug!("blame: {} excluded by package filter", image.path);
                        continue;
                    }
                }
                None => {
                    warn!("blame: ByPackage filter given but no package provider; not filtering");
                }
            },
        }

        let install_date =
            packages.and_then(|provider| provider.install_date(Path::new(&image.path)));
        if let Some(image) = report.binary_images.get_mut(&key) {
            image.blamable = true;
            report.blame_info = Some(BlameInfo {
                path: image.path.clone(),
                install_date,
            });
        }
        return Ok(Some(key));
    }

    Ok(None)
}
