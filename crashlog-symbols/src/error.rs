use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Malformed report in the {section} section (line {line}): {reason}")]
    MalformedReport {
        section: &'static str,
        line: usize,
        reason: String,
    },

    #[error("Overlapping binary image ranges: {0:#x}..{1:#x} collides with {2:#x}..{3:#x}")]
    OverlappingImageRanges(u64, u64, u64, u64),

    #[error("The input is neither a text-format crash log nor a property list")]
    UnrecognizedFormat,

    #[error("Property list error: {0}")]
    Plist(#[from] plist::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn malformed(
        section: &'static str,
        line: usize,
        reason: impl Into<String>,
    ) -> Self {
        Error::MalformedReport {
            section,
            line,
            reason: reason.into(),
        }
    }
}
