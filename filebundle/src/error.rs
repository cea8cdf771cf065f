use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while writing or reading a file bundle
#[derive(Error, Debug)]
pub enum BundleError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Corrupt bundle {path:?}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("CRC mismatch at segment offset {offset}, len {len}, file {path:?}")]
    CrcMismatch {
        path: PathBuf,
        offset: u64,
        len: usize,
    },

    #[error("Position {position} (len {len}) is not within a segment")]
    OutOfRange { position: u64, len: usize },

    #[error("Record of {size} bytes does not fit in segment break {segment_break}")]
    RecordTooLarge { size: u64, segment_break: u64 },

    #[error("Record buffer of {0} bytes cannot hold a CRC")]
    RecordTooSmall(usize),

    #[error("Segment break {0} must be within 1..=u32::MAX")]
    InvalidSegmentBreak(u64),

    #[error("Too many segments in {0:?}")]
    TooManySegments(PathBuf),

    #[error("Bundle {0:?} is already closed")]
    Closed(PathBuf),
}

impl BundleError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        BundleError::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns whether the error means the on-disk data cannot be trusted
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            BundleError::Corrupt { .. } | BundleError::CrcMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, BundleError>;
