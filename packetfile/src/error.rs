use std::io;
use std::path::PathBuf;

use filebundle::BundleError;
use thiserror::Error;

use crate::pool::ReaderToken;

#[derive(Error, Debug)]
pub enum PacketFileError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Bundle error: {0}")]
    Bundle(BundleError),

    #[error("Corrupt index {path:?}: {reason}")]
    CorruptIndex { path: PathBuf, reason: String },

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    #[error("Invalid quadtree path {0:?}")]
    InvalidPath(String),

    #[error("Packet of {0} bytes is too large for a portable bundle")]
    PacketTooLarge(usize),

    #[error("Payload of {actual} bytes does not match a block allocated for {expected}")]
    BlockSizeMismatch { expected: usize, actual: usize },

    #[error("Token {token:?} was not issued by pool {pool:?}")]
    ForeignToken { token: ReaderToken, pool: String },

    #[error("Token {token:?} is out of range for pool {pool:?} ({len} slots)")]
    TokenOutOfRange {
        token: ReaderToken,
        pool: String,
        len: usize,
    },

    #[error("Token {token:?} refers to a closed reader in pool {pool:?}")]
    ReaderClosed { token: ReaderToken, pool: String },

    #[error("Writer for {0:?} is already closed")]
    Closed(PathBuf),

    #[error("Path {path} put after {last}, paths must come in preorder")]
    OutOfOrder { path: String, last: String },

    #[error("Entry refers to packet file {0}, which was never added")]
    UnknownPacketFile(u32),
}

impl From<BundleError> for PacketFileError {
    fn from(e: BundleError) -> Self {
        match e {
            BundleError::Io(e) => PacketFileError::Io(e),
            BundleError::CrcMismatch { path, offset, len } => PacketFileError::CorruptRecord(
                format!("CRC mismatch in {:?} at offset {}, len {}", path, offset, len),
            ),
            other => PacketFileError::Bundle(other),
        }
    }
}

impl PacketFileError {
    pub(crate) fn corrupt_index(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        PacketFileError::CorruptIndex {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns whether the error means stored data cannot be trusted, as
    /// opposed to an I/O failure or a caller mistake
    pub fn is_corruption(&self) -> bool {
        match self {
            PacketFileError::CorruptIndex { .. } | PacketFileError::CorruptRecord(_) => true,
            PacketFileError::Bundle(e) => e.is_corruption(),
            _ => false,
        }
    }

    /// Returns whether the error comes from misusing a reader pool token
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            PacketFileError::ForeignToken { .. }
                | PacketFileError::TokenOutOfRange { .. }
                | PacketFileError::ReaderClosed { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PacketFileError>;
