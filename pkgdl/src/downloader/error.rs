//! Error type returned by the download engine.

use std::io;
use thiserror::Error;

/// The errors that may occur while installing a package.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Structural violation in the container.
    #[error("pkg file is too small or corrupted: {0}")]
    CorruptContainer(String),

    /// Content kind is not supported.
    #[error("unsupported package type: {0}")]
    UnsupportedPackageType(u32),

    /// Key type is not supported.
    #[error("invalid key type {0}")]
    UnsupportedKeyType(u8),

    /// Head of the container does not fit the in-memory limit.
    #[error("pkg head of {size} bytes is larger than the supported {limit} bytes")]
    UnsupportedLargeHeader { size: u64, limit: u64 },

    /// Nested file format which cannot be decoded.
    #[error("unsupported {0}")]
    UnsupportedContent(String),

    /// File data is not laid out in ascending, contiguous order.
    #[error("pkg is not supported, file offset mismatch, expected: {expected}, actual: {actual}")]
    FilesOutOfOrder { expected: u64, actual: u64 },

    /// Digest of the downloaded container does not match the expected one.
    #[error("pkg integrity failed, try downloading again")]
    IntegrityFailed,

    /// Compressed disc image block could not be decoded.
    #[error("{0}, pkg may be corrupted")]
    DecompressionFailed(String),

    /// Resume data was written by an unknown version.
    #[error("invalid resume data version {0}, resume data deleted")]
    UnsupportedResumeVersion(u8),

    /// Resume data does not match the cached head.
    #[error("can't resume download: {0}, resume data deleted")]
    InvalidResumeState(String),

    /// License belongs to another package.
    #[error("license content id doesn't match pkg")]
    LicenseMismatch,

    /// Input stream ended before all data was received.
    #[error("connection closed")]
    ConnectionClosed,

    /// Network layer failure.
    #[error("{0}")]
    Transport(String),

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(io::Error),

    /// Download was canceled by the caller.
    #[error("download was canceled")]
    Canceled,
}

impl DownloadError {
    /// Returns true if running the download again may succeed.
    /// Resume data is kept, so the next attempt continues from the last checkpoint.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed
                | Self::Transport(_)
                | Self::UnsupportedResumeVersion(_)
                | Self::InvalidResumeState(_)
        )
    }

    /// Returns true if the next attempt will start from the beginning.
    pub fn requires_restart(&self) -> bool {
        matches!(
            self,
            Self::IntegrityFailed | Self::UnsupportedResumeVersion(_) | Self::InvalidResumeState(_)
        )
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

impl From<io::Error> for DownloadError {
    /// Unwraps engine errors that passed through an [`io::Read`] adaptor.
    fn from(e: io::Error) -> Self {
        if !e.get_ref().is_some_and(|x| x.is::<DownloadError>()) {
            return Self::Io(e);
        }

        match e.into_inner().map(|x| x.downcast::<DownloadError>()) {
            Some(Ok(inner)) => *inner,
            _ => Self::Io(io::Error::other("invalid wrapped download error")),
        }
    }
}

impl From<pkgdl_pkg::Error> for DownloadError {
    fn from(e: pkgdl_pkg::Error) -> Self {
        match e {
            pkgdl_pkg::Error::CorruptContainer(x) => Self::CorruptContainer(x),
            pkgdl_pkg::Error::UnsupportedPackageType(x) => Self::UnsupportedPackageType(x),
            pkgdl_pkg::Error::UnsupportedKeyType(x) => Self::UnsupportedKeyType(x),
            pkgdl_pkg::Error::Unsupported(x) => Self::UnsupportedContent(x),
            e @ (pkgdl_pkg::Error::CorruptStream(_)
            | pkgdl_pkg::Error::DecompressionFailed { .. }) => {
                Self::DecompressionFailed(e.to_string())
            }
            pkgdl_pkg::Error::Io(e) => e.into(),
        }
    }
}
