//! Error types for container parsing and payload decoding.

use thiserror::Error;

/// The errors that may occur when parsing or decoding a container.
#[derive(Debug, Error)]
pub enum Error {
    /// Structural violation in the container (bad magic, out of range offsets).
    #[error("pkg file is too small or corrupted: {0}")]
    CorruptContainer(String),

    /// Content kind declared by the metadata is not one of the supported kinds.
    #[error("unsupported package type: {0}")]
    UnsupportedPackageType(u32),

    /// Key type selector in the header extension is not known.
    #[error("invalid key type {0}")]
    UnsupportedKeyType(u8),

    /// Compressed block is truncated or references data outside its bounds.
    #[error("corrupt compressed stream: {0}")]
    CorruptStream(&'static str),

    /// Decompressed block did not have the expected size.
    #[error("lzrc decompression failed, expected {expected} bytes but got {actual} bytes")]
    DecompressionFailed { expected: usize, actual: usize },

    /// Embedded sub-format which cannot be decoded.
    #[error("unsupported {0}")]
    Unsupported(String),

    /// I/O error while reading or writing payload data.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn corrupt<T: Into<String>>(reason: T) -> Self {
        Self::CorruptContainer(reason.into())
    }
}
