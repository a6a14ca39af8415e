#![cfg_attr(docsrs, feature(doc_cfg))]

//! This crate contains the format side of PKG installation: the container
//! parser, AES-128 primitives, a resumable SHA-256 and decoders for the nested
//! PSP formats (disc images and protected data files).
//!
//! It performs no network or filesystem access of its own. Payload bytes are
//! fed in by the caller, which makes every operation usable from a resumable
//! download loop.
//!
//! # Optional Features
//!
//! - **serde**: Implements `Serialize` and `Deserialize` for [`StreamHasher`],
//!   [`ContentKind`] and [`EntryKind`] so they can be persisted.

pub mod container;
pub mod crypto;
pub mod lzrc;
pub mod psp;

mod error;
mod hash;
mod reader;

pub use container::{
    Container, ContainerHeader, ContentKind, EntryKind, FileIndexEntry, Metadata, PayloadCipher,
};
pub use error::Error;
pub use hash::StreamHasher;
pub use reader::Reader;

/// A `Result` alias where the `Err` case is `pkgdl_pkg::Error`.
pub type Result<T> = std::result::Result<T, Error>;
