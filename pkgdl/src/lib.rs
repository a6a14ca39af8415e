//! Resumable download and installation of encrypted PKG packages.
//!
//! The [`downloader`] module holds the engine. It streams a container from a
//! [`Source`](downloader::Source), decrypts every entry while hashing the
//! bytes as received, and checkpoints its progress so an interrupted install
//! continues where it stopped.
//!
//! ```no_run
//! use pkgdl::downloader::{Download, DownloadOptions, FileSource};
//!
//! let options = DownloadOptions {
//!     install_root: "packages".into(),
//!     ..Default::default()
//! };
//! let mut download = Download::new(FileSource::new(), (), options);
//! let content_id = download.read_content_id("game.pkg")?;
//! let report = download.run(&content_id, "game.pkg", None, None)?;
//! println!("installed {} files", report.files);
//! # Ok::<(), pkgdl::downloader::DownloadError>(())
//! ```

pub mod downloader;

pub use pkgdl_pkg;
