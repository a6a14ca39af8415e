use super::DownloadError;
use log::debug;
use pkgdl_pkg::{Container, ContentKind, StreamHasher};
use serde::{Deserialize, Serialize};
use std::{ffi::OsString, fs, io, path::Path};

pub const RESUME_VERSION: u8 = 1;

/// Checkpoint of an installation, persisted after every index entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownloadState {
    pub save_as_iso: bool,
    /// Absolute offset in the container stream.
    pub offset: u64,
    pub total_size: u64,
    /// Hash of every byte before `offset`.
    pub hasher: StreamHasher,
    pub key: [u8; 16],
    pub iv: [u8; 16],
    pub index_count: u32,
    pub enc_offset: u64,
    pub enc_size: u64,
    pub head_size: u64,
    pub content_kind: ContentKind,
    /// Next index entry to process.
    pub item_index: u32,
}

impl DownloadState {
    pub fn new(container: &Container, save_as_iso: bool, offset: u64, hasher: StreamHasher) -> Self {
        let header = &container.header;

        Self {
            save_as_iso,
            offset,
            total_size: header.total_size,
            hasher,
            key: header.key,
            iv: header.iv,
            index_count: header.index_count,
            enc_offset: header.enc_offset,
            enc_size: header.enc_size,
            head_size: container.head_size(),
            content_kind: container.metadata.content_kind,
            item_index: 0,
        }
    }

    /// Loads resume data, `None` if there is nothing to resume.
    pub fn load(path: &Path) -> Result<Option<Self>, DownloadError> {
        let bytes = match fs::read(path) {
            Ok(x) => x,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        debug!("download resume file found");

        match bytes.split_first() {
            Some((&RESUME_VERSION, data)) => bincode::deserialize(data)
                .map(Some)
                .map_err(|e| DownloadError::InvalidResumeState(e.to_string())),
            Some((version, _)) => Err(DownloadError::UnsupportedResumeVersion(*version)),
            None => Err(DownloadError::InvalidResumeState(
                "resume file is empty".to_owned(),
            )),
        }
    }

    /// Writes resume data next to `path` first, then moves it in place.
    pub fn save(&self, path: &Path) -> Result<(), DownloadError> {
        let mut bytes = vec![RESUME_VERSION];
        bytes.extend(bincode::serialize(self).map_err(io::Error::other)?);

        let mut temp = OsString::from(path.as_os_str());
        temp.push(".tmp");

        fs::write(&temp, bytes)?;
        fs::rename(&temp, path)?;
        Ok(())
    }

    /// Checks that this state belongs to `container` parsed from the cached head.
    pub fn validate(&self, container: &Container, head_len: u64) -> Result<(), String> {
        let header = &container.header;

        let checks = [
            (head_len == self.head_size && container.head_size() == self.head_size, "head size"),
            (header.total_size == self.total_size, "total size"),
            (header.key == self.key && header.iv == self.iv, "key material"),
            (header.index_count == self.index_count, "index count"),
            (header.enc_offset == self.enc_offset && header.enc_size == self.enc_size, "payload region"),
            (container.metadata.content_kind == self.content_kind, "content type"),
            (self.item_index <= self.index_count, "item index"),
            (self.offset <= self.total_size, "offset"),
            (self.hasher.len() == self.offset && self.hasher.is_consistent(), "hash state"),
        ];

        match checks.iter().find(|(ok, _)| !ok) {
            Some((_, what)) => Err(format!("{} doesn't match cached head", what)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> DownloadState {
        let mut hasher = StreamHasher::new();
        hasher.update(&[7; 100]);

        DownloadState {
            save_as_iso: false,
            offset: 100,
            total_size: 2000,
            hasher,
            key: [1; 16],
            iv: [2; 16],
            index_count: 3,
            enc_offset: 0x140,
            enc_size: 1000,
            head_size: 0x1c0,
            content_kind: ContentKind::VitaGame,
            item_index: 1,
        }
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("UP0000-TEST00000_00.resume");

        assert_eq!(DownloadState::load(&path).unwrap(), None);

        state().save(&path).unwrap();
        assert_eq!(DownloadState::load(&path).unwrap(), Some(state()));
        assert_eq!(fs::read(&path).unwrap()[0], RESUME_VERSION);
    }

    #[test]
    fn test_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("UP0000-TEST00000_00.resume");

        state().save(&path).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        bytes[0] = 2;
        fs::write(&path, bytes).unwrap();

        assert!(matches!(
            DownloadState::load(&path),
            Err(DownloadError::UnsupportedResumeVersion(2))
        ));
    }

    #[test]
    fn test_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("UP0000-TEST00000_00.resume");

        state().save(&path).unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        assert!(matches!(
            DownloadState::load(&path),
            Err(DownloadError::InvalidResumeState(_))
        ));
    }
}
