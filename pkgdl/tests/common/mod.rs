#![allow(dead_code)]

pub mod psp;

use pkgdl::{
    downloader::{DownloadError, Reporter, Source},
    pkgdl_pkg::{
        PayloadCipher,
        container::{ENTRY_SIZE, EXT_MAGIC, MAGIC, TAIL_SIZE, derive_key},
    },
};
use sha2::{Digest, Sha256};

pub const CONTENT_ID: &str = "UP0000-TEST00000_00";
pub const ENC_OFFSET: u64 = 0x140;
pub const IV: [u8; 16] = [
    0x91, 0x0e, 0x47, 0x2a, 0xc3, 0x5d, 0x18, 0x66, 0x7b, 0xe0, 0x24, 0x9f, 0x03, 0xba, 0x5c,
    0xd2,
];

const FLAG_FILE: u8 = 3;
const FLAG_DIRECTORY: u8 = 4;

struct Item {
    name: String,
    data: Vec<u8>,
    flags: u8,
}

/// Builds synthetic containers with a two record metadata chain at 0x100.
pub struct PackageBuilder {
    kind: u32,
    key_type: u8,
    content_id: String,
    items: Vec<Item>,
    offset_shift: Option<(usize, u64)>,
    declared_offset: Option<(usize, u64)>,
    declared_size: Option<(usize, u64)>,
}

pub struct Package {
    pub bytes: Vec<u8>,
    /// Absolute offset of the data of each item.
    pub data_starts: Vec<u64>,
    pub head_size: u64,
}

impl Package {
    pub fn sha256(&self) -> [u8; 32] {
        Sha256::digest(&self.bytes).into()
    }

    pub fn tail(&self) -> &[u8] {
        &self.bytes[self.bytes.len() - TAIL_SIZE as usize..]
    }
}

impl PackageBuilder {
    pub fn new(kind: u32) -> Self {
        Self {
            kind,
            key_type: 2,
            content_id: CONTENT_ID.to_owned(),
            items: Vec::new(),
            offset_shift: None,
            declared_offset: None,
            declared_size: None,
        }
    }

    pub fn content_id(mut self, content_id: &str) -> Self {
        self.content_id = content_id.to_owned();
        self
    }

    pub fn key_type(mut self, key_type: u8) -> Self {
        self.key_type = key_type;
        self
    }

    pub fn file(mut self, name: &str, data: &[u8]) -> Self {
        self.items.push(Item {
            name: name.to_owned(),
            data: data.to_vec(),
            flags: FLAG_FILE,
        });
        self
    }

    pub fn directory(mut self, name: &str) -> Self {
        self.items.push(Item {
            name: name.to_owned(),
            data: Vec::new(),
            flags: FLAG_DIRECTORY,
        });
        self
    }

    /// Moves the declared data offset of item `index` by `shift` bytes
    /// without moving its data.
    pub fn shift_offset(mut self, index: usize, shift: u64) -> Self {
        self.offset_shift = Some((index, shift));
        self
    }

    /// Replaces the declared data offset of item `index`.
    pub fn declare_offset(mut self, index: usize, offset: u64) -> Self {
        self.declared_offset = Some((index, offset));
        self
    }

    /// Replaces the declared data size of item `index`.
    pub fn declare_size(mut self, index: usize, size: u64) -> Self {
        self.declared_size = Some((index, size));
        self
    }

    pub fn build(&self) -> Package {
        let names: usize = self.items.iter().map(|x| x.name.len()).sum();
        let index_size = ((self.items.len() * ENTRY_SIZE + names) as u64).div_ceil(16) * 16;

        let mut payload = vec![0_u8; index_size as usize];
        let mut name_offset = self.items.len() * ENTRY_SIZE;
        let mut data_starts = Vec::new();

        for (i, item) in self.items.iter().enumerate() {
            let data_offset = payload.len() as u64;
            let declared = match (self.offset_shift, self.declared_offset) {
                (_, Some((index, offset))) if index == i => offset,
                (Some((index, shift)), _) if index == i => data_offset + shift,
                _ => data_offset,
            };
            let declared_size = match self.declared_size {
                Some((index, size)) if index == i => size,
                _ => item.data.len() as u64,
            };

            let entry = &mut payload[i * ENTRY_SIZE..(i + 1) * ENTRY_SIZE];
            entry[0..4].copy_from_slice(&(name_offset as u32).to_be_bytes());
            entry[4..8].copy_from_slice(&(item.name.len() as u32).to_be_bytes());
            entry[8..16].copy_from_slice(&declared.to_be_bytes());
            entry[16..24].copy_from_slice(&declared_size.to_be_bytes());
            entry[27] = item.flags;
            payload[name_offset..name_offset + item.name.len()]
                .copy_from_slice(item.name.as_bytes());
            name_offset += item.name.len();

            data_starts.push(ENC_OFFSET + data_offset);
            payload.extend_from_slice(&item.data);
            payload.resize(payload.len().div_ceil(16) * 16, 0);
        }

        let key = derive_key(self.key_type, &IV).unwrap_or([0; 16]);
        PayloadCipher::new(&key, &IV).apply(0, &mut payload);

        let enc_size = payload.len() as u64;
        let total_size = ENC_OFFSET + enc_size + TAIL_SIZE;

        let mut bytes = vec![0_u8; ENC_OFFSET as usize];
        bytes[0..4].copy_from_slice(&MAGIC.to_be_bytes());
        bytes[4..6].copy_from_slice(&0x8000_u16.to_be_bytes());
        bytes[6..8].copy_from_slice(&2_u16.to_be_bytes());
        bytes[8..12].copy_from_slice(&0x100_u32.to_be_bytes());
        bytes[12..16].copy_from_slice(&2_u32.to_be_bytes());
        bytes[20..24].copy_from_slice(&(self.items.len() as u32).to_be_bytes());
        bytes[24..32].copy_from_slice(&total_size.to_be_bytes());
        bytes[32..40].copy_from_slice(&ENC_OFFSET.to_be_bytes());
        bytes[40..48].copy_from_slice(&enc_size.to_be_bytes());
        bytes[48..48 + self.content_id.len()].copy_from_slice(self.content_id.as_bytes());
        bytes[0x70..0x80].copy_from_slice(&IV);
        bytes[0xc0..0xc4].copy_from_slice(&EXT_MAGIC.to_be_bytes());
        bytes[0xe7] = self.key_type;

        bytes[0x100..0x104].copy_from_slice(&2_u32.to_be_bytes());
        bytes[0x104..0x108].copy_from_slice(&4_u32.to_be_bytes());
        bytes[0x108..0x10c].copy_from_slice(&self.kind.to_be_bytes());
        bytes[0x10c..0x110].copy_from_slice(&13_u32.to_be_bytes());
        bytes[0x110..0x114].copy_from_slice(&8_u32.to_be_bytes());
        bytes[0x118..0x11c].copy_from_slice(&(index_size as u32).to_be_bytes());

        bytes.extend_from_slice(&payload);
        bytes.extend((0..TAIL_SIZE).map(|x| (x * 7) as u8));

        Package {
            bytes,
            data_starts,
            head_size: ENC_OFFSET + index_size,
        }
    }
}

/// License blob carrying `content_id` at 0x10.
pub fn license(content_id: &str) -> Vec<u8> {
    let mut license = vec![0_u8; 0x200];
    license[0x10..0x10 + content_id.len()].copy_from_slice(content_id.as_bytes());
    license
}

/// PSM license blob, which carries `content_id` at 0x50.
pub fn psm_license(content_id: &str) -> Vec<u8> {
    let mut license = vec![0_u8; 0x400];
    license[0x50..0x50 + content_id.len()].copy_from_slice(content_id.as_bytes());
    license
}

/// In-memory source which can simulate a dropped connection.
pub struct MemorySource {
    data: Vec<u8>,
    position: usize,
    max_read: usize,
    /// Reads return end of stream once this offset is reached.
    pub fail_at: Option<u64>,
    /// Offsets passed to every `start` call.
    pub starts: Vec<u64>,
}

impl MemorySource {
    pub fn new(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
            position: 0,
            max_read: 4096,
            fail_at: None,
            starts: Vec::new(),
        }
    }

    pub fn fail_at(mut self, offset: u64) -> Self {
        self.fail_at = Some(offset);
        self
    }

    pub fn max_read(mut self, max_read: usize) -> Self {
        self.max_read = max_read;
        self
    }
}

impl Source for MemorySource {
    fn start(&mut self, _url: &str, offset: u64) -> Result<Option<u64>, DownloadError> {
        self.starts.push(offset);
        self.position = offset as usize;
        Ok(Some(self.data.len() as u64 - offset))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DownloadError> {
        let end = match self.fail_at {
            Some(x) => (x as usize).min(self.data.len()),
            None => self.data.len(),
        };
        let n = buf
            .len()
            .min(self.max_read)
            .min(end.saturating_sub(self.position));

        buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }
}

/// Reporter which cancels once the stream reaches `cancel_at`.
#[derive(Default)]
pub struct Recorder {
    pub cancel_at: Option<u64>,
    pub offset: u64,
    pub total: u64,
    pub statuses: Vec<String>,
}

impl Reporter for Recorder {
    fn update_progress(&mut self, offset: u64, total: u64) {
        self.offset = offset;
        self.total = total;
    }

    fn update_status(&mut self, status: &str) {
        self.statuses.push(status.to_owned());
    }

    fn is_canceled(&self) -> bool {
        self.cancel_at.is_some_and(|x| self.offset >= x)
    }
}
