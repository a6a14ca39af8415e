//! PKG container header, metadata chain and encrypted file index.
//!
//! All multi-byte fields are big endian. The layout of the head of a container is
//!
//! ```text
//! 0x000  header (0xc0 bytes, magic 0x7f504b47)
//! 0x0c0  header extension (0x40 bytes, magic 0x7f657874)
//! ....   metadata records, chained as (type, size, payload)
//! enc    file index entries (32 bytes each), then entry names
//! ....   file data, each entry padded to 16 bytes
//! ....   trailer (480 bytes)
//! ```

use crate::{
    Error, Result,
    crypto::{self, EncryptKeySchedule},
    reader::Reader,
};

pub const HEADER_SIZE: usize = 0xc0;
pub const HEADER_EXT_SIZE: usize = 0x40;
pub const TAIL_SIZE: u64 = 480;
pub const ENTRY_SIZE: usize = 32;
pub const CONTENT_ID_SIZE: usize = 0x30;

pub const MAGIC: u32 = 0x7f50_4b47;
pub const EXT_MAGIC: u32 = 0x7f65_7874;

const PKG_PSP_KEY: [u8; 16] = [
    0x07, 0xf2, 0xc6, 0x82, 0x90, 0xb5, 0x0d, 0x2c, 0x33, 0x81, 0x8d, 0x70, 0x9b, 0x60, 0xe6, 0x2b,
];
const PKG_VITA_2: [u8; 16] = [
    0xe3, 0x1a, 0x70, 0xc9, 0xce, 0x1d, 0xd7, 0x2b, 0xf3, 0xc0, 0x62, 0x29, 0x63, 0xf2, 0xec, 0xcb,
];
const PKG_VITA_3: [u8; 16] = [
    0x42, 0x3a, 0xca, 0x3a, 0x2b, 0xd5, 0x64, 0x9f, 0x96, 0x86, 0xab, 0xad, 0x6f, 0xd8, 0x80, 0x1f,
];
const PKG_VITA_4: [u8; 16] = [
    0xaf, 0x07, 0xfd, 0x59, 0x65, 0x25, 0x27, 0xba, 0xf1, 0x33, 0x89, 0x66, 0x8b, 0x17, 0xd9, 0xea,
];

const META_CONTENT_TYPE: u32 = 2;
const META_INDEX_TABLE: u32 = 13;

const ENTRY_DIRECTORY: u8 = 4;
const ENTRY_SKIP: u8 = 18;

/// Fixed fields of a container header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerHeader {
    pub revision: u16,
    pub package_type: u16,
    pub meta_offset: u32,
    pub meta_count: u32,
    pub index_count: u32,
    pub total_size: u64,
    /// Absolute offset of the encrypted payload region.
    pub enc_offset: u64,
    pub enc_size: u64,
    pub content_id: [u8; CONTENT_ID_SIZE],
    pub iv: [u8; 16],
    pub key_type: u8,
    /// Package key derived from `key_type` and `iv`.
    pub key: [u8; 16],
}

impl ContainerHeader {
    /// Content id with trailing padding removed.
    pub fn content_id(&self) -> String {
        let end = self
            .content_id
            .iter()
            .position(|x| *x == 0)
            .unwrap_or(CONTENT_ID_SIZE);
        String::from_utf8_lossy(&self.content_id[..end]).into_owned()
    }

    /// Absolute offset of the first byte after the payload region.
    /// [`parse_header`] guarantees this doesn't overflow.
    pub fn payload_end(&self) -> u64 {
        self.enc_offset + self.enc_size
    }

    pub fn cipher(&self) -> PayloadCipher {
        PayloadCipher::new(&self.key, &self.iv)
    }
}

/// Counter mode decryptor for the payload region.
/// Offsets are relative to the start of the payload region.
#[derive(Clone)]
pub struct PayloadCipher {
    schedule: EncryptKeySchedule,
    iv: [u8; 16],
}

impl PayloadCipher {
    pub fn new(key: &[u8; 16], iv: &[u8; 16]) -> Self {
        Self {
            schedule: crypto::schedule_encrypt(key),
            iv: *iv,
        }
    }

    pub fn apply(&self, offset: u64, buffer: &mut [u8]) {
        crypto::ctr_transform(&self.schedule, &self.iv, offset, buffer);
    }
}

/// Derives the package key selected by `key_type`.
pub fn derive_key(key_type: u8, iv: &[u8; 16]) -> Result<[u8; 16]> {
    let wrapping_key = match key_type {
        1 => return Ok(PKG_PSP_KEY),
        2 => &PKG_VITA_2,
        3 => &PKG_VITA_3,
        4 => &PKG_VITA_4,
        x => return Err(Error::UnsupportedKeyType(x)),
    };

    let mut key = *iv;
    crypto::schedule_encrypt(wrapping_key).encrypt_block(&mut key);
    Ok(key)
}

/// Checks that `id` can be used as a directory name. Content ids only consist of
/// upper case letters, digits, `_` and `-`.
pub fn is_valid_content_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() < CONTENT_ID_SIZE
        && id
            .bytes()
            .all(|x| x.is_ascii_uppercase() || x.is_ascii_digit() || x == b'_' || x == b'-')
}

/// Parses the header and header extension from the first
/// `HEADER_SIZE + HEADER_EXT_SIZE` bytes of a container.
pub fn parse_header(bytes: &[u8]) -> Result<ContainerHeader> {
    if bytes.len() < HEADER_SIZE + HEADER_EXT_SIZE {
        return Err(Error::corrupt("header is truncated"));
    }

    let mut reader = Reader::new_big_endian(bytes);

    if reader.read_u32()? != MAGIC || reader.peek_u32_at(HEADER_SIZE as u64)? != EXT_MAGIC {
        return Err(Error::corrupt("wrong pkg header"));
    }

    let revision = reader.read_u16()?;
    let package_type = reader.read_u16()?;
    let meta_offset = reader.read_u32()?;
    let meta_count = reader.read_u32()?;
    reader.skip(4)?;
    let index_count = reader.read_u32()?;
    let total_size = reader.read_u64()?;
    let enc_offset = reader.read_u64()?;
    let enc_size = reader.read_u64()?;
    let content_id = reader.read_array::<CONTENT_ID_SIZE>()?;
    reader.seek(0x70)?;
    let iv = reader.read_array::<16>()?;
    let key_type = bytes[0xe7] & 7;

    if enc_offset < (HEADER_SIZE + HEADER_EXT_SIZE) as u64 {
        return Err(Error::corrupt("payload overlaps header"));
    }

    match enc_offset.checked_add(enc_size) {
        Some(end) if end <= total_size => (),
        _ => return Err(Error::corrupt("payload exceeds total size")),
    }

    let header = ContainerHeader {
        revision,
        package_type,
        meta_offset,
        meta_count,
        index_count,
        total_size,
        enc_offset,
        enc_size,
        content_id,
        iv,
        key_type,
        key: derive_key(key_type, &iv)?,
    };

    if !is_valid_content_id(&header.content_id()) {
        return Err(Error::corrupt(format!(
            "invalid content id {:?}",
            header.content_id()
        )));
    }

    Ok(header)
}

/// Kind of content stored in a container.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ContentKind {
    PsxGame,
    PspGame,
    PspGameAlt,
    PspMiniGame,
    PspNeoGeoGame,
    /// Vita application or its update.
    VitaGame,
    VitaDlc,
    PsmGame,
    PsmGameAlt,
}

impl ContentKind {
    pub fn from_code(code: u32) -> Result<Self> {
        Ok(match code {
            6 => Self::PsxGame,
            7 => Self::PspGame,
            14 => Self::PspGameAlt,
            15 => Self::PspMiniGame,
            16 => Self::PspNeoGeoGame,
            21 => Self::VitaGame,
            22 => Self::VitaDlc,
            24 => Self::PsmGame,
            29 => Self::PsmGameAlt,
            x => return Err(Error::UnsupportedPackageType(x)),
        })
    }

    pub fn code(&self) -> u32 {
        match self {
            Self::PsxGame => 6,
            Self::PspGame => 7,
            Self::PspGameAlt => 14,
            Self::PspMiniGame => 15,
            Self::PspNeoGeoGame => 16,
            Self::VitaGame => 21,
            Self::VitaDlc => 22,
            Self::PsmGame => 24,
            Self::PsmGameAlt => 29,
        }
    }

    pub fn is_psx(&self) -> bool {
        matches!(self, Self::PsxGame)
    }

    pub fn is_psp(&self) -> bool {
        matches!(
            self,
            Self::PspGame | Self::PspGameAlt | Self::PspMiniGame | Self::PspNeoGeoGame
        )
    }

    pub fn is_vita(&self) -> bool {
        matches!(self, Self::VitaGame | Self::VitaDlc)
    }

    pub fn is_psm(&self) -> bool {
        matches!(self, Self::PsmGame | Self::PsmGameAlt)
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::PsxGame => "psx game",
                Self::PspGame | Self::PspGameAlt => "psp game",
                Self::PspMiniGame => "psp mini game",
                Self::PspNeoGeoGame => "psp neogeo game",
                Self::VitaGame => "vita game",
                Self::VitaDlc => "vita dlc",
                Self::PsmGame | Self::PsmGameAlt => "psm game",
            }
        )
    }
}

/// Values collected from the metadata record chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Metadata {
    pub content_kind: ContentKind,
    /// Size of the index region as declared by the index table record.
    pub index_size: Option<u32>,
}

/// Walks the metadata chain. `head` must hold the container bytes up to the
/// payload region.
pub fn walk_metadata(header: &ContainerHeader, head: &[u8]) -> Result<Metadata> {
    let mut reader = Reader::new_big_endian(head);
    let mut offset = header.meta_offset as u64;
    let mut content_kind = None;
    let mut index_size = None;

    for _ in 0..header.meta_count {
        if offset + 16 >= header.enc_offset || offset + 16 > head.len() as u64 {
            return Err(Error::corrupt("metadata record runs past its region"));
        }

        reader.seek(offset)?;
        let record_type = reader.read_u32()?;
        let size = reader.read_u32()?;

        match record_type {
            META_CONTENT_TYPE => {
                content_kind = Some(ContentKind::from_code(reader.read_u32()?)?);
            }
            META_INDEX_TABLE => {
                reader.skip(4)?;
                index_size = Some(reader.read_u32()?).filter(|x| *x != 0);
            }
            _ => (),
        }

        offset += 8 + size as u64;
    }

    Ok(Metadata {
        content_kind: content_kind
            .ok_or_else(|| Error::corrupt("metadata has no content type record"))?,
        index_size,
    })
}

/// Reads ahead into the first index entry to find the size of the index region
/// (entries plus names). The first entry's data offset marks the end of that
/// region. `head` must hold at least the first index entry.
pub fn index_region_size(
    header: &ContainerHeader,
    metadata: &Metadata,
    head: &[u8],
) -> Result<u64> {
    let entries_size = header.index_count as u64 * ENTRY_SIZE as u64;

    if header.index_count == 0 {
        return Ok(metadata.index_size.unwrap_or(0) as u64);
    }

    let start = header.enc_offset as usize;
    let mut item = head
        .get(start..start.saturating_add(ENTRY_SIZE))
        .and_then(|x| <[u8; ENTRY_SIZE]>::try_from(x).ok())
        .ok_or_else(|| Error::corrupt("file index is truncated"))?;
    header.cipher().apply(0, &mut item);

    let size = Reader::new_big_endian(&item).peek_u64_at(8)?;

    if let Some(expected) = metadata.index_size {
        if size != expected as u64 {
            return Err(Error::corrupt(format!(
                "read-ahead mismatch, expected: {}, got: {}",
                expected, size
            )));
        }
    }

    if size < entries_size || header.enc_offset.saturating_add(size) > header.total_size {
        return Err(Error::corrupt(format!("invalid file index size {}", size)));
    }

    Ok(size)
}

/// How an index entry is handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EntryKind {
    File,
    Directory,
    Skip,
}

/// A decrypted file index entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileIndexEntry {
    pub name: String,
    pub name_offset: u32,
    pub name_size: u32,
    /// Offset of the data relative to the payload region.
    pub data_offset: u64,
    pub data_size: u64,
    pub flags: u8,
    pub kind: EntryKind,
}

impl FileIndexEntry {
    /// Number of bytes the entry occupies in the stream.
    pub fn padded_size(&self) -> Result<u64> {
        self.data_size
            .div_ceil(16)
            .checked_mul(16)
            .ok_or_else(|| Error::corrupt(format!("size of {} is out of range", self.name)))
    }
}

/// Decrypts entry `index` of the file index and its name.
/// `head` must hold the whole index region.
pub fn decode_index_entry(
    header: &ContainerHeader,
    cipher: &PayloadCipher,
    head: &[u8],
    index: u32,
) -> Result<FileIndexEntry> {
    let offset = index as u64 * ENTRY_SIZE as u64;
    let start = header.enc_offset.saturating_add(offset) as usize;
    let mut item = head
        .get(start..start.saturating_add(ENTRY_SIZE))
        .and_then(|x| <[u8; ENTRY_SIZE]>::try_from(x).ok())
        .ok_or_else(|| Error::corrupt(format!("file index entry {} is truncated", index)))?;
    cipher.apply(offset, &mut item);

    let mut reader = Reader::new_big_endian(&item);
    let name_offset = reader.read_u32()?;
    let name_size = reader.read_u32()?;
    let data_offset = reader.read_u64()?;
    let data_size = reader.read_u64()?;
    let flags = item[27];

    let name_start = header.enc_offset.saturating_add(name_offset as u64);
    let name_end = name_start.saturating_add(name_size as u64);

    if name_end > header.total_size || name_end > head.len() as u64 {
        return Err(Error::corrupt(format!("name of entry {} is out of range", index)));
    }

    let mut name = head[name_start as usize..name_end as usize].to_vec();
    cipher.apply(name_offset as u64, &mut name);

    while name.last() == Some(&0) {
        name.pop();
    }

    let name = String::from_utf8_lossy(&name).into_owned();

    if name.starts_with('/')
        || name.starts_with('\\')
        || name.contains(':')
        || name.split(['/', '\\']).any(|x| x == "..")
    {
        return Err(Error::corrupt(format!("unsafe entry name {}", name)));
    }

    let kind = match flags {
        ENTRY_DIRECTORY => EntryKind::Directory,
        ENTRY_SKIP => EntryKind::Skip,
        _ => EntryKind::File,
    };

    Ok(FileIndexEntry {
        name,
        name_offset,
        name_size,
        data_offset,
        data_size,
        flags,
        kind,
    })
}

/// A parsed container head: header, metadata and the extent of the file index.
#[derive(Clone)]
pub struct Container {
    pub header: ContainerHeader,
    pub metadata: Metadata,
    /// Size of the index region (entries and names).
    pub index_size: u64,
    cipher: PayloadCipher,
}

impl Container {
    pub fn new(header: ContainerHeader, metadata: Metadata, index_size: u64) -> Self {
        Self {
            cipher: header.cipher(),
            header,
            metadata,
            index_size,
        }
    }

    /// Parses a complete head, as cached on disk or read from a local file.
    pub fn parse(head: &[u8]) -> Result<Self> {
        let header = parse_header(head)?;

        if (head.len() as u64) < header.enc_offset {
            return Err(Error::corrupt("head is truncated"));
        }

        let metadata = walk_metadata(&header, head)?;
        let index_size = index_region_size(&header, &metadata, head)?;

        if (head.len() as u64) < header.enc_offset.saturating_add(index_size) {
            return Err(Error::corrupt("file index is truncated"));
        }

        Ok(Self::new(header, metadata, index_size))
    }

    /// Absolute offset of the first byte after the index region.
    pub fn head_size(&self) -> u64 {
        self.header.enc_offset + self.index_size
    }

    pub fn cipher(&self) -> &PayloadCipher {
        &self.cipher
    }

    pub fn entry(&self, head: &[u8], index: u32) -> Result<FileIndexEntry> {
        decode_index_entry(&self.header, &self.cipher, head, index)
    }

    pub fn entries(&self, head: &[u8]) -> Result<Vec<FileIndexEntry>> {
        (0..self.header.index_count)
            .map(|i| self.entry(head, i))
            .collect()
    }
}
