//! Nested PSP formats found inside PSP packages.
//!
//! Both formats are keyed by an IV derived from a CMAC of their own header,
//! independent of the package key, and are decrypted with the chained block
//! mode under a fixed key.

mod pgd;
mod psar;

pub use pgd::decrypt_pgd;
pub use psar::{ISO_SECTOR_SIZE, reconstruct_iso};

use crate::{
    Error, Result,
    crypto::{self, DecryptKeySchedule},
};
use std::io::{self, Read};

pub(crate) const KIRK7_KEY38: [u8; 16] = [
    0x12, 0x46, 0x8d, 0x7e, 0x1c, 0x42, 0x20, 0x9b, 0xba, 0x54, 0x26, 0x83, 0x5e, 0xb0, 0x33, 0x03,
];
pub(crate) const KIRK7_KEY39: [u8; 16] = [
    0xc4, 0x3b, 0xb6, 0xd6, 0x53, 0xee, 0x67, 0x49, 0x3e, 0xa9, 0x5f, 0xbc, 0x0c, 0xed, 0x6f, 0x8a,
];
pub(crate) const KIRK7_KEY63: [u8; 16] = [
    0x9c, 0x9b, 0x13, 0x72, 0xf8, 0xc6, 0x40, 0xcf, 0x1c, 0x62, 0xf5, 0xd5, 0x92, 0xdd, 0xb5, 0x82,
];
pub(crate) const AMCTL_HASHKEY_3: [u8; 16] = [
    0xe3, 0x50, 0xed, 0x1d, 0x91, 0x0a, 0x1f, 0xd0, 0x29, 0xbb, 0x1c, 0x3e, 0xf3, 0x40, 0x77, 0xfb,
];
pub(crate) const AMCTL_HASHKEY_4: [u8; 16] = [
    0x13, 0x5f, 0xa4, 0x7c, 0xab, 0x39, 0x5b, 0xa4, 0x76, 0xb8, 0xcc, 0xa9, 0x8f, 0x3a, 0x04, 0x45,
];
pub(crate) const AMCTL_HASHKEY_5: [u8; 16] = [
    0x67, 0x8d, 0x7f, 0xa3, 0x2a, 0x9c, 0xa0, 0xd1, 0x50, 0x8a, 0xd8, 0x38, 0x5e, 0x4b, 0x01, 0x7e,
];

fn block_at(header: &[u8], offset: usize) -> [u8; 16] {
    let mut block = [0; 16];
    block.copy_from_slice(&header[offset..offset + 16]);
    block
}

/// Schedule used for the chained block mode of both formats.
pub(crate) fn psp_key() -> DecryptKeySchedule {
    crypto::schedule_decrypt(&KIRK7_KEY63)
}

/// Derives the chained mode IV from a header and its CMAC.
///
/// `key_offset` points at the wrapped key block, which executables wrap once
/// more under key 63. `salt_offset` points at a header block mixed into the IV.
pub(crate) fn derive_iv(
    executable: bool,
    mac: &[u8; 16],
    header: &[u8],
    key_offset: usize,
    salt_offset: usize,
) -> [u8; 16] {
    let mut tmp = block_at(header, key_offset);

    if executable {
        psp_key().decrypt_block(&mut tmp);
    }

    crypto::schedule_decrypt(&KIRK7_KEY38).decrypt_block(&mut tmp);

    let mut iv = *mac;
    crypto::xor_into(&mut iv, &tmp);
    crypto::xor_into(&mut iv, &header[salt_offset..salt_offset + 16]);
    crypto::xor_into(&mut iv, &AMCTL_HASHKEY_3);
    crypto::xor_into(&mut iv, &AMCTL_HASHKEY_5);
    crypto::schedule_decrypt(&KIRK7_KEY39).decrypt_block(&mut iv);
    crypto::xor_into(&mut iv, &AMCTL_HASHKEY_4);
    iv
}

/// Sequential reader which only allows skipping forward.
pub(crate) struct ForwardReader<R> {
    inner: R,
    position: u64,
}

impl<R: Read> ForwardReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self { inner, position: 0 }
    }

    pub(crate) fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner.read_exact(buf)?;
        self.position += buf.len() as u64;
        Ok(())
    }

    /// Reads `size` bytes into a buffer which grows as data arrives.
    pub(crate) fn read_to_vec(&mut self, size: u64) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let read = (&mut self.inner).take(size).read_to_end(&mut buf)? as u64;
        self.position += read;

        if read != size {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }

        Ok(buf)
    }

    pub(crate) fn skip_to(&mut self, position: u64) -> Result<()> {
        if position < self.position {
            return Err(Error::corrupt(format!(
                "can't seek backward to {}",
                position
            )));
        }

        let wanted = position - self.position;
        let skipped = io::copy(&mut (&mut self.inner).take(wanted), &mut io::sink())?;
        self.position += skipped;

        if skipped != wanted {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }

        Ok(())
    }
}
