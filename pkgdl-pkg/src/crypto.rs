//! AES-128 primitives used by the container format.
//!
//! Bulk payload data is decrypted with [`ctr_transform`], which can start at any
//! byte offset of the payload. [`cmac`] and [`chained_block_decrypt`] are only
//! used by the nested PSP sub-formats.

use aes::{
    Aes128Dec, Aes128Enc,
    cipher::{
        BlockDecrypt, BlockEncrypt, InnerIvInit, KeyInit, StreamCipher, StreamCipherSeek,
        generic_array::GenericArray,
    },
};

type Aes128Ctr = ctr::Ctr128BE<Aes128Enc>;

/// Expanded round keys for encryption.
#[derive(Clone)]
pub struct EncryptKeySchedule(Aes128Enc);

/// Expanded round keys for decryption.
#[derive(Clone)]
pub struct DecryptKeySchedule(Aes128Dec);

/// Expands a 16 byte key into encryption round keys.
///
/// # Panics
///
/// If `key` is not exactly 16 bytes long.
pub fn schedule_encrypt(key: &[u8]) -> EncryptKeySchedule {
    assert_eq!(key.len(), 16, "aes-128 key must be 16 bytes long");
    EncryptKeySchedule(Aes128Enc::new(GenericArray::from_slice(key)))
}

/// Expands a 16 byte key into decryption round keys.
/// The schedule is derived from the encryption schedule.
///
/// # Panics
///
/// If `key` is not exactly 16 bytes long.
pub fn schedule_decrypt(key: &[u8]) -> DecryptKeySchedule {
    schedule_encrypt(key).inverse()
}

impl EncryptKeySchedule {
    /// Derives the decryption schedule by inverting these round keys.
    pub fn inverse(&self) -> DecryptKeySchedule {
        DecryptKeySchedule(Aes128Dec::from(&self.0))
    }

    pub fn encrypt_block(&self, block: &mut [u8; 16]) {
        self.0.encrypt_block(GenericArray::from_mut_slice(block));
    }
}

impl DecryptKeySchedule {
    pub fn decrypt_block(&self, block: &mut [u8; 16]) {
        self.0.decrypt_block(GenericArray::from_mut_slice(block));
    }
}

/// XORs `buffer` with the counter mode keystream starting `offset` bytes into
/// the stream defined by `iv`.
///
/// The counter is the whole 16 byte `iv` as a big endian integer, so carries
/// propagate through every byte and wrap at 2^128.
pub fn ctr_transform(schedule: &EncryptKeySchedule, iv: &[u8; 16], offset: u64, buffer: &mut [u8]) {
    let core = ctr::CtrCore::inner_iv_init(schedule.0.clone(), GenericArray::from_slice(iv));
    let mut cipher = Aes128Ctr::from_core(core);
    cipher.seek(offset);
    cipher.apply_keystream(buffer);
}

/// One-shot AES-CMAC (RFC 4493).
pub fn cmac(key: &[u8; 16], data: &[u8]) -> [u8; 16] {
    let schedule = schedule_encrypt(key);

    let mut subkey = [0; 16];
    schedule.encrypt_block(&mut subkey);
    subkey = gf_double(subkey);

    let complete = !data.is_empty() && data.len() % 16 == 0;

    if !complete {
        subkey = gf_double(subkey);
    }

    let blocks = data.len().div_ceil(16).max(1);
    let (body, last) = data.split_at((blocks - 1) * 16);
    let mut mac = [0; 16];

    for block in body.chunks_exact(16) {
        xor_into(&mut mac, block);
        schedule.encrypt_block(&mut mac);
    }

    let mut tail = [0; 16];
    tail[..last.len()].copy_from_slice(last);

    if !complete {
        tail[last.len()] = 0x80;
    }

    xor_into(&mut mac, &tail);
    xor_into(&mut mac, &subkey);
    schedule.encrypt_block(&mut mac);
    mac
}

/// Decrypts `buffer` in place using the PSP chained block mode.
///
/// Every block is XORed with the decryption of a counter block (the first 12
/// bytes of `iv` followed by a little endian block number) and with the
/// previous counter block. When starting at `block_index` zero the previous
/// block is all zeros. The transform does not depend on the data, so it is its
/// own inverse and can be applied in pieces.
///
/// # Panics
///
/// If `buffer` length is not a multiple of 16.
pub fn chained_block_decrypt(
    schedule: &DecryptKeySchedule,
    iv: &[u8; 16],
    block_index: u32,
    buffer: &mut [u8],
) {
    assert!(
        buffer.len() % 16 == 0,
        "chained block buffer must be a multiple of 16 bytes"
    );

    let mut counter = *iv;
    counter[12..].copy_from_slice(&block_index.to_le_bytes());

    let mut prev = if block_index == 0 { [0; 16] } else { counter };
    let mut index = block_index;

    for block in buffer.chunks_exact_mut(16) {
        index = index.wrapping_add(1);
        counter[12..].copy_from_slice(&index.to_le_bytes());

        let mut out = counter;
        schedule.decrypt_block(&mut out);

        xor_into(block, &prev);
        xor_into(block, &out);
        prev = counter;
    }
}

pub(crate) fn xor_into(dst: &mut [u8], src: &[u8]) {
    dst.iter_mut().zip(src).for_each(|(d, s)| *d ^= s);
}

fn gf_double(block: [u8; 16]) -> [u8; 16] {
    let value = u128::from_be_bytes(block);
    ((value << 1) ^ ((value >> 127) * 0x87)).to_be_bytes()
}
