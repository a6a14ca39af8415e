//! Builders for the nested PSP formats, encrypted the way a PSP package stores them.

use pkgdl::pkgdl_pkg::{
    crypto::{self, DecryptKeySchedule},
    psp::ISO_SECTOR_SIZE,
};

const KIRK7_KEY38: [u8; 16] = [
    0x12, 0x46, 0x8d, 0x7e, 0x1c, 0x42, 0x20, 0x9b, 0xba, 0x54, 0x26, 0x83, 0x5e, 0xb0, 0x33, 0x03,
];
const KIRK7_KEY39: [u8; 16] = [
    0xc4, 0x3b, 0xb6, 0xd6, 0x53, 0xee, 0x67, 0x49, 0x3e, 0xa9, 0x5f, 0xbc, 0x0c, 0xed, 0x6f, 0x8a,
];
const KIRK7_KEY63: [u8; 16] = [
    0x9c, 0x9b, 0x13, 0x72, 0xf8, 0xc6, 0x40, 0xcf, 0x1c, 0x62, 0xf5, 0xd5, 0x92, 0xdd, 0xb5, 0x82,
];
const AMCTL_HASHKEY_3: [u8; 16] = [
    0xe3, 0x50, 0xed, 0x1d, 0x91, 0x0a, 0x1f, 0xd0, 0x29, 0xbb, 0x1c, 0x3e, 0xf3, 0x40, 0x77, 0xfb,
];
const AMCTL_HASHKEY_4: [u8; 16] = [
    0x13, 0x5f, 0xa4, 0x7c, 0xab, 0x39, 0x5b, 0xa4, 0x76, 0xb8, 0xcc, 0xa9, 0x8f, 0x3a, 0x04, 0x45,
];
const AMCTL_HASHKEY_5: [u8; 16] = [
    0x67, 0x8d, 0x7f, 0xa3, 0x2a, 0x9c, 0xa0, 0xd1, 0x50, 0x8a, 0xd8, 0x38, 0x5e, 0x4b, 0x01, 0x7e,
];

const PSAR_OFFSET: usize = 0x30;
const TABLE_OFFSET: usize = 0x100;
const BLOCKS_OFFSET: usize = 0x200;
const FLAG_PLAIN: u32 = 4;
const EDAT_KEY_HEADER_OFFSET: usize = 0x90;
const EDAT_DATA_OFFSET: u32 = 0x90;

const EBOOT_IV: [u8; 16] = [
    0x4d, 0x02, 0xe9, 0x71, 0xa8, 0x3f, 0x16, 0xcb, 0x5a, 0x90, 0x27, 0xde, 0x63, 0x0b, 0xf4, 0x88,
];
const EDAT_IV: [u8; 16] = [
    0xb6, 0x19, 0x7e, 0x20, 0xd5, 0x43, 0x8a, 0x0c, 0x61, 0xf7, 0x3b, 0xa2, 0x0e, 0x95, 0xc8, 0x54,
];

fn xor_into(dst: &mut [u8], src: &[u8]) {
    dst.iter_mut().zip(src).for_each(|(d, s)| *d ^= s);
}

fn psp_key() -> DecryptKeySchedule {
    crypto::schedule_decrypt(&KIRK7_KEY63)
}

/// Chained mode IV of a data file, from its plain key header.
fn data_iv(mac: &[u8; 16], header: &[u8]) -> [u8; 16] {
    let mut tmp = [0; 16];
    tmp.copy_from_slice(&header[0x70..0x80]);
    crypto::schedule_decrypt(&KIRK7_KEY38).decrypt_block(&mut tmp);

    let mut iv = *mac;
    xor_into(&mut iv, &tmp);
    xor_into(&mut iv, &header[0x30..0x40]);
    xor_into(&mut iv, &AMCTL_HASHKEY_3);
    xor_into(&mut iv, &AMCTL_HASHKEY_5);
    crypto::schedule_decrypt(&KIRK7_KEY39).decrypt_block(&mut iv);
    xor_into(&mut iv, &AMCTL_HASHKEY_4);
    iv
}

/// Wrapped key block from which a decoder derives `iv`.
fn wrap_key_block(executable: bool, iv: &[u8; 16], mac: &[u8; 16], salt: &[u8]) -> [u8; 16] {
    let mut block = *iv;
    xor_into(&mut block, &AMCTL_HASHKEY_4);
    crypto::schedule_encrypt(&KIRK7_KEY39).encrypt_block(&mut block);
    xor_into(&mut block, mac);
    xor_into(&mut block, salt);
    xor_into(&mut block, &AMCTL_HASHKEY_3);
    xor_into(&mut block, &AMCTL_HASHKEY_5);
    crypto::schedule_encrypt(&KIRK7_KEY38).encrypt_block(&mut block);

    if executable {
        crypto::schedule_encrypt(&KIRK7_KEY63).encrypt_block(&mut block);
    }

    block
}

pub fn sector(seed: u8) -> Vec<u8> {
    (0..ISO_SECTOR_SIZE)
        .map(|i| (i as u8).wrapping_mul(seed).wrapping_add(seed))
        .collect()
}

/// `EBOOT.PBP` holding one sector per block. Odd blocks are encrypted.
/// The executable carries trailing bytes past the image.
pub fn eboot(sectors: &[Vec<u8>]) -> Vec<u8> {
    let key = psp_key();
    let mut data_offset = BLOCKS_OFFSET as u32;
    let mut table = Vec::new();
    let mut blocks = Vec::new();

    for (i, sector) in sectors.iter().enumerate() {
        let flags = if i % 2 == 0 { FLAG_PLAIN } else { 0 };
        let mut stored = sector.clone();

        if flags & FLAG_PLAIN == 0 {
            crypto::chained_block_decrypt(&key, &EBOOT_IV, data_offset / 16, &mut stored);
        }

        let t = [0x1234_0000 + i as u32, 0x0bad_f00d, 0x3c3c_3c3c, 0x0f0f_0f0f];
        let words = [
            t[0],
            t[1],
            t[2],
            t[3],
            data_offset ^ t[2] ^ t[3],
            stored.len() as u32 ^ t[1] ^ t[2],
            flags ^ t[0] ^ t[3],
            0,
        ];
        words.iter().for_each(|x| table.extend_from_slice(&x.to_le_bytes()));

        blocks.extend_from_slice(&stored);
        data_offset += stored.len() as u32;
    }

    let mut header = [0_u8; 0x100];
    header[..8].copy_from_slice(b"NPUMDIMG");
    header[0x0c..0x10].copy_from_slice(&1_u32.to_le_bytes());
    header[0x64..0x68].copy_from_slice(&(sectors.len() as u32 + 1).to_le_bytes());
    header[0x6c..0x70].copy_from_slice(&(TABLE_OFFSET as u32).to_le_bytes());
    header[0xa0..0xb0].copy_from_slice(&[0x5c; 16]);
    crypto::chained_block_decrypt(&key, &EBOOT_IV, 0, &mut header[0x40..0xa0]);

    let mac = crypto::cmac(&KIRK7_KEY38, &header[..0xc0]);
    let wrapped = wrap_key_block(true, &EBOOT_IV, &mac, &header[0xa0..0xb0]);
    header[0xc0..0xd0].copy_from_slice(&wrapped);

    let mut file = vec![0_u8; PSAR_OFFSET];
    file[..4].copy_from_slice(b"\0PBP");
    file[0x24..0x28].copy_from_slice(&(PSAR_OFFSET as u32).to_le_bytes());
    file.extend_from_slice(&header);
    file.resize(PSAR_OFFSET + TABLE_OFFSET, 0);
    file.extend_from_slice(&table);
    file.resize(PSAR_OFFSET + BLOCKS_OFFSET, 0);
    file.extend_from_slice(&blocks);
    file.extend_from_slice(&[0xee; 100]);
    file
}

/// Protected data file (`.EDAT`) with key index 1 and drm type 1.
pub fn edat(plain: &[u8]) -> Vec<u8> {
    let key = psp_key();
    let mut key_header = [0_u8; 0x80];
    key_header[..4].copy_from_slice(b"\0PGD");
    key_header[4..8].copy_from_slice(&1_u32.to_le_bytes());
    key_header[8..12].copy_from_slice(&1_u32.to_le_bytes());
    key_header[0x10..0x20].copy_from_slice(&[0x71; 16]);
    key_header[0x30..0x40].copy_from_slice(&[0x2a; 16]);
    key_header[0x44..0x48].copy_from_slice(&(plain.len() as u32).to_le_bytes());
    key_header[0x4c..0x50].copy_from_slice(&EDAT_DATA_OFFSET.to_le_bytes());

    let mut plain_header = key_header;
    crypto::chained_block_decrypt(&key, &EDAT_IV, 0, &mut key_header[0x30..0x60]);

    let mac = crypto::cmac(&KIRK7_KEY38, &key_header[..0x70]);
    let wrapped = wrap_key_block(false, &EDAT_IV, &mac, &key_header[0x10..0x20]);
    key_header[0x70..0x80].copy_from_slice(&wrapped);
    plain_header[0x70..0x80].copy_from_slice(&wrapped);

    let mut data = plain.to_vec();
    data.resize(plain.len().div_ceil(16) * 16, 0);
    crypto::chained_block_decrypt(&key, &data_iv(&mac, &plain_header), 0, &mut data);

    let mut file = vec![0_u8; EDAT_KEY_HEADER_OFFSET];
    file[..4].copy_from_slice(b"\0NPD");
    file[0x0c] = EDAT_KEY_HEADER_OFFSET as u8;
    file.extend_from_slice(&key_header);
    file.resize(EDAT_KEY_HEADER_OFFSET + EDAT_DATA_OFFSET as usize, 0);
    file.extend_from_slice(&data[..plain.len()]);
    file.resize(file.len().max(0x130) + 48, 0);
    file
}
