use super::{ForwardReader, KIRK7_KEY38, derive_iv, psp_key};
use crate::{Error, Result, crypto};
use byteorder::{ByteOrder, LittleEndian};
use std::io::{Read, Write};

const MIN_SIZE: u64 = 0x90 + 0xa0;
const FILE_HEADER_SIZE: usize = 0x5a;
const KEY_HEADER_SIZE: usize = 0x80;
const DATA_OFFSET: u32 = 0x90;
const CHUNK_SIZE: usize = 64 * 1024;

/// Decrypts a protected data file (`.EDAT`) of `size` bytes to `output`.
/// Returns the number of plain bytes written.
///
/// Only files with key index 1 and drm type 1 are supported.
pub fn decrypt_pgd<R: Read, W: Write>(input: R, size: u64, output: &mut W) -> Result<u64> {
    let mut input = ForwardReader::new(input);

    if size < MIN_SIZE {
        return Err(Error::corrupt("EDAT file is too short"));
    }

    let mut file_header = [0; FILE_HEADER_SIZE];
    input.read_exact(&mut file_header)?;
    let key_header_offset = file_header[0x0c] as u64;
    input.skip_to(key_header_offset)?;

    let mut key_header = [0; KEY_HEADER_SIZE];
    input.read_exact(&mut key_header)?;

    if &key_header[..4] != b"\0PGD" {
        return Err(Error::corrupt("wrong EDAT header magic"));
    }

    let key_index = LittleEndian::read_u32(&key_header[4..]);
    let drm_type = LittleEndian::read_u32(&key_header[8..]);

    if key_index != 1 || drm_type != 1 {
        return Err(Error::Unsupported(format!(
            "EDAT file, key index {} drm type {}",
            key_index, drm_type
        )));
    }

    let mac = crypto::cmac(&KIRK7_KEY38, &key_header[..0x70]);
    let key = psp_key();
    let iv = derive_iv(false, &mac, &key_header, 0x70, 0x10);
    crypto::chained_block_decrypt(&key, &iv, 0, &mut key_header[0x30..0x60]);

    let data_size = LittleEndian::read_u32(&key_header[0x44..]) as u64;
    let data_offset = LittleEndian::read_u32(&key_header[0x4c..]);

    if data_offset != DATA_OFFSET {
        return Err(Error::Unsupported(format!(
            "EDAT file, data offset {:#x}",
            data_offset
        )));
    }

    let data_start = key_header_offset + data_offset as u64;

    if data_start + data_size > size {
        return Err(Error::corrupt("EDAT data exceeds file size"));
    }

    let iv = derive_iv(false, &mac, &key_header, 0x70, 0x30);
    input.skip_to(data_start)?;

    let mut chunk = vec![0; CHUNK_SIZE];
    let mut done = 0;

    while done < data_size {
        let read = (data_size - done).min(CHUNK_SIZE as u64) as usize;
        let padded = read.div_ceil(16) * 16;
        chunk[..padded].fill(0);
        input.read_exact(&mut chunk[..read])?;
        crypto::chained_block_decrypt(&key, &iv, (done / 16) as u32, &mut chunk[..padded]);
        output.write_all(&chunk[..read])?;
        done += read as u64;
    }

    Ok(data_size)
}
