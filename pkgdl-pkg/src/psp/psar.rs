use super::{ForwardReader, KIRK7_KEY38, derive_iv, psp_key};
use crate::{Error, Result, crypto, lzrc};
use byteorder::{ByteOrder, LittleEndian};
use std::io::{Read, Write};

pub const ISO_SECTOR_SIZE: usize = 2048;

const EBOOT_HEADER_SIZE: usize = 0x28;
const PSAR_HEADER_SIZE: usize = 0x100;
const TABLE_ENTRY_SIZE: usize = 32;
const MAX_BLOCK_SECTORS: u32 = 16;
const FLAG_PLAIN: u32 = 4;

/// Rebuilds a flat disc image from a decrypted `EBOOT.PBP` of `size` bytes,
/// writing it to `output`. Returns the number of bytes written.
///
/// `input` is consumed forward only and is left somewhere inside the
/// executable; the caller is responsible for draining the remainder.
pub fn reconstruct_iso<R: Read, W: Write>(input: R, size: u64, output: &mut W) -> Result<u64> {
    let mut input = ForwardReader::new(input);

    if size < EBOOT_HEADER_SIZE as u64 {
        return Err(Error::corrupt("eboot.pbp file is too small"));
    }

    let mut eboot_header = [0; EBOOT_HEADER_SIZE];
    input.read_exact(&mut eboot_header)?;

    if &eboot_header[..4] != b"\0PBP" {
        return Err(Error::corrupt("wrong eboot.pbp header magic"));
    }

    let psar_offset = LittleEndian::read_u32(&eboot_header[0x24..]) as u64;

    if psar_offset + PSAR_HEADER_SIZE as u64 > size {
        return Err(Error::corrupt("eboot.pbp file is too short"));
    }

    if psar_offset % 16 != 0 {
        return Err(Error::corrupt("psar offset is not aligned"));
    }

    input.skip_to(psar_offset)?;

    let mut header = [0; PSAR_HEADER_SIZE];
    input.read_exact(&mut header)?;

    if &header[..8] != b"NPUMDIMG" {
        return Err(Error::corrupt("wrong data.psar header magic"));
    }

    let iso_block = LittleEndian::read_u32(&header[0x0c..]);

    if iso_block > MAX_BLOCK_SECTORS {
        return Err(Error::Unsupported(format!(
            "data.psar block size {}, max {} supported",
            iso_block, MAX_BLOCK_SECTORS
        )));
    }

    if iso_block == 0 {
        return Err(Error::corrupt("data.psar block size is zero"));
    }

    let mac = crypto::cmac(&KIRK7_KEY38, &header[..0xc0]);
    let key = psp_key();
    let iv = derive_iv(true, &mac, &header, 0xc0, 0xa0);
    crypto::chained_block_decrypt(&key, &iv, 0, &mut header[0x40..0xa0]);

    let iso_start = LittleEndian::read_u32(&header[0x54..]);
    let iso_end = LittleEndian::read_u32(&header[0x64..]);
    let iso_table = LittleEndian::read_u32(&header[0x6c..]) as u64;

    let iso_total = iso_end
        .checked_sub(iso_start)
        .and_then(|x| x.checked_sub(1))
        .ok_or_else(|| Error::corrupt("data.psar image range is invalid"))?;
    let table_size = iso_total.div_ceil(iso_block) as u64 * TABLE_ENTRY_SIZE as u64;

    if psar_offset + iso_table + table_size > size {
        return Err(Error::corrupt("offset table in data.psar file is too large"));
    }

    input.skip_to(psar_offset + iso_table)?;

    // Grows with the bytes actually received, not with the declared size.
    let table = input.read_to_vec(table_size)?;

    let block_bytes = iso_block as usize * ISO_SECTOR_SIZE;
    let max_block_bytes = MAX_BLOCK_SECTORS as usize * ISO_SECTOR_SIZE;
    let mut data = vec![0; max_block_bytes];
    let mut written = 0;

    for entry in table.chunks_exact(TABLE_ENTRY_SIZE) {
        let mut t = [0_u32; 8];
        LittleEndian::read_u32_into(entry, &mut t);

        let block_offset = t[4] ^ t[2] ^ t[3];
        let block_size = (t[5] ^ t[1] ^ t[2]) as usize;
        let block_flags = t[6] ^ t[0] ^ t[3];

        if block_size > max_block_bytes
            || psar_offset + block_offset as u64 + block_size as u64 > size
        {
            return Err(Error::corrupt(format!(
                "iso block size/offset is too large: {}+{}",
                block_offset, block_size
            )));
        }

        input.skip_to(psar_offset + block_offset as u64)?;

        let block = &mut data[..block_size];
        input.read_exact(block)?;

        if block_flags & FLAG_PLAIN == 0 {
            if block_size % 16 != 0 {
                return Err(Error::corrupt("encrypted iso block is not aligned"));
            }

            crypto::chained_block_decrypt(&key, &iv, block_offset / 16, block);
        }

        if block_size == block_bytes {
            output.write_all(block)?;
        } else {
            let uncompressed = lzrc::decompress(block, max_block_bytes)?;

            if uncompressed.len() != block_bytes {
                return Err(Error::DecompressionFailed {
                    expected: block_bytes,
                    actual: uncompressed.len(),
                });
            }

            output.write_all(&uncompressed)?;
        }

        written += block_bytes as u64;
    }

    Ok(written)
}
