//! LZRC decompressor used by compressed PSP disc image blocks.
//!
//! An LZ77 style literal/match stream driven by an adaptive binary range coder.
//! Probability tables are kept in a single flat array because bit trees of the
//! distance tables are allowed to run into the rows that follow them.

use crate::{Error, Result};

const LITERAL: usize = 0;
const DIST_BITS: usize = LITERAL + 8 * 256;
const DIST: usize = DIST_BITS + 8 * 39;
const MATCH: usize = DIST + 18 * 8;
const LEN: usize = MATCH + 8 * 8;
const PROBS: usize = LEN + 8 * 31;

const TOP: u32 = 1 << 24;
const END_OF_STREAM: u32 = 0xff;

struct RangeDecoder<'a> {
    input: &'a [u8],
    position: usize,
    range: u32,
    code: u32,
    probs: [u8; PROBS],
}

impl RangeDecoder<'_> {
    fn normalize(&mut self) -> Result<()> {
        if self.range < TOP {
            let byte = *self
                .input
                .get(self.position)
                .ok_or(Error::CorruptStream("input underflow"))?;
            self.position += 1;
            self.range <<= 8;
            self.code = (self.code << 8) | byte as u32;
        }

        Ok(())
    }

    fn bit(&mut self, index: usize) -> Result<u32> {
        self.normalize()?;

        let prob = &mut self.probs[index];
        let bound = (self.range >> 8) * *prob as u32;
        *prob -= *prob >> 3;

        if self.code < bound {
            self.range = bound;
            *prob += 31;
            Ok(1)
        } else {
            self.code -= bound;
            self.range -= bound;
            Ok(0)
        }
    }

    fn bittree(&mut self, base: usize, limit: u32) -> Result<u32> {
        let mut number = 1;

        while number < limit {
            number = (number << 1) + self.bit(base + number as usize)?;
        }

        Ok(number)
    }

    fn number(&mut self, base: usize, n: u32) -> Result<u32> {
        let mut number = 1;

        if n > 3 {
            number = (number << 1) + self.bit(base + 3)?;

            if n > 4 {
                number = (number << 1) + self.bit(base + 3)?;

                if n > 5 {
                    self.normalize()?;

                    for _ in 0..n - 5 {
                        self.range >>= 1;
                        number <<= 1;

                        if self.code < self.range {
                            number += 1;
                        } else {
                            self.code -= self.range;
                        }
                    }
                }
            }
        }

        for step in 0..n.min(3) as usize {
            number = (number << 1) + self.bit(base + step)?;
        }

        Ok(number)
    }
}

/// Decompresses a single block into at most `capacity` bytes.
///
/// A block whose first byte has its top bit set is stored uncompressed, with
/// its length in the following 4 bytes.
pub fn decompress(input: &[u8], capacity: usize) -> Result<Vec<u8>> {
    if input.len() < 5 {
        return Err(Error::CorruptStream("input underflow"));
    }

    let lc = input[0];
    let code = u32::from_be_bytes([input[1], input[2], input[3], input[4]]);

    if lc & 0x80 != 0 {
        let size = code as usize;

        if size > capacity {
            return Err(Error::CorruptStream("output overflow"));
        }

        return input
            .get(5..5 + size)
            .map(|x| x.to_vec())
            .ok_or(Error::CorruptStream("input underflow"));
    }

    let mut rc = RangeDecoder {
        input,
        position: 5,
        range: u32::MAX,
        code,
        probs: [0x80; PROBS],
    };
    let mut output = Vec::with_capacity(capacity);
    let mut state = 0_usize;
    let mut last = 0_u8;

    loop {
        if rc.bit(MATCH + state * 8)? == 0 {
            state = state.saturating_sub(1);

            let context = (last as u32).checked_shr(lc as u32).unwrap_or(0) as usize & 7;
            let byte = (rc.bittree(LITERAL + context * 256, 0x100)? - 0x100) as u8;

            if output.len() == capacity {
                return Err(Error::CorruptStream("output overflow"));
            }

            output.push(byte);
            last = byte;
            continue;
        }

        let mut len_bits = 0;

        for step in 1..=7 {
            if rc.bit(MATCH + state * 8 + step)? == 0 {
                break;
            }

            len_bits += 1;
        }

        let match_len = if len_bits == 0 {
            1
        } else {
            let len_state = ((len_bits as usize - 1) << 2) + ((output.len() << (len_bits - 1)) & 3);
            let match_len = rc.number(LEN + state * 31 + len_state, len_bits)?;

            if match_len == END_OF_STREAM {
                return Ok(output);
            }

            match_len
        };

        let (dist_state, limit) = if match_len > 2 { (7, 44) } else { (0, 8) };
        let dist_bits = rc.bittree(DIST_BITS + len_bits as usize * 39 + dist_state, limit)? - limit;
        let dist = if dist_bits > 0 {
            rc.number(DIST + dist_bits as usize * 8, dist_bits)? as usize
        } else {
            1
        };

        if dist > output.len() {
            return Err(Error::CorruptStream("match distance out of range"));
        }

        if output.len() + match_len as usize + 1 > capacity {
            return Err(Error::CorruptStream("output overflow"));
        }

        // Source and destination may overlap.
        for _ in 0..=match_len {
            let byte = output[output.len() - dist];
            output.push(byte);
            last = byte;
        }

        state = 6 + ((output.len() + 1) & 1);
    }
}
