use byteorder::{BigEndian, ReadBytesExt};
use std::io::{Cursor, Error, ErrorKind, Read, Result};

/// Reader for fixed layout big endian records.
#[derive(Clone, Default)]
pub struct Reader<'a> {
    inner: Cursor<&'a [u8]>,
}

impl<'a> Reader<'a> {
    pub fn new_big_endian(data: &'a [u8]) -> Self {
        Self {
            inner: Cursor::new(data),
        }
    }

    pub fn get_length(&self) -> u64 {
        self.inner.get_ref().len() as u64
    }

    pub fn get_position(&self) -> u64 {
        self.inner.position()
    }

    /// Moves to an absolute position, failing if it lies past the end of data.
    pub fn seek(&mut self, position: u64) -> Result<()> {
        if position > self.get_length() {
            return Err(Error::new(
                ErrorKind::UnexpectedEof,
                "Reader seeks out of data bounds.",
            ));
        }

        self.inner.set_position(position);
        Ok(())
    }

    pub fn skip(&mut self, bytes: u64) -> Result<()> {
        let position = self
            .get_position()
            .checked_add(bytes)
            .ok_or_else(|| Error::new(ErrorKind::InvalidData, "Reader skip overflows."))?;
        self.seek(position)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.inner.read_u16::<BigEndian>()
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.inner.read_u32::<BigEndian>()
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.inner.read_u64::<BigEndian>()
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0; N];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Reads a 32 bit value at an absolute position without moving the cursor.
    pub fn peek_u32_at(&self, position: u64) -> Result<u32> {
        let mut reader = self.clone();
        reader.seek(position)?;
        reader.read_u32()
    }

    /// Reads a 64 bit value at an absolute position without moving the cursor.
    pub fn peek_u64_at(&self, position: u64) -> Result<u64> {
        let mut reader = self.clone();
        reader.seek(position)?;
        reader.read_u64()
    }
}
