use super::{DownloadError, Reporter, Source};
use pkgdl_pkg::{PayloadCipher, StreamHasher};
use std::io::{self, Read};

/// Sequential view of the container which hashes every byte it receives.
pub(super) struct Stream<'a, S: Source, R: Reporter> {
    source: &'a mut S,
    reporter: &'a mut R,
    url: &'a str,
    connected: bool,
    pub offset: u64,
    pub total: u64,
    pub hasher: StreamHasher,
}

impl<'a, S: Source, R: Reporter> Stream<'a, S, R> {
    pub fn new(
        source: &'a mut S,
        reporter: &'a mut R,
        url: &'a str,
        offset: u64,
        hasher: StreamHasher,
    ) -> Self {
        Self {
            source,
            reporter,
            url,
            connected: false,
            offset,
            total: 0,
            hasher,
        }
    }

    pub fn reporter(&mut self) -> &mut R {
        self.reporter
    }

    pub fn check_canceled(&self) -> Result<(), DownloadError> {
        if self.reporter.is_canceled() {
            return Err(DownloadError::Canceled);
        }

        Ok(())
    }

    pub fn read_exact(&mut self, mut buf: &mut [u8]) -> Result<(), DownloadError> {
        if !self.connected {
            self.check_canceled()?;
            self.source.start(self.url, self.offset)?;
            self.connected = true;
        }

        while !buf.is_empty() {
            self.check_canceled()?;
            let read = self.source.read(buf)?;

            if read == 0 {
                return Err(DownloadError::ConnectionClosed);
            }

            self.hasher.update(&buf[..read]);
            self.offset += read as u64;
            self.reporter.update_progress(self.offset, self.total);
            buf = &mut buf[read..];
        }

        Ok(())
    }

    /// Reads and drops `size` bytes.
    pub fn discard(&mut self, mut size: u64, chunk_size: usize) -> Result<(), DownloadError> {
        let mut buf = vec![0; size.min(chunk_size as u64) as usize];

        while size > 0 {
            let n = size.min(buf.len() as u64) as usize;
            self.read_exact(&mut buf[..n])?;
            size -= n as u64;
        }

        Ok(())
    }
}

/// Decrypted contents of one index entry, including its padding.
/// `size` is the padded size, `data_offset` is relative to the payload region.
pub(super) struct EntryReader<'s, 'a, S: Source, R: Reporter> {
    stream: &'s mut Stream<'a, S, R>,
    cipher: &'s PayloadCipher,
    data_offset: u64,
    position: u64,
    size: u64,
}

impl<'s, 'a, S: Source, R: Reporter> EntryReader<'s, 'a, S, R> {
    pub fn new(
        stream: &'s mut Stream<'a, S, R>,
        cipher: &'s PayloadCipher,
        data_offset: u64,
        size: u64,
    ) -> Self {
        Self {
            stream,
            cipher,
            data_offset,
            position: 0,
            size,
        }
    }

    /// Consumes whatever the decoder left unread.
    pub fn drain(&mut self, chunk_size: usize) -> Result<(), DownloadError> {
        let remaining = self.size - self.position;
        self.stream.discard(remaining, chunk_size)?;
        self.position = self.size;
        Ok(())
    }
}

impl<S: Source, R: Reporter> Read for EntryReader<'_, '_, S, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = (self.size - self.position).min(buf.len() as u64) as usize;

        if n == 0 {
            return Ok(0);
        }

        self.stream
            .read_exact(&mut buf[..n])
            .map_err(io::Error::other)?;
        self.cipher
            .apply(self.data_offset + self.position, &mut buf[..n]);
        self.position += n as u64;
        Ok(n)
    }
}
