use super::DownloadError;
use log::debug;
use reqwest::{
    StatusCode,
    blocking::{Client, Response},
    header,
};
use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::Path,
};

/// Input stream the engine reads a container from.
///
/// The engine calls [`Source::start`] whenever it needs the stream positioned
/// at an absolute offset, then reads sequentially until done.
pub trait Source {
    /// Opens the stream at `offset`.
    /// Returns the number of remaining bytes when the source knows it.
    fn start(&mut self, url: &str, offset: u64) -> Result<Option<u64>, DownloadError>;

    /// Reads into `buf`. Returning zero means the stream was closed.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DownloadError>;
}

/// Reads a container over http(s) using range requests.
pub struct HttpSource {
    client: Client,
    response: Option<Response>,
}

impl HttpSource {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            response: None,
        }
    }
}

impl Source for HttpSource {
    fn start(&mut self, url: &str, offset: u64) -> Result<Option<u64>, DownloadError> {
        debug!("requesting {} from offset {}", url, offset);
        let mut request = self.client.get(url);

        if offset > 0 {
            request = request.header(header::RANGE, format!("bytes={}-", offset));
        }

        let response = request
            .send()
            .map_err(|e| DownloadError::Transport(e.to_string()))?;
        let status = response.status();

        if !status.is_success() {
            return Err(DownloadError::Transport(format!(
                "{} download failed. http code: {}",
                url, status
            )));
        }

        if offset > 0 && status != StatusCode::PARTIAL_CONTENT {
            return Err(DownloadError::Transport(format!(
                "{} does not support range requests",
                url
            )));
        }

        let length = response.content_length();
        self.response = Some(response);
        Ok(length)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DownloadError> {
        match self.response.as_mut() {
            Some(response) => response
                .read(buf)
                .map_err(|e| DownloadError::Transport(e.to_string())),
            None => Err(DownloadError::ConnectionClosed),
        }
    }
}

/// Reads a container from a local file, `url` being its path.
#[derive(Default)]
pub struct FileSource {
    file: Option<File>,
}

impl FileSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Source for FileSource {
    fn start(&mut self, url: &str, offset: u64) -> Result<Option<u64>, DownloadError> {
        let mut file = File::open(Path::new(url))?;
        let length = file.metadata()?.len();
        file.seek(SeekFrom::Start(offset))?;
        self.file = Some(file);
        Ok(Some(length.saturating_sub(offset)))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DownloadError> {
        match self.file.as_mut() {
            Some(file) => Ok(file.read(buf)?),
            None => Err(DownloadError::ConnectionClosed),
        }
    }
}
