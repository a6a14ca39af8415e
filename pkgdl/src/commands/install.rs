use crate::progress::Progress;
use anyhow::{Context, Result, bail};
use clap::Args;
use log::{info, warn};
use pkgdl::downloader::{
    Download, DownloadError, DownloadOptions, FileSource, HttpSource, InstallReport, Reporter,
    Source,
};
use reqwest::{
    Proxy,
    blocking::Client,
    header::{HeaderMap, HeaderName, HeaderValue},
};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

/// Download, decrypt and install a pkg file.
#[derive(Debug, Clone, Args)]
pub struct Install {
    /// http(s):// | .pkg
    #[arg(required = true)]
    pub input: String,

    /// Content id to install as.
    /// By default it is read from the pkg header.
    #[arg(long)]
    pub content_id: Option<String>,

    /// Directory in which packages are installed.
    /// Each package is installed into a sub directory named after its content id.
    #[arg(short, long, default_value = ".")]
    pub directory: PathBuf,

    /// License file (.rif) which is installed as sce_sys/package/work.bin,
    /// or RO/License/FAKE.rif for PSM titles.
    #[arg(long)]
    pub license: Option<PathBuf>,

    /// Expected SHA-256 of the pkg file in hex format.
    /// Integrity check is skipped when not specified.
    #[arg(long, value_parser = sha256_parser)]
    pub sha256: Option<[u8; 32]>,

    /// Rebuild EBOOT.PBP of PSP titles into a flat EBOOT.ISO disc image.
    #[arg(long)]
    pub iso: bool,

    /// Custom headers for requests.
    /// This option can be used multiple times.
    #[arg(long, help_heading = "Client Options", num_args = 2, value_names = &["KEY", "VALUE"])]
    pub header: Vec<String>, // Vec<(String, String)> not supported

    /// Skip checking and validation of site certificates.
    #[arg(long, help_heading = "Client Options")]
    pub no_certificate_checks: bool,

    /// Set http(s) / socks proxy address for requests.
    #[arg(long, help_heading = "Client Options", value_parser = proxy_address_parser)]
    pub proxy: Option<Proxy>,

    /// Update and set user agent header for requests.
    #[arg(
        long,
        help_heading = "Client Options",
        default_value = "libhttp/3.65 (PlayStation Vita)"
    )]
    pub user_agent: String,

    /// Size of a single read from the network in bytes.
    #[arg(long, help_heading = "Download Options", default_value_t = 64 * 1024)]
    pub chunk_size: usize,

    /// Maximum number of times the download is resumed after a network failure.
    #[arg(long, help_heading = "Download Options", default_value_t = 15)]
    pub retry_count: u8,
}

impl Install {
    fn client(&self) -> Result<Client> {
        let mut client_builder = Client::builder()
            .danger_accept_invalid_certs(self.no_certificate_checks)
            .user_agent(&self.user_agent);

        if !self.header.is_empty() {
            let mut headers = HeaderMap::new();

            for i in (0..self.header.len()).step_by(2) {
                headers.insert(
                    self.header[i].parse::<HeaderName>()?,
                    self.header[i + 1].parse::<HeaderValue>()?,
                );
            }

            client_builder = client_builder.default_headers(headers);
        }

        if let Some(proxy) = &self.proxy {
            client_builder = client_builder.proxy(proxy.clone());
        }

        Ok(client_builder.build()?)
    }

    pub fn execute(self) -> Result<()> {
        let canceled = Arc::new(AtomicBool::new(false));
        let handler_flag = canceled.clone();

        ctrlc::set_handler(move || {
            handler_flag.store(true, Ordering::SeqCst);
        })?;

        let license = match &self.license {
            Some(path) => Some(
                fs::read(path).with_context(|| format!("could not read {}", path.display()))?,
            ),
            None => None,
        };

        let options = DownloadOptions {
            install_root: self.directory.clone(),
            chunk_size: self.chunk_size.max(16),
            save_as_iso: self.iso,
            ..Default::default()
        };
        let progress = Progress::new("pkg", canceled);

        let report = if Path::new(&self.input).exists() {
            let download = Download::new(FileSource::new(), progress, options);
            self.install(download, license.as_deref())?
        } else {
            let download = Download::new(HttpSource::new(self.client()?), progress, options);
            self.install(download, license.as_deref())?
        };

        info!(
            "installed {} ({}) to {}",
            report.content_id,
            report.content_kind,
            report.root.display()
        );
        info!(
            "{} files written, sha256 {}",
            report.files,
            hex::encode(report.digest)
        );
        Ok(())
    }

    fn install<S: Source>(
        &self,
        mut download: Download<S, Progress>,
        license: Option<&[u8]>,
    ) -> Result<InstallReport> {
        let content_id = match &self.content_id {
            Some(x) => x.to_owned(),
            None => download.read_content_id(&self.input)?,
        };

        download.reporter_mut().set_id(&content_id);
        info!("installing {} from {}", content_id, self.input);

        let mut retries = 0;

        loop {
            match download.run(&content_id, &self.input, license, self.sha256.as_ref()) {
                Ok(report) => return Ok(report),
                Err(e) if e.is_canceled() => {
                    let resume = download.resume_path(&content_id);
                    bail!(
                        "download canceled, run the same command again to resume ({} kept)",
                        resume.display()
                    );
                }
                Err(e) if e.is_retryable() && retries < self.retry_count => {
                    retries += 1;

                    if e.requires_restart() {
                        warn!("{}, restarting ({}/{})", e, retries, self.retry_count);
                    } else {
                        warn!("{}, resuming ({}/{})", e, retries, self.retry_count);
                    }

                    if download.reporter().is_canceled() {
                        return Err(DownloadError::Canceled.into());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn proxy_address_parser(s: &str) -> Result<Proxy, String> {
    Proxy::all(s).map_err(|x| x.to_string())
}

fn sha256_parser(s: &str) -> Result<[u8; 32], String> {
    let bytes = hex::decode(s.trim()).map_err(|x| x.to_string())?;
    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| "sha256 must be 32 bytes long.".to_owned())
}
