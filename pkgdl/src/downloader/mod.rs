mod error;
mod source;
mod state;
mod stream;

pub use error::DownloadError;
pub use source::{FileSource, HttpSource, Source};
pub use state::{DownloadState, RESUME_VERSION};

use log::{debug, info, warn};
use pkgdl_pkg::{
    Container, ContainerHeader, ContentKind, EntryKind, FileIndexEntry, StreamHasher,
    container::{self, ENTRY_SIZE, HEADER_EXT_SIZE, HEADER_SIZE},
    psp,
};
use std::{
    borrow::Cow,
    fs::{self, File},
    io::{self, BufWriter, Read, Write},
    ops::Range,
    path::{Path, PathBuf},
};
use stream::{EntryReader, Stream};

const PSP_CONTENT_PREFIX: &str = "USRDIR/CONTENT/";
const PSM_CONTENT_PREFIX: &str = "contents/";
const PSM_RUNTIME_DIR: &str = "runtime";
const PSM_READ_ONLY_DIR: &str = "RO";
const PSM_PM_DAT_SIZE: usize = 1 << 16;
const STAT_SIZE: usize = 768;

/// Callbacks through which the engine talks to its caller.
pub trait Reporter {
    /// Called after every read with the absolute stream offset.
    fn update_progress(&mut self, _offset: u64, _total: u64) {}

    /// Called when the engine moves to another file or phase.
    fn update_status(&mut self, _status: &str) {}

    /// Checked before every read from the source.
    fn is_canceled(&self) -> bool {
        false
    }
}

impl Reporter for () {}

#[derive(Clone, Debug)]
pub struct DownloadOptions {
    /// Packages are installed into `<install_root>/<content_id>`.
    pub install_root: PathBuf,
    /// Upper bound for the in-memory head (header, metadata and file index).
    pub head_limit: u64,
    /// Size of a single read from the source.
    pub chunk_size: usize,
    /// Rebuild `EBOOT.PBP` of PSP titles into a flat `EBOOT.ISO`.
    pub save_as_iso: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            install_root: PathBuf::from("."),
            head_limit: 4 * 1024 * 1024,
            chunk_size: 64 * 1024,
            save_as_iso: false,
        }
    }
}

/// Summary of a completed installation.
#[derive(Clone, Debug)]
pub struct InstallReport {
    pub content_id: String,
    pub content_kind: ContentKind,
    /// SHA-256 of the container as received.
    pub digest: [u8; 32],
    /// Number of files written below `root` by this attempt.
    pub files: u32,
    pub root: PathBuf,
}

/// Download and install engine for a single package at a time.
pub struct Download<S: Source, R: Reporter> {
    source: S,
    reporter: R,
    options: DownloadOptions,
}

impl<S: Source, R: Reporter> Download<S, R> {
    pub fn new(source: S, reporter: R, options: DownloadOptions) -> Self {
        Self {
            source,
            reporter,
            options,
        }
    }

    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    pub fn reporter_mut(&mut self) -> &mut R {
        &mut self.reporter
    }

    pub fn install_dir(&self, content_id: &str) -> PathBuf {
        self.options.install_root.join(content_id)
    }

    pub fn resume_path(&self, content_id: &str) -> PathBuf {
        self.options
            .install_root
            .join(format!("{}.resume", content_id))
    }

    /// Reads the header of `url` to find out which content id it installs.
    pub fn read_content_id(&mut self, url: &str) -> Result<String, DownloadError> {
        let mut stream = Stream::new(
            &mut self.source,
            &mut self.reporter,
            url,
            0,
            StreamHasher::new(),
        );
        let mut bytes = vec![0; HEADER_SIZE + HEADER_EXT_SIZE];
        stream.read_exact(&mut bytes)?;
        Ok(container::parse_header(&bytes)?.content_id())
    }

    /// Installs the package at `url` as `content_id`, continuing a previous
    /// attempt when resume data exists.
    ///
    /// `license` is written as `sce_sys/package/work.bin` (`RO/License/FAKE.rif`
    /// for PSM titles) and `digest` is compared against the SHA-256 of the whole
    /// container when given.
    pub fn run(
        &mut self,
        content_id: &str,
        url: &str,
        license: Option<&[u8]>,
        digest: Option<&[u8; 32]>,
    ) -> Result<InstallReport, DownloadError> {
        if !container::is_valid_content_id(content_id) {
            return Err(DownloadError::CorruptContainer(format!(
                "invalid content id {:?}",
                content_id
            )));
        }

        let root = self.install_dir(content_id);
        let resume_path = self.resume_path(content_id);
        fs::create_dir_all(&self.options.install_root)?;

        let resumed = match DownloadState::load(&resume_path) {
            Ok(x) => x,
            Err(e) => {
                discard_install(&resume_path, &root);
                return Err(e);
            }
        };

        let resumed = match resumed {
            Some(state) if state.offset > 0 => {
                match load_cached_head(&root, &state, &self.options) {
                    Ok((container, head)) => Some((state, container, head)),
                    Err(e) => {
                        discard_install(&resume_path, &root);
                        return Err(DownloadError::InvalidResumeState(e));
                    }
                }
            }
            _ => None,
        };

        let Self {
            source,
            reporter,
            options,
        } = self;

        let mut session = match resumed {
            Some((state, container, head)) => {
                info!(
                    "resuming download of {} at offset {} (file {}/{})",
                    content_id, state.offset, state.item_index, state.index_count
                );

                if let Some(license) = license {
                    check_license(license, &container.header)?;
                }

                let mut stream =
                    Stream::new(source, reporter, url, state.offset, state.hasher.clone());
                stream.total = state.total_size;

                Session {
                    stream,
                    options,
                    root,
                    resume_path,
                    container,
                    head,
                    state,
                }
            }
            None => {
                debug!("starting fresh download of {}", content_id);
                remove_dir(&root)?;
                let mut stream = Stream::new(source, reporter, url, 0, StreamHasher::new());
                let (container, head) = read_head(&mut stream, options, &root, license)?;
                let state = DownloadState::new(
                    &container,
                    options.save_as_iso,
                    stream.offset,
                    stream.hasher.clone(),
                );
                state.save(&resume_path)?;

                Session {
                    stream,
                    options,
                    root,
                    resume_path,
                    container,
                    head,
                    state,
                }
            }
        };

        session.run(content_id, license, digest)
    }
}

struct Session<'a, S: Source, R: Reporter> {
    stream: Stream<'a, S, R>,
    options: &'a DownloadOptions,
    root: PathBuf,
    resume_path: PathBuf,
    container: Container,
    head: Vec<u8>,
    state: DownloadState,
}

impl<S: Source, R: Reporter> Session<'_, S, R> {
    fn run(
        &mut self,
        content_id: &str,
        license: Option<&[u8]>,
        digest: Option<&[u8; 32]>,
    ) -> Result<InstallReport, DownloadError> {
        let kind = self.container.metadata.content_kind;
        let count = self.container.header.index_count;
        let mut files = 0;

        for index in self.state.item_index..count {
            self.stream.check_canceled()?;
            let entry = self.container.entry(&self.head, index)?;
            info!(
                "[{}/{}] {} item_offset={} item_size={} type={}",
                index + 1,
                count,
                entry.name,
                entry.data_offset,
                entry.data_size,
                entry.flags
            );
            self.stream.reporter().update_status(&entry.name);

            if self.install_entry(kind, &entry)? {
                files += 1;
            }

            self.checkpoint(index + 1)?;
        }

        self.read_tail(kind)?;

        let computed = self.stream.hasher.finish();

        if let Some(expected) = digest {
            if &computed != expected {
                warn!("pkg integrity check failed");
                let _ = fs::remove_file(self.package_dir().join("head.bin"));
                let _ = fs::remove_file(&self.resume_path);
                return Err(DownloadError::IntegrityFailed);
            }

            info!("pkg integrity check succeeded");
        }

        if kind.is_vita() {
            fs::write(self.package_dir().join("stat.bin"), [0_u8; STAT_SIZE])?;
        }

        if kind.is_psm() {
            self.adjust_psm_files(content_id)?;
        }

        if let Some(license) = license {
            let path = if kind.is_psm() {
                self.root.join(PSM_READ_ONLY_DIR).join("License").join("FAKE.rif")
            } else {
                self.package_dir().join("work.bin")
            };

            debug!("writing license to {}", path.display());

            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }

            fs::write(path, license)?;
        }

        if kind.is_psp() {
            remove_dir(&self.root.join("sce_sys"))?;
        }

        fs::remove_file(&self.resume_path)?;
        self.stream.reporter().update_status("installed");

        Ok(InstallReport {
            content_id: content_id.to_owned(),
            content_kind: kind,
            digest: computed,
            files,
            root: self.root.clone(),
        })
    }

    fn package_dir(&self) -> PathBuf {
        self.root.join("sce_sys").join("package")
    }

    /// Replaces `sce_sys` with the writable directories a PSM title expects.
    fn adjust_psm_files(&mut self, content_id: &str) -> Result<(), DownloadError> {
        self.stream.reporter().update_status("creating additional psm files");
        remove_dir(&self.root.join("sce_sys"))?;

        let rw = self.root.join("RW");
        fs::create_dir_all(rw.join("Documents"))?;
        fs::create_dir_all(rw.join("Temp"))?;
        fs::create_dir_all(rw.join("System"))?;

        let mut id = [0_u8; container::CONTENT_ID_SIZE];
        id[..content_id.len()].copy_from_slice(content_id.as_bytes());
        fs::write(rw.join("System").join("content_id"), id)?;
        fs::write(rw.join("System").join("pm.dat"), vec![0_u8; PSM_PM_DAT_SIZE])?;
        Ok(())
    }

    fn checkpoint(&mut self, item_index: u32) -> Result<(), DownloadError> {
        self.state.item_index = item_index;
        self.state.offset = self.stream.offset;
        self.state.hasher = self.stream.hasher.clone();
        self.state.save(&self.resume_path)
    }

    /// Processes one index entry. Returns true if a file was written.
    fn install_entry(
        &mut self,
        kind: ContentKind,
        entry: &FileIndexEntry,
    ) -> Result<bool, DownloadError> {
        let chunk_size = self.options.chunk_size;
        let path = install_path(kind, &entry.name);

        match entry.kind {
            EntryKind::Skip => return Ok(false),
            EntryKind::Directory => {
                if let Some(path) = path {
                    fs::create_dir_all(self.root.join(path.as_ref()))?;
                }

                return Ok(false);
            }
            EntryKind::File => (),
        }

        let header = &self.container.header;
        let out_of_range = || {
            DownloadError::CorruptContainer(format!("{} is out of payload range", entry.name))
        };
        let start = header
            .enc_offset
            .checked_add(entry.data_offset)
            .ok_or_else(out_of_range)?;

        if start != self.stream.offset {
            return Err(DownloadError::FilesOutOfOrder {
                expected: self.stream.offset,
                actual: start,
            });
        }

        let size = entry.padded_size()?;

        match start.checked_add(size) {
            Some(end) if end <= header.payload_end() => (),
            _ => return Err(out_of_range()),
        }

        let Some(path) = path else {
            debug!("ignoring {}", entry.name);
            self.stream.discard(size, chunk_size)?;
            return Ok(false);
        };

        let path: &str = &path;
        let file_name = path.rsplit('/').next().unwrap_or(path);

        let target = if kind.is_psp() && self.options.save_as_iso {
            if path != "EBOOT.PBP" {
                debug!("ignoring {} in iso mode", entry.name);
                self.stream.discard(size, chunk_size)?;
                return Ok(false);
            }

            self.root.join("EBOOT.ISO")
        } else {
            self.root.join(path)
        };

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut output = BufWriter::new(File::create(&target)?);
        let mut reader = EntryReader::new(
            &mut self.stream,
            self.container.cipher(),
            entry.data_offset,
            size,
        );

        if kind.is_psp() && self.options.save_as_iso {
            let size = psp::reconstruct_iso(&mut reader, entry.data_size, &mut output)?;
            debug!("reconstructed {} bytes of disc image", size);
        } else if kind.is_psp() && is_protected_data(file_name) {
            let size = psp::decrypt_pgd(&mut reader, entry.data_size, &mut output)?;
            debug!("decrypted {} bytes of {}", size, file_name);
        } else {
            copy_entry(&mut reader, entry.data_size, &mut output, chunk_size)?;
        }

        reader.drain(chunk_size)?;
        output.flush()?;
        Ok(true)
    }

    fn read_tail(&mut self, kind: ContentKind) -> Result<(), DownloadError> {
        let chunk_size = self.options.chunk_size;
        let header = &self.container.header;
        let payload_end = header.payload_end();
        let total_size = header.total_size;

        self.stream.reporter().update_status("finalizing");

        if self.stream.offset < payload_end {
            let remaining = payload_end - self.stream.offset;
            debug!("skipping {} bytes of unused payload", remaining);
            self.stream.discard(remaining, chunk_size)?;
        }

        let tail_size = total_size - self.stream.offset;

        if kind.is_psx() {
            return self.stream.discard(tail_size, chunk_size);
        }

        fs::create_dir_all(self.package_dir())?;
        let mut output = BufWriter::new(File::create(self.package_dir().join("tail.bin"))?);
        let mut buf = vec![0; tail_size.min(chunk_size as u64) as usize];
        let mut remaining = tail_size;

        while remaining > 0 {
            let n = remaining.min(buf.len() as u64) as usize;
            self.stream.read_exact(&mut buf[..n])?;
            output.write_all(&buf[..n])?;
            remaining -= n as u64;
        }

        output.flush()?;
        Ok(())
    }
}

/// Streams the head (header, metadata and file index) into memory and `head.bin`.
fn read_head<S: Source, R: Reporter>(
    stream: &mut Stream<'_, S, R>,
    options: &DownloadOptions,
    root: &Path,
    license: Option<&[u8]>,
) -> Result<(Container, Vec<u8>), DownloadError> {
    stream.reporter().update_status("downloading pkg head");

    let mut head = vec![0; HEADER_SIZE + HEADER_EXT_SIZE];
    stream.read_exact(&mut head)?;

    let header = container::parse_header(&head)?;
    stream.total = header.total_size;

    debug!(
        "pkg header: revision={:#x} type={:#x} meta_offset={} meta_count={} index_count={} \
         total_size={} enc_offset={} enc_size={} key_type={}",
        header.revision,
        header.package_type,
        header.meta_offset,
        header.meta_count,
        header.index_count,
        header.total_size,
        header.enc_offset,
        header.enc_size,
        header.key_type,
    );

    if let Some(license) = license {
        check_license(license, &header)?;
    }

    let package_dir = root.join("sce_sys").join("package");
    fs::create_dir_all(&package_dir)?;
    let mut head_file = File::create(package_dir.join("head.bin"))?;
    head_file.write_all(&head)?;

    let mut grow = |head: &mut Vec<u8>, size: u64| -> Result<(), DownloadError> {
        if size > options.head_limit {
            return Err(DownloadError::UnsupportedLargeHeader {
                size,
                limit: options.head_limit,
            });
        }

        let start = head.len();

        if size as usize > start {
            head.resize(size as usize, 0);
            stream.read_exact(&mut head[start..])?;
            head_file.write_all(&head[start..])?;
        }

        Ok(())
    };

    grow(&mut head, header.enc_offset)?;
    let metadata = container::walk_metadata(&header, &head)?;
    debug!(
        "content type {} ({}), index size {:?}",
        metadata.content_kind,
        metadata.content_kind.code(),
        metadata.index_size
    );

    let entries_end = header
        .enc_offset
        .saturating_add(header.index_count as u64 * ENTRY_SIZE as u64);

    if entries_end > header.payload_end() {
        return Err(DownloadError::CorruptContainer(
            "file index is larger than payload".to_owned(),
        ));
    }

    grow(&mut head, entries_end)?;
    let index_size = container::index_region_size(&header, &metadata, &head)?;
    grow(&mut head, header.enc_offset + index_size)?;
    head_file.sync_all()?;

    Ok((Container::new(header, metadata, index_size), head))
}

/// Re-parses `head.bin` and checks it against the persisted state.
fn load_cached_head(
    root: &Path,
    state: &DownloadState,
    options: &DownloadOptions,
) -> Result<(Container, Vec<u8>), String> {
    let head = fs::read(root.join("sce_sys").join("package").join("head.bin"))
        .map_err(|e| format!("cached head is unreadable ({})", e))?;
    let container = Container::parse(&head).map_err(|e| e.to_string())?;

    if state.save_as_iso != options.save_as_iso {
        return Err("disc image mode doesn't match previous attempt".to_owned());
    }

    state.validate(&container, head.len() as u64)?;
    Ok((container, head))
}

fn check_license(license: &[u8], header: &ContainerHeader) -> Result<(), DownloadError> {
    let matches = |range: Range<usize>| license.get(range) == Some(&header.content_id[..]);

    if matches(0x10..0x40) || matches(0x50..0x80) {
        Ok(())
    } else {
        Err(DownloadError::LicenseMismatch)
    }
}

/// Maps an entry name to its path below the install directory.
/// PSX and PSP titles only install what is below `USRDIR/CONTENT/`. PSM titles
/// move `contents/` into `RO/`, except for the runtime which stays at the top.
fn install_path(kind: ContentKind, name: &str) -> Option<Cow<'_, str>> {
    if kind.is_vita() {
        return Some(Cow::Borrowed(name));
    }

    if kind.is_psm() {
        let name = match name.strip_prefix(PSM_CONTENT_PREFIX) {
            Some(x) => x,
            None if name == "contents" => "",
            None => name,
        };

        return Some(match name {
            "" => Cow::Borrowed(PSM_READ_ONLY_DIR),
            x if x.starts_with(PSM_RUNTIME_DIR) => Cow::Borrowed(x),
            x => Cow::Owned(format!("{}/{}", PSM_READ_ONLY_DIR, x)),
        });
    }

    name.strip_prefix(PSP_CONTENT_PREFIX)
        .filter(|x| !x.is_empty())
        .map(Cow::Borrowed)
}

fn is_protected_data(file_name: &str) -> bool {
    let upper = file_name.to_ascii_uppercase();
    upper.ends_with(".EDAT") && upper != "DOCINFO.EDAT"
}

fn copy_entry<R: Read, W: Write>(
    reader: &mut R,
    size: u64,
    output: &mut W,
    chunk_size: usize,
) -> Result<(), DownloadError> {
    let mut buf = vec![0; size.min(chunk_size as u64) as usize];
    let mut remaining = size;

    while remaining > 0 {
        let n = remaining.min(buf.len() as u64) as usize;
        reader.read_exact(&mut buf[..n])?;
        output.write_all(&buf[..n])?;
        remaining -= n as u64;
    }

    Ok(())
}

fn remove_dir(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn discard_install(resume_path: &Path, root: &Path) {
    warn!("deleting resume data and {}", root.display());

    if let Err(e) = fs::remove_file(resume_path) {
        debug!("couldn't remove {}: {}", resume_path.display(), e);
    }

    if let Err(e) = remove_dir(root) {
        debug!("couldn't remove {}: {}", root.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_path() {
        let path = |kind, name| install_path(kind, name).map(Cow::into_owned);

        assert_eq!(
            path(ContentKind::VitaGame, "sce_sys/param.sfo").as_deref(),
            Some("sce_sys/param.sfo")
        );
        assert_eq!(
            path(ContentKind::PspGame, "USRDIR/CONTENT/EBOOT.PBP").as_deref(),
            Some("EBOOT.PBP")
        );
        assert_eq!(path(ContentKind::PspGame, "USRDIR/CONTENT/"), None);
        assert_eq!(path(ContentKind::PsxGame, "USRDIR/CONTENT"), None);
        assert_eq!(path(ContentKind::PsxGame, "PARAM.SFO"), None);
    }

    #[test]
    fn test_psm_install_path() {
        let path = |name| install_path(ContentKind::PsmGame, name).map(Cow::into_owned);

        assert_eq!(
            path("contents/Application/app.exe").as_deref(),
            Some("RO/Application/app.exe")
        );
        assert_eq!(
            path("contents/runtime/Sce.PlayStation.Core.dll").as_deref(),
            Some("runtime/Sce.PlayStation.Core.dll")
        );
        assert_eq!(path("contents").as_deref(), Some("RO"));
        assert_eq!(path("contents/").as_deref(), Some("RO"));
        assert_eq!(path("sce_sys/param.sfo").as_deref(), Some("RO/sce_sys/param.sfo"));
    }

    #[test]
    fn test_protected_data() {
        assert!(is_protected_data("MINIS.EDAT"));
        assert!(is_protected_data("minis.edat"));
        assert!(!is_protected_data("DOCINFO.EDAT"));
        assert!(!is_protected_data("DOCUMENT.DAT"));
        assert!(!is_protected_data("EBOOT.PBP"));
    }

    #[test]
    fn test_options_default() {
        let options = DownloadOptions::default();
        assert_eq!(options.head_limit, 4 * 1024 * 1024);
        assert_eq!(options.chunk_size, 64 * 1024);
        assert!(!options.save_as_iso);
    }
}
