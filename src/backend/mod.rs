//! Capability interfaces and backend selection.
//!
//! A [`Backend`] bundles the three platform capabilities the core needs:
//! an [`ExtentSource`], a [`BadBlockSource`] and a [`RepairPrimitive`].
//! Platforms without support get the explicit no-op backend, whose every
//! operation reports [`Error::Unsupported`], so callers keep one code path.

#[cfg(target_os = "linux")]
pub mod linux;
mod none;

use crate::config::BadBlocksConfig;
use crate::error::{Error, Result};
use crate::types::{BadBlockRange, DeviceKind, FileExtents, PhysicalRange};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::{FileTypeExt, MetadataExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub use none::{NoopBadBlockSource, NoopExtentSource, NoopRepair};

/// Source of a file's logical-to-physical mapping.
pub trait ExtentSource: Send + Sync {
    /// Extents of `file`, sorted by file offset, with the allocation unit.
    fn extents(&self, file: &File) -> Result<FileExtents>;

    /// Number of extents the filesystem reports for `file`.
    fn count(&self, file: &File) -> Result<u64> {
        Ok(self.extents(file)?.extents.len() as u64)
    }
}

/// Source of known bad ranges in device-physical space.
///
/// For a regular file the ranges are relative to the block device holding
/// the filesystem; for a raw device they are relative to the device itself.
pub trait BadBlockSource: Send + Sync {
    /// Bad ranges sorted by offset and free of overlaps.
    fn bad_ranges(&self, target: &Target) -> Result<Vec<PhysicalRange>>;
}

/// The write path that makes one range accessible again.
pub trait RepairPrimitive: Send + Sync {
    /// Clear `range` of `target`. On failure, report how many leading bytes
    /// were repaired before the error.
    fn clear(&self, target: &Target, range: &BadBlockRange) -> std::result::Result<(), RepairFailure>;
}

/// A repair that did not complete.
#[derive(Debug)]
pub struct RepairFailure {
    /// Bytes at the start of the range that were cleared.
    pub bytes_cleared: u64,
    /// Why the rest was not.
    pub cause: Error,
}

impl From<Error> for RepairFailure {
    fn from(cause: Error) -> Self {
        Self {
            bytes_cleared: 0,
            cause,
        }
    }
}

impl From<std::io::Error> for RepairFailure {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e).into()
    }
}

/// An opened path, classified by what it refers to.
#[derive(Debug)]
pub struct Target {
    path: PathBuf,
    kind: DeviceKind,
    file: File,
    device_id: u64,
}

impl Target {
    /// Open `path` read-only and classify it.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, false)
    }

    /// Open `path` for reading and writing, as clearing requires.
    pub fn open_writable(path: &Path) -> Result<Self> {
        Self::open_with(path, true)
    }

    fn open_with(path: &Path, writable: bool) -> Result<Self> {
        // Classify what was actually opened. O_NONBLOCK keeps a FIFO from
        // stalling the open before it can be rejected.
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|e| match e.raw_os_error() {
                Some(libc::ENOENT) | Some(libc::ENOTDIR) => {
                    Error::not_found(path, "no such file or device")
                }
                Some(libc::EISDIR) | Some(libc::ENXIO) => Error::not_found(
                    path,
                    "not a regular file, block device or dax device",
                ),
                _ => Error::Io(e),
            })?;
        let metadata = file.metadata()?;
        let kind = classify(path, &metadata)?;
        clear_nonblocking(&file)?;

        Ok(Self::from_file(path, kind, file, &metadata))
    }

    /// Wrap an already opened file. The device number is taken from
    /// `metadata`: `st_dev` for files, `st_rdev` for devices.
    pub fn from_file(
        path: impl Into<PathBuf>,
        kind: DeviceKind,
        file: File,
        metadata: &std::fs::Metadata,
    ) -> Self {
        let device_id = if kind.is_raw_device() {
            metadata.rdev()
        } else {
            metadata.dev()
        };
        Self {
            path: path.into(),
            kind,
            file,
            device_id,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    /// Raw `dev_t` of the device holding (or being) the target.
    pub fn device_id(&self) -> u64 {
        self.device_id
    }
}

fn clear_nonblocking(file: &File) -> Result<()> {
    let fd = file.as_raw_fd();
    // SAFETY: `fd` is owned by `file` and stays open for both calls.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags == -1 {
        return Err(std::io::Error::last_os_error().into());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) } == -1 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

fn classify(path: &Path, metadata: &std::fs::Metadata) -> Result<DeviceKind> {
    let file_type = metadata.file_type();
    if file_type.is_file() {
        Ok(DeviceKind::RegularFile)
    } else if file_type.is_block_device() {
        Ok(DeviceKind::BlockDevice)
    } else if file_type.is_char_device() {
        Ok(DeviceKind::DaxDevice)
    } else {
        Err(Error::not_found(
            path,
            "not a regular file, block device or dax device",
        ))
    }
}

/// A set of platform capabilities plus the configuration they run with.
pub struct Backend {
    name: &'static str,
    supported: bool,
    config: BadBlocksConfig,
    extents: Box<dyn ExtentSource>,
    bad_blocks: Box<dyn BadBlockSource>,
    repair: Box<dyn RepairPrimitive>,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.name)
            .field("supported", &self.supported)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Backend {
    /// The process-wide backend, selected on first use and fixed afterwards.
    pub fn platform() -> &'static Backend {
        static PLATFORM: OnceLock<Backend> = OnceLock::new();
        PLATFORM.get_or_init(create_backend)
    }

    /// Backend used where the platform offers no support.
    pub fn noop() -> Self {
        Self {
            name: "none",
            supported: false,
            config: BadBlocksConfig::default(),
            extents: Box::new(NoopExtentSource),
            bad_blocks: Box::new(NoopBadBlockSource),
            repair: Box::new(NoopRepair),
        }
    }

    /// Assemble a backend from individual capabilities.
    pub fn from_parts(
        name: &'static str,
        config: BadBlocksConfig,
        extents: impl ExtentSource + 'static,
        bad_blocks: impl BadBlockSource + 'static,
        repair: impl RepairPrimitive + 'static,
    ) -> Self {
        Self {
            name,
            supported: true,
            config,
            extents: Box::new(extents),
            bad_blocks: Box::new(bad_blocks),
            repair: Box::new(repair),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// False for the no-op backend.
    pub fn is_supported(&self) -> bool {
        self.supported
    }

    pub fn config(&self) -> &BadBlocksConfig {
        &self.config
    }

    pub fn extent_source(&self) -> &dyn ExtentSource {
        self.extents.as_ref()
    }

    pub fn bad_block_source(&self) -> &dyn BadBlockSource {
        self.bad_blocks.as_ref()
    }

    pub fn repair(&self) -> &dyn RepairPrimitive {
        self.repair.as_ref()
    }

    /// Bind `path` for querying. The no-op backend refuses before touching
    /// the filesystem.
    pub fn open_target(&self, path: &Path) -> Result<Target> {
        self.ensure_supported()?;
        Target::open(path)
    }

    /// Bind `path` for clearing.
    pub fn open_target_writable(&self, path: &Path) -> Result<Target> {
        self.ensure_supported()?;
        Target::open_writable(path)
    }

    pub(crate) fn ensure_supported(&self) -> Result<()> {
        if self.supported {
            Ok(())
        } else {
            Err(Error::Unsupported(format!(
                "bad block handling is not available ({} backend)",
                self.name
            )))
        }
    }
}

#[cfg(target_os = "linux")]
fn create_backend() -> Backend {
    match linux::backend(BadBlocksConfig::from_env()) {
        Ok(backend) => backend,
        Err(e) => {
            tracing::warn!(error = %e, "linux backend unavailable, falling back to no-op backend");
            Backend::noop()
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn create_backend() -> Backend {
    Backend::noop()
}
