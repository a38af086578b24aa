//! Repair primitive for Linux, one strategy per device kind.

use super::block_device::BlockDevice;
use super::ndctl::NdBus;
use super::sysfs::DaxGeometry;
use crate::backend::{RepairFailure, RepairPrimitive, Target};
use crate::config::BadBlocksConfig;
use crate::error::Error;
use crate::types::{BadBlockRange, DeviceKind};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use tracing::debug;

type RepairResult = std::result::Result<(), RepairFailure>;

/// Clears bad ranges of files, block devices and dax devices.
#[derive(Debug, Clone)]
pub struct LinuxRepair {
    sysfs_root: PathBuf,
    dev_root: PathBuf,
    sector_size: u64,
    chunk_size: u64,
}

impl LinuxRepair {
    pub fn new(config: &BadBlocksConfig) -> Self {
        Self {
            sysfs_root: config.sysfs_root.clone(),
            dev_root: config.dev_root.clone(),
            sector_size: config.sector_size,
            chunk_size: config.clear_chunk_size,
        }
    }

    /// Give the filesystem back the blocks and allocate fresh ones, which
    /// read as zeros. Exactly `[offset, end)` is touched: the filesystem
    /// zeroes partial blocks at either edge in place.
    fn reallocate(&self, target: &Target, range: &BadBlockRange) -> RepairResult {
        let file = target.file();
        let (Ok(off), Ok(len)) = (i64::try_from(range.offset), i64::try_from(range.length)) else {
            return Err(Error::InvariantViolation(format!(
                "range {} does not fit in off_t",
                range
            ))
            .into());
        };
        if off.checked_add(len).is_none() {
            return Err(Error::InvariantViolation("clear range overflows".to_string()).into());
        }

        let fd = file.as_raw_fd();
        // SAFETY: plain syscall on a descriptor owned by `target`.
        let ret = unsafe {
            libc::fallocate(
                fd,
                libc::FALLOC_FL_PUNCH_HOLE | libc::FALLOC_FL_KEEP_SIZE,
                off,
                len,
            )
        };
        if ret != 0 {
            return Err(std::io::Error::last_os_error().into());
        }

        // SAFETY: as above.
        let ret = unsafe { libc::fallocate(fd, libc::FALLOC_FL_KEEP_SIZE, off, len) };
        if ret != 0 {
            return Err(std::io::Error::last_os_error().into());
        }

        debug!(
            path = %target.path().display(),
            %range,
            "file range deallocated and reallocated"
        );
        Ok(())
    }

    fn rewrite(&self, target: &Target, range: &BadBlockRange) -> RepairResult {
        let device = BlockDevice::open_write(target.path(), self.sector_size, self.chunk_size)?;
        device.zero_range(range.offset, range.length)
    }

    fn firmware_clear(&self, target: &Target, range: &BadBlockRange) -> RepairResult {
        let geometry = DaxGeometry::resolve(&self.sysfs_root, target.device_id())?;
        if range.end() > geometry.size {
            return Err(Error::InvariantViolation(format!(
                "range {} lies beyond the end of {} ({} bytes)",
                range,
                target.path().display(),
                geometry.size
            ))
            .into());
        }

        let bus = NdBus::open(&self.dev_root, geometry.bus)?;
        let cleared = bus.clear_error(geometry.physical_address(range.offset), range.length)?;
        if cleared < range.length {
            return Err(RepairFailure {
                bytes_cleared: cleared,
                cause: Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("firmware cleared {} of {} bytes", cleared, range.length),
                )),
            });
        }
        Ok(())
    }
}

impl RepairPrimitive for LinuxRepair {
    fn clear(&self, target: &Target, range: &BadBlockRange) -> RepairResult {
        match target.kind() {
            DeviceKind::RegularFile => self.reallocate(target, range),
            DeviceKind::BlockDevice => self.rewrite(target, range),
            DeviceKind::DaxDevice => self.firmware_clear(target, range),
        }
    }
}
