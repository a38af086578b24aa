//! Firmware error clearing through the nvdimm bus control device.
//!
//! `/dev/ndctlN` accepts the ACPI NFIT address range scrub commands. A clear
//! must cover whole `clear_err_unit`s, which `ND_CMD_ARS_CAP` reports for
//! the address range being cleared.

use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use tracing::debug;

/// `_IOWR('N', ND_CMD_ARS_CAP, struct nd_cmd_ars_cap)`.
const ND_IOCTL_ARS_CAP: u64 = 0xC020_4E01;

/// `_IOWR('N', ND_CMD_CLEAR_ERROR, struct nd_cmd_clear_error)`.
const ND_IOCTL_CLEAR_ERROR: u64 = 0xC020_4E04;

#[repr(C)]
#[allow(dead_code)]
#[derive(Debug, Default, Clone, Copy)]
struct ArsCap {
    address: u64,
    length: u64,
    status: u32,
    max_ars_out: u32,
    clear_err_unit: u32,
    flags: u16,
    reserved: u16,
}

#[repr(C)]
#[allow(dead_code)]
#[derive(Debug, Default, Clone, Copy)]
struct ClearError {
    address: u64,
    length: u64,
    status: u32,
    reserved: [u8; 4],
    cleared: u64,
}

/// Handle on one nvdimm bus.
pub struct NdBus {
    file: File,
    bus: u32,
}

impl NdBus {
    /// Open `/dev/ndctl<bus>` under `dev_root`.
    pub fn open(dev_root: &Path, bus: u32) -> Result<Self> {
        let path = dev_root.join(format!("ndctl{}", bus));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    Error::not_found(&path, "nvdimm bus control device missing")
                }
                _ => Error::Io(e),
            })?;
        Ok(Self { file, bus })
    }

    /// Granularity in bytes at which errors in `[address, address + length)`
    /// can be cleared.
    pub fn clear_error_unit(&self, address: u64, length: u64) -> Result<u64> {
        let mut cmd = ArsCap {
            address,
            length,
            ..Default::default()
        };
        // SAFETY: `cmd` matches `struct nd_cmd_ars_cap` and outlives the call.
        let ret = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                ND_IOCTL_ARS_CAP as _,
                &mut cmd as *mut ArsCap,
            )
        };
        if ret == -1 {
            return Err(std::io::Error::last_os_error().into());
        }
        check_status("ars_cap", cmd.status)?;
        Ok(u64::from(cmd.clear_err_unit.max(1)))
    }

    /// Clear firmware errors over the range, widened to the clear unit.
    /// Returns the number of bytes the firmware reports as cleared.
    pub fn clear_error(&self, address: u64, length: u64) -> Result<u64> {
        let unit = self.clear_error_unit(address, length)?;
        let start = address / unit * unit;
        let end = address
            .checked_add(length)
            .and_then(|end| end.div_ceil(unit).checked_mul(unit))
            .ok_or_else(|| Error::InvariantViolation("clear range overflows".to_string()))?;

        let mut cmd = ClearError {
            address: start,
            length: end - start,
            ..Default::default()
        };
        // SAFETY: `cmd` matches `struct nd_cmd_clear_error` and outlives the call.
        let ret = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                ND_IOCTL_CLEAR_ERROR as _,
                &mut cmd as *mut ClearError,
            )
        };
        if ret == -1 {
            return Err(std::io::Error::last_os_error().into());
        }
        check_status("clear_error", cmd.status)?;

        debug!(
            bus = self.bus,
            address = format_args!("{:#x}", start),
            requested = end - start,
            cleared = cmd.cleared,
            "firmware clear complete"
        );
        Ok(cleared_within(start, cmd.cleared, address, length))
    }
}

/// Bytes of `[address, address + length)` covered by a firmware clear that
/// ran `cleared` bytes forward from the unit-aligned `start`.
fn cleared_within(start: u64, cleared: u64, address: u64, length: u64) -> u64 {
    cleared.saturating_sub(address - start).min(length)
}

fn check_status(command: &str, status: u32) -> Result<()> {
    if status & 0xffff == 0 {
        return Ok(());
    }
    Err(Error::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("{} failed with firmware status {:#x}", command, status),
    )))
}
