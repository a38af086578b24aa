//! Raw block device rewrites for Linux.
//!
//! The pmem driver clears media poison when a write covers whole sectors,
//! so a bad range on a raw pmem block device is repaired by rewriting it
//! with zeros through O_DIRECT, bypassing the page cache.

use crate::backend::RepairFailure;
use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::Path;
use tracing::debug;

/// Buffer alignment for O_DIRECT writes.
const DIRECT_IO_ALIGNMENT: usize = 4096;

/// Handle for zero-filling ranges of a raw block device.
pub struct BlockDevice {
    file: File,
    sector_size: u64,
    chunk_size: u64,
}

impl BlockDevice {
    /// Open a block device for direct writes.
    pub fn open_write(path: &Path, sector_size: u64, chunk_size: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_DIRECT)
            .open(path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    Error::not_found(path, "block device disappeared")
                }
                std::io::ErrorKind::PermissionDenied => Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Cannot open block device {} for writing. Try running with sudo.",
                        path.display()
                    ),
                )),
                _ => Error::Io(e),
            })?;

        Ok(Self {
            file,
            sector_size,
            chunk_size,
        })
    }

    /// Overwrite `[offset, offset + length)` with zeros. Both ends must fall
    /// on sector boundaries; nothing outside the range is written. On failure
    /// the error carries how much of the range had already been rewritten.
    pub fn zero_range(&self, offset: u64, length: u64) -> std::result::Result<(), RepairFailure> {
        check_aligned(offset, length, self.sector_size)?;

        let chunk = self.chunk_size.min(length) as usize;
        let buf = vec![0u8; chunk + DIRECT_IO_ALIGNMENT];
        let pad = buf.as_ptr().align_offset(DIRECT_IO_ALIGNMENT);
        let zeros = &buf[pad..pad + chunk];

        zero_fill(offset, length, zeros, |data, pos| self.file.write_all_at(data, pos))?;

        if let Err(e) = self.file.sync_data() {
            return Err(RepairFailure {
                bytes_cleared: 0,
                cause: Error::Io(e),
            });
        }

        debug!(offset, length, "block range rewritten with zeros");
        Ok(())
    }
}

/// Direct I/O cannot write part of a sector.
fn check_aligned(offset: u64, length: u64, sector_size: u64) -> Result<()> {
    if offset % sector_size != 0 || length % sector_size != 0 {
        return Err(Error::InvariantViolation(format!(
            "range [{:#x}, +{}) is not aligned to the {}-byte sector",
            offset, length, sector_size
        )));
    }
    if offset.checked_add(length).is_none() {
        return Err(Error::InvariantViolation("clear range overflows".to_string()));
    }
    Ok(())
}

/// Write `zeros` repeatedly over `[offset, offset + length)`. A failed write
/// reports the bytes written before it.
fn zero_fill(
    offset: u64,
    length: u64,
    zeros: &[u8],
    mut write_at: impl FnMut(&[u8], u64) -> std::io::Result<()>,
) -> std::result::Result<(), RepairFailure> {
    let end = offset + length;
    let mut pos = offset;
    while pos < end {
        let n = (end - pos).min(zeros.len() as u64) as usize;
        if let Err(e) = write_at(&zeros[..n], pos) {
            return Err(RepairFailure {
                bytes_cleared: pos - offset,
                cause: Error::Io(e),
            });
        }
        pos += n as u64;
    }
    Ok(())
}
