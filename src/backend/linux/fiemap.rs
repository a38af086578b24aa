//! File extent query through the `FS_IOC_FIEMAP` ioctl.

use crate::backend::ExtentSource;
use crate::config::BadBlocksConfig;
use crate::error::{Error, Result};
use crate::types::{Extent, FileExtents};
use std::fs::File;
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::AsRawFd;
use tracing::debug;

/// `_IOWR('f', 11, struct fiemap)`.
const FS_IOC_FIEMAP: u64 = 0xC020_660B;

/// Flush dirty data before mapping, so delayed allocations get addresses.
const FIEMAP_FLAG_SYNC: u32 = 0x0000_0001;

const FIEMAP_EXTENT_LAST: u32 = 0x0000_0001;
const FIEMAP_EXTENT_UNKNOWN: u32 = 0x0000_0002;
const FIEMAP_EXTENT_DELALLOC: u32 = 0x0000_0004;
const FIEMAP_EXTENT_DATA_INLINE: u32 = 0x0000_0200;

/// Extents whose physical address is meaningless.
const FIEMAP_EXTENT_NO_ADDRESS: u32 =
    FIEMAP_EXTENT_UNKNOWN | FIEMAP_EXTENT_DELALLOC | FIEMAP_EXTENT_DATA_INLINE;

/// `struct fiemap` without its trailing extent array.
#[repr(C)]
#[allow(dead_code)]
#[derive(Debug, Default, Clone, Copy)]
struct FiemapHeader {
    fm_start: u64,
    fm_length: u64,
    fm_flags: u32,
    fm_mapped_extents: u32,
    fm_extent_count: u32,
    fm_reserved: u32,
}

/// `struct fiemap_extent`.
#[repr(C)]
#[allow(dead_code)]
#[derive(Debug, Default, Clone, Copy)]
struct FiemapExtent {
    fe_logical: u64,
    fe_physical: u64,
    fe_length: u64,
    fe_reserved64: [u64; 2],
    fe_flags: u32,
    fe_reserved: [u32; 3],
}

const HEADER_WORDS: usize = std::mem::size_of::<FiemapHeader>() / 8;
const EXTENT_WORDS: usize = std::mem::size_of::<FiemapExtent>() / 8;

/// Extent source backed by FIEMAP.
#[derive(Debug, Clone)]
pub struct FiemapExtentSource {
    batch: u32,
}

impl FiemapExtentSource {
    pub fn new(config: &BadBlocksConfig) -> Self {
        Self {
            batch: config.fiemap_batch,
        }
    }

    /// One FIEMAP call starting at `start`, returning up to `count` extents.
    fn request(file: &File, start: u64, count: u32) -> Result<Vec<FiemapExtent>> {
        // u64 words keep both structures correctly aligned.
        let mut buf = vec![0u64; HEADER_WORDS + EXTENT_WORDS * count as usize];
        let header = FiemapHeader {
            fm_start: start,
            fm_length: u64::MAX - start,
            fm_flags: FIEMAP_FLAG_SYNC,
            fm_extent_count: count,
            ..Default::default()
        };

        // SAFETY: `buf` is at least one header long and 8-byte aligned;
        // FiemapHeader is repr(C) with no stricter alignment.
        unsafe { std::ptr::write(buf.as_mut_ptr().cast::<FiemapHeader>(), header) };

        // SAFETY: the kernel writes at most `count` extents after the header,
        // which is exactly the space allocated above.
        let ret = unsafe { libc::ioctl(file.as_raw_fd(), FS_IOC_FIEMAP as _, buf.as_mut_ptr()) };
        if ret == -1 {
            let err = std::io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(libc::EOPNOTSUPP) | Some(libc::ENOTTY) => {
                    Error::Unsupported("filesystem does not report file extents".to_string())
                }
                _ => Error::Io(err),
            });
        }

        // SAFETY: same layout argument as the write above.
        let header = unsafe { std::ptr::read(buf.as_ptr().cast::<FiemapHeader>()) };
        let mapped = header.fm_mapped_extents.min(count) as usize;
        Ok((0..mapped)
            .map(|i| {
                let at = HEADER_WORDS + i * EXTENT_WORDS;
                // SAFETY: `at + EXTENT_WORDS <= buf.len()` because `i < count`.
                unsafe { std::ptr::read(buf.as_ptr().add(at).cast::<FiemapExtent>()) }
            })
            .collect())
    }

    /// Walk every extent of `file` in batches, handing the addressable ones
    /// to `visit`. Returns how many were skipped.
    fn walk(&self, file: &File, mut visit: impl FnMut(Extent)) -> Result<usize> {
        let mut start = 0u64;
        let mut skipped = 0usize;

        loop {
            let batch = Self::request(file, start, self.batch)?;
            let Some(tail) = batch.last().copied() else {
                break;
            };

            for fe in &batch {
                match addressable(fe) {
                    Some(extent) => visit(extent),
                    None => skipped += 1,
                }
            }

            if tail.fe_flags & FIEMAP_EXTENT_LAST != 0 {
                break;
            }
            let next = tail.fe_logical.saturating_add(tail.fe_length);
            if next <= start {
                return Err(Error::invalid_data(
                    "FIEMAP made no progress past the last returned extent",
                ));
            }
            start = next;
        }
        Ok(skipped)
    }
}

/// The extent as a mapping, unless it has no stable physical address.
fn addressable(fe: &FiemapExtent) -> Option<Extent> {
    if fe.fe_flags & FIEMAP_EXTENT_NO_ADDRESS != 0 || fe.fe_length == 0 {
        return None;
    }
    Some(Extent::new(fe.fe_logical, fe.fe_physical, fe.fe_length))
}

impl ExtentSource for FiemapExtentSource {
    fn extents(&self, file: &File) -> Result<FileExtents> {
        let block_size = file.metadata()?.blksize();
        let mut extents = Vec::new();
        let skipped = self.walk(file, |extent| extents.push(extent))?;

        debug!(extents = extents.len(), skipped, block_size, "fiemap query complete");
        Ok(FileExtents {
            block_size,
            extents,
        })
    }

    fn count(&self, file: &File) -> Result<u64> {
        let mut count = 0u64;
        let skipped = self.walk(file, |_| count += 1)?;
        debug!(count, skipped, "fiemap count complete");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom, Write};

    #[test]
    fn test_struct_layout_matches_kernel() {
        assert_eq!(std::mem::size_of::<FiemapHeader>(), 32);
        assert_eq!(std::mem::size_of::<FiemapExtent>(), 56);
    }

    #[test]
    fn test_ioctl_number() {
        let dir = 3u64 << 30;
        let size = (std::mem::size_of::<FiemapHeader>() as u64) << 16;
        let nr = (u64::from(b'f') << 8) | 11;
        assert_eq!(FS_IOC_FIEMAP, dir | size | nr);
    }

    fn raw(logical: u64, physical: u64, length: u64, flags: u32) -> FiemapExtent {
        FiemapExtent {
            fe_logical: logical,
            fe_physical: physical,
            fe_length: length,
            fe_flags: flags,
            ..Default::default()
        }
    }

    #[test]
    fn test_unaddressable_extents_skipped() {
        assert_eq!(
            addressable(&raw(0, 8192, 4096, FIEMAP_EXTENT_LAST)),
            Some(Extent::new(0, 8192, 4096))
        );
        assert_eq!(addressable(&raw(0, 0, 4096, FIEMAP_EXTENT_DELALLOC)), None);
        assert_eq!(addressable(&raw(0, 0, 4096, FIEMAP_EXTENT_UNKNOWN)), None);
        assert_eq!(addressable(&raw(0, 0, 60, FIEMAP_EXTENT_DATA_INLINE)), None);
        assert_eq!(addressable(&raw(4096, 8192, 0, 0)), None);
    }

    #[test]
    fn test_count_matches_extent_list() {
        let mut file = tempfile::tempfile().unwrap();
        for i in 0..8u8 {
            file.write_all(&[i; 4096]).unwrap();
            // Leave holes so the file has several extents where supported.
            file.seek(SeekFrom::Current(65536)).unwrap();
        }
        file.sync_all().unwrap();

        let source = FiemapExtentSource::new(&BadBlocksConfig {
            fiemap_batch: 2,
            ..Default::default()
        });
        let mapped = match source.extents(&file) {
            Ok(mapped) => mapped,
            Err(Error::Unsupported(_)) => return,
            Err(e) => panic!("fiemap failed: {}", e),
        };
        assert_eq!(source.count(&file).unwrap(), mapped.extents.len() as u64);
    }
}
