//! Interval types shared by the sources, the translator and the registry.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A byte range in device-physical space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PhysicalRange {
    /// First physical byte.
    pub offset: u64,
    /// Number of bytes.
    pub length: u64,
}

impl PhysicalRange {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// One past the last byte.
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }
}

/// A contiguous run of file bytes backed by contiguous device bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extent {
    /// Logical offset of the run inside the file.
    pub file_offset: u64,
    /// Device offset the run starts at.
    pub physical_offset: u64,
    /// Number of bytes.
    pub length: u64,
}

impl Extent {
    pub fn new(file_offset: u64, physical_offset: u64, length: u64) -> Self {
        Self {
            file_offset,
            physical_offset,
            length,
        }
    }

    /// The implicit extent of a raw device: every byte maps onto itself.
    pub fn identity() -> Self {
        Self::new(0, 0, u64::MAX)
    }

    pub fn file_end(&self) -> u64 {
        self.file_offset.saturating_add(self.length)
    }

    pub fn physical_end(&self) -> u64 {
        self.physical_offset.saturating_add(self.length)
    }
}

/// Extents of one file, as reported by an extent source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileExtents {
    /// Allocation unit of the underlying filesystem.
    pub block_size: u64,
    /// Extents sorted by `file_offset`.
    pub extents: Vec<Extent>,
}

/// A bad range expressed in file-relative (or device-relative) bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BadBlockRange {
    pub offset: u64,
    pub length: u64,
}

impl BadBlockRange {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }
}

impl fmt::Display for BadBlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x})", self.offset, self.end())
    }
}

/// Ordered, merged bad ranges of one file or device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadBlocksList {
    ranges: Vec<BadBlockRange>,
}

impl BadBlocksList {
    /// Build a list from arbitrary ranges: zero-length entries are dropped,
    /// the rest are sorted and coalesced.
    pub fn from_ranges(mut ranges: Vec<BadBlockRange>) -> Self {
        ranges.retain(|r| r.length > 0);
        ranges.sort_unstable();
        Self {
            ranges: crate::registry::merge(&ranges),
        }
    }

    /// Wrap ranges already known to be sorted and merged.
    pub(crate) fn from_merged(ranges: Vec<BadBlockRange>) -> Self {
        Self { ranges }
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Total number of bad bytes.
    pub fn total_bytes(&self) -> u64 {
        self.ranges.iter().map(|r| r.length).sum()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BadBlockRange> {
        self.ranges.iter()
    }

    pub fn as_slice(&self) -> &[BadBlockRange] {
        &self.ranges
    }
}

impl IntoIterator for BadBlocksList {
    type Item = BadBlockRange;
    type IntoIter = std::vec::IntoIter<BadBlockRange>;

    fn into_iter(self) -> Self::IntoIter {
        self.ranges.into_iter()
    }
}

impl<'a> IntoIterator for &'a BadBlocksList {
    type Item = &'a BadBlockRange;
    type IntoIter = std::slice::Iter<'a, BadBlockRange>;

    fn into_iter(self) -> Self::IntoIter {
        self.ranges.iter()
    }
}

/// What a path turned out to be once opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// A file on a filesystem; needs extent translation.
    RegularFile,
    /// A raw block device such as `/dev/pmem0`.
    BlockDevice,
    /// A character DAX device such as `/dev/dax0.0`.
    DaxDevice,
}

impl DeviceKind {
    /// Raw devices are addressed directly, without extent translation.
    pub fn is_raw_device(self) -> bool {
        !matches!(self, DeviceKind::RegularFile)
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceKind::RegularFile => "regular file",
            DeviceKind::BlockDevice => "block device",
            DeviceKind::DaxDevice => "dax device",
        };
        f.write_str(name)
    }
}
