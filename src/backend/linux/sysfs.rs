//! Bad block lists published by the kernel in sysfs.
//!
//! Block devices expose `badblocks` as `<sector> <count>` lines in their
//! gendisk directory; partitions borrow the list of their parent disk.
//! DAX devices have no list of their own: the one of the enclosing nvdimm
//! region is used, shifted by where the device starts inside the region.

use super::split_dev;
use crate::backend::{BadBlockSource, Target};
use crate::config::BadBlocksConfig;
use crate::error::{Error, Result};
use crate::types::{DeviceKind, PhysicalRange};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Unit of `badblocks` entries and partition `start`/`size`, whatever the
/// device's logical block size.
pub const KERNEL_SECTOR_SIZE: u64 = 512;

/// Bad block source reading the kernel's sysfs lists.
#[derive(Debug, Clone)]
pub struct SysfsBadBlockSource {
    sysfs_root: PathBuf,
}

impl SysfsBadBlockSource {
    pub fn new(config: &BadBlocksConfig) -> Self {
        Self {
            sysfs_root: config.sysfs_root.clone(),
        }
    }

    fn block_device_ranges(&self, dev: u64) -> Result<Vec<PhysicalRange>> {
        let (major, minor) = split_dev(dev);
        let link = self
            .sysfs_root
            .join("dev/block")
            .join(format!("{}:{}", major, minor));
        if !link.exists() {
            // Not a block-backed filesystem (tmpfs, nfs, ...): nothing can be bad.
            debug!(major, minor, "no sysfs block entry, assuming no bad blocks");
            return Ok(Vec::new());
        }
        let dir = link.canonicalize()?;

        if dir.join("partition").is_file() {
            let start = read_number(&dir.join("start"))?;
            let size = read_number(&dir.join("size"))?;
            let disk = dir.parent().ok_or_else(|| {
                Error::invalid_data(format!("{}: partition without a disk", dir.display()))
            })?;
            let ranges = parse_badblocks(&disk.join("badblocks"))?;
            let start = sectors_to_bytes(start, &dir)?;
            let size = sectors_to_bytes(size, &dir)?;
            return Ok(window(&ranges, start, size));
        }

        parse_badblocks(&dir.join("badblocks"))
    }

    fn dax_device_ranges(&self, dev: u64) -> Result<Vec<PhysicalRange>> {
        let geometry = DaxGeometry::resolve(&self.sysfs_root, dev)?;
        let ranges = parse_badblocks(&geometry.region_dir.join("badblocks"))?;
        Ok(window(&ranges, geometry.device_offset, geometry.size))
    }
}

fn sectors_to_bytes(sectors: u64, dir: &Path) -> Result<u64> {
    sectors.checked_mul(KERNEL_SECTOR_SIZE).ok_or_else(|| {
        Error::invalid_data(format!("{}: sector count overflows", dir.display()))
    })
}

impl BadBlockSource for SysfsBadBlockSource {
    fn bad_ranges(&self, target: &Target) -> Result<Vec<PhysicalRange>> {
        let ranges = match target.kind() {
            DeviceKind::RegularFile | DeviceKind::BlockDevice => {
                self.block_device_ranges(target.device_id())?
            }
            DeviceKind::DaxDevice => self.dax_device_ranges(target.device_id())?,
        };
        debug!(
            path = %target.path().display(),
            ranges = ranges.len(),
            "sysfs bad ranges read"
        );
        Ok(ranges)
    }
}

/// Where a DAX device sits inside its nvdimm region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaxGeometry {
    /// sysfs directory of the region (`.../ndbusN/regionM`).
    pub region_dir: PathBuf,
    /// Number of the nvdimm bus owning the region.
    pub bus: u32,
    /// Physical address of the region start.
    pub region_resource: u64,
    /// Offset of the device's first byte inside the region.
    pub device_offset: u64,
    /// Device size in bytes.
    pub size: u64,
}

impl DaxGeometry {
    /// Resolve the geometry of the character device `dev`.
    pub fn resolve(sysfs_root: &Path, dev: u64) -> Result<Self> {
        let (major, minor) = split_dev(dev);
        let link = sysfs_root.join("dev/char").join(format!("{}:{}", major, minor));
        if !link.exists() {
            return Err(Error::not_found(link, "no sysfs entry for character device"));
        }
        let dir = link.canonicalize()?;

        let region_dir = dir
            .ancestors()
            .find(|p| is_region_dir(p))
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::not_found(&dir, "character device is not a dax device of an nvdimm region"))?;

        let bus = region_dir
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix("ndbus"))
            .and_then(|n| n.parse::<u32>().ok())
            .ok_or_else(|| {
                Error::invalid_data(format!("{}: region is not under an ndbus", region_dir.display()))
            })?;

        let resource = find_attribute(&dir, &region_dir, "resource").ok_or_else(|| {
            Error::Unsupported(format!(
                "{}: kernel does not expose the dax device resource",
                dir.display()
            ))
        })?;
        let size = find_attribute(&dir, &region_dir, "size").ok_or_else(|| {
            Error::invalid_data(format!("{}: dax device has no size", dir.display()))
        })?;

        let region_resource = read_number(&region_dir.join("resource"))?;
        let device_resource = read_number(&resource)?;
        let device_offset = device_resource.checked_sub(region_resource).ok_or_else(|| {
            Error::invalid_data(format!(
                "{}: device starts before its region ({:#x} < {:#x})",
                dir.display(),
                device_resource,
                region_resource
            ))
        })?;

        Ok(Self {
            region_dir,
            bus,
            region_resource,
            device_offset,
            size: read_number(&size)?,
        })
    }

    /// System physical address of a device-relative offset.
    pub fn physical_address(&self, offset: u64) -> u64 {
        self.region_resource + self.device_offset + offset
    }
}

/// First `name` attribute found walking up from `dir`, stopping below `stop`.
fn find_attribute(dir: &Path, stop: &Path, name: &str) -> Option<PathBuf> {
    dir.ancestors()
        .take_while(|p| *p != stop)
        .map(|p| p.join(name))
        .find(|p| p.is_file())
}

fn is_region_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("region"))
        && path.join("badblocks").is_file()
}

/// Parse a sysfs `badblocks` file into sorted, merged byte ranges.
/// A missing file means the device keeps no list.
pub(crate) fn parse_badblocks(path: &Path) -> Result<Vec<PhysicalRange>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut ranges = Vec::new();
    for line in content.lines() {
        let mut fields = line.split_whitespace();
        let (sector, count) = match (fields.next(), fields.next(), fields.next()) {
            (None, _, _) => continue,
            (Some(sector), Some(count), None) => (sector, count),
            _ => {
                return Err(Error::invalid_data(format!(
                    "{}: malformed line {:?}",
                    path.display(),
                    line
                )))
            }
        };
        let parse = |field: &str| {
            field.parse::<u64>().map_err(|_| {
                Error::invalid_data(format!("{}: malformed line {:?}", path.display(), line))
            })
        };
        let (sector, count) = (parse(sector)?, parse(count)?);
        if count == 0 {
            continue;
        }
        let offset = sector.checked_mul(KERNEL_SECTOR_SIZE);
        let length = count.checked_mul(KERNEL_SECTOR_SIZE);
        match (offset, length) {
            (Some(offset), Some(length)) if offset.checked_add(length).is_some() => {
                ranges.push(PhysicalRange::new(offset, length))
            }
            _ => {
                return Err(Error::invalid_data(format!(
                    "{}: range {:?} overflows",
                    path.display(),
                    line
                )))
            }
        }
    }

    ranges.sort_unstable();
    Ok(merge_physical(ranges))
}

fn merge_physical(ranges: Vec<PhysicalRange>) -> Vec<PhysicalRange> {
    let mut merged: Vec<PhysicalRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.offset <= last.end() => {
                last.length = last.end().max(range.end()) - last.offset;
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// Ranges clipped to `[start, start + length)` and rebased to `start`.
fn window(ranges: &[PhysicalRange], start: u64, length: u64) -> Vec<PhysicalRange> {
    let end = start.saturating_add(length);
    ranges
        .iter()
        .filter_map(|r| {
            let lo = r.offset.max(start);
            let hi = r.end().min(end);
            (lo < hi).then(|| PhysicalRange::new(lo - start, hi - lo))
        })
        .collect()
}

/// Read a decimal or `0x`-prefixed hexadecimal sysfs attribute.
fn read_number(path: &Path) -> Result<u64> {
    let content = std::fs::read_to_string(path)?;
    let text = content.trim();
    let parsed = match text.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse::<u64>(),
    };
    parsed.map_err(|_| Error::invalid_data(format!("{}: not a number: {:?}", path.display(), text)))
}
