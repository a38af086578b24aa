//! Translation of physical bad ranges into file-relative bad ranges.
//!
//! Both inputs must already be sorted by their own offset field and free of
//! overlaps; the translator checks this up front and refuses bad input
//! instead of re-sorting it.

use crate::error::{Error, Result};
use crate::types::{BadBlockRange, Extent, PhysicalRange};

/// Intersect `bad_ranges` with `extents`, returning exact file-relative ranges.
///
/// A bad range crossing several extents yields one range per extent; bad
/// bytes that no extent maps are dropped, since they hold no file data.
pub fn translate(extents: &[Extent], bad_ranges: &[PhysicalRange]) -> Result<Vec<BadBlockRange>> {
    Ok(translation(extents, bad_ranges, 1)?.collect())
}

/// Like [`translate`], with every range widened to `block_size` boundaries.
///
/// The start is rounded down and the end rounded up, then both are clamped to
/// the originating extent's file span. Output is sorted by offset but two
/// ranges sharing a block may overlap; [`crate::registry::merge`] folds them.
pub fn translate_aligned(
    extents: &[Extent],
    bad_ranges: &[PhysicalRange],
    block_size: u64,
) -> Result<Vec<BadBlockRange>> {
    Ok(translation(extents, bad_ranges, block_size)?.collect())
}

/// Validate both inputs and return a lazy iterator over the translated ranges.
pub fn translation<'a>(
    extents: &'a [Extent],
    bad_ranges: &'a [PhysicalRange],
    block_size: u64,
) -> Result<Translation<'a>> {
    if block_size == 0 {
        return Err(Error::InvariantViolation(
            "block size must be greater than 0".to_string(),
        ));
    }
    check_extents(extents)?;
    check_physical(bad_ranges)?;

    Ok(Translation {
        extents,
        bad_ranges,
        block_size,
        extent_idx: 0,
        bad_idx: 0,
        positioned: false,
    })
}

fn check_extents(extents: &[Extent]) -> Result<()> {
    let mut prev_end = 0u64;
    for (i, extent) in extents.iter().enumerate() {
        if extent.length == 0 {
            return Err(Error::InvariantViolation(format!(
                "extent {} at file offset {} has zero length",
                i, extent.file_offset
            )));
        }
        let file_end = extent.file_offset.checked_add(extent.length);
        let phys_end = extent.physical_offset.checked_add(extent.length);
        let (Some(file_end), Some(_)) = (file_end, phys_end) else {
            return Err(Error::InvariantViolation(format!(
                "extent {} overflows the 64-bit offset space",
                i
            )));
        };
        if i > 0 && extent.file_offset < prev_end {
            return Err(Error::InvariantViolation(format!(
                "extent {} at file offset {} is unsorted or overlaps the previous extent ending at {}",
                i, extent.file_offset, prev_end
            )));
        }
        prev_end = file_end;
    }
    Ok(())
}

fn check_physical(ranges: &[PhysicalRange]) -> Result<()> {
    let mut prev_end = 0u64;
    for (i, range) in ranges.iter().enumerate() {
        if range.length == 0 {
            return Err(Error::InvariantViolation(format!(
                "bad range {} at offset {} has zero length",
                i, range.offset
            )));
        }
        let Some(end) = range.offset.checked_add(range.length) else {
            return Err(Error::InvariantViolation(format!(
                "bad range {} overflows the 64-bit offset space",
                i
            )));
        };
        if i > 0 && range.offset < prev_end {
            return Err(Error::InvariantViolation(format!(
                "bad range {} at offset {} is unsorted or overlaps the previous range ending at {}",
                i, range.offset, prev_end
            )));
        }
        prev_end = end;
    }
    Ok(())
}

/// Iterator produced by [`translation`].
///
/// Walks extents in file order; for each extent the bad-range cursor is
/// placed by binary search, so extents need not be physically ordered.
#[derive(Debug, Clone)]
pub struct Translation<'a> {
    extents: &'a [Extent],
    bad_ranges: &'a [PhysicalRange],
    block_size: u64,
    extent_idx: usize,
    bad_idx: usize,
    positioned: bool,
}

impl Iterator for Translation<'_> {
    type Item = BadBlockRange;

    fn next(&mut self) -> Option<BadBlockRange> {
        loop {
            let extent = self.extents.get(self.extent_idx)?;
            let phys_start = extent.physical_offset;
            let phys_end = extent.physical_end();

            if !self.positioned {
                self.bad_idx = self
                    .bad_ranges
                    .partition_point(|r| r.end() <= phys_start);
                self.positioned = true;
            }

            if let Some(range) = self.bad_ranges.get(self.bad_idx) {
                if range.offset < phys_end {
                    self.bad_idx += 1;
                    let start = range.offset.max(phys_start);
                    let end = range.end().min(phys_end);
                    let file_start = extent.file_offset + (start - phys_start);
                    let file_end = file_start + (end - start);
                    return Some(self.align(extent, file_start, file_end));
                }
            }

            self.extent_idx += 1;
            self.positioned = false;
        }
    }
}

impl Translation<'_> {
    fn align(&self, extent: &Extent, start: u64, end: u64) -> BadBlockRange {
        let bs = self.block_size;
        if bs == 1 {
            return BadBlockRange::new(start, end - start);
        }
        let start = (start / bs * bs).max(extent.file_offset);
        let end = end
            .div_ceil(bs)
            .checked_mul(bs)
            .unwrap_or(u64::MAX)
            .min(extent.file_end());
        BadBlockRange::new(start, end - start)
    }
}
