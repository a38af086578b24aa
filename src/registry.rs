//! Per-file and per-device view of bad blocks.
//!
//! The registry queries the bound sources, translates physical bad ranges
//! into target-relative ranges and coalesces the result. Nothing is cached:
//! extents move as files are written, so every call starts from scratch.

use crate::backend::{Backend, Target};
use crate::error::Result;
use crate::translate::{translation, Translation};
use crate::types::{BadBlockRange, BadBlocksList, Extent};
use tracing::debug;

/// Union of sorted ranges: overlapping or touching ranges become one.
///
/// Input must be sorted by offset. Applying `merge` to its own output returns
/// the same list.
pub fn merge(ranges: &[BadBlockRange]) -> Vec<BadBlockRange> {
    Coalesce::new(ranges.iter().copied()).collect()
}

/// Iterator adapter folding overlapping or adjacent ranges of a sorted stream.
#[derive(Debug, Clone)]
pub struct Coalesce<I> {
    inner: I,
    pending: Option<BadBlockRange>,
}

impl<I: Iterator<Item = BadBlockRange>> Coalesce<I> {
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            pending: None,
        }
    }
}

impl<I: Iterator<Item = BadBlockRange>> Iterator for Coalesce<I> {
    type Item = BadBlockRange;

    fn next(&mut self) -> Option<BadBlockRange> {
        let mut current = self.pending.take().or_else(|| self.inner.next())?;
        for next in self.inner.by_ref() {
            if next.offset <= current.end() {
                let end = current.end().max(next.end());
                current.length = end - current.offset;
            } else {
                self.pending = Some(next);
                break;
            }
        }
        Some(current)
    }
}

/// Builds bad block lists for targets through a backend's sources.
#[derive(Clone, Copy)]
pub struct Registry<'b> {
    backend: &'b Backend,
}

impl<'b> Registry<'b> {
    pub fn new(backend: &'b Backend) -> Self {
        Self { backend }
    }

    /// Current merged bad ranges of `target`, ascending.
    pub fn build(&self, target: &Target) -> Result<BadBlocksList> {
        let ranges = self.with_ranges(target, |ranges| ranges.collect::<Vec<_>>())?;
        debug!(
            path = %target.path().display(),
            ranges = ranges.len(),
            "bad block list built"
        );
        Ok(BadBlocksList::from_merged(ranges))
    }

    /// Number of merged bad ranges of `target`, without collecting them.
    pub fn count(&self, target: &Target) -> Result<u64> {
        self.with_ranges(target, |ranges| ranges.count() as u64)
    }

    fn with_ranges<R>(
        &self,
        target: &Target,
        consume: impl FnOnce(Coalesce<Translation<'_>>) -> R,
    ) -> Result<R> {
        let (extents, block_size) = if target.kind().is_raw_device() {
            (vec![Extent::identity()], self.backend.config().sector_size)
        } else {
            let file_extents = self.backend.extent_source().extents(target.file())?;
            (file_extents.extents, file_extents.block_size)
        };
        let bad_ranges = self.backend.bad_block_source().bad_ranges(target)?;

        debug!(
            path = %target.path().display(),
            kind = %target.kind(),
            extents = extents.len(),
            bad_ranges = bad_ranges.len(),
            block_size,
            "sources queried"
        );

        let translated = translation(&extents, &bad_ranges, block_size)?;
        Ok(consume(Coalesce::new(translated)))
    }
}
