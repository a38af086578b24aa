//! Fallback capabilities for platforms without bad block support.

use super::{BadBlockSource, ExtentSource, RepairFailure, RepairPrimitive, Target};
use crate::error::{Error, Result};
use crate::types::{BadBlockRange, FileExtents, PhysicalRange};
use std::fs::File;
use tracing::trace;

/// Extent source that knows nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExtentSource;

impl ExtentSource for NoopExtentSource {
    fn extents(&self, _file: &File) -> Result<FileExtents> {
        trace!("extents requested from no-op backend");
        Err(Error::Unsupported(
            "file extent query not supported on this platform".to_string(),
        ))
    }

    fn count(&self, _file: &File) -> Result<u64> {
        trace!("extent count requested from no-op backend");
        Err(Error::Unsupported(
            "file extent query not supported on this platform".to_string(),
        ))
    }
}

/// Bad block source that never reports anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBadBlockSource;

impl BadBlockSource for NoopBadBlockSource {
    fn bad_ranges(&self, target: &Target) -> Result<Vec<PhysicalRange>> {
        trace!(path = %target.path().display(), "bad ranges requested from no-op backend");
        Ok(Vec::new())
    }
}

/// Repair primitive that refuses every range.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRepair;

impl RepairPrimitive for NoopRepair {
    fn clear(&self, target: &Target, range: &BadBlockRange) -> std::result::Result<(), RepairFailure> {
        trace!(path = %target.path().display(), %range, "clear requested from no-op backend");
        Err(Error::Unsupported("clearing bad blocks not supported on this platform".to_string()).into())
    }
}
