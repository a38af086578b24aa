//! Clearing of bad ranges with per-range outcomes.
//!
//! Ranges are cleared in ascending offset order. A failure on one range does
//! not stop the others unless the failure means the device itself is gone;
//! then every remaining range is reported as skipped.
//!
//! The clearer does not lock the target. Writers and clearers of the same
//! file must be synchronized by the caller.

use crate::backend::{Backend, RepairFailure, Target};
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::types::BadBlockRange;
use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

/// Which ranges to clear.
#[derive(Debug, Clone, Copy)]
pub enum ClearRequest<'a> {
    /// Exactly these ranges.
    Ranges(&'a [BadBlockRange]),
    /// Whatever the registry currently reports.
    All,
}

/// Result of clearing one range.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClearStatus {
    Cleared,
    /// The first `bytes_cleared` bytes were repaired, the rest were not.
    Partial {
        bytes_cleared: u64,
        #[serde(serialize_with = "error_message")]
        cause: Error,
    },
    Failed {
        #[serde(serialize_with = "error_message")]
        cause: Error,
    },
    /// Not attempted because an earlier range failed fatally.
    Skipped,
}

/// One range and what happened to it.
#[derive(Debug, Serialize)]
pub struct ClearOutcome {
    pub range: BadBlockRange,
    #[serde(flatten)]
    pub status: ClearStatus,
}

impl ClearOutcome {
    pub fn is_cleared(&self) -> bool {
        matches!(self.status, ClearStatus::Cleared)
    }

    /// Bytes of the range known to be repaired.
    pub fn bytes_cleared(&self) -> u64 {
        match self.status {
            ClearStatus::Cleared => self.range.length,
            ClearStatus::Partial { bytes_cleared, .. } => bytes_cleared,
            ClearStatus::Failed { .. } | ClearStatus::Skipped => 0,
        }
    }
}

/// Outcomes of one clear call, in the order the ranges were processed.
#[derive(Debug, Default, Serialize)]
pub struct ClearReport {
    outcomes: Vec<ClearOutcome>,
}

impl ClearReport {
    pub fn outcomes(&self) -> &[ClearOutcome] {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> Vec<ClearOutcome> {
        self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn cleared(&self) -> usize {
        self.count(|s| matches!(s, ClearStatus::Cleared))
    }

    pub fn partial(&self) -> usize {
        self.count(|s| matches!(s, ClearStatus::Partial { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, ClearStatus::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, ClearStatus::Skipped))
    }

    pub fn bytes_cleared(&self) -> u64 {
        self.outcomes.iter().map(ClearOutcome::bytes_cleared).sum()
    }

    /// True when every range was cleared.
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(ClearOutcome::is_cleared)
    }

    /// `Err(PartialClear)` unless every range was cleared.
    pub fn ensure_complete(&self) -> Result<()> {
        if self.is_complete() {
            return Ok(());
        }
        Err(Error::PartialClear {
            cleared: self.cleared(),
            partial: self.partial(),
            failed: self.failed(),
            skipped: self.skipped(),
        })
    }

    fn count(&self, pred: impl Fn(&ClearStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }
}

fn error_message<S: Serializer>(error: &Error, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

impl IntoIterator for ClearReport {
    type Item = ClearOutcome;
    type IntoIter = std::vec::IntoIter<ClearOutcome>;

    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.into_iter()
    }
}

/// Drives a backend's repair primitive over a set of ranges.
#[derive(Clone, Copy)]
pub struct Clearer<'b> {
    backend: &'b Backend,
}

impl<'b> Clearer<'b> {
    pub fn new(backend: &'b Backend) -> Self {
        Self { backend }
    }

    /// Clear the requested ranges of `target`.
    ///
    /// Only discovering ranges for [`ClearRequest::All`] can fail as a whole;
    /// repair failures are reported per range in the returned report.
    pub fn clear(&self, target: &Target, request: ClearRequest<'_>) -> Result<ClearReport> {
        let mut ranges: Vec<BadBlockRange> = match request {
            ClearRequest::Ranges(ranges) => ranges.to_vec(),
            ClearRequest::All => Registry::new(self.backend).build(target)?.into_iter().collect(),
        };
        if ranges.is_empty() {
            return Ok(ClearReport::default());
        }
        ranges.sort_by_key(|r| r.offset);

        debug!(
            path = %target.path().display(),
            kind = %target.kind(),
            ranges = ranges.len(),
            "clearing bad ranges"
        );

        let repair = self.backend.repair();
        let mut outcomes = Vec::with_capacity(ranges.len());
        let mut pending = ranges.into_iter();

        while let Some(range) = pending.next() {
            let result = if range.length == 0 {
                Err(RepairFailure::from(Error::InvariantViolation(format!(
                    "range at offset {} has zero length",
                    range.offset
                ))))
            } else {
                repair.clear(target, &range)
            };

            let failure = match result {
                Ok(()) => {
                    debug!(%range, "range cleared");
                    outcomes.push(ClearOutcome {
                        range,
                        status: ClearStatus::Cleared,
                    });
                    continue;
                }
                Err(failure) => failure,
            };

            let fatal = failure.cause.is_fatal();
            warn!(
                path = %target.path().display(),
                %range,
                bytes_cleared = failure.bytes_cleared,
                error = %failure.cause,
                fatal,
                "range not cleared"
            );
            let status = if failure.bytes_cleared > 0 {
                ClearStatus::Partial {
                    bytes_cleared: failure.bytes_cleared,
                    cause: failure.cause,
                }
            } else {
                ClearStatus::Failed {
                    cause: failure.cause,
                }
            };
            outcomes.push(ClearOutcome { range, status });

            if fatal {
                outcomes.extend(pending.by_ref().map(|range| ClearOutcome {
                    range,
                    status: ClearStatus::Skipped,
                }));
                break;
            }
        }

        let report = ClearReport { outcomes };
        info!(
            path = %target.path().display(),
            cleared = report.cleared(),
            partial = report.partial(),
            failed = report.failed(),
            skipped = report.skipped(),
            bytes_cleared = report.bytes_cleared(),
            "clear finished"
        );
        Ok(report)
    }
}
