//! Scripted in-memory capabilities for exercising the core without hardware.

#![allow(dead_code)]

use pmem_badblocks::{
    Backend, BadBlockRange, BadBlockSource, BadBlocksConfig, Error, Extent, ExtentSource,
    FileExtents, PhysicalRange, RepairFailure, RepairPrimitive, Result, Target,
};
use std::collections::HashMap;
use std::fs::File;
use std::sync::{Arc, Mutex};

pub fn ext(file_offset: u64, physical_offset: u64, length: u64) -> Extent {
    Extent::new(file_offset, physical_offset, length)
}

pub fn bad(offset: u64, length: u64) -> PhysicalRange {
    PhysicalRange::new(offset, length)
}

pub fn range(offset: u64, length: u64) -> BadBlockRange {
    BadBlockRange::new(offset, length)
}

/// Extent source returning a fixed answer.
pub struct FixedExtents {
    pub answer: std::result::Result<FileExtents, i32>,
    pub calls: Arc<Mutex<usize>>,
}

impl ExtentSource for FixedExtents {
    fn extents(&self, _file: &File) -> Result<FileExtents> {
        *self.calls.lock().unwrap() += 1;
        match &self.answer {
            Ok(extents) => Ok(extents.clone()),
            Err(errno) => Err(Error::Io(std::io::Error::from_raw_os_error(*errno))),
        }
    }
}

/// Bad block source returning a fixed answer.
pub struct FixedBadBlocks {
    pub answer: std::result::Result<Vec<PhysicalRange>, i32>,
}

impl BadBlockSource for FixedBadBlocks {
    fn bad_ranges(&self, _target: &Target) -> Result<Vec<PhysicalRange>> {
        match &self.answer {
            Ok(ranges) => Ok(ranges.clone()),
            Err(errno) => Err(Error::Io(std::io::Error::from_raw_os_error(*errno))),
        }
    }
}

/// What the scripted repair does for a range starting at a given offset.
#[derive(Debug, Clone, Copy)]
pub enum Scripted {
    Fail(i32),
    Partial(u64, i32),
}

/// Repair primitive that records every call and fails where scripted.
#[derive(Default)]
pub struct ScriptedRepair {
    pub script: HashMap<u64, Scripted>,
    pub calls: Arc<Mutex<Vec<BadBlockRange>>>,
}

impl RepairPrimitive for ScriptedRepair {
    fn clear(&self, _target: &Target, range: &BadBlockRange) -> std::result::Result<(), RepairFailure> {
        self.calls.lock().unwrap().push(*range);
        match self.script.get(&range.offset) {
            None => Ok(()),
            Some(Scripted::Fail(errno)) => {
                Err(std::io::Error::from_raw_os_error(*errno).into())
            }
            Some(Scripted::Partial(bytes, errno)) => Err(RepairFailure {
                bytes_cleared: *bytes,
                cause: Error::Io(std::io::Error::from_raw_os_error(*errno)),
            }),
        }
    }
}

/// Handles for inspecting a scripted backend after the fact.
pub struct Calls {
    pub extent_calls: Arc<Mutex<usize>>,
    pub repair_calls: Arc<Mutex<Vec<BadBlockRange>>>,
}

pub struct Scenario {
    pub block_size: u64,
    pub extents: std::result::Result<Vec<Extent>, i32>,
    pub bad: std::result::Result<Vec<PhysicalRange>, i32>,
    pub script: HashMap<u64, Scripted>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            block_size: 1,
            extents: Ok(Vec::new()),
            bad: Ok(Vec::new()),
            script: HashMap::new(),
        }
    }
}

impl Scenario {
    pub fn build(self) -> (Backend, Calls) {
        let extent_calls = Arc::new(Mutex::new(0));
        let repair_calls = Arc::new(Mutex::new(Vec::new()));
        let block_size = self.block_size;

        let backend = Backend::from_parts(
            "scripted",
            BadBlocksConfig::default(),
            FixedExtents {
                answer: self.extents.map(|extents| FileExtents {
                    block_size,
                    extents,
                }),
                calls: Arc::clone(&extent_calls),
            },
            FixedBadBlocks { answer: self.bad },
            ScriptedRepair {
                script: self.script,
                calls: Arc::clone(&repair_calls),
            },
        );
        (
            backend,
            Calls {
                extent_calls,
                repair_calls,
            },
        )
    }
}
