//! Persistent Memory Bad Block Management
//!
//! Finds the byte ranges of a file (or a raw pmem device) that overlap media
//! errors reported by the kernel, and clears them so the range becomes
//! usable again. The data that was in a bad block is not recovered.
//!
//! # Architecture
//!
//! ```text
//! ExtentSource ─┐
//!               ├→ translate → Registry (align + merge) → Clearer → RepairPrimitive
//! BadBlockSource┘
//! ```
//!
//! Bad ranges live in device-physical space, file data in file-logical
//! space. The translator intersects the two through the file's extents. Raw
//! block and dax devices map onto themselves.
//!
//! Platforms without support get a no-op backend whose every operation
//! returns [`Error::Unsupported`].
//!
//! # Example
//!
//! ```rust,no_run
//! use pmem_badblocks::{badblocks_clear, badblocks_get};
//!
//! let list = badblocks_get("/mnt/pmem/pool").unwrap();
//! for range in &list {
//!     println!("bad: {}", range);
//! }
//!
//! let report = badblocks_clear("/mnt/pmem/pool", &list).unwrap();
//! report.ensure_complete().unwrap();
//! ```

pub mod backend;
pub mod clear;
pub mod config;
pub mod error;
pub mod ops;
pub mod registry;
pub mod translate;
pub mod types;

pub use backend::{
    Backend, BadBlockSource, ExtentSource, NoopBadBlockSource, NoopExtentSource, NoopRepair,
    RepairFailure, RepairPrimitive, Target,
};
pub use clear::{ClearOutcome, ClearReport, ClearRequest, ClearStatus, Clearer};
pub use config::BadBlocksConfig;
pub use error::{Error, Result};
pub use ops::{
    badblocks_clear, badblocks_clear_all, badblocks_count, badblocks_devdax_clear_all,
    badblocks_get, extents_count, extents_get,
};
pub use registry::{merge, Coalesce, Registry};
pub use translate::{translate, translate_aligned, translation, Translation};
pub use types::{BadBlockRange, BadBlocksList, DeviceKind, Extent, FileExtents, PhysicalRange};
