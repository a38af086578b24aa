//! Linux backend: FIEMAP for extents, sysfs for bad blocks, and a repair
//! primitive per device kind.

mod block_device;
mod fiemap;
mod ndctl;
mod repair;
mod sysfs;

use crate::backend::Backend;
use crate::config::BadBlocksConfig;
use crate::error::Result;

pub use block_device::BlockDevice;
pub use fiemap::FiemapExtentSource;
pub use ndctl::NdBus;
pub use repair::LinuxRepair;
pub use sysfs::{DaxGeometry, SysfsBadBlockSource};

/// Build the Linux backend for `config`.
pub fn backend(config: BadBlocksConfig) -> Result<Backend> {
    config.validate()?;
    Ok(Backend::from_parts(
        "linux",
        config.clone(),
        FiemapExtentSource::new(&config),
        SysfsBadBlockSource::new(&config),
        LinuxRepair::new(&config),
    ))
}

/// Split a Linux `dev_t` into major and minor numbers.
pub(crate) fn split_dev(dev: u64) -> (u32, u32) {
    let major = ((dev >> 32) & 0xffff_f000) | ((dev >> 8) & 0x0000_0fff);
    let minor = ((dev >> 12) & 0xffff_ff00) | (dev & 0x0000_00ff);
    (major as u32, minor as u32)
}
