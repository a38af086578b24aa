//! Configuration constants and types for bad block handling.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default alignment unit of raw device ranges.
pub const DEFAULT_SECTOR_SIZE: u64 = 512;

/// Zero-fill chunk used when rewriting a raw block device (1 MiB).
pub const DEFAULT_CLEAR_CHUNK_SIZE: u64 = 1 << 20;

/// Extents requested per FIEMAP call.
pub const DEFAULT_FIEMAP_BATCH: u32 = 512;

/// Default mount point of sysfs.
pub const DEFAULT_SYSFS_ROOT: &str = "/sys";

/// Default directory holding device nodes.
pub const DEFAULT_DEV_ROOT: &str = "/dev";

/// Environment variable overriding [`BadBlocksConfig::sysfs_root`].
pub const SYSFS_ROOT_ENV: &str = "PMEM_BADBLOCKS_SYSFS_ROOT";

/// Environment variable overriding [`BadBlocksConfig::dev_root`].
pub const DEV_ROOT_ENV: &str = "PMEM_BADBLOCKS_DEV_ROOT";

/// Configuration of the platform backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BadBlocksConfig {
    /// Where `dev/block/M:m` and `dev/char/M:m` are resolved.
    pub sysfs_root: PathBuf,

    /// Where `ndctlN` bus nodes live.
    pub dev_root: PathBuf,

    /// Alignment of bad ranges on raw devices and of block device rewrites.
    /// Kernel bad block lists are always read in 512-byte sectors.
    pub sector_size: u64,

    /// Bytes written per zero-fill call on a raw block device.
    pub clear_chunk_size: u64,

    /// Extents fetched per FIEMAP call.
    pub fiemap_batch: u32,
}

impl Default for BadBlocksConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
            dev_root: PathBuf::from(DEFAULT_DEV_ROOT),
            sector_size: DEFAULT_SECTOR_SIZE,
            clear_chunk_size: DEFAULT_CLEAR_CHUNK_SIZE,
            fiemap_batch: DEFAULT_FIEMAP_BATCH,
        }
    }
}

impl BadBlocksConfig {
    /// Default configuration with root directories taken from the environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(root) = std::env::var_os(SYSFS_ROOT_ENV) {
            config.sysfs_root = PathBuf::from(root);
        }
        if let Some(root) = std::env::var_os(DEV_ROOT_ENV) {
            config.dev_root = PathBuf::from(root);
        }
        config
    }

    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BadBlocksConfig = serde_json::from_str(&content)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.sector_size == 0 || !self.sector_size.is_power_of_two() {
            return Err(Error::InvalidConfig(
                "Sector size must be a power of 2".to_string(),
            ));
        }
        if self.clear_chunk_size == 0 || self.clear_chunk_size % self.sector_size != 0 {
            return Err(Error::InvalidConfig(format!(
                "Clear chunk size must be a non-zero multiple of the sector size ({})",
                self.sector_size
            )));
        }
        if self.fiemap_batch == 0 {
            return Err(Error::InvalidConfig(
                "FIEMAP batch must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
