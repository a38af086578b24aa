//! Public bad block and extent operations.
//!
//! Each operation exists as a method usable against any [`Backend`] and as a
//! free function running against [`Backend::platform`].

use crate::backend::Backend;
use crate::clear::{ClearReport, ClearRequest, Clearer};
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::types::{BadBlocksList, DeviceKind, FileExtents};
use std::fs::File;
use std::path::Path;

impl Backend {
    /// Number of merged bad ranges of the file or device at `path`.
    pub fn badblocks_count(&self, path: &Path) -> Result<u64> {
        let target = self.open_target(path)?;
        Registry::new(self).count(&target)
    }

    /// Merged bad ranges of the file or device at `path`.
    pub fn badblocks_get(&self, path: &Path) -> Result<BadBlocksList> {
        let target = self.open_target(path)?;
        Registry::new(self).build(&target)
    }

    /// Clear exactly the ranges in `list`.
    pub fn badblocks_clear(&self, path: &Path, list: &BadBlocksList) -> Result<ClearReport> {
        self.ensure_supported()?;
        if list.is_empty() {
            return Ok(ClearReport::default());
        }
        let target = self.open_target_writable(path)?;
        Clearer::new(self).clear(&target, ClearRequest::Ranges(list.as_slice()))
    }

    /// Discover the bad ranges of `path` and clear all of them.
    pub fn badblocks_clear_all(&self, path: &Path) -> Result<ClearReport> {
        let target = self.open_target_writable(path)?;
        Clearer::new(self).clear(&target, ClearRequest::All)
    }

    /// Clear every bad range of the dax device at `path`, failing unless all
    /// of them were cleared.
    pub fn badblocks_devdax_clear_all(&self, path: &Path) -> Result<()> {
        // The firmware clear goes through the nvdimm bus, never the device
        // node, so a read-only handle suffices.
        let target = self.open_target(path)?;
        if target.kind() != DeviceKind::DaxDevice {
            return Err(Error::not_found(path, "not a dax device"));
        }
        Clearer::new(self)
            .clear(&target, ClearRequest::All)?
            .ensure_complete()
    }

    /// Number of extents the filesystem reports for `file`.
    pub fn extents_count(&self, file: &File) -> Result<u64> {
        self.ensure_supported()?;
        self.extent_source().count(file)
    }

    /// Extents of `file` with the filesystem block size.
    pub fn extents_get(&self, file: &File) -> Result<FileExtents> {
        self.ensure_supported()?;
        self.extent_source().extents(file)
    }
}

/// [`Backend::badblocks_count`] on the platform backend.
pub fn badblocks_count(path: impl AsRef<Path>) -> Result<u64> {
    Backend::platform().badblocks_count(path.as_ref())
}

/// [`Backend::badblocks_get`] on the platform backend.
pub fn badblocks_get(path: impl AsRef<Path>) -> Result<BadBlocksList> {
    Backend::platform().badblocks_get(path.as_ref())
}

/// [`Backend::badblocks_clear`] on the platform backend.
pub fn badblocks_clear(path: impl AsRef<Path>, list: &BadBlocksList) -> Result<ClearReport> {
    Backend::platform().badblocks_clear(path.as_ref(), list)
}

/// [`Backend::badblocks_clear_all`] on the platform backend.
pub fn badblocks_clear_all(path: impl AsRef<Path>) -> Result<ClearReport> {
    Backend::platform().badblocks_clear_all(path.as_ref())
}

/// [`Backend::badblocks_devdax_clear_all`] on the platform backend.
pub fn badblocks_devdax_clear_all(path: impl AsRef<Path>) -> Result<()> {
    Backend::platform().badblocks_devdax_clear_all(path.as_ref())
}

/// [`Backend::extents_count`] on the platform backend.
pub fn extents_count(file: &File) -> Result<u64> {
    Backend::platform().extents_count(file)
}

/// [`Backend::extents_get`] on the platform backend.
pub fn extents_get(file: &File) -> Result<FileExtents> {
    Backend::platform().extents_get(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BadBlockRange;
    use tempfile::NamedTempFile;

    #[test]
    fn test_noop_backend_rejects_everything() {
        let backend = Backend::noop();
        let file = NamedTempFile::new().unwrap();
        let path = file.path();
        let list = BadBlocksList::from_ranges(vec![BadBlockRange::new(0, 512)]);

        assert!(matches!(backend.badblocks_count(path), Err(Error::Unsupported(_))));
        assert!(matches!(backend.badblocks_get(path), Err(Error::Unsupported(_))));
        assert!(matches!(
            backend.badblocks_clear(path, &list),
            Err(Error::Unsupported(_))
        ));
        assert!(matches!(
            backend.badblocks_clear(path, &BadBlocksList::default()),
            Err(Error::Unsupported(_))
        ));
        assert!(matches!(backend.badblocks_clear_all(path), Err(Error::Unsupported(_))));
        assert!(matches!(
            backend.badblocks_devdax_clear_all(path),
            Err(Error::Unsupported(_))
        ));
        assert!(matches!(backend.extents_count(file.as_file()), Err(Error::Unsupported(_))));
        assert!(matches!(backend.extents_get(file.as_file()), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_devdax_clear_all_checks_kind_before_write_access() {
        let file = NamedTempFile::new().unwrap();
        let mut perms = std::fs::metadata(file.path()).unwrap().permissions();
        perms.set_readonly(true);
        std::fs::set_permissions(file.path(), perms).unwrap();

        // Opening writable would fail with EACCES for non-root users; the
        // kind check has to answer first.
        let backend = Backend::from_parts(
            "readonly",
            crate::config::BadBlocksConfig::default(),
            crate::backend::NoopExtentSource,
            crate::backend::NoopBadBlockSource,
            crate::backend::NoopRepair,
        );
        let err = backend.badblocks_devdax_clear_all(file.path()).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
