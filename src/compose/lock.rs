//! Per-profile advisory lock.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::ComposeError;

/// Advisory exclusive lock serializing writers of one profile's composes and
/// its latest link. Released on drop.
#[derive(Debug)]
pub struct ComposeLock {
    _file: File,
    path: PathBuf,
}

impl ComposeLock {
    /// Lock `{root}/.latest-{shortname}-{profile}.lock` without blocking.
    pub fn acquire(root: &Path, shortname: &str, profile: &str) -> Result<Self> {
        fs::create_dir_all(root).with_context(|| format!("Failed to create {}", root.display()))?;
        let path = root.join(format!(".latest-{}-{}.lock", shortname, profile));

        // The file is never unlinked: removing a held lock file would let a
        // second process lock a fresh inode at the same path.
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to create lock file: {}", path.display()))?;

        if file.try_lock_exclusive().is_err() {
            return Err(ComposeError::ComposeLocked { lock: path }.into());
        }

        debug!(lock = %path.display(), "acquired compose lock");
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ComposeLock {
    fn drop(&mut self) {
        let _ = self._file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_lock_is_refused_until_release() {
        let tmp = TempDir::new().unwrap();
        let held = ComposeLock::acquire(tmp.path(), "Test", "9").unwrap();
        assert!(held.path().ends_with(".latest-Test-9.lock"));

        let err = ComposeLock::acquire(tmp.path(), "Test", "9").unwrap_err();
        assert_eq!(crate::error::exit_code_for(&err), 12);

        drop(held);
        assert!(ComposeLock::acquire(tmp.path(), "Test", "9").is_ok());
    }

    #[test]
    fn test_profiles_lock_independently() {
        let tmp = TempDir::new().unwrap();
        let _nine = ComposeLock::acquire(tmp.path(), "Test", "9").unwrap();
        assert!(ComposeLock::acquire(tmp.path(), "Test", "8").is_ok());
    }
}
