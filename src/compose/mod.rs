//! Compose directory tree and the `latest` pointer.
//!
//! A compose lives at `{root}/{major}/{shortname}-{version}-{datestamp}` and
//! holds `compose/` (the synced trees) and `work/` (logs, entry scripts,
//! scratch). `{root}/{major}/latest-{shortname}-{profile}` points at exactly
//! one of them and only moves at the end of a successful full run.

mod lock;

pub use lock::ComposeLock;

use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{ComposeProfile, SiteConfig};
use crate::error::ComposeError;

/// `{compose_root}/{major}`: the directory holding composes and latest links.
pub fn major_root(site: &SiteConfig, profile: &ComposeProfile) -> PathBuf {
    site.compose_root.join(&profile.major)
}

/// Path of the latest link for a profile.
pub fn latest_link(root: &Path, shortname: &str, profile: &str) -> PathBuf {
    root.join(format!("latest-{}-{}", shortname, profile))
}

/// Create (or reuse) `{root}/{shortname}-{version}-{datestamp}` with its
/// `compose/` and `work/` children. Existing trees are returned untouched so
/// an interrupted full run can resume.
pub fn create_compose_tree(
    root: &Path,
    shortname: &str,
    version: &str,
    datestamp: &str,
) -> Result<PathBuf> {
    let dir = root.join(format!("{}-{}-{}", shortname, version, datestamp));
    if dir.is_dir() {
        debug!(path = %dir.display(), "compose directory already exists");
    }
    for sub in ["compose", "work"] {
        let path = dir.join(sub);
        fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
    }
    Ok(dir)
}

/// Resolve the latest link to its compose directory.
pub fn resolve_latest(root: &Path, shortname: &str, profile: &str) -> Result<PathBuf> {
    let link = latest_link(root, shortname, profile);
    let target = match fs::read_link(&link) {
        Ok(target) => target,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(ComposeError::LatestMissing { link }.into());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("Failed to read link {}", link.display()));
        }
    };
    let target = if target.is_relative() {
        root.join(target)
    } else {
        target
    };
    if !target.is_dir() {
        return Err(ComposeError::LatestMissing { link }.into());
    }
    Ok(target)
}

/// Point `link` at `target`, replacing any existing link in one rename.
/// Readers see either the old target or the new one, never a missing link.
pub fn publish_latest(target: &Path, link: &Path) -> Result<()> {
    let file_name = link
        .file_name()
        .with_context(|| format!("latest link has no file name: {}", link.display()))?
        .to_string_lossy()
        .into_owned();
    let staging = link.with_file_name(format!(".{}.tmp-{}", file_name, std::process::id()));

    match fs::remove_file(&staging) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("Failed to remove stale {}", staging.display()));
        }
    }

    std::os::unix::fs::symlink(target, &staging).with_context(|| {
        format!(
            "Failed to create symlink {} -> {}",
            staging.display(),
            target.display()
        )
    })?;
    fs::rename(&staging, link)
        .with_context(|| format!("Failed to move {} into place", link.display()))?;

    info!(link = %link.display(), target = %target.display(), "published latest compose");
    Ok(())
}

/// Paths inside one compose directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeLayout {
    root: PathBuf,
    dir: PathBuf,
}

impl ComposeLayout {
    /// Full run: create the dated compose directory.
    pub fn create(root: &Path, profile: &ComposeProfile, datestamp: &str) -> Result<Self> {
        let dir = create_compose_tree(root, &profile.shortname, &profile.revision, datestamp)?;
        info!(path = %dir.display(), "using compose directory");
        Ok(Self {
            root: root.to_path_buf(),
            dir,
        })
    }

    /// Incremental run: whatever latest points at.
    pub fn latest(root: &Path, profile: &ComposeProfile) -> Result<Self> {
        let dir = resolve_latest(root, &profile.shortname, &profile.profile)?;
        info!(path = %dir.display(), "using latest compose directory");
        Ok(Self {
            root: root.to_path_buf(),
            dir,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Compose id, taken from the directory name.
    pub fn compose_id(&self) -> String {
        self.dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// `compose/`: where the synced trees go.
    pub fn sync_root(&self) -> PathBuf {
        self.dir.join("compose")
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.sync_root().join("metadata")
    }

    pub fn work_root(&self) -> PathBuf {
        self.dir.join("work")
    }

    pub fn log_root(&self, datestamp: &str) -> PathBuf {
        self.work_root().join("logs").join(datestamp)
    }

    pub fn entries_dir(&self) -> PathBuf {
        self.work_root().join("entries")
    }

    pub fn global_dir(&self) -> PathBuf {
        self.work_root().join("global")
    }

    pub fn latest_link(&self, profile: &ComposeProfile) -> PathBuf {
        latest_link(&self.root, &profile.shortname, &profile.profile)
    }

    /// Create the work directories for one run.
    pub fn ensure_work_dirs(&self, datestamp: &str) -> Result<()> {
        for path in [
            self.sync_root(),
            self.log_root(datestamp),
            self.entries_dir(),
            self.global_dir(),
        ] {
            fs::create_dir_all(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_compose_tree_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let first = create_compose_tree(tmp.path(), "Test", "9.1", "20240101.000000").unwrap();
        fs::write(first.join("compose").join("marker"), "keep").unwrap();

        let second = create_compose_tree(tmp.path(), "Test", "9.1", "20240101.000000").unwrap();
        assert_eq!(first, second);
        assert!(second.join("work").is_dir());
        assert_eq!(
            fs::read_to_string(second.join("compose").join("marker")).unwrap(),
            "keep"
        );
    }

    #[test]
    fn test_resolve_latest_missing() {
        let tmp = TempDir::new().unwrap();
        let err = resolve_latest(tmp.path(), "Test", "9").unwrap_err();
        assert_eq!(crate::error::exit_code_for(&err), 4);
        assert!(err.to_string().contains("latest-Test-9"));
    }

    #[test]
    fn test_publish_latest_swaps_target() {
        let tmp = TempDir::new().unwrap();
        let old = create_compose_tree(tmp.path(), "Test", "9.1", "20240101.000000").unwrap();
        let new = create_compose_tree(tmp.path(), "Test", "9.1", "20240102.000000").unwrap();
        let link = latest_link(tmp.path(), "Test", "9");

        publish_latest(&old, &link).unwrap();
        assert_eq!(resolve_latest(tmp.path(), "Test", "9").unwrap(), old);

        publish_latest(&new, &link).unwrap();
        assert_eq!(resolve_latest(tmp.path(), "Test", "9").unwrap(), new);

        let leftovers: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_layout_paths() {
        let tmp = TempDir::new().unwrap();
        let profile = crate::config::tests::sample_profile();
        let layout = ComposeLayout::create(tmp.path(), &profile, "20240101.000000").unwrap();
        layout.ensure_work_dirs("20240101.000000").unwrap();

        assert_eq!(layout.compose_id(), "Test-9.1-20240101.000000");
        assert!(layout.log_root("20240101.000000").is_dir());
        assert!(layout.entries_dir().is_dir());
        assert!(layout.global_dir().is_dir());
        assert_eq!(layout.metadata_dir(), layout.dir().join("compose/metadata"));
        assert_eq!(layout.latest_link(&profile), tmp.path().join("latest-Test-9"));
    }
}
