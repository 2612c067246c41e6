//! Extra files shipped alongside a compose.
//!
//! License texts, GPG keys and similar files live in a separate git
//! repository. They are copied into the global work area and into the compose
//! metadata directory so mirrors publish them next to the repos.
//!
//! # Usage
//!
//! ```rust,ignore
//! use compose_builder::metadata::deploy_extra_files;
//!
//! let copied = deploy_extra_files(
//!     &profile.extra_files,
//!     &layout.global_dir().join("extra-files"),
//!     &layout.metadata_dir(),
//! )?;
//! ```

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::config::ExtraFiles;
use crate::process::{ensure_exists, Cmd};

/// Clone the extras repository and copy every listed file into both
/// `extra_files_dir` and `metadata_dir`. Returns the number of files copied;
/// a listed file missing from the clone is a warning.
pub fn deploy_extra_files(
    extra: &ExtraFiles,
    extra_files_dir: &Path,
    metadata_dir: &Path,
) -> Result<usize> {
    info!(repo = %extra.git_repo, branch = %extra.branch, "deploying extra files");
    ensure_exists("git", "install git")?;

    for dir in [extra_files_dir, metadata_dir] {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let clone_root = tempfile::Builder::new()
        .prefix("compose-extra-files-")
        .tempdir()
        .context("Failed to create clone directory")?;
    let checkout = clone_root.path().join("clone");

    Cmd::new("git")
        .args(["clone", "--depth", "1", "-q", "-b"])
        .arg(&extra.branch)
        .arg(&extra.git_repo)
        .arg_path(&checkout)
        .error_msg(format!("git clone of {} failed", extra.git_repo))
        .run()?;

    copy_listed(&checkout, &extra.list, extra_files_dir, metadata_dir)
}

fn copy_listed(
    checkout: &Path,
    list: &[String],
    extra_files_dir: &Path,
    metadata_dir: &Path,
) -> Result<usize> {
    let mut copied = 0;
    for entry in list {
        let src = checkout.join(entry);
        let Some(name) = src.file_name() else {
            warn!(file = %entry, "extra file has no file name; skipping");
            continue;
        };
        if !src.is_file() {
            warn!(file = %src.display(), "extra file not copied: not found in clone");
            continue;
        }
        for dir in [extra_files_dir, metadata_dir] {
            let dest = dir.join(name);
            fs::copy(&src, &dest).with_context(|| {
                format!("Failed to copy {} to {}", src.display(), dest.display())
            })?;
        }
        copied += 1;
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_listed_skips_missing() {
        let tmp = TempDir::new().unwrap();
        let checkout = tmp.path().join("clone");
        fs::create_dir_all(checkout.join("SOURCES")).unwrap();
        fs::write(checkout.join("SOURCES/RPM-GPG-KEY-Test-9"), "key").unwrap();
        fs::write(checkout.join("LICENSE"), "license").unwrap();

        let extra_dir = tmp.path().join("work/global/extra-files");
        let metadata_dir = tmp.path().join("compose/metadata");
        fs::create_dir_all(&extra_dir).unwrap();
        fs::create_dir_all(&metadata_dir).unwrap();

        let list = vec![
            "SOURCES/RPM-GPG-KEY-Test-9".to_string(),
            "LICENSE".to_string(),
            "MISSING".to_string(),
        ];
        let copied = copy_listed(&checkout, &list, &extra_dir, &metadata_dir).unwrap();
        assert_eq!(copied, 2);
        assert_eq!(
            fs::read_to_string(extra_dir.join("RPM-GPG-KEY-Test-9")).unwrap(),
            "key"
        );
        assert!(metadata_dir.join("LICENSE").is_file());
        assert!(!metadata_dir.join("MISSING").exists());
    }
}
