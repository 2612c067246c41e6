//! Compose closeout: move built media into the compose and index checksums.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::compose::ComposeLayout;
use crate::config::ComposeProfile;
use crate::error::ComposeError;
use crate::metadata::write_compose_metadata;
use crate::preflight::command_exists;
use crate::process::Cmd;

/// Work-area categories copied into the compose, by directory name.
pub const CATEGORIES: &[&str] = &["isos", "live", "images"];

const COPY_JOBS: &str = "18";
const RSYNC_FLAGS: &[&str] = &["-av", "--numeric-ids", "--no-compress"];

/// Bulk-copy tool available on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyStrategy {
    Fpsync { scratch: PathBuf },
    ParallelRsync,
}

impl CopyStrategy {
    /// Prefer fpsync, fall back to GNU parallel driving rsync.
    pub fn detect(scratch: &Path) -> Result<Self> {
        if command_exists("fpsync") {
            return Ok(CopyStrategy::Fpsync {
                scratch: scratch.to_path_buf(),
            });
        }
        if command_exists("parallel") && command_exists("rsync") {
            return Ok(CopyStrategy::ParallelRsync);
        }
        Err(ComposeError::MissingTool {
            tool: "fpsync".to_string(),
            hint: "install fpsync, or both parallel and rsync".to_string(),
        }
        .into())
    }

    /// Host command copying the contents of `src` into `dest`.
    pub fn command(&self, src: &Path, dest: &Path) -> Result<Cmd> {
        let src_slash = format!("{}/", src.display());
        let dest_slash = format!("{}/", dest.display());
        Ok(match self {
            CopyStrategy::Fpsync { scratch } => Cmd::new("fpsync")
                .args(["-n", COPY_JOBS, "-t"])
                .arg_path(scratch)
                .arg("-o")
                .arg(RSYNC_FLAGS.join(" "))
                .arg(src_slash)
                .arg(dest_slash),
            CopyStrategy::ParallelRsync => {
                let mut entries: Vec<PathBuf> = fs::read_dir(src)
                    .with_context(|| format!("Failed to read {}", src.display()))?
                    .filter_map(|e| e.ok().map(|e| e.path()))
                    .collect();
                entries.sort();
                Cmd::new("parallel")
                    .args(["-j", COPY_JOBS, "rsync"])
                    .args(RSYNC_FLAGS.iter().copied())
                    .arg("{}")
                    .arg(dest_slash)
                    .arg(":::")
                    .args(entries)
            }
        })
    }

    fn copy(&self, src: &Path, dest: &Path) -> Result<()> {
        fs::create_dir_all(dest).with_context(|| format!("Failed to create {}", dest.display()))?;
        if fs::read_dir(src)?.next().is_none() {
            return Ok(());
        }
        let cmd = self
            .command(src, dest)?
            .error_msg(format!("copying {} to {} failed", src.display(), dest.display()));
        info!(command = %cmd.display(), "copying build output");
        cmd.run()?;
        Ok(())
    }
}

/// Concatenate every `*.CHECKSUM` in `dir` (sorted by name) into
/// `dir/CHECKSUM`. Returns how many files were merged.
pub fn concat_checksums(dir: &Path) -> Result<usize> {
    let mut parts: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".CHECKSUM"))
        })
        .collect();
    parts.sort();

    let mut merged = String::new();
    for part in &parts {
        merged.push_str(
            &fs::read_to_string(part).with_context(|| format!("Failed to read {}", part.display()))?,
        );
    }
    let out = dir.join("CHECKSUM");
    fs::write(&out, merged).with_context(|| format!("Failed to write {}", out.display()))?;
    Ok(parts.len())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseoutSummary {
    pub copied: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
    pub checksum_files: usize,
}

/// Copy work-area media into the compose, merge per-arch checksums and
/// re-deploy the aggregate metadata stamped with the closeout time.
pub fn closeout(
    layout: &ComposeLayout,
    profile: &ComposeProfile,
    strategy: &CopyStrategy,
    timestamp: i64,
    datestamp: &str,
) -> Result<CloseoutSummary> {
    let mut summary = CloseoutSummary::default();
    let work = layout.work_root();
    let sync_root = layout.sync_root();

    for category in CATEGORIES {
        let src = work.join(category);
        if !src.is_dir() {
            warn!(path = %src.display(), "nothing to close out for {}", category);
            summary.skipped.push(category.to_string());
            continue;
        }
        info!(category, "syncing {} to compose", category);
        match strategy.copy(&src, &sync_root.join(category)) {
            Ok(()) => summary.copied.push(category.to_string()),
            Err(err) => {
                error!(category, error = %format!("{:#}", err), "closeout copy failed");
                summary.failed.push(category.to_string());
            }
        }
    }

    for category in CATEGORIES {
        for arch in &profile.allowed_arches {
            let dir = sync_root.join(category).join(arch);
            if dir.is_dir() {
                summary.checksum_files += concat_checksums(&dir)?;
            }
        }
    }

    write_compose_metadata(
        &layout.metadata_dir(),
        profile,
        timestamp,
        datestamp,
        &profile.compose_id(datestamp),
    )?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_profile;
    use tempfile::TempDir;

    #[test]
    fn test_concat_checksums_in_name_order() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("b.iso.CHECKSUM"), "SHA256 (b.iso) = 2\n").unwrap();
        fs::write(tmp.path().join("a.iso.CHECKSUM"), "SHA256 (a.iso) = 1\n").unwrap();
        fs::write(tmp.path().join("a.iso"), "not a checksum").unwrap();
        fs::write(tmp.path().join("CHECKSUM"), "stale").unwrap();

        assert_eq!(concat_checksums(tmp.path()).unwrap(), 2);
        assert_eq!(
            fs::read_to_string(tmp.path().join("CHECKSUM")).unwrap(),
            "SHA256 (a.iso) = 1\nSHA256 (b.iso) = 2\n"
        );
    }

    #[test]
    fn test_parallel_rsync_command() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("src/x86_64")).unwrap();
        let cmd = CopyStrategy::ParallelRsync
            .command(&tmp.path().join("src"), Path::new("/c/compose/isos"))
            .unwrap();
        let rendered = cmd.display();
        assert!(rendered.starts_with("parallel -j 18 rsync -av --numeric-ids --no-compress {} /c/compose/isos/ :::"));
        assert!(rendered.ends_with("src/x86_64"));
    }

    #[test]
    fn test_closeout_merges_and_redeploys_metadata() {
        let tmp = TempDir::new().unwrap();
        let profile = sample_profile();
        let layout = ComposeLayout::create(tmp.path(), &profile, "20240101.000000").unwrap();

        // Media already in place; the work area is empty so nothing is copied.
        let isos = layout.sync_root().join("isos/x86_64");
        fs::create_dir_all(&isos).unwrap();
        fs::write(isos.join("boot.iso.CHECKSUM"), "boot\n").unwrap();
        fs::write(isos.join("dvd.iso.CHECKSUM"), "dvd\n").unwrap();

        let strategy = CopyStrategy::ParallelRsync;
        let summary = closeout(&layout, &profile, &strategy, 42, "20240102.000000").unwrap();

        assert_eq!(summary.skipped, ["isos", "live", "images"]);
        assert_eq!(summary.checksum_files, 2);
        assert_eq!(fs::read_to_string(isos.join("CHECKSUM")).unwrap(), "boot\ndvd\n");
        assert_eq!(
            fs::read_to_string(layout.metadata_dir().join("COMPOSE_ID")).unwrap(),
            "Test-9.1-20240102.000000"
        );
    }
}
