//! Per-tree and compose-level metadata.
//!
//! Every `os`, `debug/tree`, `kickstart` and `source/tree` leaf gets a
//! `.treeinfo`, a `.discinfo` and a `media.repo`. Existing files are left
//! alone unless the writer is in refresh mode, so re-running metadata on a
//! published compose never clobbers what a later stage (ISO builds) wrote.

mod compose;
mod extra_files;
pub mod treeinfo;
mod tweak;

pub use compose::{write_compose_id, write_compose_metadata, ComposeMetadata};
pub use extra_files::deploy_extra_files;
pub use treeinfo::{TreeVariant, TreeinfoRecord};
pub use tweak::TreeinfoTweaker;

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, error, info, warn};

use crate::config::{ComposeProfile, ComposeRun};
use crate::sync::plan::{arches_in_scope, repos_in_scope, source_in_scope, wants_multilib};
use crate::sync::{VariantKind, SOURCE_ARCH};

pub const TREEINFO: &str = ".treeinfo";
pub const DISCINFO: &str = ".discinfo";
pub const MEDIA_REPO: &str = "media.repo";

/// Arch recorded in source tree metadata.
const SOURCE_TREE_ARCH: &str = "src";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    Skipped,
}

/// `.discinfo` body: timestamp, release, arch, `ALL`. No trailing newline.
pub fn discinfo_content(timestamp: i64, fullname: &str, arch: &str) -> String {
    format!("{}\n{}\n{}\nALL", timestamp, fullname, arch)
}

pub fn media_repo_content(timestamp: i64, fullname: &str) -> String {
    format!(
        "[InstallMedia]\nname={}\nmediaid={}\nmetadata_expire=-1\ngpgcheck=0\ncost=500\n",
        fullname, timestamp
    )
}

/// Tally of one deploy pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeploySummary {
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl DeploySummary {
    fn count(&mut self, result: Result<WriteOutcome>, path: &Path) {
        match result {
            Ok(WriteOutcome::Written) => self.written += 1,
            Ok(WriteOutcome::Skipped) => self.skipped += 1,
            Err(err) => {
                error!(path = %path.display(), error = %format!("{:#}", err), "metadata could not be written");
                self.failed += 1;
            }
        }
    }
}

/// Writes per-tree metadata for one release.
#[derive(Debug, Clone)]
pub struct MetadataWriter {
    distname: String,
    shortname: String,
    version: String,
    fullname: String,
    timestamp: i64,
    refresh: bool,
}

impl MetadataWriter {
    pub fn new(profile: &ComposeProfile, timestamp: i64) -> Self {
        Self {
            distname: profile.distname.clone(),
            shortname: profile.shortname.clone(),
            version: profile.revision.clone(),
            fullname: profile.fullname.clone(),
            timestamp,
            refresh: false,
        }
    }

    /// Overwrite files that already exist.
    pub fn refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    fn should_write(&self, path: &Path) -> bool {
        if path.exists() && !self.refresh {
            warn!(path = %path.display(), "metadata already exists; skipping");
            return false;
        }
        true
    }

    fn write_file(&self, path: &Path, content: &str) -> Result<WriteOutcome> {
        if !self.should_write(path) {
            return Ok(WriteOutcome::Skipped);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        debug!(path = %path.display(), "wrote metadata");
        Ok(WriteOutcome::Written)
    }

    /// Fresh treeinfo with one variant rooted at the tree.
    pub fn new_treeinfo(&self, arch: &str, variant_id: &str) -> TreeinfoRecord {
        let mut record = TreeinfoRecord::new(
            &self.distname,
            &self.shortname,
            &self.version,
            arch,
            self.timestamp,
        );
        record.add_variant(TreeVariant::new(variant_id, ".", "Packages"));
        record
    }

    pub fn write_treeinfo_if_absent(
        &self,
        path: &Path,
        arch: &str,
        variant_id: &str,
    ) -> Result<WriteOutcome> {
        self.write_file(path, &self.new_treeinfo(arch, variant_id).to_ini())
    }

    pub fn write_discinfo(&self, path: &Path, arch: &str) -> Result<WriteOutcome> {
        self.write_file(path, &discinfo_content(self.timestamp, &self.fullname, arch))
    }

    pub fn write_media_repo(&self, path: &Path) -> Result<WriteOutcome> {
        self.write_file(path, &media_repo_content(self.timestamp, &self.fullname))
    }

    /// All three files in one tree directory.
    pub fn write_tree(&self, dir: &Path, arch: &str, variant_id: &str) -> DeploySummary {
        let mut summary = DeploySummary::default();
        let treeinfo = dir.join(TREEINFO);
        summary.count(self.write_treeinfo_if_absent(&treeinfo, arch, variant_id), &treeinfo);
        let discinfo = dir.join(DISCINFO);
        summary.count(self.write_discinfo(&discinfo, arch), &discinfo);
        let media = dir.join(MEDIA_REPO);
        summary.count(self.write_media_repo(&media), &media);
        summary
    }

    /// Metadata for every tree a run covers. Kickstart trees are only
    /// touched on full runs.
    pub fn deploy_treeinfo(
        &self,
        sync_root: &Path,
        profile: &ComposeProfile,
        run: &ComposeRun,
    ) -> DeploySummary {
        info!(refresh = self.refresh, "deploying treeinfo, discinfo and media.repo");
        let mut summary = DeploySummary::default();
        for (kind, repo_dir, arch) in metadata_targets(profile, run) {
            let dir = kind.tree_path(sync_root, &repo_dir, &arch);
            let tree_arch = if kind == VariantKind::Source {
                SOURCE_TREE_ARCH
            } else {
                arch.as_str()
            };
            let result = self.write_tree(&dir, tree_arch, &repo_dir);
            summary.written += result.written;
            summary.skipped += result.skipped;
            summary.failed += result.failed;
        }
        summary
    }
}

/// Tree directories (variant, on-disk repo, arch) a run writes metadata for.
pub fn metadata_targets(profile: &ComposeProfile, run: &ComposeRun) -> Vec<(VariantKind, String, String)> {
    let arches = arches_in_scope(profile, run);
    let mut targets = Vec::new();
    for repo in repos_in_scope(profile, run) {
        let repo_dir = profile.repo_dir(&repo).to_string();
        let mut repo_arches = arches.clone();
        if wants_multilib(profile, &repo, &arches) {
            repo_arches.push("i686".to_string());
        }
        for arch in repo_arches {
            targets.push((VariantKind::Os, repo_dir.clone(), arch.clone()));
            if run.mode.is_full() {
                targets.push((VariantKind::Kickstart, repo_dir.clone(), arch.clone()));
            }
            if !run.flags.ignore_debug {
                targets.push((VariantKind::Debug, repo_dir.clone(), arch));
            }
        }
        if source_in_scope(run) {
            targets.push((VariantKind::Source, repo_dir, SOURCE_ARCH.to_string()));
        }
    }
    targets
}
