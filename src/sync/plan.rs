//! Expansion of repos × arches × variants into discrete sync jobs.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::{ComposeProfile, ComposeRun};

/// Pseudo-arch for the arch-independent source tree.
pub const SOURCE_ARCH: &str = "source";

const MULTILIB_ARCH: &str = "i686";
const MULTILIB_PRIMARY: &str = "x86_64";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VariantKind {
    Os,
    Debug,
    Kickstart,
    Source,
}

impl VariantKind {
    /// Directory of this variant's tree under the sync root.
    pub fn tree_path(self, sync_root: &Path, repo_dir: &str, arch: &str) -> PathBuf {
        let repo_root = sync_root.join(repo_dir);
        match self {
            VariantKind::Os => repo_root.join(arch).join("os"),
            VariantKind::Debug => repo_root.join(arch).join("debug").join("tree"),
            VariantKind::Kickstart => repo_root.join(arch).join("kickstart"),
            VariantKind::Source => repo_root.join(SOURCE_ARCH).join("tree"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VariantKind::Os => "os",
            VariantKind::Debug => "debug",
            VariantKind::Kickstart => "kickstart",
            VariantKind::Source => "source",
        }
    }
}

impl fmt::Display for VariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One planned sync job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncJobSpec {
    /// Logical repo name, used as the repo id.
    pub repo: String,
    /// On-disk directory after renames.
    pub repo_dir: String,
    /// Architecture, or `source`.
    pub arch: String,
    pub kind: VariantKind,
}

impl SyncJobSpec {
    /// Unique job name; also the worker and entry script name.
    pub fn name(&self) -> String {
        match self.kind {
            VariantKind::Os => format!("{}-{}", self.repo, self.arch),
            VariantKind::Debug => format!("{}-debug-{}", self.repo, self.arch),
            VariantKind::Kickstart => format!("{}-ks-{}", self.repo, self.arch),
            VariantKind::Source => format!("{}-source", self.repo),
        }
    }

    /// Repo id in the generated package-manager config.
    pub fn repoid(&self) -> String {
        match self.kind {
            VariantKind::Os | VariantKind::Kickstart => self.repo.clone(),
            VariantKind::Debug => format!("{}-debug", self.repo),
            VariantKind::Source => format!("{}-source", self.repo),
        }
    }

    pub fn target_path(&self, sync_root: &Path) -> PathBuf {
        self.kind.tree_path(sync_root, &self.repo_dir, &self.arch)
    }

    pub fn log_path(&self, log_root: &Path) -> PathBuf {
        let file = match self.kind {
            VariantKind::Os => format!("{}-{}.log", self.repo_dir, self.arch),
            VariantKind::Debug => format!("{}-{}-debug.log", self.repo_dir, self.arch),
            VariantKind::Kickstart => format!("{}-{}-ks.log", self.repo_dir, self.arch),
            VariantKind::Source => format!("{}-source.log", self.repo_dir),
        };
        log_root.join(file)
    }
}

/// Whether a repo also carries the 32-bit multilib arch for `arches`.
pub fn wants_multilib(profile: &ComposeProfile, repo: &str, arches: &[String]) -> bool {
    profile.multilib && repo.contains("all") && arches.iter().any(|a| a == MULTILIB_PRIMARY)
}

/// Repos in scope for a run. The repo filter is ignored on full runs.
pub fn repos_in_scope(profile: &ComposeProfile, run: &ComposeRun) -> Vec<String> {
    match &run.repo_filter {
        Some(_) if run.mode.is_full() => profile.repos.clone(),
        Some(filter) => filter.clone(),
        None => profile.repos.clone(),
    }
}

/// Binary arches in scope: the arch filter intersected with the profile,
/// never including `source`.
pub fn arches_in_scope(profile: &ComposeProfile, run: &ComposeRun) -> Vec<String> {
    match &run.arch_filter {
        Some(filter) => profile
            .allowed_arches
            .iter()
            .filter(|a| filter.contains(a))
            .cloned()
            .collect(),
        None => profile.allowed_arches.clone(),
    }
}

/// Whether the source tree is synced this run.
pub fn source_in_scope(run: &ComposeRun) -> bool {
    if run.flags.ignore_source {
        return false;
    }
    match &run.arch_filter {
        None => true,
        Some(filter) => filter.len() == 1 && filter[0] == SOURCE_ARCH,
    }
}

/// Every job for a run, ordered repo-major, then arch, then variant.
pub fn plan(profile: &ComposeProfile, run: &ComposeRun) -> Vec<SyncJobSpec> {
    let arches = arches_in_scope(profile, run);
    let with_source = source_in_scope(run);
    let mut jobs = Vec::new();

    for repo in repos_in_scope(profile, run) {
        let repo_dir = profile.repo_dir(&repo).to_string();
        let mut repo_arches = arches.clone();
        if wants_multilib(profile, &repo, &arches) {
            repo_arches.push(MULTILIB_ARCH.to_string());
        }

        let job = |arch: &str, kind| SyncJobSpec {
            repo: repo.clone(),
            repo_dir: repo_dir.clone(),
            arch: arch.to_string(),
            kind,
        };

        for arch in &repo_arches {
            jobs.push(job(arch, VariantKind::Os));
            if !run.flags.ignore_debug {
                jobs.push(job(arch, VariantKind::Debug));
            }
            if run.mode.is_full() {
                jobs.push(job(arch, VariantKind::Kickstart));
            }
        }

        if with_source {
            jobs.push(job(SOURCE_ARCH, VariantKind::Source));
        }
    }

    jobs
}

/// Split a plan into per-repo batches, keeping order.
pub fn batches(jobs: Vec<SyncJobSpec>) -> Vec<(String, Vec<SyncJobSpec>)> {
    let mut out: Vec<(String, Vec<SyncJobSpec>)> = Vec::new();
    for job in jobs {
        match out.last_mut() {
            Some((repo, batch)) if *repo == job.repo => batch.push(job),
            _ => out.push((job.repo.clone(), vec![job])),
        }
    }
    out
}
