//! Dependency-closure checks, run as worker jobs.
//!
//! Each configured repo is checked for every arch in the closure map, against
//! itself plus the repos the map lists for it. Checks for one repo form one
//! batch. Serial execution is refused outright: a full closure per target is
//! far too slow to run one at a time.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::config::{ClosureMap, ComposeProfile};
use crate::error::ComposeError;
use crate::sync::commands::{dnf_plugins_step, DNF};
use crate::sync::repo_config::arch_config_path;
use crate::sync::VariantKind;
use crate::worker::{ExecutionReport, JobStep, Mount, WorkerExecutor, WorkerJob, WorkerRuntime};

/// Where the packages being checked come from.
#[derive(Debug, Clone, Copy)]
pub enum ClosureSource<'a> {
    /// The synced `os` trees of a compose.
    Synced { sync_root: &'a Path },
    /// The upstream repos, through the generated package-manager config.
    Upstream { config: &'a Path },
}

pub struct RepoClosureRunner<'a> {
    profile: &'a ComposeProfile,
    log_root: PathBuf,
    mounts: Vec<Mount>,
}

impl<'a> RepoClosureRunner<'a> {
    pub fn new(profile: &'a ComposeProfile, log_root: &Path, mounts: Vec<Mount>) -> Self {
        Self {
            profile,
            log_root: log_root.to_path_buf(),
            mounts,
        }
    }

    pub fn job_name(repo: &str, arch: &str) -> String {
        format!("repoclosure-{}-{}", repo, arch)
    }

    fn closure_step(&self, source: ClosureSource<'_>, repo: &str, arch: &str, with: &[String], arch_flags: &[String]) -> JobStep {
        let mut args = vec!["repoclosure".to_string()];
        if let ClosureSource::Upstream { config } = source {
            args.push("-c".to_string());
            args.push(arch_config_path(config, arch).display().to_string());
        }
        args.extend(
            arch_flags
                .iter()
                .flat_map(|flag| flag.split_whitespace())
                .map(str::to_string),
        );

        let mut add_repo = |name: &str| {
            if let ClosureSource::Synced { sync_root } = source {
                let tree = VariantKind::Os.tree_path(sync_root, self.profile.repo_dir(name), arch);
                args.push(format!("--repofrompath={},file://{}", name, tree.display()));
            }
            args.push(format!("--repo={}", name));
        };
        add_repo(repo);
        for other in with {
            add_repo(other);
        }
        args.push(format!("--check={}", repo));
        JobStep::new(DNF, args)
    }

    /// Closure jobs grouped per repo, honoring an optional repo filter.
    pub fn batches(
        &self,
        map: &ClosureMap,
        source: ClosureSource<'_>,
        repo_filter: Option<&[String]>,
    ) -> Vec<(String, Vec<WorkerJob>)> {
        let mut out = Vec::new();
        for (repo, with) in &map.repos {
            if repo_filter.is_some_and(|filter| !filter.contains(repo)) {
                continue;
            }
            let jobs = map
                .arches
                .iter()
                .map(|(arch, flags)| WorkerJob {
                    name: Self::job_name(repo, arch),
                    image: self.profile.container.clone(),
                    steps: vec![
                        dnf_plugins_step(),
                        JobStep::new(DNF, ["clean", "all"]),
                        self.closure_step(source, repo, arch, with, flags),
                    ],
                    env: Vec::new(),
                    mounts: self.mounts.clone(),
                    log_path: self
                        .log_root
                        .join(format!("{}-repoclosure-{}.log", repo, arch)),
                    entrypoint: None,
                })
                .collect::<Vec<_>>();
            if !jobs.is_empty() {
                out.push((repo.clone(), jobs));
            }
        }
        out
    }

    /// Run every configured closure check. Fails before spawning anything
    /// when `parallel` is off.
    pub fn run<R: WorkerRuntime + ?Sized>(
        &self,
        executor: &WorkerExecutor<'_, R>,
        source: ClosureSource<'_>,
        repo_filter: Option<&[String]>,
        parallel: bool,
    ) -> Result<ExecutionReport> {
        if !parallel {
            return Err(ComposeError::ClosureRequiresParallel.into());
        }
        let Some(map) = &self.profile.closure else {
            warn!(release = %self.profile.release, "no repoclosure map configured; skipping");
            return Ok(ExecutionReport::default());
        };

        info!("beginning repoclosure phase");
        let report = executor.execute_batches(self.batches(map, source, repo_filter))?;
        if report.failed.is_empty() {
            info!("repoclosure phase completed");
        } else {
            error!(failed = report.failed.len(), "there were issues closing these repositories:");
            for job in &report.failed {
                error!(job = %job, "repoclosure failed");
            }
        }
        Ok(report)
    }
}
