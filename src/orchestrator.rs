//! The compose run driver.
//!
//! Phases run strictly in order: directory setup, config generation, the
//! sync fan-out, per-tree metadata and tweaks, optional closure checks,
//! aggregate metadata and finally the latest-pointer publish. Only the sync
//! and closure phases run work concurrently, inside the executor.

use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::closeout::{closeout, CloseoutSummary, CopyStrategy};
use crate::closure::{ClosureSource, RepoClosureRunner};
use crate::compose::{major_root, publish_latest, ComposeLayout, ComposeLock};
use crate::config::{ComposeProfile, ComposeRun, RunMode, SiteConfig};
use crate::error::ComposeError;
use crate::metadata::{deploy_extra_files, write_compose_metadata, MetadataWriter, TreeinfoTweaker};
use crate::sync::plan::{arches_in_scope, repos_in_scope};
use crate::sync::{
    batches, materialize_arch_configs, plan, worker_mounts, RepoConfigGenerator,
    SyncCommandBuilder, SOURCE_ARCH,
};
use crate::worker::{CancelToken, ExecutionReport, WorkerExecutor, WorkerRuntime};

/// What a sync run did.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub compose_dir: PathBuf,
    pub compose_id: String,
    pub sync: ExecutionReport,
    pub closure: Option<ExecutionReport>,
    pub published: bool,
}

impl RunSummary {
    pub fn failed_jobs(&self) -> usize {
        self.sync.failed.len() + self.closure.as_ref().map_or(0, |c| c.failed.len())
    }
}

/// Drives sync, metadata, closure and closeout for one profile.
pub struct ComposeSync<'a, R: WorkerRuntime + ?Sized> {
    site: &'a SiteConfig,
    profile: &'a ComposeProfile,
    runtime: &'a R,
    cancel: CancelToken,
}

impl<'a, R: WorkerRuntime + ?Sized> ComposeSync<'a, R> {
    pub fn new(site: &'a SiteConfig, profile: &'a ComposeProfile, runtime: &'a R) -> Self {
        Self {
            site,
            profile,
            runtime,
            cancel: CancelToken::new(),
        }
    }

    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn root(&self) -> PathBuf {
        major_root(self.site, self.profile)
    }

    fn lock(&self) -> Result<ComposeLock> {
        ComposeLock::acquire(&self.root(), &self.profile.shortname, &self.profile.profile)
    }

    fn executor(&self, entries_dir: &Path, run: &ComposeRun) -> WorkerExecutor<'a, R> {
        WorkerExecutor::new(self.runtime, entries_dir)
            .timeout(run.job_timeout)
            .cancel_token(self.cancel.clone())
            .continue_on_failure(run.policy.per_job_continue)
    }

    fn config_generator(&self, run: &ComposeRun) -> RepoConfigGenerator<'a> {
        RepoConfigGenerator::new(self.profile, &self.site.repo_base_url)
            .hashed(run.flags.hashed)
            .gpg_check(run.flags.gpg_check)
            .repo_gpg_check(run.flags.repo_gpg_check)
    }

    fn deploy_extras(&self, layout: &ComposeLayout) {
        let extra_dir = layout.global_dir().join("extra-files");
        if let Err(err) =
            deploy_extra_files(&self.profile.extra_files, &extra_dir, &layout.metadata_dir())
        {
            warn!(error = %format!("{:#}", err), "extra files were not deployed");
        }
    }

    /// One sync invocation.
    pub fn run(&self, run: &ComposeRun) -> Result<RunSummary> {
        if run.mode == RunMode::Dry {
            return Err(ComposeError::DryRunUnsupported.into());
        }
        run.validate(self.profile)?;
        if !run.flags.parallel {
            return Err(ComposeError::SerialSyncUnsupported.into());
        }

        let full = run.mode.is_full();
        let root = self.root();
        let _lock = if full { Some(self.lock()?) } else { None };

        let layout = if full {
            ComposeLayout::create(&root, self.profile, &run.datestamp)?
        } else {
            ComposeLayout::latest(&root, self.profile)?
        };
        layout.ensure_work_dirs(&run.datestamp)?;
        let sync_root = layout.sync_root();
        let log_root = layout.log_root(&run.datestamp);

        if let (true, Some(filter)) = (full, &run.repo_filter) {
            warn!(
                repos = %filter.join(","),
                "repo filter is ignored on full runs; syncing every repo"
            );
        }
        if full && run.flags.refresh_extra_files {
            warn!("a full run implies extra files are also deployed");
        }

        let config = self.config_generator(run).generate(&self.site.scratch_dir)?;
        let jobs = plan(self.profile, run);
        let arches: BTreeSet<&str> = jobs
            .iter()
            .map(|j| j.arch.as_str())
            .filter(|a| *a != SOURCE_ARCH)
            .collect();
        materialize_arch_configs(&config, arches.iter().copied())?;

        let mounts = worker_mounts(&self.site.compose_root, &self.site.scratch_dir, &layout.entries_dir());
        let commands = SyncCommandBuilder::new(self.profile, &config, &sync_root, &log_root, mounts.clone())
            .clean_old(run.flags.clean_old)
            .gpg_check(run.flags.gpg_check);
        let executor = self.executor(&layout.entries_dir(), run);

        info!(
            jobs = jobs.len(),
            compose = %layout.compose_id(),
            path = %layout.dir().display(),
            "starting sync phase"
        );
        let sync_report = executor.execute_batches(
            batches(jobs)
                .into_iter()
                .map(|(repo, specs)| (repo, commands.jobs(&specs))),
        )?;
        log_failures("sync", &sync_report);

        if sync_report.cancelled || self.cancel.is_cancelled() {
            error!("compose run cancelled; latest compose left unchanged");
            bail!("compose run cancelled");
        }

        if full || run.flags.refresh_extra_files {
            self.deploy_extras(&layout);
        }

        let refresh = !full && run.flags.refresh_treeinfo;
        MetadataWriter::new(self.profile, run.timestamp)
            .refresh(refresh)
            .deploy_treeinfo(&sync_root, self.profile, run);
        if full || refresh {
            TreeinfoTweaker::new(self.profile, run.timestamp).tweak(
                &sync_root,
                &repos_in_scope(self.profile, run),
                &arches_in_scope(self.profile, run),
                full,
            );
        }

        let closure_report = if run.flags.repoclosure {
            let runner = RepoClosureRunner::new(self.profile, &log_root, mounts);
            let report = runner.run(
                &executor,
                ClosureSource::Synced {
                    sync_root: &sync_root,
                },
                if full { None } else { run.repo_filter.as_deref() },
                run.flags.parallel,
            )?;
            if report.cancelled {
                error!("compose run cancelled; latest compose left unchanged");
                bail!("compose run cancelled");
            }
            Some(report)
        } else {
            None
        };

        let compose_id = self.profile.compose_id(&run.datestamp);
        write_compose_metadata(
            &layout.metadata_dir(),
            self.profile,
            run.timestamp,
            &run.datestamp,
            &compose_id,
        )?;

        let mut summary = RunSummary {
            compose_dir: layout.dir().to_path_buf(),
            compose_id,
            sync: sync_report,
            closure: closure_report,
            published: false,
        };
        let failed = summary.failed_jobs();

        if full {
            if failed > 0 && run.policy.gate_publish_on_failure {
                error!(failed, "jobs failed; not publishing this compose as latest");
            } else {
                if failed > 0 {
                    warn!(failed, "publishing despite failed jobs");
                }
                publish_latest(layout.dir(), &layout.latest_link(self.profile))?;
                summary.published = true;
            }
        }

        info!(path = %sync_root.display(), "compose repo directory");
        info!(path = %log_root.display(), "compose logs");

        if failed > 0 && run.policy.fail_on_job_failure {
            let phase = if summary.sync.failed.is_empty() {
                "repoclosure"
            } else {
                "sync"
            };
            return Err(ComposeError::JobsFailed { phase, failed }.into());
        }
        info!("compose completed");
        Ok(summary)
    }

    /// Rewrite every per-tree metadata file of the latest compose, re-run the
    /// tweaks and re-deploy the aggregate metadata. Kickstart trees are left
    /// alone.
    pub fn refresh_treeinfo(&self, run: &ComposeRun) -> Result<()> {
        let _lock = self.lock()?;
        let layout = ComposeLayout::latest(&self.root(), self.profile)?;
        let sync_root = layout.sync_root();
        let scope = ComposeRun {
            mode: RunMode::Incremental,
            repo_filter: None,
            arch_filter: None,
            ..run.clone()
        };

        let summary = MetadataWriter::new(self.profile, run.timestamp)
            .refresh(true)
            .deploy_treeinfo(&sync_root, self.profile, &scope);
        let tweak_failures = TreeinfoTweaker::new(self.profile, run.timestamp).tweak(
            &sync_root,
            &self.profile.repos,
            &self.profile.allowed_arches,
            false,
        );
        write_compose_metadata(
            &layout.metadata_dir(),
            self.profile,
            run.timestamp,
            &run.datestamp,
            &self.profile.compose_id(&run.datestamp),
        )?;

        info!(
            written = summary.written,
            failed = summary.failed + tweak_failures,
            "treeinfo refresh completed"
        );
        Ok(())
    }

    /// Closure checks against the upstream repos rather than a synced tree.
    pub fn upstream_repoclosure(&self, run: &ComposeRun) -> Result<ExecutionReport> {
        if !run.flags.parallel {
            return Err(ComposeError::ClosureRequiresParallel.into());
        }
        let scratch = &self.site.scratch_dir;
        let work = scratch.join(format!(
            "{}-{}-repoclosure",
            self.profile.shortname, self.profile.major
        ));
        let log_root = work.join("logs").join(&run.datestamp);
        let entries = work.join("entries");
        std::fs::create_dir_all(&log_root)
            .with_context(|| format!("Failed to create {}", log_root.display()))?;

        let config = self.config_generator(run).generate(scratch)?;
        if let Some(map) = &self.profile.closure {
            materialize_arch_configs(&config, map.arches.keys().map(String::as_str))?;
        }

        let runner = RepoClosureRunner::new(
            self.profile,
            &log_root,
            worker_mounts(scratch, scratch, &entries),
        );
        let report = runner.run(
            &self.executor(&entries, run),
            ClosureSource::Upstream { config: &config },
            run.repo_filter.as_deref(),
            run.flags.parallel,
        )?;

        if !report.failed.is_empty() && run.policy.fail_on_job_failure {
            return Err(ComposeError::JobsFailed {
                phase: "repoclosure",
                failed: report.failed.len(),
            }
            .into());
        }
        Ok(report)
    }

    /// Close out the latest compose.
    pub fn finalize(&self, run: &ComposeRun) -> Result<CloseoutSummary> {
        let _lock = self.lock()?;
        let layout = ComposeLayout::latest(&self.root(), self.profile)?;
        let strategy = CopyStrategy::detect(&self.site.compose_root.join("partitions"))?;
        let summary = closeout(&layout, self.profile, &strategy, run.timestamp, &run.datestamp)?;

        if !summary.failed.is_empty() && run.policy.fail_on_job_failure {
            return Err(ComposeError::JobsFailed {
                phase: "closeout",
                failed: summary.failed.len(),
            }
            .into());
        }
        info!(copied = ?summary.copied, "compose closeout completed");
        Ok(summary)
    }
}

fn log_failures(phase: &str, report: &ExecutionReport) {
    if report.is_success() {
        info!(phase, jobs = report.per_job.len(), "all jobs succeeded");
        return;
    }
    if report.failed.is_empty() {
        return;
    }
    error!(phase, failed = report.failed.len(), "there were issues syncing these jobs:");
    for job in &report.failed {
        if let Some(outcome) = report.outcome(job) {
            error!(phase, job = %job, "{}", outcome);
        }
    }
}
