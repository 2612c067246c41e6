use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use time::OffsetDateTime;

use compose_builder::config::{ComposeRun, RunMode, DEFAULT_CONFIG_PATH};
use compose_builder::logging::DEFAULT_LOG_LEVEL;

#[derive(Debug, Parser)]
#[command(
    name = "compose-builder",
    version,
    about = "Sync, stamp and publish distribution repository composes"
)]
pub(crate) struct Cli {
    /// Compose configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,

    /// Emit JSON log lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Sync repositories into a new (full run) or the latest compose.
    Sync(SyncArgs),
    /// Rewrite the per-tree metadata of the latest compose.
    RefreshTreeinfo(ReleaseArgs),
    /// Check dependency closure against the upstream repositories.
    Repoclosure(ClosureArgs),
    /// Move built media into the latest compose and index checksums.
    Finalize(ReleaseArgs),
}

#[derive(Debug, Args)]
pub(crate) struct ReleaseArgs {
    #[arg(long)]
    pub release: String,
}

#[derive(Debug, Args)]
pub(crate) struct SyncArgs {
    #[arg(long)]
    pub release: String,
    /// Comma-separated repositories (ignored on full runs).
    #[arg(long)]
    pub repo: Option<String>,
    /// Comma-separated architectures; `source` selects the source tree only.
    #[arg(long)]
    pub arch: Option<String>,
    #[arg(long)]
    pub full_run: bool,
    #[arg(long)]
    pub dry_run: bool,
    #[arg(long)]
    pub ignore_debug: bool,
    #[arg(long)]
    pub ignore_source: bool,
    #[arg(long)]
    pub repoclosure: bool,
    #[arg(long)]
    pub hashed: bool,
    /// Exit 0 even when jobs failed.
    #[arg(long)]
    pub no_fail: bool,
    #[arg(long)]
    pub refresh_extra_files: bool,
    #[arg(long)]
    pub refresh_treeinfo: bool,
    /// Run jobs one at a time instead of in parallel workers.
    #[arg(long)]
    pub simple: bool,
    #[arg(long)]
    pub clean_old_packages: bool,
    #[arg(long)]
    pub disable_gpg_check: bool,
    #[arg(long)]
    pub disable_repo_gpg_check: bool,
    /// Move latest even when jobs failed.
    #[arg(long)]
    pub publish_on_failure: bool,
    /// Seconds a batch may run before its workers are killed.
    #[arg(long, value_name = "SECS")]
    pub job_timeout: Option<u64>,
}

impl SyncArgs {
    pub(crate) fn to_run(&self, now: OffsetDateTime) -> Result<ComposeRun> {
        let mode = RunMode::from_flags(self.full_run, self.dry_run)?;
        let mut run = ComposeRun::at(mode, now)
            .with_repo_filter(self.repo.as_deref())
            .with_arch_filter(self.arch.as_deref());

        run.flags.ignore_debug = self.ignore_debug;
        run.flags.ignore_source = self.ignore_source;
        run.flags.parallel = !self.simple;
        run.flags.clean_old = self.clean_old_packages;
        run.flags.hashed = self.hashed;
        run.flags.repoclosure = self.repoclosure;
        run.flags.refresh_extra_files = self.refresh_extra_files;
        run.flags.refresh_treeinfo = self.refresh_treeinfo;
        run.flags.gpg_check = !self.disable_gpg_check;
        run.flags.repo_gpg_check = !self.disable_repo_gpg_check;

        run.policy.fail_on_job_failure = !self.no_fail;
        run.policy.gate_publish_on_failure = !self.publish_on_failure;
        run.job_timeout = self.job_timeout.map(Duration::from_secs);
        Ok(run)
    }
}

#[derive(Debug, Args)]
pub(crate) struct ClosureArgs {
    #[arg(long)]
    pub release: String,
    /// Comma-separated repositories to check.
    #[arg(long)]
    pub repo: Option<String>,
    #[arg(long)]
    pub simple: bool,
    #[arg(long)]
    pub hashed: bool,
    #[arg(long)]
    pub no_fail: bool,
    #[arg(long, value_name = "SECS")]
    pub job_timeout: Option<u64>,
}

impl ClosureArgs {
    pub(crate) fn to_run(&self, now: OffsetDateTime) -> ComposeRun {
        let mut run =
            ComposeRun::at(RunMode::Incremental, now).with_repo_filter(self.repo.as_deref());
        run.flags.parallel = !self.simple;
        run.flags.hashed = self.hashed;
        run.policy.fail_on_job_failure = !self.no_fail;
        run.job_timeout = self.job_timeout.map(Duration::from_secs);
        run
    }
}
