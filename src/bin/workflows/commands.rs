use anyhow::{bail, Result};
use time::OffsetDateTime;
use tracing::info;

use compose_builder::config::{ComposeConfig, ComposeRun, RunMode};
use compose_builder::preflight::{check_host_arch, check_required_tools, SYNC_TOOLS};
use compose_builder::worker::{CancelToken, ContainerRuntime, LocalRuntime};
use compose_builder::{ComposeError, ComposeSync};

use super::parse::{Cli, Command};

pub(crate) fn run_command(cli: &Cli, cancel: CancelToken) -> Result<()> {
    let config = ComposeConfig::load(&cli.config)?;
    let now = OffsetDateTime::now_utc();

    match &cli.command {
        Command::Sync(args) => {
            let profile = config.profile(&args.release)?;
            let run = args.to_run(now)?;
            if run.mode == RunMode::Dry {
                bail!(ComposeError::DryRunUnsupported);
            }
            run.validate(&profile)?;
            check_host_arch(&profile)?;
            check_required_tools(SYNC_TOOLS)?;

            let runtime = container_runtime(&config)?;
            let summary = ComposeSync::new(&config.site, &profile, &runtime)
                .cancel_token(cancel)
                .run(&run)?;
            info!(
                compose = %summary.compose_id,
                failed = summary.failed_jobs(),
                published = summary.published,
                "sync finished"
            );
            Ok(())
        }
        Command::RefreshTreeinfo(args) => {
            let profile = config.profile(&args.release)?;
            // No workers are spawned; the host backend stands in.
            let runtime = LocalRuntime::new();
            ComposeSync::new(&config.site, &profile, &runtime)
                .cancel_token(cancel)
                .refresh_treeinfo(&ComposeRun::at(RunMode::Incremental, now))
        }
        Command::Repoclosure(args) => {
            let profile = config.profile(&args.release)?;
            let run = args.to_run(now);
            run.validate(&profile)?;
            let runtime = container_runtime(&config)?;
            let report = ComposeSync::new(&config.site, &profile, &runtime)
                .cancel_token(cancel)
                .upstream_repoclosure(&run)?;
            info!(
                checks = report.per_job.len(),
                failed = report.failed.len(),
                "repoclosure finished"
            );
            Ok(())
        }
        Command::Finalize(args) => {
            let profile = config.profile(&args.release)?;
            let runtime = LocalRuntime::new();
            let summary = ComposeSync::new(&config.site, &profile, &runtime)
                .cancel_token(cancel)
                .finalize(&ComposeRun::at(RunMode::Incremental, now))?;
            info!(
                copied = summary.copied.len(),
                checksums = summary.checksum_files,
                "closeout finished"
            );
            Ok(())
        }
    }
}

fn container_runtime(config: &ComposeConfig) -> Result<ContainerRuntime> {
    let runtime = ContainerRuntime::detect(config.site.container_runtime.as_deref())?;
    info!(runtime = %runtime.binary().display(), "using container runtime");
    Ok(runtime)
}
