//! podman / docker worker backend.
//!
//! Every job becomes one detached container named after the job, running its
//! entry script with the compose root, config and entries directories bind
//! mounted at identical paths.
//!
//! # Usage
//!
//! ```rust,ignore
//! use compose_builder::worker::{ContainerRuntime, WorkerExecutor};
//!
//! let runtime = ContainerRuntime::detect(Some("podman"))?;
//! let report = WorkerExecutor::new(&runtime, &layout.entries_dir()).execute(jobs)?;
//! ```

use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

use super::{
    CancelToken, WaitOutcome, WorkerHandle, WorkerJob, WorkerRuntime, WorkerStatus, WAIT_SLICE,
};
use crate::preflight::container_runtime_path;
use crate::process::Cmd;

/// podman / docker CLI backend.
pub struct ContainerRuntime {
    binary: PathBuf,
    label: String,
    spawned: Mutex<BTreeSet<String>>,
}

impl ContainerRuntime {
    /// Locate the runtime binary; `preferred` is tried before podman and docker.
    pub fn detect(preferred: Option<&str>) -> Result<Self> {
        Ok(Self::with_binary(container_runtime_path(preferred)?))
    }

    pub fn with_binary(binary: PathBuf) -> Self {
        let label = binary
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "container".to_string());
        Self {
            binary,
            label,
            spawned: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn cmd(&self) -> Cmd {
        Cmd::new(self.binary.as_os_str())
    }

    fn forget(&self, names: &[&str]) {
        let mut spawned = self
            .spawned
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for name in names {
            spawned.remove(*name);
        }
    }
}

/// `podman run` arguments for one job.
pub(crate) fn run_args(job: &WorkerJob, entrypoint: &Path) -> Vec<String> {
    let mut args = vec!["run".to_string(), "-d".to_string()];
    for mount in &job.mounts {
        args.push("-v".to_string());
        args.push(format!(
            "{}:{}",
            mount.host.display(),
            mount.target.display()
        ));
    }
    for (key, value) in &job.env {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }
    args.extend([
        "--name".to_string(),
        job.name.clone(),
        "--entrypoint".to_string(),
        entrypoint.display().to_string(),
        job.image.clone(),
    ]);
    args
}

/// Parse `inspect -f '{{.State.Status}} {{.State.ExitCode}}'` output.
pub(crate) fn parse_state(raw: &str) -> WorkerStatus {
    let mut parts = raw.split_whitespace();
    let state = parts.next().unwrap_or_default();
    let code = parts.next().and_then(|c| c.parse::<i32>().ok());
    match (state, code) {
        ("running" | "created" | "configured" | "initialized" | "paused", _) => {
            WorkerStatus::Running
        }
        ("exited" | "stopped", Some(code)) => WorkerStatus::Exited(code),
        _ => WorkerStatus::Abnormal(raw.trim().to_string()),
    }
}

impl WorkerRuntime for ContainerRuntime {
    fn name(&self) -> &str {
        &self.label
    }

    fn spawn_detached(&self, job: &WorkerJob) -> Result<WorkerHandle> {
        let Some(entrypoint) = &job.entrypoint else {
            bail!("job '{}' has no entry script", job.name);
        };

        // A container left over from an interrupted run would block the name.
        self.cmd()
            .args(["rm", "-f", job.name.as_str()])
            .allow_fail()
            .run()?;

        self.cmd()
            .args(run_args(job, entrypoint))
            .error_msg(format!("failed to start container for {}", job.name))
            .run()?;

        self.spawned
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(job.name.clone());
        debug!(job = %job.name, runtime = %self.label, "spawned container");
        Ok(WorkerHandle {
            name: job.name.clone(),
        })
    }

    fn wait_all(
        &self,
        handles: &[WorkerHandle],
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> Result<WaitOutcome> {
        if handles.is_empty() {
            return Ok(WaitOutcome::Completed);
        }

        let mut child = Command::new(&self.binary)
            .arg("wait")
            .args(handles.iter().map(|h| h.name.as_str()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to spawn {} wait", self.label))?;

        let started = Instant::now();
        loop {
            if let Some(status) = child
                .wait_timeout(WAIT_SLICE)
                .context("failed to wait for container wait")?
            {
                if !status.success() {
                    warn!(?status, "bulk wait returned non-zero; inspecting workers individually");
                }
                return Ok(WaitOutcome::Completed);
            }

            let outcome = if cancel.is_cancelled() {
                Some(WaitOutcome::Cancelled)
            } else if timeout.is_some_and(|limit| started.elapsed() >= limit) {
                Some(WaitOutcome::TimedOut)
            } else {
                None
            };
            if let Some(outcome) = outcome {
                let _ = child.kill();
                let _ = child.wait();
                return Ok(outcome);
            }
        }
    }

    fn inspect_exit(&self, handle: &WorkerHandle) -> Result<WorkerStatus> {
        let result = self
            .cmd()
            .args([
                "inspect",
                "-f",
                "{{.State.Status}} {{.State.ExitCode}}",
                handle.name.as_str(),
            ])
            .allow_fail()
            .run()?;
        if !result.success() {
            return Ok(WorkerStatus::Abnormal(format!(
                "inspect failed: {}",
                result.stderr.trim()
            )));
        }
        Ok(parse_state(&result.stdout))
    }

    fn terminate(&self, handle: &WorkerHandle) -> Result<()> {
        self.cmd()
            .args(["kill", handle.name.as_str()])
            .allow_fail()
            .run()?;
        Ok(())
    }

    fn remove(&self, handles: &[WorkerHandle]) -> Result<()> {
        if handles.is_empty() {
            return Ok(());
        }
        let names: Vec<&str> = handles.iter().map(|h| h.name.as_str()).collect();
        self.cmd()
            .args(["rm", "-f"])
            .args(names.iter().copied())
            .error_msg("failed to remove containers")
            .run()?;
        self.forget(&names);
        Ok(())
    }

    fn list_workers(&self) -> Result<Vec<String>> {
        let result = self
            .cmd()
            .args(["ps", "-a", "--format", "{{.Names}}"])
            .error_msg("failed to list containers")
            .run()?;
        let existing: BTreeSet<&str> = result.stdout.lines().map(str::trim).collect();
        let spawned = self
            .spawned
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(spawned
            .iter()
            .filter(|name| existing.contains(name.as_str()))
            .cloned()
            .collect())
    }
}
