//! Batch execution over a [`WorkerRuntime`].
//!
//! Job failures are values, never errors: every job ends up in the
//! [`ExecutionReport`] with its [`JobOutcome`], including jobs that never
//! started.

use anyhow::Result;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

use super::script::write_entry;
use super::{CancelToken, WaitOutcome, WorkerHandle, WorkerJob, WorkerRuntime, WorkerStatus};

/// Final classification of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    /// Exited non-zero, or ended without an exit code (`None`).
    Failed(Option<i32>),
    /// The worker never started.
    SpawnFailed(String),
    TimedOut,
    Cancelled,
    /// Never spawned because an earlier batch failed and the run stops on
    /// the first failure.
    Skipped,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded)
    }

    /// Exit code, when the worker reported one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            JobOutcome::Succeeded => Some(0),
            JobOutcome::Failed(code) => *code,
            _ => None,
        }
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Succeeded => write!(f, "succeeded"),
            JobOutcome::Failed(Some(code)) => write!(f, "exited with {}", code),
            JobOutcome::Failed(None) => write!(f, "terminated abnormally"),
            JobOutcome::SpawnFailed(reason) => write!(f, "failed to start: {}", reason),
            JobOutcome::TimedOut => write!(f, "timed out"),
            JobOutcome::Cancelled => write!(f, "cancelled"),
            JobOutcome::Skipped => write!(f, "skipped after an earlier failure"),
        }
    }
}

/// Per-job outcomes for one or more batches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub per_job: BTreeMap<String, JobOutcome>,
    /// Failed job names in the order they were classified.
    pub failed: Vec<String>,
    pub cancelled: bool,
}

impl ExecutionReport {
    fn record(&mut self, name: &str, outcome: JobOutcome) {
        if !outcome.is_success() {
            self.failed.push(name.to_string());
        }
        self.per_job.insert(name.to_string(), outcome);
    }

    pub fn merge(&mut self, other: ExecutionReport) {
        self.per_job.extend(other.per_job);
        self.failed.extend(other.failed);
        self.cancelled |= other.cancelled;
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }

    pub fn outcome(&self, job: &str) -> Option<&JobOutcome> {
        self.per_job.get(job)
    }
}

/// Runs batches of jobs through a [`WorkerRuntime`].
///
/// Each batch is spawned in full, waited on once, inspected job by job, then
/// reaped. Batches run strictly one after another. A failed job never stops
/// its siblings or later batches; it only shows up in the report.
pub struct WorkerExecutor<'r, R: WorkerRuntime + ?Sized> {
    runtime: &'r R,
    entries_dir: PathBuf,
    timeout: Option<Duration>,
    cancel: CancelToken,
    continue_on_failure: bool,
}

impl<'r, R: WorkerRuntime + ?Sized> WorkerExecutor<'r, R> {
    pub fn new(runtime: &'r R, entries_dir: &Path) -> Self {
        Self {
            runtime,
            entries_dir: entries_dir.to_path_buf(),
            timeout: None,
            cancel: CancelToken::new(),
            continue_on_failure: true,
        }
    }

    /// Upper bound on each batch wait.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Keep scheduling later batches after a job failed (the default). When
    /// off, the batch holding the failure still runs to completion but every
    /// later batch is recorded as skipped.
    pub fn continue_on_failure(mut self, enabled: bool) -> Self {
        self.continue_on_failure = enabled;
        self
    }

    /// Run batches in order. Once cancelled, remaining batches are recorded
    /// as cancelled without being spawned.
    pub fn execute_batches<I>(&self, batches: I) -> Result<ExecutionReport>
    where
        I: IntoIterator<Item = (String, Vec<WorkerJob>)>,
    {
        let mut report = ExecutionReport::default();
        for (label, jobs) in batches {
            if self.cancel.is_cancelled() {
                for job in &jobs {
                    report.record(&job.name, JobOutcome::Cancelled);
                }
                report.cancelled = true;
                continue;
            }
            if !self.continue_on_failure && !report.failed.is_empty() {
                warn!(batch = %label, jobs = jobs.len(), "skipping batch after an earlier failure");
                for job in &jobs {
                    report.record(&job.name, JobOutcome::Skipped);
                }
                continue;
            }
            info!(batch = %label, jobs = jobs.len(), runtime = self.runtime.name(), "starting batch");
            report.merge(self.execute(jobs)?);
        }
        Ok(report)
    }

    /// Run one batch.
    pub fn execute(&self, jobs: Vec<WorkerJob>) -> Result<ExecutionReport> {
        let mut report = ExecutionReport::default();
        let mut handles: Vec<WorkerHandle> = Vec::with_capacity(jobs.len());

        for mut job in jobs {
            let spawned = write_entry(&self.entries_dir, &job).and_then(|entry| {
                job.entrypoint = Some(entry);
                self.runtime.spawn_detached(&job)
            });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    error!(job = %job.name, error = %format!("{:#}", err), "failed to spawn worker");
                    report.record(&job.name, JobOutcome::SpawnFailed(format!("{:#}", err)));
                }
            }
        }

        let waited = self.runtime.wait_all(&handles, self.timeout, &self.cancel);
        let interrupted = match &waited {
            Ok(WaitOutcome::Completed) => None,
            Ok(WaitOutcome::TimedOut) => {
                warn!(timeout = ?self.timeout, "batch exceeded its timeout; terminating workers");
                Some(JobOutcome::TimedOut)
            }
            Ok(WaitOutcome::Cancelled) => {
                warn!("cancellation requested; terminating workers");
                report.cancelled = true;
                Some(JobOutcome::Cancelled)
            }
            Err(err) => {
                error!(error = %format!("{:#}", err), "bulk wait failed; inspecting workers individually");
                None
            }
        };

        for handle in &handles {
            let outcome = self.classify(handle, interrupted.as_ref());
            match &outcome {
                JobOutcome::Succeeded => info!(job = %handle.name, "job succeeded"),
                other => error!(job = %handle.name, exit_code = ?other.exit_code(), "job {}", other),
            }
            report.record(&handle.name, outcome);
        }

        if let Err(err) = self.runtime.remove(&handles) {
            error!(error = %format!("{:#}", err), "failed to reap workers");
        }

        Ok(report)
    }

    fn classify(&self, handle: &WorkerHandle, interrupted: Option<&JobOutcome>) -> JobOutcome {
        let status = match self.runtime.inspect_exit(handle) {
            Ok(status) => status,
            Err(err) => WorkerStatus::Abnormal(format!("{:#}", err)),
        };
        match status {
            WorkerStatus::Exited(0) => JobOutcome::Succeeded,
            WorkerStatus::Exited(code) => JobOutcome::Failed(Some(code)),
            WorkerStatus::Abnormal(reason) => {
                warn!(job = %handle.name, %reason, "worker ended without an exit code");
                JobOutcome::Failed(None)
            }
            WorkerStatus::Running => {
                if let Err(err) = self.runtime.terminate(handle) {
                    error!(job = %handle.name, error = %format!("{:#}", err), "failed to terminate worker");
                }
                interrupted.cloned().unwrap_or(JobOutcome::Failed(None))
            }
        }
    }
}
