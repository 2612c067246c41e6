//! Isolated worker runtime and the batch executor built on it.
//!
//! A [`WorkerJob`] is a typed description of one unit of work: the steps to
//! run, the image, the bind mounts and the log file. A [`WorkerRuntime`]
//! turns jobs into isolated workers and exposes the four-operation contract
//! the executor relies on:
//!
//! 1. [`spawn_detached`](WorkerRuntime::spawn_detached) one worker per job
//! 2. [`wait_all`](WorkerRuntime::wait_all) once for the whole batch
//! 3. [`inspect_exit`](WorkerRuntime::inspect_exit) each worker, because the
//!    bulk wait says nothing about individual failures
//! 4. [`remove`](WorkerRuntime::remove) every worker regardless of outcome
//!
//! [`ContainerRuntime`] drives podman or docker; [`LocalRuntime`] runs the
//! same entry scripts as host processes.

mod container;
mod executor;
mod local;
pub mod script;

pub use container::ContainerRuntime;
pub use executor::{ExecutionReport, JobOutcome, WorkerExecutor};
pub use local::LocalRuntime;

use anyhow::Result;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One command inside a job. Output is appended to the job log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStep {
    pub program: String,
    pub args: Vec<String>,
}

impl JobStep {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// Host directory exposed to the worker at the same path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub target: PathBuf,
}

impl Mount {
    pub fn same_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            host: path.clone(),
            target: path,
        }
    }
}

/// Typed job specification handed to a runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerJob {
    /// Unique within a batch; used as the worker name.
    pub name: String,
    pub image: String,
    pub steps: Vec<JobStep>,
    pub env: Vec<(String, String)>,
    pub mounts: Vec<Mount>,
    pub log_path: PathBuf,
    /// Entry script the worker runs. Filled in by the executor.
    pub entrypoint: Option<PathBuf>,
}

/// Handle to a spawned worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerHandle {
    pub name: String,
}

/// Terminal (or not) state of one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerStatus {
    Running,
    Exited(i32),
    /// Ended without an exit code (signal, OOM kill, unknown state).
    Abnormal(String),
}

/// How a bulk wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed,
    TimedOut,
    Cancelled,
}

/// Cooperative cancellation shared between the signal handler and the run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Polling slice for waits that must notice cancellation.
pub(crate) const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Isolated worker runtime.
pub trait WorkerRuntime {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Start a worker for `job` without waiting for it.
    fn spawn_detached(&self, job: &WorkerJob) -> Result<WorkerHandle>;

    /// Block until every handle has terminated, `timeout` elapses or `cancel`
    /// fires. Reports nothing about individual exit codes.
    fn wait_all(
        &self,
        handles: &[WorkerHandle],
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> Result<WaitOutcome>;

    fn inspect_exit(&self, handle: &WorkerHandle) -> Result<WorkerStatus>;

    /// Forcibly stop a worker that is still running.
    fn terminate(&self, handle: &WorkerHandle) -> Result<()>;

    /// Reap workers. Must not fail for workers that already exited.
    fn remove(&self, handles: &[WorkerHandle]) -> Result<()>;

    /// Workers spawned by this runtime that still exist.
    fn list_workers(&self) -> Result<Vec<String>>;
}
