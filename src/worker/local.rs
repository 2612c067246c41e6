//! Host-process worker backend.
//!
//! Runs each entry script as a child process of the orchestrator. It honors
//! the same spawn / wait / inspect / remove contract as the container
//! backend, without isolation, which makes it the backend tests run against.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;
use wait_timeout::ChildExt;

use super::{CancelToken, WaitOutcome, WorkerHandle, WorkerJob, WorkerRuntime, WorkerStatus};

const POLL_SLICE: Duration = Duration::from_millis(20);

struct LocalWorker {
    child: Child,
    status: Option<ExitStatus>,
}

impl LocalWorker {
    fn poll(&mut self) -> Result<Option<ExitStatus>> {
        if self.status.is_none() {
            self.status = self.child.try_wait().context("failed to poll worker")?;
        }
        Ok(self.status)
    }
}

/// Runs entry scripts as host child processes. Mounts are ignored since the
/// host paths are already visible.
#[derive(Default)]
pub struct LocalRuntime {
    workers: Mutex<BTreeMap<String, LocalWorker>>,
}

impl LocalRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn workers(&self) -> MutexGuard<'_, BTreeMap<String, LocalWorker>> {
        self.workers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl WorkerRuntime for LocalRuntime {
    fn name(&self) -> &str {
        "local"
    }

    fn spawn_detached(&self, job: &WorkerJob) -> Result<WorkerHandle> {
        let Some(entrypoint) = &job.entrypoint else {
            bail!("job '{}' has no entry script", job.name);
        };
        let mut workers = self.workers();
        if workers.contains_key(&job.name) {
            bail!("worker '{}' already exists", job.name);
        }

        let child = Command::new(entrypoint)
            .envs(job.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to spawn {}", entrypoint.display()))?;

        debug!(job = %job.name, pid = child.id(), "spawned local worker");
        workers.insert(
            job.name.clone(),
            LocalWorker {
                child,
                status: None,
            },
        );
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
        let started = Instant::now();
        loop {
            let mut pending = false;
            {
                let mut workers = self.workers();
                for handle in handles {
                    let Some(worker) = workers.get_mut(&handle.name) else {
                        continue;
                    };
                    if worker.poll()?.is_some() {
                        continue;
                    }
                    pending = true;
                    if let Some(status) = worker
                        .child
                        .wait_timeout(POLL_SLICE)
                        .context("failed to wait for worker")?
                    {
                        worker.status = Some(status);
                    }
                }
            }

            if !pending {
                return Ok(WaitOutcome::Completed);
            }
            if cancel.is_cancelled() {
                return Ok(WaitOutcome::Cancelled);
            }
            if timeout.is_some_and(|limit| started.elapsed() >= limit) {
                return Ok(WaitOutcome::TimedOut);
            }
        }
    }

    fn inspect_exit(&self, handle: &WorkerHandle) -> Result<WorkerStatus> {
        let mut workers = self.workers();
        let Some(worker) = workers.get_mut(&handle.name) else {
            return Ok(WorkerStatus::Abnormal("no such worker".to_string()));
        };
        Ok(match worker.poll()? {
            None => WorkerStatus::Running,
            Some(status) => match status.code() {
                Some(code) => WorkerStatus::Exited(code),
                None => WorkerStatus::Abnormal(format!("terminated: {}", status)),
            },
        })
    }

    fn terminate(&self, handle: &WorkerHandle) -> Result<()> {
        let mut workers = self.workers();
        if let Some(worker) = workers.get_mut(&handle.name) {
            if worker.poll()?.is_none() {
                let _ = worker.child.kill();
                worker.status = Some(worker.child.wait().context("failed to reap worker")?);
            }
        }
        Ok(())
    }

    fn remove(&self, handles: &[WorkerHandle]) -> Result<()> {
        let mut workers = self.workers();
        for handle in handles {
            if let Some(mut worker) = workers.remove(&handle.name) {
                if worker.poll()?.is_none() {
                    let _ = worker.child.kill();
                    let _ = worker.child.wait();
                }
            }
        }
        Ok(())
    }

    fn list_workers(&self) -> Result<Vec<String>> {
        Ok(self.workers().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::script::write_entry;
    use crate::worker::JobStep;
    use std::path::Path;
    use tempfile::TempDir;

    fn job(dir: &Path, name: &str, cmd: &str) -> WorkerJob {
        let mut job = WorkerJob {
            name: name.to_string(),
            image: String::new(),
            steps: vec![JobStep::new("sh", ["-c", cmd])],
            env: Vec::new(),
            mounts: Vec::new(),
            log_path: dir.join(format!("{name}.log")),
            entrypoint: None,
        };
        job.entrypoint = Some(write_entry(&dir.join("entries"), &job).unwrap());
        job
    }

    #[test]
    fn test_spawn_wait_inspect_remove() {
        let tmp = TempDir::new().unwrap();
        let runtime = LocalRuntime::new();
        let ok = runtime.spawn_detached(&job(tmp.path(), "ok", "echo fine")).unwrap();
        let bad = runtime.spawn_detached(&job(tmp.path(), "bad", "exit 3")).unwrap();
        let handles = vec![ok.clone(), bad.clone()];

        let outcome = runtime.wait_all(&handles, None, &CancelToken::new()).unwrap();
        assert_eq!(outcome, WaitOutcome::Completed);
        assert_eq!(runtime.inspect_exit(&ok).unwrap(), WorkerStatus::Exited(0));
        assert_eq!(runtime.inspect_exit(&bad).unwrap(), WorkerStatus::Exited(3));
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("ok.log")).unwrap().trim(),
            "fine"
        );

        runtime.remove(&handles).unwrap();
        assert!(runtime.list_workers().unwrap().is_empty());
    }

    #[test]
    fn test_wait_times_out_and_terminate_reaps() {
        let tmp = TempDir::new().unwrap();
        let runtime = LocalRuntime::new();
        let slow = runtime.spawn_detached(&job(tmp.path(), "slow", "sleep 30")).unwrap();
        let handles = vec![slow.clone()];

        let outcome = runtime
            .wait_all(&handles, Some(Duration::from_millis(200)), &CancelToken::new())
            .unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert_eq!(runtime.inspect_exit(&slow).unwrap(), WorkerStatus::Running);

        runtime.terminate(&slow).unwrap();
        assert!(matches!(
            runtime.inspect_exit(&slow).unwrap(),
            WorkerStatus::Abnormal(_)
        ));
        runtime.remove(&handles).unwrap();
        assert!(runtime.list_workers().unwrap().is_empty());
    }

    #[test]
    fn test_missing_entrypoint_is_spawn_error() {
        let runtime = LocalRuntime::new();
        let job = WorkerJob {
            name: "x".to_string(),
            image: String::new(),
            steps: Vec::new(),
            env: Vec::new(),
            mounts: Vec::new(),
            log_path: "/dev/null".into(),
            entrypoint: None,
        };
        assert!(runtime.spawn_detached(&job).is_err());
    }
}
