//! Self-contained entry scripts. A worker needs nothing but its script and
//! the bind mounts to do its job.

use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use super::WorkerJob;

/// Escape a single shell word for POSIX sh.
pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_=./:@".contains(c))
    {
        s.to_string()
    } else {
        let escaped = s.replace('\'', "'\"'\"'");
        format!("'{}'", escaped)
    }
}

pub fn shell_join<'a>(words: impl IntoIterator<Item = &'a str>) -> String {
    words
        .into_iter()
        .map(shell_escape)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Script body: every step in order, output appended to the job log, first
/// failing step ends the script with its status.
pub fn render(job: &WorkerJob) -> String {
    let log = shell_escape(&job.log_path.to_string_lossy());
    let mut out = String::from("#!/bin/bash\nset -e\nset -o pipefail\n");
    for (key, value) in &job.env {
        let _ = writeln!(out, "export {}={}", key, shell_escape(value));
    }
    for step in &job.steps {
        let line = shell_join(
            std::iter::once(step.program.as_str()).chain(step.args.iter().map(String::as_str)),
        );
        let _ = writeln!(out, "{} 2>&1 | tee -a {}", line, log);
    }
    out
}

/// Write `entries_dir/{job.name}` as an executable script.
pub fn write_entry(entries_dir: &Path, job: &WorkerJob) -> Result<PathBuf> {
    fs::create_dir_all(entries_dir)
        .with_context(|| format!("Failed to create {}", entries_dir.display()))?;
    let path = entries_dir.join(&job.name);
    fs::write(&path, render(job))
        .with_context(|| format!("Failed to write entry {}", path.display()))?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("Failed to chmod {}", path.display()))?;
    Ok(path)
}
