//! Fatal, operator-facing compose errors.
//!
//! Everything else in the crate flows through `anyhow`. These variants are the
//! conditions an operator has to act on, and each maps to its own process exit
//! code so wrappers (cron, CI) can tell them apart.

use std::path::PathBuf;

use thiserror::Error;

/// Fatal compose conditions. Raised with `bail!(ComposeError::...)` and
/// recovered in the binary with `downcast_ref`.
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("architecture '{arch}' is not supported by this profile (allowed: {allowed})")]
    InvalidArch { arch: String, allowed: String },

    #[error("invalid profile '{release}': {reason}")]
    InvalidProfile { release: String, reason: String },

    #[error("invalid repository '{repo}' (known: {known})")]
    InvalidRepo { repo: String, known: String },

    #[error(
        "latest compose link does not exist: {}\nperform a full run first",
        .link.display()
    )]
    LatestMissing { link: PathBuf },

    #[error("local file syncs are not supported (base url '{url}')")]
    UnsupportedSource { url: String },

    #[error("dry runs are not supported yet")]
    DryRunUnsupported,

    #[error("a full run and a dry run cannot be combined")]
    ConflictingModes,

    #[error("repoclosure is too slow to run one by one; enable parallel mode")]
    ClosureRequiresParallel,

    #[error("serial syncing is not supported; enable parallel (container) mode")]
    SerialSyncUnsupported,

    #[error("compose is locked by another process: {}", .lock.display())]
    ComposeLocked { lock: PathBuf },

    #[error("unsupported checksum algorithm '{0}' (expected sha256 or sha512)")]
    UnsupportedChecksum(String),

    #[error("required host tool '{tool}' not found in PATH ({hint})")]
    MissingTool { tool: String, hint: String },

    #[error("{failed} job(s) failed during {phase}")]
    JobsFailed { phase: &'static str, failed: usize },
}

impl ComposeError {
    /// Process exit code for this condition.
    pub fn exit_code(&self) -> u8 {
        match self {
            ComposeError::InvalidArch { .. } => 2,
            ComposeError::InvalidProfile { .. } => 3,
            ComposeError::LatestMissing { .. } => 4,
            ComposeError::UnsupportedSource { .. } => 5,
            ComposeError::DryRunUnsupported => 6,
            ComposeError::ConflictingModes => 7,
            ComposeError::ClosureRequiresParallel => 9,
            ComposeError::InvalidRepo { .. } => 10,
            ComposeError::SerialSyncUnsupported => 11,
            ComposeError::ComposeLocked { .. } => 12,
            ComposeError::UnsupportedChecksum(_) => 13,
            ComposeError::MissingTool { .. } => 127,
            ComposeError::JobsFailed { .. } => 1,
        }
    }
}

/// Exit code for an arbitrary error chain: the first `ComposeError` found wins.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ComposeError>())
        .map(ComposeError::exit_code)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_exit_codes_are_distinct_for_fatal_configuration() {
        let codes = [
            ComposeError::InvalidArch {
                arch: "sparc".into(),
                allowed: "x86_64".into(),
            }
            .exit_code(),
            ComposeError::InvalidProfile {
                release: "7".into(),
                reason: "missing".into(),
            }
            .exit_code(),
            ComposeError::LatestMissing {
                link: PathBuf::from("/x"),
            }
            .exit_code(),
            ComposeError::UnsupportedSource { url: "/srv".into() }.exit_code(),
        ];
        let mut sorted = codes.to_vec();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), codes.len());
        assert!(codes.iter().all(|c| *c != 0 && *c != 1));
    }

    #[test]
    fn test_exit_code_found_through_context() {
        let err = Err::<(), _>(ComposeError::DryRunUnsupported)
            .context("running compose")
            .unwrap_err();
        assert_eq!(exit_code_for(&err), 6);

        let plain = anyhow::anyhow!("disk on fire");
        assert_eq!(exit_code_for(&plain), 1);
    }
}
