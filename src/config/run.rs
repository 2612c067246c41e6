//! Per-invocation run description.

use anyhow::Result;
use std::time::Duration;
use time::OffsetDateTime;

use super::ComposeProfile;
use crate::error::ComposeError;
use crate::preflight::check_valid_arch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// New compose directory, every repo, kickstart trees, publish latest.
    Full,
    /// Re-sync into the current latest compose.
    Incremental,
    /// Parsed but not implemented.
    Dry,
}

impl RunMode {
    /// Mode from the two CLI switches.
    pub fn from_flags(full_run: bool, dry_run: bool) -> Result<Self> {
        match (full_run, dry_run) {
            (true, true) => Err(ComposeError::ConflictingModes.into()),
            (true, false) => Ok(RunMode::Full),
            (false, true) => Ok(RunMode::Dry),
            (false, false) => Ok(RunMode::Incremental),
        }
    }

    pub fn is_full(self) -> bool {
        self == RunMode::Full
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFlags {
    pub ignore_debug: bool,
    pub ignore_source: bool,
    pub parallel: bool,
    pub clean_old: bool,
    pub hashed: bool,
    pub repoclosure: bool,
    pub refresh_extra_files: bool,
    pub refresh_treeinfo: bool,
    pub gpg_check: bool,
    pub repo_gpg_check: bool,
}

impl Default for RunFlags {
    fn default() -> Self {
        Self {
            ignore_debug: false,
            ignore_source: false,
            parallel: true,
            clean_old: false,
            hashed: false,
            repoclosure: false,
            refresh_extra_files: false,
            refresh_treeinfo: false,
            gpg_check: true,
            repo_gpg_check: true,
        }
    }
}

/// How job failures affect the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailurePolicy {
    /// Keep going after a failed job. Always true for sync and closure.
    pub per_job_continue: bool,
    /// Refuse to move the latest link when any job failed.
    pub gate_publish_on_failure: bool,
    /// Report the run as failed when any job failed.
    pub fail_on_job_failure: bool,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            per_job_continue: true,
            gate_publish_on_failure: true,
            fail_on_job_failure: true,
        }
    }
}

/// One invocation. Built once at entry and only read afterwards.
#[derive(Debug, Clone)]
pub struct ComposeRun {
    pub mode: RunMode,
    pub repo_filter: Option<Vec<String>>,
    pub arch_filter: Option<Vec<String>>,
    pub flags: RunFlags,
    pub policy: FailurePolicy,
    pub job_timeout: Option<Duration>,
    /// `YYYYMMDD.HHMMSS` in UTC.
    pub datestamp: String,
    /// Unix seconds, fixed for the whole run.
    pub timestamp: i64,
}

impl ComposeRun {
    pub fn new(mode: RunMode) -> Self {
        Self::at(mode, OffsetDateTime::now_utc())
    }

    /// Run pinned to a specific instant.
    pub fn at(mode: RunMode, now: OffsetDateTime) -> Self {
        Self {
            mode,
            repo_filter: None,
            arch_filter: None,
            flags: RunFlags::default(),
            policy: FailurePolicy::default(),
            job_timeout: None,
            datestamp: datestamp(now),
            timestamp: now.unix_timestamp(),
        }
    }

    pub fn with_repo_filter(mut self, filter: Option<&str>) -> Self {
        self.repo_filter = parse_filter(filter);
        self
    }

    pub fn with_arch_filter(mut self, filter: Option<&str>) -> Self {
        self.arch_filter = parse_filter(filter);
        self
    }

    /// Check both filters against the profile.
    pub fn validate(&self, profile: &ComposeProfile) -> Result<()> {
        if let Some(arches) = &self.arch_filter {
            for arch in arches {
                check_valid_arch(profile, arch)?;
            }
        }
        if let Some(repos) = &self.repo_filter {
            for repo in repos {
                if !profile.has_repo(repo) {
                    return Err(ComposeError::InvalidRepo {
                        repo: repo.clone(),
                        known: profile.repos.join(", "),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }
}

fn parse_filter(raw: Option<&str>) -> Option<Vec<String>> {
    let entries: Vec<String> = raw?
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    (!entries.is_empty()).then_some(entries)
}

fn datestamp(now: OffsetDateTime) -> String {
    format!(
        "{:04}{:02}{:02}.{:02}{:02}{:02}",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_profile;

    #[test]
    fn test_modes_from_flags() {
        assert_eq!(RunMode::from_flags(true, false).unwrap(), RunMode::Full);
        assert_eq!(RunMode::from_flags(false, false).unwrap(), RunMode::Incremental);
        assert_eq!(RunMode::from_flags(false, true).unwrap(), RunMode::Dry);
        let err = RunMode::from_flags(true, true).unwrap_err();
        assert_eq!(crate::error::exit_code_for(&err), 7);
    }

    #[test]
    fn test_datestamp_format() {
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let run = ComposeRun::at(RunMode::Full, now);
        assert_eq!(run.datestamp, "20231114.221320");
        assert_eq!(run.timestamp, 1_700_000_000);
    }

    #[test]
    fn test_filters_split_and_validate() {
        let profile = sample_profile();
        let run = ComposeRun::new(RunMode::Incremental)
            .with_repo_filter(Some("BaseOS, AppStream"))
            .with_arch_filter(Some("x86_64,source"));
        assert_eq!(
            run.repo_filter.as_deref(),
            Some(&["BaseOS".to_string(), "AppStream".to_string()][..])
        );
        assert!(run.validate(&profile).is_ok());

        let bad_arch = ComposeRun::new(RunMode::Incremental).with_arch_filter(Some("ppc64le"));
        assert_eq!(
            crate::error::exit_code_for(&bad_arch.validate(&profile).unwrap_err()),
            2
        );

        let bad_repo = ComposeRun::new(RunMode::Incremental).with_repo_filter(Some("Extras"));
        assert_eq!(
            crate::error::exit_code_for(&bad_repo.validate(&profile).unwrap_err()),
            10
        );
    }

    #[test]
    fn test_empty_filter_means_all() {
        let run = ComposeRun::new(RunMode::Full).with_repo_filter(Some(" , "));
        assert!(run.repo_filter.is_none());
    }
}
