//! Typed reposync jobs.

use std::path::{Path, PathBuf};

use super::plan::{SyncJobSpec, VariantKind};
use super::repo_config::arch_config_path;
use crate::config::ComposeProfile;
use crate::worker::{JobStep, Mount, WorkerJob};

pub const DNF: &str = "/usr/bin/dnf";
pub const RPM: &str = "/usr/bin/rpm";

/// The three bind mounts every worker gets: the compose root, the directory
/// holding the generated config, and the entries directory.
pub fn worker_mounts(compose_root: &Path, config_dir: &Path, entries_dir: &Path) -> Vec<Mount> {
    let mut mounts: Vec<Mount> = Vec::new();
    for path in [compose_root, config_dir, entries_dir] {
        if !mounts.iter().any(|m| m.host == path) {
            mounts.push(Mount::same_path(path));
        }
    }
    mounts
}

/// Installs the plugin that provides `reposync` and `repoclosure`.
pub fn dnf_plugins_step() -> JobStep {
    JobStep::new(DNF, ["install", "dnf-plugins-core", "-y"])
}

/// Builds the worker job for each planned sync.
#[derive(Debug, Clone)]
pub struct SyncCommandBuilder<'a> {
    profile: &'a ComposeProfile,
    config: PathBuf,
    sync_root: PathBuf,
    log_root: PathBuf,
    mounts: Vec<Mount>,
    clean_old: bool,
    gpg_check: bool,
}

impl<'a> SyncCommandBuilder<'a> {
    pub fn new(
        profile: &'a ComposeProfile,
        config: &Path,
        sync_root: &Path,
        log_root: &Path,
        mounts: Vec<Mount>,
    ) -> Self {
        Self {
            profile,
            config: config.to_path_buf(),
            sync_root: sync_root.to_path_buf(),
            log_root: log_root.to_path_buf(),
            mounts,
            clean_old: false,
            gpg_check: true,
        }
    }

    /// Delete local packages that vanished upstream.
    pub fn clean_old(mut self, enabled: bool) -> Self {
        self.clean_old = enabled;
        self
    }

    pub fn gpg_check(mut self, enabled: bool) -> Self {
        self.gpg_check = enabled;
        self
    }

    /// The `dnf reposync` invocation for one job.
    pub fn reposync_step(&self, spec: &SyncJobSpec) -> JobStep {
        let config = match spec.kind {
            VariantKind::Source => self.config.clone(),
            _ => arch_config_path(&self.config, &spec.arch),
        };
        let mut args = vec![
            "reposync".to_string(),
            "-c".to_string(),
            config.display().to_string(),
            "--download-metadata".to_string(),
            format!("--repoid={}", spec.repoid()),
            "-p".to_string(),
            spec.target_path(&self.sync_root).display().to_string(),
        ];
        if spec.kind != VariantKind::Source {
            args.push("--forcearch".to_string());
            args.push(spec.arch.clone());
        }
        args.push("--norepopath".to_string());
        args.push("--remote-time".to_string());
        if self.gpg_check {
            args.push("--gpgcheck".to_string());
        }
        args.push("--assumeyes".to_string());
        if self.clean_old {
            args.push("--delete".to_string());
        }
        JobStep::new(DNF, args)
    }

    pub fn job(&self, spec: &SyncJobSpec) -> WorkerJob {
        WorkerJob {
            name: spec.name(),
            image: self.profile.container.clone(),
            steps: vec![
                JobStep::new(RPM, ["--import".to_string(), self.profile.gpg_key_url()]),
                dnf_plugins_step(),
                self.reposync_step(spec),
            ],
            env: Vec::new(),
            mounts: self.mounts.clone(),
            log_path: spec.log_path(&self.log_root),
            entrypoint: None,
        }
    }

    pub fn jobs<'s>(&self, specs: impl IntoIterator<Item = &'s SyncJobSpec>) -> Vec<WorkerJob> {
        specs.into_iter().map(|spec| self.job(spec)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_profile;

    fn spec(kind: VariantKind, arch: &str) -> SyncJobSpec {
        SyncJobSpec {
            repo: "BaseOS".to_string(),
            repo_dir: "BaseOS".to_string(),
            arch: arch.to_string(),
            kind,
        }
    }

    #[test]
    fn test_os_job_command() {
        let profile = sample_profile();
        let builder = SyncCommandBuilder::new(
            &profile,
            Path::new("/var/tmp/Test-9-config.repo"),
            Path::new("/c/compose"),
            Path::new("/c/work/logs/d"),
            Vec::new(),
        );
        let job = builder.job(&spec(VariantKind::Os, "x86_64"));
        assert_eq!(job.name, "BaseOS-x86_64");
        assert_eq!(job.image, profile.container);
        assert_eq!(job.log_path, Path::new("/c/work/logs/d/BaseOS-x86_64.log"));
        assert_eq!(job.steps[0].program, RPM);
        assert_eq!(
            job.steps[2].args,
            [
                "reposync",
                "-c",
                "/var/tmp/Test-9-config.repo.x86_64",
                "--download-metadata",
                "--repoid=BaseOS",
                "-p",
                "/c/compose/BaseOS/x86_64/os",
                "--forcearch",
                "x86_64",
                "--norepopath",
                "--remote-time",
                "--gpgcheck",
                "--assumeyes",
            ]
        );
    }

    #[test]
    fn test_source_and_toggles() {
        let profile = sample_profile();
        let builder = SyncCommandBuilder::new(
            &profile,
            Path::new("/var/tmp/Test-9-config.repo"),
            Path::new("/c/compose"),
            Path::new("/logs"),
            Vec::new(),
        )
        .clean_old(true)
        .gpg_check(false);
        let step = builder.reposync_step(&spec(VariantKind::Source, "source"));
        assert!(step.args.contains(&"/var/tmp/Test-9-config.repo".to_string()));
        assert!(step.args.contains(&"--repoid=BaseOS-source".to_string()));
        assert!(step.args.contains(&"/c/compose/BaseOS/source/tree".to_string()));
        assert!(!step.args.contains(&"--forcearch".to_string()));
        assert!(!step.args.contains(&"--gpgcheck".to_string()));
        assert_eq!(step.args.last().map(String::as_str), Some("--delete"));
    }

    #[test]
    fn test_worker_mounts_dedup() {
        let mounts = worker_mounts(Path::new("/mnt/compose"), Path::new("/var/tmp"), Path::new("/var/tmp"));
        assert_eq!(mounts.len(), 2);
    }
}
