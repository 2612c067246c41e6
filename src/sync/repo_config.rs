//! Package-manager source configuration for a sync run.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::ComposeProfile;
use crate::error::ComposeError;

const BASEARCH: &str = "$basearch";

/// Renders the `.repo` file every sync and closure job reads.
#[derive(Debug, Clone)]
pub struct RepoConfigGenerator<'a> {
    profile: &'a ComposeProfile,
    base_url: &'a str,
    hashed: bool,
    gpg_check: bool,
    repo_gpg_check: bool,
}

impl<'a> RepoConfigGenerator<'a> {
    pub fn new(profile: &'a ComposeProfile, base_url: &'a str) -> Self {
        Self {
            profile,
            base_url,
            hashed: false,
            gpg_check: true,
            repo_gpg_check: true,
        }
    }

    /// Serve content from the `hashed-` path segment.
    pub fn hashed(mut self, hashed: bool) -> Self {
        self.hashed = hashed;
        self
    }

    pub fn gpg_check(mut self, enabled: bool) -> Self {
        self.gpg_check = enabled;
        self
    }

    pub fn repo_gpg_check(mut self, enabled: bool) -> Self {
        self.repo_gpg_check = enabled;
        self
    }

    /// Config file path for this profile under `dest_dir`.
    pub fn config_path(&self, dest_dir: &Path) -> PathBuf {
        dest_dir.join(format!(
            "{}-{}-config.repo",
            self.profile.shortname, self.profile.major
        ))
    }

    /// Base URL of a repo's binary packages, still carrying `$basearch`.
    pub fn repo_url(&self, repo: &str) -> String {
        let prefix = if self.hashed { "hashed-" } else { "" };
        format!(
            "{}/{}/repo/{}{}/{}",
            self.base_url.trim_end_matches('/'),
            self.profile.project_id,
            prefix,
            repo,
            BASEARCH
        )
    }

    /// Base URL of a repo's source packages.
    pub fn source_url(&self, repo: &str) -> String {
        let prefix = if self.hashed { "hashed-" } else { "" };
        format!(
            "{}/{}/repo/{}{}/src",
            self.base_url.trim_end_matches('/'),
            self.profile.project_id,
            prefix,
            repo
        )
    }

    pub fn render(&self) -> Result<String> {
        if self.base_url.starts_with('/') {
            return Err(ComposeError::UnsupportedSource {
                url: self.base_url.to_string(),
            }
            .into());
        }

        let gpgkey = self.profile.gpg_key_url();
        let gpgcheck = u8::from(self.gpg_check);
        let repo_gpgcheck = u8::from(self.repo_gpg_check);
        let mut out = String::new();

        for repo in &self.profile.repos {
            let sections = [
                (repo.clone(), self.repo_url(repo)),
                (format!("{}-debug", repo), format!("{}-debug", self.repo_url(repo))),
                (format!("{}-source", repo), self.source_url(repo)),
            ];
            for (id, baseurl) in sections {
                let _ = writeln!(out, "[{}]", id);
                let _ = writeln!(out, "name={}", id);
                let _ = writeln!(out, "baseurl={}", baseurl);
                let _ = writeln!(out, "enabled=1");
                let _ = writeln!(out, "gpgcheck={}", gpgcheck);
                let _ = writeln!(out, "repo_gpgcheck={}", repo_gpgcheck);
                let _ = writeln!(out, "gpgkey={}", gpgkey);
                out.push('\n');
            }
        }
        Ok(out)
    }

    /// Write the config into `dest_dir`, replacing any previous file.
    pub fn generate(&self, dest_dir: &Path) -> Result<PathBuf> {
        let rendered = self.render()?;
        fs::create_dir_all(dest_dir)
            .with_context(|| format!("Failed to create {}", dest_dir.display()))?;
        let path = self.config_path(dest_dir);
        info!(path = %path.display(), "generating repo configuration");
        fs::write(&path, rendered)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}

/// Path of the per-arch copy of `config`.
pub fn arch_config_path(config: &Path, arch: &str) -> PathBuf {
    let mut name = config.as_os_str().to_os_string();
    name.push(format!(".{}", arch));
    PathBuf::from(name)
}

/// Write `{config}.{arch}` with `$basearch` resolved, one per arch, before any
/// worker starts. Workers only ever read their own copy.
pub fn materialize_arch_configs<'s>(
    config: &Path,
    arches: impl IntoIterator<Item = &'s str>,
) -> Result<BTreeMap<String, PathBuf>> {
    let template = fs::read_to_string(config)
        .with_context(|| format!("Failed to read {}", config.display()))?;
    let mut out = BTreeMap::new();
    for arch in arches {
        if out.contains_key(arch) {
            continue;
        }
        let path = arch_config_path(config, arch);
        fs::write(&path, template.replace(BASEARCH, arch))
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!(arch, path = %path.display(), "materialized arch config");
        out.insert(arch.to_string(), path);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_profile;
    use tempfile::TempDir;

    #[test]
    fn test_render_sections_and_urls() {
        let profile = sample_profile();
        let rendered = RepoConfigGenerator::new(&profile, "https://repo.example.org/v1/")
            .render()
            .unwrap();
        assert!(rendered.contains("[BaseOS]\n"));
        assert!(rendered.contains("[BaseOS-debug]\n"));
        assert!(rendered.contains("[BaseOS-source]\n"));
        assert!(rendered
            .contains("baseurl=https://repo.example.org/v1/proj-1234/repo/BaseOS/$basearch\n"));
        assert!(rendered.contains(
            "baseurl=https://repo.example.org/v1/proj-1234/repo/BaseOS/$basearch-debug\n"
        ));
        assert!(rendered.contains("baseurl=https://repo.example.org/v1/proj-1234/repo/BaseOS/src\n"));
        assert!(rendered
            .contains("gpgkey=https://git.example.org/raw/extras/SOURCES/RPM-GPG-KEY-Test-9\n"));
        assert!(rendered.contains("gpgcheck=1\n"));
    }

    #[test]
    fn test_hashed_and_gpg_toggles() {
        let profile = sample_profile();
        let rendered = RepoConfigGenerator::new(&profile, "https://repo.example.org")
            .hashed(true)
            .gpg_check(false)
            .repo_gpg_check(false)
            .render()
            .unwrap();
        assert!(rendered.contains("/repo/hashed-AppStream/$basearch"));
        assert!(rendered.contains("gpgcheck=0\n"));
        assert!(rendered.contains("repo_gpgcheck=0\n"));
        assert!(!rendered.contains("gpgcheck=1"));
    }

    #[test]
    fn test_local_base_url_is_refused() {
        let profile = sample_profile();
        let err = RepoConfigGenerator::new(&profile, "/srv/mirror")
            .generate(Path::new("/nonexistent"))
            .unwrap_err();
        assert_eq!(crate::error::exit_code_for(&err), 5);
    }

    #[test]
    fn test_generate_overwrites_and_materializes() {
        let tmp = TempDir::new().unwrap();
        let profile = sample_profile();
        let generator = RepoConfigGenerator::new(&profile, "https://repo.example.org");
        let path = generator.config_path(tmp.path());
        fs::write(&path, "stale").unwrap();

        let written = generator.generate(tmp.path()).unwrap();
        assert_eq!(written, tmp.path().join("Test-9-config.repo"));
        assert!(!fs::read_to_string(&written).unwrap().contains("stale"));

        let copies = materialize_arch_configs(&written, ["x86_64", "i686", "x86_64"]).unwrap();
        assert_eq!(copies.len(), 2);
        let x86 = fs::read_to_string(&copies["x86_64"]).unwrap();
        assert!(x86.contains("/repo/BaseOS/x86_64\n"));
        assert!(!x86.contains("$basearch"));
        assert_eq!(copies["i686"], tmp.path().join("Test-9-config.repo.i686"));
    }
}
