//! Static compose configuration.
//!
//! The TOML file describes the site (where composes live, where packages come
//! from) and one profile per release. [`ComposeConfig::profile`] resolves a
//! release into an immutable [`ComposeProfile`], validated once, which every
//! component receives by reference.

mod run;

pub use run::{ComposeRun, FailurePolicy, RunFlags, RunMode};

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::checksum::ChecksumAlgo;
use crate::error::ComposeError;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/compose-builder/compose.toml";

const DEFAULT_SCRATCH_DIR: &str = "/var/tmp";
const DEFAULT_GPG_KEY: &str = "stable";

/// Whole configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComposeConfig {
    pub site: SiteConfig,
    #[serde(default)]
    profiles: BTreeMap<String, ProfileToml>,
}

/// Site-wide settings shared by every profile.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SiteConfig {
    pub compose_root: PathBuf,
    pub repo_base_url: String,
    pub container: String,
    pub distname: String,
    pub shortname: String,
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
    #[serde(default)]
    pub container_runtime: Option<String>,
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from(DEFAULT_SCRATCH_DIR)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProfileToml {
    major: String,
    revision: String,
    #[serde(default)]
    rclvl: Option<String>,
    profile: String,
    fullname: String,
    allowed_arches: Vec<String>,
    project_id: String,
    all_repos: Vec<String>,
    #[serde(default)]
    renames: BTreeMap<String, String>,
    #[serde(default)]
    provide_multilib: bool,
    #[serde(default = "default_checksum")]
    checksum: String,
    #[serde(default)]
    gpg_key: Option<String>,
    #[serde(default)]
    container: Option<String>,
    extra_files: ExtraFiles,
    #[serde(default)]
    repoclosure: Option<ClosureMap>,
    #[serde(default)]
    iso_map: ImageMap,
}

fn default_checksum() -> String {
    "sha256".to_string()
}

/// Where the extra files (GPG keys, licenses) come from.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ExtraFiles {
    pub git_repo: String,
    pub git_raw_path: String,
    pub branch: String,
    #[serde(default)]
    pub gpg: BTreeMap<String, String>,
    #[serde(default)]
    pub list: Vec<String>,
}

/// Dependency-closure configuration: which repos get checked, what each must
/// close against, and the per-arch flags handed to the closure tool.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClosureMap {
    #[serde(default)]
    pub arches: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub repos: BTreeMap<String, Vec<String>>,
}

/// Repos that back bootable media.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ImageMap {
    #[serde(default)]
    pub images: BTreeMap<String, ImageVariant>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ImageVariant {
    /// Disc images carry every repo inside one tree.
    #[serde(default)]
    pub disc: bool,
    /// The primary variant of the image.
    pub variant: String,
    /// Every repo exposed as a treeinfo variant.
    #[serde(default)]
    pub repos: Vec<String>,
}

/// Resolved, validated profile for one release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeProfile {
    pub release: String,
    pub major: String,
    pub revision: String,
    pub rclvl: Option<String>,
    pub profile: String,
    pub fullname: String,
    pub distname: String,
    pub shortname: String,
    pub allowed_arches: Vec<String>,
    pub project_id: String,
    pub repos: Vec<String>,
    pub renames: BTreeMap<String, String>,
    pub multilib: bool,
    pub checksum: ChecksumAlgo,
    pub gpg_key: String,
    pub container: String,
    pub extra_files: ExtraFiles,
    pub closure: Option<ClosureMap>,
    pub iso_map: ImageMap,
}

impl ComposeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading compose config '{}'", path.display()))?;
        Self::from_toml(&raw)
            .with_context(|| format!("parsing compose config '{}'", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Names of all configured releases.
    pub fn releases(&self) -> Vec<&str> {
        self.profiles.keys().map(String::as_str).collect()
    }

    /// Resolve and validate one release.
    pub fn profile(&self, release: &str) -> Result<ComposeProfile> {
        let raw = self
            .profiles
            .get(release)
            .ok_or_else(|| {
                invalid_profile(
                    release,
                    format!("profile does not exist (configured: {})", self.releases().join(", ")),
                )
            })?;
        resolve_profile(&self.site, release, raw)
    }
}

fn invalid_profile(release: &str, reason: impl Into<String>) -> ComposeError {
    ComposeError::InvalidProfile {
        release: release.to_string(),
        reason: reason.into(),
    }
}

fn resolve_profile(site: &SiteConfig, release: &str, raw: &ProfileToml) -> Result<ComposeProfile> {
    // Both paths end up in symlink targets and container bind mounts.
    for (key, path) in [("compose_root", &site.compose_root), ("scratch_dir", &site.scratch_dir)] {
        if !path.is_absolute() {
            return Err(invalid_profile(
                release,
                format!("site.{} must be an absolute path, got '{}'", key, path.display()),
            )
            .into());
        }
    }
    if raw.major.trim().is_empty() {
        return Err(invalid_profile(release, "major version is not defined").into());
    }
    if raw.allowed_arches.is_empty() {
        return Err(invalid_profile(release, "allowed_arches is empty").into());
    }
    if raw.all_repos.is_empty() {
        return Err(invalid_profile(release, "all_repos is empty").into());
    }
    for key in raw.renames.keys() {
        if !raw.all_repos.contains(key) {
            return Err(invalid_profile(release, format!("rename for unknown repo '{key}'")).into());
        }
    }
    for key in raw.iso_map.images.keys() {
        if !raw.all_repos.contains(key) {
            return Err(
                invalid_profile(release, format!("image map entry for unknown repo '{key}'"))
                    .into(),
            );
        }
    }

    let gpg_key = raw
        .gpg_key
        .clone()
        .unwrap_or_else(|| DEFAULT_GPG_KEY.to_string());
    if !raw.extra_files.gpg.contains_key(&gpg_key) {
        return Err(invalid_profile(
            release,
            format!("gpg key '{gpg_key}' is not listed in extra_files.gpg"),
        )
        .into());
    }

    let checksum = ChecksumAlgo::parse(&raw.checksum)?;
    let container = raw
        .container
        .clone()
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| site.container.clone());

    Ok(ComposeProfile {
        release: release.to_string(),
        major: raw.major.clone(),
        revision: raw.revision.clone(),
        rclvl: raw.rclvl.clone(),
        profile: raw.profile.clone(),
        fullname: raw.fullname.clone(),
        distname: site.distname.clone(),
        shortname: site.shortname.clone(),
        allowed_arches: raw.allowed_arches.clone(),
        project_id: raw.project_id.clone(),
        repos: raw.all_repos.clone(),
        renames: raw.renames.clone(),
        multilib: raw.provide_multilib,
        checksum,
        gpg_key,
        container,
        extra_files: raw.extra_files.clone(),
        closure: raw.repoclosure.clone(),
        iso_map: raw.iso_map.clone(),
    })
}

impl ComposeProfile {
    /// On-disk directory name for a logical repo.
    pub fn repo_dir<'a>(&'a self, repo: &'a str) -> &'a str {
        self.renames.get(repo).map(String::as_str).unwrap_or(repo)
    }

    /// `{shortname}-{revision}-{datestamp}`.
    pub fn compose_id(&self, datestamp: &str) -> String {
        format!("{}-{}-{}", self.shortname, self.revision, datestamp)
    }

    /// Revision with the release-candidate level, e.g. `9.1-RC1`.
    pub fn full_revision(&self) -> String {
        match &self.rclvl {
            Some(level) if !level.is_empty() => format!("{}-{}", self.revision, level),
            _ => self.revision.clone(),
        }
    }

    /// URL of the GPG key the sync jobs import.
    pub fn gpg_key_url(&self) -> String {
        let key = self
            .extra_files
            .gpg
            .get(&self.gpg_key)
            .map(String::as_str)
            .unwrap_or_default();
        format!("{}{}", self.extra_files.git_raw_path, key)
    }

    pub fn has_repo(&self, repo: &str) -> bool {
        self.repos.iter().any(|r| r == repo)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE_TOML: &str = r#"
[site]
compose_root = "/mnt/compose"
repo_base_url = "https://yumrepofs.example.org/v1/projects"
container = "quay.io/centos/centos:stream9"
distname = "Test Linux"
shortname = "Test"

[profiles."9"]
major = "9"
revision = "9.1"
rclvl = "RC1"
profile = "9"
fullname = "Test Linux 9.1"
allowed_arches = ["x86_64", "aarch64"]
project_id = "proj-1234"
all_repos = ["BaseOS", "AppStream", "all"]
provide_multilib = true
checksum = "sha256"

[profiles."9".renames]
all = "devel"

[profiles."9".extra_files]
git_repo = "https://git.example.org/extras.git"
git_raw_path = "https://git.example.org/raw/extras/"
branch = "r9"
list = ["LICENSE"]

[profiles."9".extra_files.gpg]
stable = "SOURCES/RPM-GPG-KEY-Test-9"

[profiles."9".repoclosure.arches]
x86_64 = ["--forcearch=x86_64", "--arch=x86_64", "--arch=noarch"]

[profiles."9".repoclosure.repos]
BaseOS = []
AppStream = ["BaseOS"]

[profiles."9".iso_map.images.BaseOS]
disc = false
variant = "BaseOS"
repos = ["BaseOS", "AppStream"]
"#;

    pub(crate) fn sample_config() -> ComposeConfig {
        ComposeConfig::from_toml(SAMPLE_TOML).unwrap()
    }

    pub(crate) fn sample_profile() -> ComposeProfile {
        sample_config().profile("9").unwrap()
    }

    #[test]
    fn test_profile_resolves_site_values() {
        let profile = sample_profile();
        assert_eq!(profile.shortname, "Test");
        assert_eq!(profile.container, "quay.io/centos/centos:stream9");
        assert_eq!(profile.repo_dir("all"), "devel");
        assert_eq!(profile.repo_dir("BaseOS"), "BaseOS");
        assert_eq!(profile.full_revision(), "9.1-RC1");
        assert_eq!(
            profile.gpg_key_url(),
            "https://git.example.org/raw/extras/SOURCES/RPM-GPG-KEY-Test-9"
        );
        assert_eq!(profile.compose_id("20240101.120000"), "Test-9.1-20240101.120000");
    }

    #[test]
    fn test_unknown_release_is_invalid_profile() {
        let err = sample_config().profile("42").unwrap_err();
        assert_eq!(crate::error::exit_code_for(&err), 3);
        assert!(err.to_string().contains("configured: 9"));
    }

    #[test]
    fn test_relative_site_paths_are_rejected() {
        let raw = SAMPLE_TOML.replace("compose_root = \"/mnt/compose\"", "compose_root = \"c\"");
        let err = ComposeConfig::from_toml(&raw)
            .unwrap()
            .profile("9")
            .unwrap_err();
        assert_eq!(crate::error::exit_code_for(&err), 3);
        assert!(err.to_string().contains("site.compose_root must be an absolute path"));

        let raw = SAMPLE_TOML.replace("[site]", "[site]\nscratch_dir = \"tmp\"");
        let err = ComposeConfig::from_toml(&raw)
            .unwrap()
            .profile("9")
            .unwrap_err();
        assert!(err.to_string().contains("site.scratch_dir"));
    }

    #[test]
    fn test_missing_gpg_key_is_rejected() {
        let raw = SAMPLE_TOML.replace("profile = \"9\"", "profile = \"9\"\ngpg_key = \"testing\"");
        let err = ComposeConfig::from_toml(&raw)
            .unwrap()
            .profile("9")
            .unwrap_err();
        assert!(err.to_string().contains("testing"));
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let raw = SAMPLE_TOML.replace("[site]", "[site]\nbogus = 1");
        assert!(ComposeConfig::from_toml(&raw).is_err());
    }

    #[test]
    fn test_bad_checksum_is_rejected() {
        let raw = SAMPLE_TOML.replace("checksum = \"sha256\"", "checksum = \"md5\"");
        let err = ComposeConfig::from_toml(&raw)
            .unwrap()
            .profile("9")
            .unwrap_err();
        assert_eq!(crate::error::exit_code_for(&err), 13);
    }
}
