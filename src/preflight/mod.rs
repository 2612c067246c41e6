//! Preflight checks run before any compose work starts.
//!
//! Missing host tools and unsupported architectures are reported up front so a
//! compose never fails half-way through because `podman` or `rsync` is absent.
//!
//! # Example
//!
//! ```rust,ignore
//! use compose_builder::preflight::{check_required_tools, command_exists};
//!
//! if !command_exists("podman") {
//!     println!("podman not installed");
//! }
//!
//! check_required_tools(&[("git", "git"), ("podman", "podman")])?;
//! ```

use anyhow::Result;
use std::path::PathBuf;

use crate::config::ComposeProfile;
use crate::error::ComposeError;

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Tools every sync run needs on the host, as (command, package).
pub const SYNC_TOOLS: &[(&str, &str)] = &[("git", "git")];

/// Check that specific tools are available.
///
/// Reports the first missing tool as [`ComposeError::MissingTool`], with the
/// full list of missing tools in the hint.
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<(&str, &str)> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .copied()
        .collect();

    let Some((first, _)) = missing.first() else {
        return Ok(());
    };

    let hint = missing
        .iter()
        .map(|(t, p)| format!("{} (install: {})", t, p))
        .collect::<Vec<_>>()
        .join(", ");
    Err(ComposeError::MissingTool {
        tool: first.to_string(),
        hint,
    }
    .into())
}

/// Locate the container runtime. `preferred` is tried first, then podman,
/// then docker.
pub fn container_runtime_path(preferred: Option<&str>) -> Result<PathBuf> {
    let candidates = preferred
        .into_iter()
        .chain(["podman", "docker"])
        .collect::<Vec<_>>();

    for candidate in &candidates {
        if let Ok(path) = which::which(candidate) {
            return Ok(path);
        }
    }

    Err(ComposeError::MissingTool {
        tool: candidates[0].to_string(),
        hint: "install podman (preferred) or docker".to_string(),
    }
    .into())
}

/// Validate an architecture against the profile. `source` is always allowed
/// since it selects the arch-independent source tree.
pub fn check_valid_arch(profile: &ComposeProfile, arch: &str) -> Result<()> {
    if arch == "source" || profile.allowed_arches.iter().any(|a| a == arch) {
        return Ok(());
    }
    Err(ComposeError::InvalidArch {
        arch: arch.to_string(),
        allowed: profile.allowed_arches.join(", "),
    }
    .into())
}

/// Validate that the host itself can run composes for this profile.
pub fn check_host_arch(profile: &ComposeProfile) -> Result<()> {
    check_valid_arch(profile, std::env::consts::ARCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_profile;

    #[test]
    fn test_command_exists() {
        assert!(command_exists("sh"));
        assert!(!command_exists("definitely_not_a_real_command_12345"));
    }

    #[test]
    fn test_check_required_tools_success() {
        let tools = &[("sh", "coreutils"), ("cat", "coreutils")];
        assert!(check_required_tools(tools).is_ok());
    }

    #[test]
    fn test_check_required_tools_failure() {
        let tools = &[("sh", "coreutils"), ("nonexistent_command_xyz", "fake-package")];
        let err = check_required_tools(tools).unwrap_err();
        assert!(err.to_string().contains("nonexistent_command_xyz"));
        assert_eq!(crate::error::exit_code_for(&err), 127);
    }

    #[test]
    fn test_check_valid_arch() {
        let profile = sample_profile();
        assert!(check_valid_arch(&profile, "x86_64").is_ok());
        assert!(check_valid_arch(&profile, "source").is_ok());

        let err = check_valid_arch(&profile, "sparc64").unwrap_err();
        assert_eq!(crate::error::exit_code_for(&err), 2);
    }
}
