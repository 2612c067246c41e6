//! Compose-level metadata.
//!
//! `COMPOSE_ID`, `metadata.json`, `metadata.yaml`, `composeinfo.json` and a
//! short `README` under `compose/metadata/`. All of them are rewritten on
//! every deploy; they describe the invocation that last touched the compose.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::config::ComposeProfile;
use crate::sync::plan::wants_multilib;

const TOOL_NAME: &str = env!("CARGO_PKG_NAME");
const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeMetadata {
    pub header: MetadataHeader,
    pub payload: MetadataPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataHeader {
    pub name: String,
    pub version: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataPayload {
    pub compose: ComposeRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeRecord {
    pub date: String,
    pub id: String,
    pub fullname: String,
    pub distname: String,
    pub shortname: String,
    pub release: String,
    pub timestamp: i64,
}

impl ComposeMetadata {
    pub fn new(profile: &ComposeProfile, timestamp: i64, datestamp: &str, compose_id: &str) -> Self {
        Self {
            header: MetadataHeader {
                name: TOOL_NAME.to_string(),
                version: TOOL_VERSION.to_string(),
                kind: "toolkit".to_string(),
            },
            payload: MetadataPayload {
                compose: ComposeRecord {
                    date: datestamp.to_string(),
                    id: compose_id.to_string(),
                    fullname: profile.fullname.clone(),
                    distname: profile.distname.clone(),
                    shortname: profile.shortname.clone(),
                    release: profile.revision.clone(),
                    timestamp,
                },
            },
        }
    }
}

/// productmd-style composeinfo, one variant per repo.
#[derive(Debug, Clone, Serialize)]
struct ComposeInfo {
    header: ProductmdHeader,
    payload: ComposeInfoPayload,
}

#[derive(Debug, Clone, Serialize)]
struct ProductmdHeader {
    #[serde(rename = "type")]
    kind: &'static str,
    version: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct ComposeInfoPayload {
    compose: ComposeInfoCompose,
    release: ComposeInfoRelease,
    variants: BTreeMap<String, ComposeInfoVariant>,
}

#[derive(Debug, Clone, Serialize)]
struct ComposeInfoCompose {
    date: String,
    id: String,
    respin: u32,
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct ComposeInfoRelease {
    name: String,
    short: String,
    version: String,
    is_layered: bool,
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct ComposeInfoVariant {
    id: String,
    uid: String,
    name: String,
    #[serde(rename = "type")]
    kind: &'static str,
    arches: Vec<String>,
    paths: BTreeMap<&'static str, BTreeMap<String, String>>,
}

fn compose_info(profile: &ComposeProfile, datestamp: &str, compose_id: &str) -> ComposeInfo {
    let mut variants = BTreeMap::new();
    for repo in &profile.repos {
        let dir = profile.repo_dir(repo);
        let mut arches = profile.allowed_arches.clone();
        if wants_multilib(profile, repo, &profile.allowed_arches) {
            arches.push("i686".to_string());
        }

        let mut paths: BTreeMap<&'static str, BTreeMap<String, String>> = BTreeMap::new();
        for arch in &arches {
            paths
                .entry("os_tree")
                .or_default()
                .insert(arch.clone(), format!("{}/{}/os", dir, arch));
            paths
                .entry("packages")
                .or_default()
                .insert(arch.clone(), format!("{}/{}/os/Packages", dir, arch));
            paths
                .entry("debug_tree")
                .or_default()
                .insert(arch.clone(), format!("{}/{}/debug/tree", dir, arch));
        }
        paths
            .entry("source_tree")
            .or_default()
            .insert("src".to_string(), format!("{}/source/tree", dir));

        variants.insert(
            dir.to_string(),
            ComposeInfoVariant {
                id: dir.to_string(),
                uid: dir.to_string(),
                name: dir.to_string(),
                kind: "variant",
                arches,
                paths,
            },
        );
    }

    ComposeInfo {
        header: ProductmdHeader {
            kind: "productmd.composeinfo",
            version: "1.2",
        },
        payload: ComposeInfoPayload {
            compose: ComposeInfoCompose {
                date: datestamp.split('.').next().unwrap_or(datestamp).to_string(),
                id: compose_id.to_string(),
                respin: 0,
                kind: "updates",
            },
            release: ComposeInfoRelease {
                name: profile.distname.clone(),
                short: profile.shortname.clone(),
                version: profile.revision.clone(),
                is_layered: false,
                kind: "ga",
            },
            variants,
        },
    }
}

fn readme(profile: &ComposeProfile) -> String {
    format!(
        "This set of repositories (the \"compose\") is for {fullname}\n\
         (revision {revision}).\n\
         \n\
         It was generated by {tool} {version}. The files in this directory\n\
         describe the compose: COMPOSE_ID names it, metadata.json and\n\
         metadata.yaml record when and from which release it was produced,\n\
         and composeinfo.json lists its variants.\n",
        fullname = profile.fullname,
        revision = profile.full_revision(),
        tool = TOOL_NAME,
        version = TOOL_VERSION,
    )
}

/// Write `COMPOSE_ID` (no trailing newline).
pub fn write_compose_id(metadata_dir: &Path, compose_id: &str) -> Result<()> {
    fs::create_dir_all(metadata_dir)
        .with_context(|| format!("Failed to create {}", metadata_dir.display()))?;
    let path = metadata_dir.join("COMPOSE_ID");
    fs::write(&path, compose_id).with_context(|| format!("Failed to write {}", path.display()))
}

/// Write the aggregate compose records into `metadata_dir`: `COMPOSE_ID`,
/// `metadata.json`, `metadata.yaml`, `composeinfo.json` and `README`.
pub fn write_compose_metadata(
    metadata_dir: &Path,
    profile: &ComposeProfile,
    timestamp: i64,
    datestamp: &str,
    compose_id: &str,
) -> Result<ComposeMetadata> {
    info!(path = %metadata_dir.display(), id = compose_id, "deploying compose metadata");
    write_compose_id(metadata_dir, compose_id)?;

    let metadata = ComposeMetadata::new(profile, timestamp, datestamp, compose_id);

    let json = serde_json::to_string_pretty(&metadata).context("serializing metadata.json")?;
    let path = metadata_dir.join("metadata.json");
    fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;

    let yaml = serde_yaml::to_string(&metadata).context("serializing metadata.yaml")?;
    let path = metadata_dir.join("metadata.yaml");
    fs::write(&path, yaml).with_context(|| format!("Failed to write {}", path.display()))?;

    let info = serde_json::to_string_pretty(&compose_info(profile, datestamp, compose_id))
        .context("serializing composeinfo.json")?;
    let path = metadata_dir.join("composeinfo.json");
    fs::write(&path, info).with_context(|| format!("Failed to write {}", path.display()))?;

    let path = metadata_dir.join("README");
    fs::write(&path, readme(profile))
        .with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_profile;
    use tempfile::TempDir;

    #[test]
    fn test_metadata_files_round_trip() {
        let tmp = TempDir::new().unwrap();
        let profile = sample_profile();
        let id = profile.compose_id("20240101.120000");
        let written =
            write_compose_metadata(tmp.path(), &profile, 1704110400, "20240101.120000", &id)
                .unwrap();

        assert_eq!(
            fs::read_to_string(tmp.path().join("COMPOSE_ID")).unwrap(),
            "Test-9.1-20240101.120000"
        );

        let json: ComposeMetadata =
            serde_json::from_str(&fs::read_to_string(tmp.path().join("metadata.json")).unwrap())
                .unwrap();
        let yaml: ComposeMetadata =
            serde_yaml::from_str(&fs::read_to_string(tmp.path().join("metadata.yaml")).unwrap())
                .unwrap();
        assert_eq!(json, written);
        assert_eq!(yaml, written);
        assert_eq!(json.header.kind, "toolkit");
        assert_eq!(json.payload.compose.release, "9.1");
        assert_eq!(json.payload.compose.timestamp, 1704110400);

        let info: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(tmp.path().join("composeinfo.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(info["header"]["type"], "productmd.composeinfo");
        assert_eq!(info["payload"]["compose"]["date"], "20240101");
        assert_eq!(
            info["payload"]["variants"]["devel"]["paths"]["os_tree"]["i686"],
            "devel/i686/os"
        );

        let readme = fs::read_to_string(tmp.path().join("README")).unwrap();
        assert!(readme.contains("Test Linux 9.1"));
        assert!(readme.contains("(revision 9.1-RC1)"));
    }
}
