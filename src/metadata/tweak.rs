//! Installer treeinfo rewrite for image variants.
//!
//! Trees listed in the image map get their release fields, image checksums,
//! media numbering and variant list brought in line with what the installer
//! images built from them expect. A tree that cannot be rewritten is logged
//! and skipped; the pass always visits every tree.

use anyhow::{bail, Result};
use std::path::Path;
use tracing::{error, info, warn};

use super::treeinfo::{Media, TreeVariant, TreeinfoRecord};
use super::{MetadataWriter, DISCINFO, MEDIA_REPO, TREEINFO};
use crate::checksum::{treeinfo_checksum, ChecksumAlgo};
use crate::config::{ComposeProfile, ImageVariant};
use crate::sync::VariantKind;

/// Rewrites treeinfo of repos that back bootable media so installers find
/// images, checksums and sibling repos.
pub struct TreeinfoTweaker<'a> {
    profile: &'a ComposeProfile,
    checksum: ChecksumAlgo,
    timestamp: i64,
}

impl<'a> TreeinfoTweaker<'a> {
    pub fn new(profile: &'a ComposeProfile, timestamp: i64) -> Self {
        Self {
            profile,
            checksum: profile.checksum,
            timestamp,
        }
    }

    /// Tweak every image repo in `repos` for every arch. Kickstart trees are
    /// only included when `include_kickstart` is set. Returns how many trees
    /// failed; failures are logged and never stop the pass.
    pub fn tweak(
        &self,
        sync_root: &Path,
        repos: &[String],
        arches: &[String],
        include_kickstart: bool,
    ) -> usize {
        let variants: Vec<(&String, &ImageVariant)> = self
            .profile
            .iso_map
            .images
            .iter()
            .filter(|(repo, _)| repos.contains(repo))
            .collect();
        if variants.is_empty() {
            info!("no treeinfo to tweak");
            return 0;
        }

        let mut kinds = vec![VariantKind::Os];
        if include_kickstart {
            kinds.push(VariantKind::Kickstart);
        }

        let mut failed = 0;
        for arch in arches {
            for (repo, image) in &variants {
                for kind in &kinds {
                    let dir = kind.tree_path(sync_root, self.profile.repo_dir(repo), arch);
                    info!(repo = %repo, arch = %arch, tree = %kind, "tweaking treeinfo");
                    if let Err(err) = self.tweak_tree(&dir, arch, *kind, image) {
                        error!(
                            repo = %repo,
                            arch = %arch,
                            tree = %kind,
                            error = %format!("{:#}", err),
                            "treeinfo could not be tweaked"
                        );
                        failed += 1;
                    }
                }
            }
        }
        failed
    }

    /// Rewrite one tree's treeinfo, then its discinfo and media.repo.
    pub fn tweak_tree(
        &self,
        dir: &Path,
        arch: &str,
        kind: VariantKind,
        image: &ImageVariant,
    ) -> Result<()> {
        let path = dir.join(TREEINFO);
        if !path.is_file() {
            bail!("no treeinfo at {}", path.display());
        }
        let mut record = TreeinfoRecord::read(&path)?;

        record.release.name = self.profile.distname.clone();
        record.release.short = self.profile.shortname.clone();
        record.release.version = self.profile.revision.clone();
        record.tree.arch = arch.to_string();
        record.tree.build_timestamp = self.timestamp;

        for images in record.images.values_mut() {
            images.retain(|_, path| !path.is_empty());
            if image.disc {
                images.remove("boot.iso");
            }
        }
        record.images.retain(|_, images| !images.is_empty());

        let mut artifacts: Vec<String> = record
            .images
            .values()
            .flat_map(|images| images.values().cloned())
            .collect();
        artifacts.extend(record.stage2.values().cloned());
        artifacts.sort();
        artifacts.dedup();

        record.checksums.clear();
        for artifact in artifacts {
            let file = dir.join(&artifact);
            if !file.is_file() {
                warn!(path = %file.display(), "image listed in treeinfo is missing; no checksum");
                continue;
            }
            record
                .checksums
                .insert(artifact, treeinfo_checksum(&file, self.checksum)?);
        }

        if image.disc {
            record.media = Some(Media {
                discnum: 1,
                totaldiscs: 1,
            });
        }

        let subdir = match kind {
            VariantKind::Kickstart => "kickstart",
            _ => "os",
        };
        for repo in &image.repos {
            let repo_dir = self.profile.repo_dir(repo);
            let variant = if *repo == image.variant {
                TreeVariant::new(repo, ".", "Packages")
            } else if image.disc {
                TreeVariant::new(repo, repo_dir, &format!("{}/Packages", repo_dir))
            } else {
                let rel = format!("../../../{}/{}/{}", repo_dir, arch, subdir);
                TreeVariant::new(repo, &rel, &format!("{}/Packages", rel))
            };
            record.add_variant(variant);
        }

        record.write(&path)?;

        let writer = MetadataWriter::new(self.profile, self.timestamp).refresh(true);
        writer.write_discinfo(&dir.join(DISCINFO), arch)?;
        writer.write_media_repo(&dir.join(MEDIA_REPO))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::digest_file;
    use crate::config::tests::sample_profile;
    use std::fs;
    use tempfile::TempDir;

    fn seed_tree(dir: &Path, profile: &ComposeProfile) {
        let mut record = MetadataWriter::new(profile, 1).new_treeinfo("x86_64", "BaseOS");
        let images = record.images.entry("x86_64".to_string()).or_default();
        images.insert("boot.iso".to_string(), "images/boot.iso".to_string());
        images.insert("efiboot.img".to_string(), "images/efiboot.img".to_string());
        images.insert("pxeboot".to_string(), String::new());
        record
            .stage2
            .insert("mainimage".to_string(), "images/install.img".to_string());
        record.write(&dir.join(TREEINFO)).unwrap();

        fs::create_dir_all(dir.join("images")).unwrap();
        fs::write(dir.join("images/boot.iso"), "boot").unwrap();
        fs::write(dir.join("images/install.img"), "stage2").unwrap();
    }

    #[test]
    fn test_tweak_adds_checksums_and_sibling_variants() {
        let tmp = TempDir::new().unwrap();
        let profile = sample_profile();
        let dir = tmp.path().join("BaseOS/x86_64/os");
        seed_tree(&dir, &profile);

        let tweaker = TreeinfoTweaker::new(&profile, 500);
        let failed = tweaker.tweak(
            tmp.path(),
            &profile.repos,
            &["x86_64".to_string()],
            false,
        );
        assert_eq!(failed, 0);

        let record = TreeinfoRecord::read(&dir.join(TREEINFO)).unwrap();
        assert_eq!(record.release.version, "9.1");
        assert_eq!(record.tree.build_timestamp, 500);
        assert!(!record.images["x86_64"].contains_key("pxeboot"));
        assert_eq!(
            record.checksums["images/boot.iso"],
            format!(
                "sha256:{}",
                digest_file(&dir.join("images/boot.iso"), ChecksumAlgo::Sha256).unwrap()
            )
        );
        assert!(record.checksums.contains_key("images/install.img"));
        assert!(!record.checksums.contains_key("images/efiboot.img"));

        assert_eq!(record.variants["BaseOS"].repository, ".");
        assert_eq!(
            record.variants["AppStream"].repository,
            "../../../AppStream/x86_64/os"
        );
        assert_eq!(
            record.variants["AppStream"].packages,
            "../../../AppStream/x86_64/os/Packages"
        );
        assert_eq!(
            fs::read_to_string(dir.join(DISCINFO)).unwrap(),
            "500\nTest Linux 9.1\nx86_64\nALL"
        );
    }

    #[test]
    fn test_disc_images_drop_boot_iso_and_set_media() {
        let tmp = TempDir::new().unwrap();
        let mut profile = sample_profile();
        profile
            .iso_map
            .images
            .get_mut("BaseOS")
            .unwrap()
            .disc = true;
        let dir = tmp.path().join("BaseOS/x86_64/os");
        seed_tree(&dir, &profile);

        let image = profile.iso_map.images["BaseOS"].clone();
        TreeinfoTweaker::new(&profile, 500)
            .tweak_tree(&dir, "x86_64", VariantKind::Os, &image)
            .unwrap();

        let record = TreeinfoRecord::read(&dir.join(TREEINFO)).unwrap();
        assert!(!record.images["x86_64"].contains_key("boot.iso"));
        assert!(!record.checksums.contains_key("images/boot.iso"));
        assert_eq!(
            record.media,
            Some(Media {
                discnum: 1,
                totaldiscs: 1
            })
        );
        assert_eq!(record.variants["AppStream"].repository, "AppStream");
        assert_eq!(record.variants["AppStream"].packages, "AppStream/Packages");
    }

    #[test]
    fn test_missing_treeinfo_is_counted_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let profile = sample_profile();
        let failed = TreeinfoTweaker::new(&profile, 1).tweak(
            tmp.path(),
            &profile.repos,
            &["x86_64".to_string(), "aarch64".to_string()],
            true,
        );
        assert_eq!(failed, 4);
    }
}
