//! `.treeinfo` records in the productmd 1.2 INI layout.
//!
//! Sections and keys are written sorted, one `key = value` per line. A
//! `[general]` section is derived from the record for pre-productmd
//! consumers and ignored when reading.

use anyhow::{bail, Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

const HEADER_TYPE: &str = "productmd.treeinfo";
const HEADER_VERSION: &str = "1.2";

type Section = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub name: String,
    pub short: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    pub arch: String,
    pub build_timestamp: i64,
    pub platforms: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeVariant {
    pub id: String,
    pub uid: String,
    pub name: String,
    pub kind: String,
    /// Repository root, relative to the tree.
    pub repository: String,
    /// Packages directory, relative to the tree.
    pub packages: String,
}

impl TreeVariant {
    pub fn new(id: &str, repository: &str, packages: &str) -> Self {
        Self {
            id: id.to_string(),
            uid: id.to_string(),
            name: id.to_string(),
            kind: "variant".to_string(),
            repository: repository.to_string(),
            packages: packages.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Media {
    pub discnum: u32,
    pub totaldiscs: u32,
}

/// One `.treeinfo` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeinfoRecord {
    pub release: Release,
    pub tree: Tree,
    pub variants: BTreeMap<String, TreeVariant>,
    /// Platform → image type → path.
    pub images: BTreeMap<String, BTreeMap<String, String>>,
    /// Path → `algo:hex`.
    pub checksums: BTreeMap<String, String>,
    pub stage2: BTreeMap<String, String>,
    pub media: Option<Media>,
    /// Sections this codec does not model, kept as read.
    pub extra: BTreeMap<String, Section>,
}

impl TreeinfoRecord {
    pub fn new(name: &str, short: &str, version: &str, arch: &str, build_timestamp: i64) -> Self {
        Self {
            release: Release {
                name: name.to_string(),
                short: short.to_string(),
                version: version.to_string(),
            },
            tree: Tree {
                arch: arch.to_string(),
                build_timestamp,
                platforms: BTreeSet::from([arch.to_string()]),
            },
            variants: BTreeMap::new(),
            images: BTreeMap::new(),
            checksums: BTreeMap::new(),
            stage2: BTreeMap::new(),
            media: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn add_variant(&mut self, variant: TreeVariant) {
        self.variants.insert(variant.id.clone(), variant);
    }

    /// Variant whose repository is the tree root, else the first one.
    pub fn primary_variant(&self) -> Option<&TreeVariant> {
        self.variants
            .values()
            .find(|v| v.repository == ".")
            .or_else(|| self.variants.values().next())
    }

    fn sections(&self) -> BTreeMap<String, Section> {
        let mut doc: BTreeMap<String, Section> = self.extra.clone();
        let set = |section: &mut Section, key: &str, value: String| {
            section.insert(key.to_string(), value);
        };

        let mut header = Section::new();
        set(&mut header, "type", HEADER_TYPE.to_string());
        set(&mut header, "version", HEADER_VERSION.to_string());
        doc.insert("header".to_string(), header);

        let mut release = Section::new();
        set(&mut release, "name", self.release.name.clone());
        set(&mut release, "short", self.release.short.clone());
        set(&mut release, "version", self.release.version.clone());
        doc.insert("release".to_string(), release);

        let platforms = self.tree.platforms.iter().cloned().collect::<Vec<_>>().join(",");
        let variant_ids = self.variants.keys().cloned().collect::<Vec<_>>().join(",");

        let mut tree = Section::new();
        set(&mut tree, "arch", self.tree.arch.clone());
        set(&mut tree, "build_timestamp", self.tree.build_timestamp.to_string());
        set(&mut tree, "platforms", platforms.clone());
        set(&mut tree, "variants", variant_ids.clone());
        doc.insert("tree".to_string(), tree);

        for variant in self.variants.values() {
            let mut section = Section::new();
            set(&mut section, "id", variant.id.clone());
            set(&mut section, "uid", variant.uid.clone());
            set(&mut section, "name", variant.name.clone());
            set(&mut section, "type", variant.kind.clone());
            set(&mut section, "repository", variant.repository.clone());
            set(&mut section, "packages", variant.packages.clone());
            doc.insert(format!("variant-{}", variant.id), section);
        }

        for (platform, images) in &self.images {
            if !images.is_empty() {
                doc.insert(format!("images-{}", platform), images.clone());
            }
        }
        if !self.checksums.is_empty() {
            doc.insert("checksums".to_string(), self.checksums.clone());
        }
        if !self.stage2.is_empty() {
            doc.insert("stage2".to_string(), self.stage2.clone());
        }
        if let Some(media) = self.media {
            let mut section = Section::new();
            set(&mut section, "discnum", media.discnum.to_string());
            set(&mut section, "totaldiscs", media.totaldiscs.to_string());
            doc.insert("media".to_string(), section);
        }

        let mut general = Section::new();
        set(&mut general, "arch", self.tree.arch.clone());
        set(&mut general, "family", self.release.name.clone());
        set(
            &mut general,
            "name",
            format!("{} {}", self.release.name, self.release.version),
        );
        set(&mut general, "platforms", platforms);
        set(&mut general, "timestamp", self.tree.build_timestamp.to_string());
        set(&mut general, "version", self.release.version.clone());
        set(&mut general, "variants", variant_ids);
        if let Some(primary) = self.primary_variant() {
            set(&mut general, "variant", primary.id.clone());
            set(&mut general, "repository", primary.repository.clone());
            set(&mut general, "packagedir", primary.packages.clone());
        }
        doc.insert("general".to_string(), general);

        doc
    }

    pub fn to_ini(&self) -> String {
        let mut out = String::new();
        for (name, section) in self.sections() {
            let _ = writeln!(out, "[{}]", name);
            if name == "general" {
                out.push_str(
                    "; WARNING.0 = This section provides compatibility with pre-productmd treeinfos.\n",
                );
                out.push_str("; WARNING.1 = Read productmd documentation for details about new format.\n");
            }
            for (key, value) in section {
                let _ = writeln!(out, "{} = {}", key, value);
            }
            out.push('\n');
        }
        out
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let mut doc = parse_ini(raw)?;

        let header = doc.remove("header").context("treeinfo has no [header] section")?;
        if header.get("type").map(String::as_str) != Some(HEADER_TYPE) {
            bail!("not a productmd treeinfo (header type {:?})", header.get("type"));
        }

        let release = doc.remove("release").context("treeinfo has no [release] section")?;
        let tree = doc.remove("tree").context("treeinfo has no [tree] section")?;
        doc.remove("general");

        let get = |section: &Section, name: &str, key: &str| -> Result<String> {
            section
                .get(key)
                .cloned()
                .with_context(|| format!("treeinfo [{}] is missing '{}'", name, key))
        };

        let build_timestamp = get(&tree, "tree", "build_timestamp")?;
        let build_timestamp = build_timestamp
            .split('.')
            .next()
            .unwrap_or_default()
            .parse::<i64>()
            .with_context(|| format!("bad build_timestamp '{}'", build_timestamp))?;

        let mut record = TreeinfoRecord::new(
            &get(&release, "release", "name")?,
            &get(&release, "release", "short")?,
            &get(&release, "release", "version")?,
            &get(&tree, "tree", "arch")?,
            build_timestamp,
        );
        record.tree.platforms = split_list(tree.get("platforms"));

        for id in split_list(tree.get("variants")) {
            let name = format!("variant-{}", id);
            let section = doc
                .remove(&name)
                .with_context(|| format!("treeinfo lists variant '{}' without [{}]", id, name))?;
            record.add_variant(TreeVariant {
                id: get(&section, &name, "id")?,
                uid: section.get("uid").cloned().unwrap_or_else(|| id.clone()),
                name: section.get("name").cloned().unwrap_or_else(|| id.clone()),
                kind: section
                    .get("type")
                    .cloned()
                    .unwrap_or_else(|| "variant".to_string()),
                repository: get(&section, &name, "repository")?,
                packages: section.get("packages").cloned().unwrap_or_default(),
            });
        }

        if let Some(media) = doc.remove("media") {
            record.media = Some(Media {
                discnum: parse_u32(&media, "discnum")?,
                totaldiscs: parse_u32(&media, "totaldiscs")?,
            });
        }
        record.checksums = doc.remove("checksums").unwrap_or_default();
        record.stage2 = doc.remove("stage2").unwrap_or_default();

        let image_sections: Vec<String> = doc
            .keys()
            .filter(|k| k.starts_with("images-"))
            .cloned()
            .collect();
        for name in image_sections {
            if let Some(section) = doc.remove(&name) {
                record
                    .images
                    .insert(name.trim_start_matches("images-").to_string(), section);
            }
        }

        record.extra = doc;
        Ok(record)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(path, self.to_ini())
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

fn split_list(raw: Option<&String>) -> BTreeSet<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

fn parse_u32(section: &Section, key: &str) -> Result<u32> {
    let raw = section
        .get(key)
        .with_context(|| format!("treeinfo [media] is missing '{}'", key))?;
    raw.parse()
        .with_context(|| format!("bad [media] {} '{}'", key, raw))
}

fn parse_ini(raw: &str) -> Result<BTreeMap<String, Section>> {
    let mut doc: BTreeMap<String, Section> = BTreeMap::new();
    let mut current: Option<String> = None;

    for (lineno, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let name = name.trim().to_string();
            doc.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            bail!("treeinfo line {}: expected 'key = value'", lineno + 1);
        };
        let Some(section) = current.as_ref() else {
            bail!("treeinfo line {}: key outside of a section", lineno + 1);
        };
        doc.entry(section.clone())
            .or_default()
            .insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TreeinfoRecord {
        let mut record = TreeinfoRecord::new("Test Linux", "Test", "9.1", "x86_64", 1_700_000_000);
        record.add_variant(TreeVariant::new("BaseOS", ".", "Packages"));
        record
    }

    #[test]
    fn test_layout_is_sorted_productmd() {
        let ini = sample().to_ini();
        let sections: Vec<&str> = ini.lines().filter(|l| l.starts_with('[')).collect();
        assert_eq!(
            sections,
            ["[general]", "[header]", "[release]", "[tree]", "[variant-BaseOS]"]
        );
        assert!(ini.contains("[header]\ntype = productmd.treeinfo\nversion = 1.2\n"));
        assert!(ini.contains(
            "[tree]\narch = x86_64\nbuild_timestamp = 1700000000\nplatforms = x86_64\nvariants = BaseOS\n"
        ));
        assert!(ini.contains(
            "[variant-BaseOS]\nid = BaseOS\nname = BaseOS\npackages = Packages\nrepository = .\ntype = variant\nuid = BaseOS\n"
        ));
    }

    #[test]
    fn test_parse_reads_back_full_record() {
        let mut record = sample();
        record.add_variant(TreeVariant::new(
            "AppStream",
            "../../../AppStream/x86_64/os",
            "../../../AppStream/x86_64/os/Packages",
        ));
        record
            .images
            .entry("x86_64".to_string())
            .or_default()
            .insert("boot.iso".to_string(), "images/boot.iso".to_string());
        record
            .checksums
            .insert("images/boot.iso".to_string(), "sha256:abc".to_string());
        record
            .stage2
            .insert("mainimage".to_string(), "images/install.img".to_string());
        record.media = Some(Media {
            discnum: 1,
            totaldiscs: 1,
        });

        let parsed = TreeinfoRecord::parse(&record.to_ini()).unwrap();
        assert_eq!(parsed, record);
        assert_eq!(parsed.primary_variant().unwrap().id, "BaseOS");
    }

    #[test]
    fn test_parse_keeps_unknown_sections_and_float_timestamps() {
        let raw = "[header]\ntype = productmd.treeinfo\nversion = 1.2\n\n\
                   [release]\nname = X\nshort = X\nversion = 1\n\n\
                   [tree]\narch = aarch64\nbuild_timestamp = 1700000000.25\nplatforms = aarch64\nvariants = \n\n\
                   [custom]\nfoo = bar\n";
        let parsed = TreeinfoRecord::parse(raw).unwrap();
        assert_eq!(parsed.tree.build_timestamp, 1_700_000_000);
        assert!(parsed.variants.is_empty());
        assert_eq!(parsed.extra["custom"]["foo"], "bar");
        assert!(parsed.to_ini().contains("[custom]\nfoo = bar\n"));
    }

    #[test]
    fn test_parse_rejects_foreign_files() {
        assert!(TreeinfoRecord::parse("[header]\ntype = something\n").is_err());
        assert!(TreeinfoRecord::parse("orphan = 1\n").is_err());
    }
}
