//! Streamed file digests for images and treeinfo checksum records.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::ComposeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgo {
    Sha256,
    Sha512,
}

impl ChecksumAlgo {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sha256" => Ok(ChecksumAlgo::Sha256),
            "sha512" => Ok(ChecksumAlgo::Sha512),
            other => Err(ComposeError::UnsupportedChecksum(other.to_string()).into()),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChecksumAlgo::Sha256 => "sha256",
            ChecksumAlgo::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for ChecksumAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hex digest of a file, read in 1 MiB chunks.
pub fn digest_file(path: &Path, algo: ChecksumAlgo) -> Result<String> {
    match algo {
        ChecksumAlgo::Sha256 => stream::<Sha256>(path),
        ChecksumAlgo::Sha512 => stream::<Sha512>(path),
    }
}

/// Digest in treeinfo form: `sha256:<hex>`.
pub fn treeinfo_checksum(path: &Path, algo: ChecksumAlgo) -> Result<String> {
    Ok(format!("{}:{}", algo, digest_file(path, algo)?))
}

fn stream<D: Digest>(path: &Path) -> Result<String> {
    let f = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut r = BufReader::new(f);
    let mut hasher = D::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = r
            .read(&mut buf)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_sha256_known_value() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("abc");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            digest_file(&path, ChecksumAlgo::Sha256).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(treeinfo_checksum(&path, ChecksumAlgo::Sha256)
            .unwrap()
            .starts_with("sha256:ba7816bf"));
    }

    #[test]
    fn test_sha512_length() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("empty");
        fs::write(&path, b"").unwrap();
        assert_eq!(digest_file(&path, ChecksumAlgo::Sha512).unwrap().len(), 128);
    }

    #[test]
    fn test_unknown_algo() {
        assert_eq!(ChecksumAlgo::parse("SHA512").unwrap(), ChecksumAlgo::Sha512);
        let err = ChecksumAlgo::parse("md5").unwrap_err();
        assert_eq!(crate::error::exit_code_for(&err), 13);
    }
}
