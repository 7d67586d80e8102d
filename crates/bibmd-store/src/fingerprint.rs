//! Blake3 fingerprints for attachment files and workspace directories

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::record::FileFingerprints;

/// Read buffer for streamed hashing; memory use does not grow with file size.
const CHUNK_SIZE: usize = 64 * 1024;

const TAG_FILE: u8 = b'F';
const TAG_LINK: u8 = b'L';

/// Hex-encoded blake3 digest. The empty fingerprint means "nothing to hash"
/// (missing directory) or "could not hash" (unreadable file).
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn from_hash(hash: &blake3::Hash) -> Self {
        Self(hash.to_hex().to_string())
    }

    /// Wrap a stored hex string as-is.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, for display. Stored values are not re-validated,
    /// so this cuts on a char boundary.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Feed everything `reader` yields into `hasher`, `CHUNK_SIZE` bytes at a time.
/// Returns the number of bytes hashed.
fn stream_into(hasher: &mut blake3::Hasher, mut reader: impl Read) -> io::Result<u64> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
        total += n as u64;
    }
}

/// Hash a file's contents with blake3.
pub fn hash_file(path: &Path) -> io::Result<blake3::Hash> {
    let file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    stream_into(&mut hasher, file)?;
    Ok(hasher.finalize())
}

/// Content fingerprint of one file; empty (and logged) if it can't be read.
pub fn file_fingerprint(path: &Path) -> Fingerprint {
    match hash_file(path) {
        Ok(h) => Fingerprint::from_hash(&h),
        Err(e) => {
            log::error!("failed to hash {}: {e}", path.display());
            Fingerprint::empty()
        }
    }
}

/// Fingerprint every path, keyed by its display string.
pub fn fingerprint_files(paths: &[PathBuf]) -> FileFingerprints {
    paths
        .iter()
        .map(|p| (p.display().to_string(), file_fingerprint(p)))
        .collect()
}

fn update_len_prefixed(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Composite fingerprint of a directory tree.
///
/// Every regular file and symlink below `dir` contributes, in order of its
/// path relative to `dir`: the relative path, then for a symlink the raw
/// target string (the target is never read), for a regular file its bytes.
/// Fields are length-framed so distinct trees can't produce the same stream.
///
/// Returns the empty fingerprint if `dir` does not exist. Entries that can't
/// be read are logged and left out; the walk continues.
pub fn directory_fingerprint(dir: &Path) -> Fingerprint {
    if !dir.exists() {
        return Fingerprint::empty();
    }

    let mut members: Vec<(String, PathBuf, bool)> = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                log::warn!("skipping unreadable entry under {}: {e}", dir.display());
                continue;
            }
        };
        let file_type = entry.file_type();
        if !(file_type.is_file() || file_type.is_symlink()) {
            continue;
        }
        let rel = match entry.path().strip_prefix(dir) {
            Ok(rel) => rel.to_string_lossy().into_owned(),
            Err(_) => continue,
        };
        members.push((rel, entry.into_path(), file_type.is_symlink()));
    }
    members.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = blake3::Hasher::new();
    for (rel, path, is_link) in &members {
        if let Err(e) = hash_member(&mut hasher, rel, path, *is_link) {
            log::error!("failed to hash {}: {e}", path.display());
        }
    }
    Fingerprint::from_hash(&hasher.finalize())
}

/// Hash one directory member into a scratch hasher first, so a read error
/// halfway through a file leaves no trace in the directory fingerprint.
fn hash_member(
    hasher: &mut blake3::Hasher,
    rel: &str,
    path: &Path,
    is_link: bool,
) -> io::Result<()> {
    let mut member = blake3::Hasher::new();
    update_len_prefixed(&mut member, rel.as_bytes());
    if is_link {
        let target = std::fs::read_link(path)?;
        member.update(&[TAG_LINK]);
        update_len_prefixed(&mut member, target.to_string_lossy().as_bytes());
    } else {
        member.update(&[TAG_FILE]);
        let len = stream_into(&mut member, File::open(path)?)?;
        member.update(&len.to_le_bytes());
    }
    hasher.update(member.finalize().as_bytes());
    Ok(())
}
