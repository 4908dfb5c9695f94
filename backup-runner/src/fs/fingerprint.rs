//! Deterministic content fingerprints of directories.
//!
//! Two independent operations share one hashing core:
//! - [`shallow_fingerprint`]: files directly inside a directory only. The
//!   executor logs one per loose-files unit for change detection.
//! - [`deep_fingerprint`]: the whole subtree, depth-first in sorted order.
//!
//! Each file contributes its relative path followed by the SHA-256 of its
//! content. Symlinks are never followed: they contribute the hash of their
//! target path. A file that cannot be read is recorded as skipped and left
//! out of the digest; the rest of the computation continues.

use crate::fs::walker::{list_dir, walk_files, WalkOptions};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::Path;
use tracing::warn;

/// A file that could not be hashed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

/// Outcome of hashing a single file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileDigest {
    Hashed { path: String, len: u64, digest: [u8; 32] },
    Skipped(SkippedFile),
}

/// Digest of a directory plus the inputs it was computed over
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fingerprint {
    /// Hex-encoded SHA-256
    pub digest: String,

    /// `(relative_path, byte_length)` of every file folded into the digest,
    /// in hashing order
    pub entries: Vec<(String, u64)>,

    /// Files excluded from the digest because they could not be read
    pub skipped: Vec<SkippedFile>,
}

impl Fingerprint {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// SHA-256 of a file's full content, streamed in chunks.
pub fn hash_file(path: &Path) -> io::Result<(u64, [u8; 32])> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let len = io::copy(&mut file, &mut hasher)?;
    Ok((len, hasher.finalize().into()))
}

/// Hash a walked entry without following symlinks.
///
/// Regular files hash their content; a symlink hashes its target path, so a
/// link to a directory or a dangling link still has a stable digest.
pub fn hash_entry(path: &Path) -> io::Result<(u64, [u8; 32])> {
    if fs::symlink_metadata(path)?.file_type().is_symlink() {
        let target = fs::read_link(path)?;
        let target = target.to_string_lossy();
        let digest = Sha256::digest(target.as_bytes());
        return Ok((target.len() as u64, digest.into()));
    }
    hash_file(path)
}

/// Hash one file and report the outcome instead of failing.
pub fn digest_file(path: &Path, relative_path: String) -> FileDigest {
    match hash_entry(path) {
        Ok((len, digest)) => FileDigest::Hashed {
            path: relative_path,
            len,
            digest,
        },
        Err(e) => {
            warn!("Cannot read {} while fingerprinting: {}", path.display(), e);
            FileDigest::Skipped(SkippedFile {
                path: relative_path,
                reason: e.to_string(),
            })
        }
    }
}

/// Running accumulator over per-file outcomes
#[derive(Default)]
struct FingerprintBuilder {
    hasher: Sha256,
    entries: Vec<(String, u64)>,
    skipped: Vec<SkippedFile>,
}

impl FingerprintBuilder {
    fn push(&mut self, outcome: FileDigest) {
        match outcome {
            FileDigest::Hashed { path, len, digest } => {
                self.hasher.update(path.as_bytes());
                self.hasher.update(digest);
                self.entries.push((path, len));
            }
            FileDigest::Skipped(skipped) => self.skipped.push(skipped),
        }
    }

    fn finish(self) -> Fingerprint {
        Fingerprint {
            digest: hex::encode(self.hasher.finalize()),
            entries: self.entries,
            skipped: self.skipped,
        }
    }
}

/// Fingerprint of the files directly inside `dir` (not recursive).
///
/// Fails only if `dir` itself cannot be listed.
pub fn shallow_fingerprint(dir: &Path) -> io::Result<Fingerprint> {
    let listing = list_dir(dir, &WalkOptions::default())?;
    let mut builder = FingerprintBuilder::default();

    for name in listing.files {
        let path = dir.join(&name);
        builder.push(digest_file(&path, name));
    }

    Ok(builder.finish())
}

/// Fingerprint of every file in the subtree rooted at `dir`.
///
/// Fails only if the tree cannot be walked.
pub fn deep_fingerprint(dir: &Path) -> io::Result<Fingerprint> {
    let files = walk_files(dir, &WalkOptions::default())?;
    let mut builder = FingerprintBuilder::default();

    for file in files {
        builder.push(digest_file(&file.path, file.relative_path));
    }

    Ok(builder.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> io::Result<TempDir> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("a.txt"), b"alpha")?;
        fs::write(temp_dir.path().join("b.txt"), b"beta")?;
        fs::create_dir(temp_dir.path().join("nested"))?;
        fs::write(temp_dir.path().join("nested/c.txt"), b"gamma")?;
        Ok(temp_dir)
    }

    #[test]
    fn test_shallow_is_stable() -> io::Result<()> {
        let dir = fixture()?;
        let first = shallow_fingerprint(dir.path())?;
        let second = shallow_fingerprint(dir.path())?;
        assert_eq!(first, second);
        assert_eq!(
            first.entries,
            vec![("a.txt".to_string(), 5), ("b.txt".to_string(), 4)]
        );
        Ok(())
    }

    #[test]
    fn test_shallow_independent_of_creation_order() -> io::Result<()> {
        let one = TempDir::new()?;
        fs::write(one.path().join("x"), b"1")?;
        fs::write(one.path().join("y"), b"2")?;

        let two = TempDir::new()?;
        fs::write(two.path().join("y"), b"2")?;
        fs::write(two.path().join("x"), b"1")?;

        assert_eq!(
            shallow_fingerprint(one.path())?.digest,
            shallow_fingerprint(two.path())?.digest
        );
        Ok(())
    }

    #[test]
    fn test_shallow_detects_content_name_and_presence() -> io::Result<()> {
        let dir = fixture()?;
        let base = shallow_fingerprint(dir.path())?.digest;

        fs::write(dir.path().join("a.txt"), b"alpha!")?;
        let changed = shallow_fingerprint(dir.path())?.digest;
        assert_ne!(base, changed);

        fs::rename(dir.path().join("a.txt"), dir.path().join("renamed.txt"))?;
        let renamed = shallow_fingerprint(dir.path())?.digest;
        assert_ne!(changed, renamed);

        fs::remove_file(dir.path().join("b.txt"))?;
        let removed = shallow_fingerprint(dir.path())?.digest;
        assert_ne!(renamed, removed);
        Ok(())
    }

    #[test]
    fn test_shallow_ignores_subdirectories() -> io::Result<()> {
        let dir = fixture()?;
        let base = shallow_fingerprint(dir.path())?.digest;

        fs::write(dir.path().join("nested/c.txt"), b"changed deep down")?;
        fs::write(dir.path().join("nested/new.txt"), b"new")?;

        assert_eq!(base, shallow_fingerprint(dir.path())?.digest);
        Ok(())
    }

    #[test]
    fn test_deep_covers_subtree() -> io::Result<()> {
        let dir = fixture()?;
        let base = deep_fingerprint(dir.path())?;
        assert_eq!(base.entries.len(), 3);
        assert!(base.entries.iter().any(|(p, _)| p == "nested/c.txt"));

        fs::write(dir.path().join("nested/c.txt"), b"gamma2")?;
        let changed = deep_fingerprint(dir.path())?.digest;
        assert_ne!(base.digest, changed);

        fs::rename(dir.path().join("nested/c.txt"), dir.path().join("nested/d.txt"))?;
        let renamed = deep_fingerprint(dir.path())?.digest;
        assert_ne!(changed, renamed);

        fs::remove_file(dir.path().join("nested/d.txt"))?;
        let removed = deep_fingerprint(dir.path())?;
        assert_ne!(renamed, removed.digest);
        assert_eq!(removed.entries.len(), 2);
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_symlinks_hash_their_target() -> io::Result<()> {
        let dir = fixture()?;
        std::os::unix::fs::symlink("nested", dir.path().join("alias"))?;
        std::os::unix::fs::symlink("nowhere", dir.path().join("ghost"))?;

        let fingerprint = deep_fingerprint(dir.path())?;
        assert!(fingerprint.is_complete());
        assert!(fingerprint.entries.contains(&("alias".to_string(), 6)));
        assert!(fingerprint.entries.contains(&("ghost".to_string(), 7)));

        fs::remove_file(dir.path().join("ghost"))?;
        std::os::unix::fs::symlink("elsewhere", dir.path().join("ghost"))?;
        assert_ne!(fingerprint.digest, deep_fingerprint(dir.path())?.digest);
        Ok(())
    }

    #[test]
    fn test_shallow_and_deep_differ() -> io::Result<()> {
        let dir = fixture()?;
        assert_ne!(
            shallow_fingerprint(dir.path())?.digest,
            deep_fingerprint(dir.path())?.digest
        );
        Ok(())
    }

    #[test]
    fn test_unreadable_file_is_skipped() -> io::Result<()> {
        let dir = fixture()?;
        let missing = dir.path().join("vanished.bin");

        let mut builder = FingerprintBuilder::default();
        builder.push(digest_file(&dir.path().join("a.txt"), "a.txt".to_string()));
        builder.push(digest_file(&missing, "vanished.bin".to_string()));
        let partial = builder.finish();

        assert!(!partial.is_complete());
        assert_eq!(partial.skipped.len(), 1);
        assert_eq!(partial.skipped[0].path, "vanished.bin");
        assert_eq!(partial.entries, vec![("a.txt".to_string(), 5)]);

        let mut only_readable = FingerprintBuilder::default();
        only_readable.push(digest_file(&dir.path().join("a.txt"), "a.txt".to_string()));
        assert_eq!(partial.digest, only_readable.finish().digest);
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_permission_denied_file_does_not_abort() -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = fixture()?;
        let locked = dir.path().join("locked.txt");
        fs::write(&locked, b"secret")?;
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000))?;

        // Root can read anything; only assert when the file is really unreadable
        let unreadable = File::open(&locked).is_err();
        let fingerprint = shallow_fingerprint(dir.path())?;
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o644))?;

        if unreadable {
            assert_eq!(fingerprint.skipped.len(), 1);
            assert_eq!(fingerprint.entries.len(), 2);
        } else {
            assert!(fingerprint.is_complete());
        }
        Ok(())
    }
}
