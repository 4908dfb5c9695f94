//! Partition planning: carving a source tree into archive units.
//!
//! Given a root and a split depth, the planner walks the tree down to that
//! depth and emits one archive unit per subdirectory found there, plus one
//! loose-files unit per visited directory that holds files of its own:
//!
//! | Situation                         | Entry                 | Remote key                         |
//! |-----------------------------------|-----------------------|------------------------------------|
//! | root is a regular file            | `SingleFile`          | `{name}/{basename}`                |
//! | split depth 0                     | `WholeTreeArchive`    | `{name}/{basename}.tar.gz`         |
//! | subdirectory at the split level   | `SubdirectoryArchive` | `{name}/{relpath}/{dir}.tar.gz`    |
//! | files directly in a visited dir   | `LooseFilesArchive`   | `{name}/{relpath}/_files.tar.gz`   |
//!
//! The root directory is at depth 1. Directories above the split level are
//! descended into; their own files are announced once, as that directory's
//! loose-files unit. A branch that runs out of subdirectories early simply
//! ends there.

pub mod render;

use crate::config::SourceSpec;
use crate::fs::walker::{count_files, list_dir, DirListing, WalkOptions};
use crate::utils::errors::{BackupError, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const ARCHIVE_SUFFIX: &str = ".tar.gz";
const LOOSE_FILES_STEM: &str = "_files";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PartitionKind {
    SingleFile,
    WholeTreeArchive,
    SubdirectoryArchive,
    LooseFilesArchive,
}

/// Best-effort number of files an entry covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCount {
    Known(usize),
    /// Traversal failed; carries the error text
    Unknown(String),
}

impl FileCount {
    fn from_count(result: std::io::Result<usize>, path: &Path) -> Self {
        match result {
            Ok(count) => FileCount::Known(count),
            Err(e) => {
                warn!("Cannot count files under {}: {}", path.display(), e);
                FileCount::Unknown(e.to_string())
            }
        }
    }

    pub fn known(&self) -> Option<usize> {
        match self {
            FileCount::Known(n) => Some(*n),
            FileCount::Unknown(_) => None,
        }
    }
}

impl fmt::Display for FileCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileCount::Known(n) => write!(f, "{}", n),
            FileCount::Unknown(_) => write!(f, "unknown"),
        }
    }
}

/// One archive unit of a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionEntry {
    pub kind: PartitionKind,

    /// Path relative to the source root, `/`-separated; empty for the root.
    /// For loose-files entries this is the directory holding the files.
    pub source_subpath: String,

    /// Object key the archive is stored under
    pub remote_key: String,

    pub estimated_file_count: FileCount,

    /// File names bundled by a `LooseFilesArchive` or `SingleFile` entry
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<String>,
}

/// Ordered archive units for one source
#[derive(Debug, Clone, Serialize)]
pub struct PartitionPlan {
    pub backup_name: String,
    pub root: PathBuf,
    pub split_depth: usize,
    pub entries: Vec<PartitionEntry>,
}

impl PartitionPlan {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn remote_keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.remote_key.as_str())
    }

    /// Sum of known file counts and whether any entry was unknown
    pub fn total_files(&self) -> (usize, bool) {
        self.entries
            .iter()
            .fold((0, false), |(sum, partial), e| match e.estimated_file_count.known() {
                Some(n) => (sum + n, partial),
                None => (sum, true),
            })
    }
}

/// Build the plan for a configured source.
///
/// Errors are precondition failures for this source only: the path is
/// missing, the split depth is negative, or the root cannot be listed.
pub fn plan_source(source: &SourceSpec) -> Result<PartitionPlan> {
    let split_depth = usize::try_from(source.split_depth).map_err(|_| {
        BackupError::InvalidSplitDepth {
            name: source.name.clone(),
            reason: format!("{} is negative", source.split_depth),
        }
    })?;

    build_plan(&source.path, split_depth, &source.name)
}

/// Build a plan with the default reserved-directory exclusions.
pub fn build_plan(root: &Path, split_depth: usize, backup_name: &str) -> Result<PartitionPlan> {
    build_plan_with(root, split_depth, backup_name, &WalkOptions::default())
}

pub fn build_plan_with(
    root: &Path,
    split_depth: usize,
    backup_name: &str,
    options: &WalkOptions,
) -> Result<PartitionPlan> {
    let metadata = match std::fs::metadata(root) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(BackupError::SourceNotFound(root.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };

    let basename = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| backup_name.to_string());

    let mut planner = Planner {
        backup_name,
        split_depth,
        options,
        entries: Vec::new(),
        keys: HashSet::new(),
    };

    if !metadata.is_dir() {
        planner.push(
            PartitionKind::SingleFile,
            String::new(),
            format!("{}/{}", backup_name, basename),
            FileCount::Known(1),
            vec![basename],
        );
    } else if split_depth == 0 {
        let count = FileCount::from_count(count_files(root, options), root);
        planner.push(
            PartitionKind::WholeTreeArchive,
            String::new(),
            format!("{}/{}{}", backup_name, basename, ARCHIVE_SUFFIX),
            count,
            Vec::new(),
        );
    } else {
        let listing = list_dir(root, options)?;
        planner.visit(root, "", 1, listing);
    }

    debug!(
        "Planned {} archive unit(s) for {} (split-depth: {})",
        planner.entries.len(),
        backup_name,
        split_depth
    );

    Ok(PartitionPlan {
        backup_name: backup_name.to_string(),
        root: root.to_path_buf(),
        split_depth,
        entries: planner.entries,
    })
}

struct Planner<'a> {
    backup_name: &'a str,
    split_depth: usize,
    options: &'a WalkOptions,
    entries: Vec<PartitionEntry>,
    keys: HashSet<String>,
}

impl Planner<'_> {
    fn visit(&mut self, dir: &Path, rel: &str, depth: usize, listing: DirListing) {
        let DirListing { files, subdirs } = listing;

        if !files.is_empty() {
            let key = match rel {
                "" => format!("{}/{}{}", self.backup_name, LOOSE_FILES_STEM, ARCHIVE_SUFFIX),
                _ => format!(
                    "{}/{}/{}{}",
                    self.backup_name, rel, LOOSE_FILES_STEM, ARCHIVE_SUFFIX
                ),
            };
            let count = FileCount::Known(files.len());
            self.push(PartitionKind::LooseFilesArchive, rel.to_string(), key, count, files);
        }

        for name in subdirs {
            let child = dir.join(&name);
            let child_rel = join_rel(rel, &name);

            if depth >= self.split_depth {
                self.push_subdirectory(&child, child_rel);
                continue;
            }

            match list_dir(&child, self.options) {
                Ok(child_listing) => self.visit(&child, &child_rel, depth + 1, child_listing),
                Err(e) => {
                    // Cannot descend: archive the unreadable subtree as one unit
                    warn!("Cannot read {}: {}", child.display(), e);
                    let key = format!("{}/{}{}", self.backup_name, child_rel, ARCHIVE_SUFFIX);
                    self.push(
                        PartitionKind::SubdirectoryArchive,
                        child_rel,
                        key,
                        FileCount::Unknown(e.to_string()),
                        Vec::new(),
                    );
                }
            }
        }
    }

    fn push_subdirectory(&mut self, dir: &Path, rel: String) {
        let count = FileCount::from_count(count_files(dir, self.options), dir);
        if count == FileCount::Known(0) {
            debug!("Skipping empty directory {}", dir.display());
            return;
        }

        let key = format!("{}/{}{}", self.backup_name, rel, ARCHIVE_SUFFIX);
        self.push(PartitionKind::SubdirectoryArchive, rel, key, count, Vec::new());
    }

    fn push(
        &mut self,
        kind: PartitionKind,
        source_subpath: String,
        key: String,
        estimated_file_count: FileCount,
        members: Vec<String>,
    ) {
        let remote_key = self.claim_key(key);
        self.entries.push(PartitionEntry {
            kind,
            source_subpath,
            remote_key,
            estimated_file_count,
            members,
        });
    }

    /// Reserve `key`, appending `~N` before the archive suffix if a previous
    /// entry already took it (e.g. a subdirectory literally named `_files`).
    fn claim_key(&mut self, key: String) -> String {
        if self.keys.insert(key.clone()) {
            return key;
        }

        let (stem, suffix) = match key.strip_suffix(ARCHIVE_SUFFIX) {
            Some(stem) => (stem.to_string(), ARCHIVE_SUFFIX),
            None => (key.clone(), ""),
        };
        let mut n = 1;
        loop {
            let candidate = format!("{}~{}{}", stem, n, suffix);
            if self.keys.insert(candidate.clone()) {
                warn!("Remote key {} already used, storing as {}", key, candidate);
                return candidate;
            }
            n += 1;
        }
    }
}

fn join_rel(rel: &str, name: &str) -> String {
    if rel.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", rel, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// Lay out `paths`; entries ending in `/` are directories.
    fn tree(paths: &[&str]) -> std::io::Result<TempDir> {
        let temp_dir = TempDir::new()?;
        for path in paths {
            let full = temp_dir.path().join(path.trim_end_matches('/'));
            if path.ends_with('/') {
                fs::create_dir_all(&full)?;
            } else {
                if let Some(parent) = full.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&full, path.as_bytes())?;
            }
        }
        Ok(temp_dir)
    }

    fn keys(plan: &PartitionPlan) -> Vec<&str> {
        plan.remote_keys().collect()
    }

    fn assert_unique_keys(plan: &PartitionPlan) {
        let unique: HashSet<&str> = plan.remote_keys().collect();
        assert_eq!(unique.len(), plan.len(), "duplicate keys in {:?}", keys(plan));
    }

    #[test]
    fn test_split_depth_one_scenario() -> Result<()> {
        let dir = tree(&["x.txt", "y.txt", "sub/z.txt"])?;
        let plan = build_plan(dir.path(), 1, "name")?;

        assert_eq!(plan.len(), 2);

        let loose = &plan.entries[0];
        assert_eq!(loose.kind, PartitionKind::LooseFilesArchive);
        assert_eq!(loose.remote_key, "name/_files.tar.gz");
        assert_eq!(loose.source_subpath, "");
        assert_eq!(loose.members, vec!["x.txt", "y.txt"]);
        assert_eq!(loose.estimated_file_count, FileCount::Known(2));

        let sub = &plan.entries[1];
        assert_eq!(sub.kind, PartitionKind::SubdirectoryArchive);
        assert_eq!(sub.remote_key, "name/sub.tar.gz");
        assert_eq!(sub.source_subpath, "sub");
        assert_eq!(sub.estimated_file_count, FileCount::Known(1));
        Ok(())
    }

    #[test]
    fn test_split_depth_zero_directory() -> Result<()> {
        let dir = tree(&["a.txt", "deep/b.txt", "deep/er/c.txt"])?;
        let plan = build_plan(dir.path(), 0, "whole")?;

        assert_eq!(plan.len(), 1);
        let entry = &plan.entries[0];
        assert_eq!(entry.kind, PartitionKind::WholeTreeArchive);
        assert_eq!(entry.estimated_file_count, FileCount::Known(3));

        let basename = dir.path().file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(entry.remote_key, format!("whole/{}.tar.gz", basename));
        Ok(())
    }

    #[test]
    fn test_single_file_root() -> Result<()> {
        let dir = tree(&["dump.sql"])?;
        let file = dir.path().join("dump.sql");

        for depth in [0, 3] {
            let plan = build_plan(&file, depth, "db")?;
            assert_eq!(plan.len(), 1);
            assert_eq!(plan.entries[0].kind, PartitionKind::SingleFile);
            assert_eq!(plan.entries[0].remote_key, "db/dump.sql");
        }
        Ok(())
    }

    #[test]
    fn test_missing_root_is_precondition_error() {
        let result = build_plan(Path::new("/nonexistent_path_12345"), 1, "gone");
        assert!(matches!(result, Err(BackupError::SourceNotFound(_))));
    }

    #[test]
    fn test_negative_split_depth_rejected() {
        let source = SourceSpec {
            name: "neg".to_string(),
            path: PathBuf::from("/tmp"),
            split_depth: -1,
            enabled: true,
        };
        assert!(matches!(
            plan_source(&source),
            Err(BackupError::InvalidSplitDepth { .. })
        ));
    }

    #[test]
    fn test_split_depth_two() -> Result<()> {
        let dir = tree(&[
            "root.txt",
            "photos/cover.jpg",
            "photos/2023/a.jpg",
            "photos/2024/b.jpg",
            "photos/2024/raw/c.raw",
            "music/song.mp3",
        ])?;
        let plan = build_plan(dir.path(), 2, "media")?;

        assert_eq!(
            keys(&plan),
            vec![
                "media/_files.tar.gz",
                "media/music/_files.tar.gz",
                "media/photos/_files.tar.gz",
                "media/photos/2023.tar.gz",
                "media/photos/2024.tar.gz",
            ]
        );
        assert_eq!(plan.entries[4].estimated_file_count, FileCount::Known(2));
        assert_eq!(plan.total_files(), (6, false));
        assert_unique_keys(&plan);
        Ok(())
    }

    #[test]
    fn test_split_depth_beyond_tree_degrades() -> Result<()> {
        let dir = tree(&["a.txt", "sub/b.txt"])?;
        let plan = build_plan(dir.path(), 10, "shallow")?;

        assert_eq!(
            keys(&plan),
            vec!["shallow/_files.tar.gz", "shallow/sub/_files.tar.gz"]
        );
        assert_eq!(plan.total_files(), (2, false));
        Ok(())
    }

    #[test]
    fn test_empty_directories_yield_nothing() -> Result<()> {
        let dir = tree(&["empty/", "level/empty/", "level/full/f.txt"])?;
        let plan = build_plan(dir.path(), 2, "e")?;
        assert_eq!(keys(&plan), vec!["e/level/full.tar.gz"]);

        let empty = TempDir::new()?;
        assert!(build_plan(empty.path(), 1, "none")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_reserved_directories_not_planned() -> Result<()> {
        let dir = tree(&["$RECYCLE.BIN/junk", "lost+found/x", "docs/a.txt"])?;
        let plan = build_plan(dir.path(), 1, "vol")?;
        assert_eq!(keys(&plan), vec!["vol/docs.tar.gz"]);
        Ok(())
    }

    #[test]
    fn test_colliding_loose_files_key() -> Result<()> {
        let dir = tree(&["loose.txt", "_files/inner.txt"])?;
        let plan = build_plan(dir.path(), 1, "c")?;

        assert_eq!(keys(&plan), vec!["c/_files.tar.gz", "c/_files~1.tar.gz"]);
        assert_unique_keys(&plan);
        Ok(())
    }

    #[test]
    fn test_keys_unique_across_depths() -> Result<()> {
        let dir = tree(&[
            "a.txt",
            "a/b.txt",
            "a/_files/c.txt",
            "a/a/a/a.txt",
            "b/a.txt",
            "b/b/b/b/b.txt",
        ])?;
        for depth in 0..6 {
            assert_unique_keys(&build_plan(dir.path(), depth, "u")?);
        }
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_unreadable_subdirectory_is_soft_failure() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tree(&["ok/a.txt", "locked/b.txt"])?;
        let locked = dir.path().join("locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000))?;
        let unreadable = fs::read_dir(&locked).is_err();

        let plan = build_plan(dir.path(), 1, "p");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755))?;
        let plan = plan?;

        assert_eq!(keys(&plan), vec!["p/locked.tar.gz", "p/ok.tar.gz"]);
        if unreadable {
            assert!(matches!(
                plan.entries[0].estimated_file_count,
                FileCount::Unknown(_)
            ));
            assert_eq!(plan.total_files(), (1, true));
        }
        Ok(())
    }
}
