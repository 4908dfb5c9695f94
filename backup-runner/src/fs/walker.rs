//! Deterministic directory traversal.
//!
//! Two flavours of walking are provided:
//! - [`list_dir`] reads a single directory and splits it into sorted file and
//!   subdirectory names; the partition planner is built on it.
//! - [`walk_files`] / [`walk_relative_files`] recurse through a whole subtree
//!   with `walkdir`; used for file counts, inventories and validation.
//!
//! Names are sorted by byte order so results are reproducible across runs
//! and platforms.

use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Directory names that never become part of a backup: trash/recycle bins
/// and volume metadata folders.
pub const RESERVED_DIR_NAMES: &[&str] = &[
    "$RECYCLE.BIN",
    "System Volume Information",
    "lost+found",
    ".Trash",
    ".Trashes",
    ".Trash-0",
    ".Trash-1000",
    ".Spotlight-V100",
    ".fseventsd",
    ".TemporaryItems",
    ".DocumentRevisions-V100",
    "@eaDir",
    "#recycle",
];

/// Options for directory walking
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Follow symbolic links
    pub follow_links: bool,

    /// Directory names skipped entirely (exact match)
    pub reserved_dirs: Vec<String>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            follow_links: false,
            reserved_dirs: RESERVED_DIR_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl WalkOptions {
    /// Walk everything, including reserved directories.
    pub fn unfiltered() -> Self {
        Self {
            follow_links: false,
            reserved_dirs: Vec::new(),
        }
    }

    fn is_reserved(&self, name: &str) -> bool {
        self.reserved_dirs.iter().any(|r| r == name)
    }
}

/// Contents of one directory, split by entry type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirListing {
    /// Names of non-directory entries, byte-order sorted
    pub files: Vec<String>,

    /// Names of subdirectories (reserved names removed), byte-order sorted
    pub subdirs: Vec<String>,
}

impl DirListing {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.subdirs.is_empty()
    }
}

/// List the direct children of `dir`.
///
/// Symlinks are reported as files; they are never descended into.
/// Any error reading the directory or one of its entries is returned.
pub fn list_dir(dir: &Path, options: &WalkOptions) -> std::io::Result<DirListing> {
    let mut listing = DirListing::default();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            if !options.is_reserved(&name) {
                listing.subdirs.push(name);
            }
        } else {
            listing.files.push(name);
        }
    }

    listing.files.sort_unstable_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
    listing.subdirs.sort_unstable_by(|a, b| a.as_bytes().cmp(b.as_bytes()));

    Ok(listing)
}

/// Information about a file discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// Relative path from the root, `/`-separated
    pub relative_path: String,

    /// File size in bytes (size of the link itself for symlinks)
    pub size: u64,

    /// Is this a symlink?
    pub is_symlink: bool,
}

/// Render a path relative to a walk root with `/` separators.
pub fn relative_key(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn walker(root: &Path, options: &WalkOptions) -> impl Iterator<Item = walkdir::Result<DirEntry>> {
    let options = options.clone();
    WalkDir::new(root)
        .follow_links(options.follow_links)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |entry| !should_exclude(entry, &options))
}

/// Walk a directory tree and collect every non-directory entry,
/// depth-first in sorted order.
pub fn walk_files(root: &Path, options: &WalkOptions) -> std::io::Result<Vec<FileInfo>> {
    let mut files = Vec::new();

    for entry in walker(root, options) {
        let entry = entry?;
        if entry.file_type().is_dir() {
            continue;
        }

        let metadata = entry.metadata()?;
        files.push(FileInfo {
            relative_path: relative_key(entry.path(), root),
            path: entry.path().to_path_buf(),
            size: metadata.len(),
            is_symlink: entry.path_is_symlink(),
        });
    }

    Ok(files)
}

/// Relative paths of every non-directory entry below `root`, sorted.
pub fn walk_relative_files(root: &Path, options: &WalkOptions) -> std::io::Result<Vec<String>> {
    let mut paths = Vec::new();

    for entry in walker(root, options) {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            paths.push(relative_key(entry.path(), root));
        }
    }

    paths.sort_unstable();
    Ok(paths)
}

/// Count non-directory entries below `root` (fast, without collecting)
pub fn count_files(root: &Path, options: &WalkOptions) -> std::io::Result<usize> {
    let mut count = 0;

    for entry in walker(root, options) {
        if !entry?.file_type().is_dir() {
            count += 1;
        }
    }

    Ok(count)
}

/// Reserved directory names are pruned, but never the walk root itself
fn should_exclude(entry: &DirEntry, options: &WalkOptions) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && options.is_reserved(&entry.file_name().to_string_lossy())
}
