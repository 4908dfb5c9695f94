//! gzip-compressed tar extraction into a scratch directory.

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use tempfile::TempDir;

/// Unpack `archive` into a fresh temporary directory.
///
/// The directory is removed when the returned guard is dropped, whichever
/// way the caller exits.
pub fn extract_to_scratch(archive: &Path) -> io::Result<TempDir> {
    let scratch = tempfile::Builder::new()
        .prefix("backup-validate-")
        .tempdir()?;
    extract_tar_gz(archive, scratch.path())?;
    Ok(scratch)
}

/// Unpack a `.tar.gz` into `dest`. Entries escaping `dest` are skipped by `tar`.
pub fn extract_tar_gz(archive: &Path, dest: &Path) -> io::Result<()> {
    let file = File::open(archive)?;
    let mut tar = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    tar.set_preserve_mtime(false);
    tar.unpack(dest)
}
