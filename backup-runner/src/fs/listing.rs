//! Plain-text file inventory written next to each archive.
//!
//! The inventory lists every file of a source with its size so an operator
//! can tell what an archive was supposed to contain without extracting it.

use crate::fs::walker::{walk_files, WalkOptions};
use crate::utils::format::format_bytes;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Totals reported at the end of an inventory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListingSummary {
    pub total_files: usize,
    pub total_bytes: u64,
}

/// Write the inventory of `root` to `output`.
pub fn write_file_listing(root: &Path, output: &Path) -> io::Result<ListingSummary> {
    let files = walk_files(root, &WalkOptions::default())?;
    let mut out = BufWriter::new(File::create(output)?);

    writeln!(out, "File list of: {}", root.display())?;
    writeln!(out, "Generated at: {}", chrono::Local::now().to_rfc3339())?;
    writeln!(out, "{}", "-".repeat(50))?;
    writeln!(out)?;

    let mut total_bytes = 0u64;
    for file in &files {
        writeln!(out, "{} ({} bytes)", file.relative_path, file.size)?;
        total_bytes += file.size;
    }

    writeln!(out)?;
    writeln!(out, "{}", "-".repeat(50))?;
    writeln!(out, "Total files: {}", files.len())?;
    writeln!(out, "Total size: {} bytes ({})", total_bytes, format_bytes(total_bytes))?;
    out.flush()?;

    Ok(ListingSummary {
        total_files: files.len(),
        total_bytes,
    })
}
