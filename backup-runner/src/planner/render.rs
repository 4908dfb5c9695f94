//! Human-readable preview of a partition plan.
//!
//! ```text
//! media -> /srv/media (split-depth: 2, 4 archives, 6 files)
//!   [files] 1 file -> media/_files.tar.gz
//!   photos/
//!     [files] 1 file -> media/photos/_files.tar.gz
//!     2023/ 1 file -> media/photos/2023.tar.gz
//!     2024/ [error: Permission denied (os error 13)] -> media/photos/2024.tar.gz
//! ```

use super::{FileCount, PartitionKind, PartitionPlan};
use crate::utils::format::pluralize_files;
use std::collections::HashSet;
use std::fmt::Write;
use std::path::Path;

fn describe(count: &FileCount) -> String {
    match count {
        FileCount::Known(n) => pluralize_files(*n),
        FileCount::Unknown(reason) => format!("[error: {}]", reason),
    }
}

fn indent(level: usize) -> String {
    "  ".repeat(level + 1)
}

/// Render `plan` as an indented tree, one line per archive unit.
pub fn render_plan(plan: &PartitionPlan) -> String {
    let mut out = String::new();
    let (total, partial) = plan.total_files();
    let _ = writeln!(
        out,
        "{} -> {} (split-depth: {}, {} archive{}, {}{})",
        plan.backup_name,
        plan.root.display(),
        plan.split_depth,
        plan.len(),
        if plan.len() == 1 { "" } else { "s" },
        if partial { "at least " } else { "" },
        pluralize_files(total),
    );

    if plan.is_empty() {
        let _ = writeln!(out, "{}(nothing to archive)", indent(0));
        return out;
    }

    let mut printed_dirs: HashSet<String> = HashSet::new();

    for entry in &plan.entries {
        let (parent, label) = match entry.kind {
            PartitionKind::LooseFilesArchive => (
                entry.source_subpath.as_str(),
                format!("[files] {}", describe(&entry.estimated_file_count)),
            ),
            PartitionKind::SubdirectoryArchive => {
                let (parent, name) = match entry.source_subpath.rsplit_once('/') {
                    Some((parent, name)) => (parent, name),
                    None => ("", entry.source_subpath.as_str()),
                };
                (parent, format!("{}/ {}", name, describe(&entry.estimated_file_count)))
            }
            PartitionKind::WholeTreeArchive => (
                "",
                format!("[tree] {}", describe(&entry.estimated_file_count)),
            ),
            PartitionKind::SingleFile => ("", "[single file]".to_string()),
        };

        // Headers for intermediate directories not yet shown
        let mut level = 0;
        if !parent.is_empty() {
            let mut prefix = String::new();
            for component in parent.split('/') {
                if !prefix.is_empty() {
                    prefix.push('/');
                }
                prefix.push_str(component);
                if printed_dirs.insert(prefix.clone()) {
                    let _ = writeln!(out, "{}{}/", indent(level), component);
                }
                level += 1;
            }
        }

        let _ = writeln!(out, "{}{} -> {}", indent(level), label, entry.remote_key);
    }

    out
}

/// One-line preview for a source whose plan could not be built.
pub fn render_error(name: &str, root: &Path, error: &dyn std::fmt::Display) -> String {
    format!("{} -> {} [error: {}]\n", name, root.display(), error)
}
