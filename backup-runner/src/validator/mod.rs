//! Archive integrity validation.
//!
//! A produced archive is extracted into a scratch directory and compared
//! with the source tree it was made from:
//!
//! 1. Every source file must be present in the archive. Missing files fail
//!    validation. Extra files are reported but tolerated.
//! 2. File contents are compared by SHA-256, for every file or, above the
//!    sample limit, for a uniform random sample of that many files.
//!
//! A `Verified` result therefore guarantees completeness, and byte equality
//! only for the files that were compared.
//!
//! Validation never returns an error: anything that goes wrong becomes a
//! `Failed` verdict carrying the reason.

pub mod extract;

use crate::fs::fingerprint::hash_entry;
use crate::fs::walker::{walk_relative_files, WalkOptions};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::path::Path;
use tracing::{error, info, warn};

pub const DEFAULT_SAMPLE_LIMIT: usize = 100;

pub const REASON_ARCHIVE_NOT_FOUND: &str = "archive not found";

/// How thoroughly archives are checked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationPolicy {
    /// When false, validation is skipped entirely
    pub deep_validation: bool,

    /// Maximum number of files whose content is compared
    pub sample_limit: usize,

    /// Fixed RNG seed for reproducible sampling; unseeded when `None`
    pub seed: Option<u64>,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            deep_validation: true,
            sample_limit: DEFAULT_SAMPLE_LIMIT,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VerificationStatus {
    Verified,
    Failed,
    Skipped,
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerificationStatus::Verified => "verified",
            VerificationStatus::Failed => "failed",
            VerificationStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub status: VerificationStatus,

    /// Why validation failed or was skipped
    pub reason: Option<String>,

    /// In the source but not in the archive
    pub missing_files: BTreeSet<String>,

    /// In the archive but not in the source
    pub extra_files: BTreeSet<String>,

    /// Compared files whose content hash differed
    pub sampled_mismatches: BTreeSet<String>,

    /// Number of files whose content was compared
    pub files_checked: usize,
}

impl VerificationResult {
    fn with_status(status: VerificationStatus, reason: Option<String>) -> Self {
        Self {
            status,
            reason,
            missing_files: BTreeSet::new(),
            extra_files: BTreeSet::new(),
            sampled_mismatches: BTreeSet::new(),
            files_checked: 0,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::with_status(VerificationStatus::Skipped, Some(reason.into()))
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::with_status(VerificationStatus::Failed, Some(reason.into()))
    }

    pub fn is_failed(&self) -> bool {
        self.status == VerificationStatus::Failed
    }

    /// One-line description for logs and notifications
    pub fn summary(&self) -> String {
        let mut summary = format!("{} ({} files checked", self.status, self.files_checked);
        if !self.missing_files.is_empty() {
            summary.push_str(&format!(", {} missing", self.missing_files.len()));
        }
        if !self.extra_files.is_empty() {
            summary.push_str(&format!(", {} extra", self.extra_files.len()));
        }
        if !self.sampled_mismatches.is_empty() {
            summary.push_str(&format!(", {} mismatched", self.sampled_mismatches.len()));
        }
        summary.push(')');
        if let Some(reason) = &self.reason {
            summary.push_str(": ");
            summary.push_str(reason);
        }
        summary
    }
}

/// Validate `archive` against the source tree at `source_root`.
pub fn validate_archive(
    archive: &Path,
    source_root: &Path,
    policy: &ValidationPolicy,
) -> VerificationResult {
    run_validation(archive, source_root, policy, || {
        Ok(walk_relative_files(source_root, &WalkOptions::unfiltered())?
            .into_iter()
            .collect())
    })
}

/// Validate a loose-files archive: only `members`, the files directly inside
/// `dir`, are expected in it.
pub fn validate_loose_archive(
    archive: &Path,
    dir: &Path,
    members: &[String],
    policy: &ValidationPolicy,
) -> VerificationResult {
    run_validation(archive, dir, policy, || Ok(members.iter().cloned().collect()))
}

fn run_validation<F>(
    archive: &Path,
    source_root: &Path,
    policy: &ValidationPolicy,
    original: F,
) -> VerificationResult
where
    F: FnOnce() -> io::Result<BTreeSet<String>>,
{
    if !policy.deep_validation {
        return VerificationResult::skipped("deep validation disabled");
    }

    if !archive.exists() {
        error!("Archive {} not found", archive.display());
        return VerificationResult::failed(REASON_ARCHIVE_NOT_FOUND);
    }

    info!(
        "Validating archive {} against {}",
        archive.display(),
        source_root.display()
    );

    match compare(archive, source_root, policy, original) {
        Ok(result) => {
            info!("Validation of {}: {}", archive.display(), result.summary());
            result
        }
        Err(e) => {
            error!("Validation of {} aborted: {}", archive.display(), e);
            VerificationResult::failed(e.to_string())
        }
    }
}

fn compare<F>(
    archive: &Path,
    source_root: &Path,
    policy: &ValidationPolicy,
    original: F,
) -> io::Result<VerificationResult>
where
    F: FnOnce() -> io::Result<BTreeSet<String>>,
{
    let scratch = extract::extract_to_scratch(archive)
        .map_err(|e| io::Error::new(e.kind(), format!("extraction failed: {}", e)))?;

    let original = original()?;
    let extracted: BTreeSet<String> = walk_relative_files(scratch.path(), &WalkOptions::unfiltered())?
        .into_iter()
        .collect();

    let mut result = VerificationResult::with_status(VerificationStatus::Verified, None);
    result.missing_files = original.difference(&extracted).cloned().collect();
    result.extra_files = extracted.difference(&original).cloned().collect();

    if !result.extra_files.is_empty() {
        warn!(
            "{} extra file(s) in archive: {:?}",
            result.extra_files.len(),
            result.extra_files
        );
    }

    if !result.missing_files.is_empty() {
        error!(
            "{} file(s) missing from archive: {:?}",
            result.missing_files.len(),
            result.missing_files
        );
        result.status = VerificationStatus::Failed;
        result.reason = Some(format!(
            "{} file(s) missing from archive",
            result.missing_files.len()
        ));
        return Ok(result);
    }

    let candidates: Vec<String> = original.into_iter().collect();
    let sample = sample_paths(&candidates, policy.sample_limit, policy.seed);

    for rel in &sample {
        let (_, expected) = hash_entry(&source_root.join(rel))?;
        let (_, actual) = hash_entry(&scratch.path().join(rel))?;
        if expected != actual {
            error!("Content hash differs for {}", rel);
            result.sampled_mismatches.insert(rel.clone());
        }
    }
    result.files_checked = sample.len();

    if !result.sampled_mismatches.is_empty() {
        result.status = VerificationStatus::Failed;
        result.reason = Some(format!(
            "content mismatch in {} file(s)",
            result.sampled_mismatches.len()
        ));
    }

    Ok(result)
}

/// Pick at most `limit` distinct paths uniformly at random, sorted.
///
/// All paths are returned when there are no more than `limit`.
pub fn sample_paths(paths: &[String], limit: usize, seed: Option<u64>) -> Vec<String> {
    if paths.len() <= limit {
        return paths.to_vec();
    }

    let mut sample: Vec<String> = match seed {
        Some(seed) => paths
            .choose_multiple(&mut StdRng::seed_from_u64(seed), limit)
            .cloned()
            .collect(),
        None => paths
            .choose_multiple(&mut rand::thread_rng(), limit)
            .cloned()
            .collect(),
    };
    sample.sort_unstable();
    sample
}
