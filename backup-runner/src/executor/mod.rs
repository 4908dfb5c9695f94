//! Backup run executor - orchestrates the per-source backup process.
//!
//! For every enabled source, in order:
//! - plan the archive units (split depth)
//! - write the file inventory and, if enabled, log the source fingerprint
//! - run the external archiving tool under a timeout
//! - validate every local archive the tool left behind, or fall back to the
//!   tool's own report
//! - notify the outcome
//!
//! One source failing never stops the others. A report with the aggregate
//! result is sent at the end of the run.

pub mod tool;

use crate::config::{Config, SourceSpec};
use crate::fs::fingerprint::{deep_fingerprint, shallow_fingerprint};
use crate::fs::listing::write_file_listing;
use crate::notify::{escape_html, Notifier};
use crate::planner::{plan_source, PartitionKind, PartitionPlan};
use crate::utils::errors::{BackupError, Result};
use crate::utils::format::format_duration;
use crate::validator::{validate_archive, validate_loose_archive, VerificationResult};
use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tool::{ToolInvocation, ToolOutput};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// How a source's backup was confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// Local archives were extracted and compared
    Local,
    /// The tool reported a validated upload
    Remote,
    /// Neither was possible; treated as success
    Inconclusive,
}

/// Result of backing up one source
#[derive(Debug, Clone)]
pub struct SourceOutcome {
    pub name: String,
    pub success: bool,
    pub detail: String,
    pub confirmation: Option<Confirmation>,
    pub plan_entries: Option<usize>,
    /// `(archive path, verdict)` per validated archive
    pub verifications: Vec<(PathBuf, VerificationResult)>,
}

impl SourceOutcome {
    fn failed(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            success: false,
            detail: detail.into(),
            confirmation: None,
            plan_entries: None,
            verifications: Vec::new(),
        }
    }
}

/// Aggregate of a whole run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub outcomes: Vec<SourceOutcome>,
    pub duration: Duration,
    pub finished_at: DateTime<Local>,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.success)
    }

    /// Final report message
    pub fn report(&self, host: &str) -> String {
        let mut report = format!(
            "📊 <b>Backup report</b> ({})\n\n\
             ✅ Succeeded: {}/{}\n\
             ❌ Failed: {}\n\
             ⏱️ Duration: {}\n\
             📅 Finished at: {}",
            escape_html(host),
            self.succeeded(),
            self.outcomes.len(),
            self.failed(),
            format_duration(self.duration.as_secs()),
            self.finished_at.format("%d/%m/%Y %H:%M:%S"),
        );

        for outcome in self.outcomes.iter().filter(|o| !o.success) {
            report.push_str(&format!(
                "\n• <b>{}</b>: {}",
                escape_html(&outcome.name),
                escape_html(&outcome.detail)
            ));
        }

        report
    }
}

/// Main backup executor
pub struct BackupExecutor<N: Notifier> {
    config: Arc<Config>,
    notifier: N,
    cancel_token: CancellationToken,
}

impl<N: Notifier> BackupExecutor<N> {
    /// Create a new backup executor (no cancellation support)
    pub fn new(config: Config, notifier: N) -> Self {
        Self::with_cancel(config, notifier, CancellationToken::new())
    }

    /// Create a new backup executor with cancellation support
    pub fn with_cancel(config: Config, notifier: N, cancel_token: CancellationToken) -> Self {
        Self {
            config: Arc::new(config),
            notifier,
            cancel_token,
        }
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Back up every source in order and send the final report
    pub async fn execute_all(&self, sources: &[SourceSpec]) -> RunSummary {
        let start_time = Instant::now();
        let run_id = uuid::Uuid::new_v4();

        info!("Starting backup run {} ({} source(s))", run_id, sources.len());
        self.notify("🚀 <b>Starting automated backup</b>").await;

        let mut outcomes = Vec::with_capacity(sources.len());
        for source in sources {
            if self.cancel_token.is_cancelled() {
                warn!("Run {} cancelled, skipping {}", run_id, source.name);
                outcomes.push(SourceOutcome::failed(&source.name, BackupError::Cancelled.to_string()));
                continue;
            }

            let span = info_span!("source", run = %run_id, name = %source.name);
            outcomes.push(self.execute(source).instrument(span).await);
        }

        let summary = RunSummary {
            outcomes,
            duration: start_time.elapsed(),
            finished_at: Local::now(),
        };

        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown host".to_string());
        self.notify(&summary.report(&host)).await;

        info!(
            "Run {} finished: {}/{} succeeded in {}",
            run_id,
            summary.succeeded(),
            summary.outcomes.len(),
            format_duration(summary.duration.as_secs())
        );

        summary
    }

    /// Back up one source; failures are reported, never returned
    pub async fn execute(&self, source: &SourceSpec) -> SourceOutcome {
        let name = escape_html(&source.name);
        self.notify(&format!(
            "🔄 Starting backup for <b>{}</b> (split-depth: {})",
            name, source.split_depth
        ))
        .await;

        match self.run_source(source).await {
            Ok(outcome) => {
                let message = match (outcome.success, outcome.confirmation) {
                    (false, _) => format!(
                        "❌ Backup validation failed for <b>{}</b>: {}",
                        name,
                        escape_html(&outcome.detail)
                    ),
                    (true, Some(Confirmation::Local)) => {
                        format!("✅ Backup and validation complete for <b>{}</b>", name)
                    }
                    (true, Some(Confirmation::Remote)) => {
                        format!("✅ Backup validated remotely for <b>{}</b>", name)
                    }
                    (true, _) => format!(
                        "⚠️ Backup uploaded but validation inconclusive for <b>{}</b>",
                        name
                    ),
                };
                self.notify(&message).await;
                outcome
            }
            Err(e) => {
                error!("Backup of {} failed: {}", source.name, e);
                self.notify(&format!(
                    "❌ Backup failed for <b>{}</b>: {}",
                    name,
                    escape_html(&e.to_string())
                ))
                .await;
                SourceOutcome::failed(&source.name, e.to_string())
            }
        }
    }

    async fn run_source(&self, source: &SourceSpec) -> Result<SourceOutcome> {
        info!(
            "Starting backup for {} (split-depth: {})",
            source.name, source.split_depth
        );

        if !source.path.exists() {
            return Err(BackupError::SourceNotFound(source.path.clone()));
        }

        let plan = {
            let source = source.clone();
            blocking(move || plan_source(&source)).await?
        };
        let (total_files, partial) = plan.total_files();
        info!(
            "Planned {} archive unit(s) covering {}{} file(s)",
            plan.len(),
            if partial { "at least " } else { "" },
            total_files
        );

        let backup = &self.config.backup;
        std::fs::create_dir_all(&backup.temp_dir)?;

        let listing_path = backup.listing_path(&source.name);
        let listing = {
            let root = source.path.clone();
            let output = listing_path.clone();
            blocking(move || Ok(write_file_listing(&root, &output)?)).await?
        };
        info!(
            "File list written to {} ({} files, {} bytes)",
            listing_path.display(),
            listing.total_files,
            listing.total_bytes
        );

        if let Some(limit) = backup.max_size_bytes() {
            if listing.total_bytes > limit {
                return Err(BackupError::SourceTooLarge {
                    size: listing.total_bytes,
                    limit,
                });
            }
        }

        if self.config.validation.enabled {
            let root = source.path.clone();
            let levels: Vec<String> = plan
                .entries
                .iter()
                .filter(|entry| entry.kind == PartitionKind::LooseFilesArchive)
                .map(|entry| entry.source_subpath.clone())
                .collect();
            let (fingerprint, level_fingerprints) = blocking(move || {
                let deep = deep_fingerprint(&root)?;
                let mut shallow = Vec::with_capacity(levels.len());
                for level in levels {
                    let fingerprint = shallow_fingerprint(&root.join(&level))?;
                    shallow.push((level, fingerprint));
                }
                Ok((deep, shallow))
            })
            .await?;
            info!(
                "Source fingerprint for {}: {} ({} files)",
                source.name,
                fingerprint.digest,
                fingerprint.entries.len()
            );
            for (level, level_fingerprint) in &level_fingerprints {
                debug!(
                    "Loose files fingerprint for {}/{}: {}",
                    source.name, level, level_fingerprint.digest
                );
            }
            if !fingerprint.is_complete() {
                warn!(
                    "{} file(s) could not be read and are not covered by the fingerprint",
                    fingerprint.skipped.len()
                );
            }
        }

        let invocation = ToolInvocation::for_source(&self.config, source);
        let output = invocation.run(backup.timeout(), &self.cancel_token).await?;
        info!("Archiving tool finished for {}", source.name);

        let mut outcome = SourceOutcome {
            name: source.name.clone(),
            success: true,
            detail: String::new(),
            confirmation: None,
            plan_entries: Some(plan.len()),
            verifications: Vec::new(),
        };

        if self.config.validation.deep_validation {
            outcome.verifications = self.validate_local_archives(source, plan).await?;
        }

        if outcome.verifications.is_empty() {
            self.confirm_from_output(&mut outcome, &output);
            return Ok(outcome);
        }

        outcome.confirmation = Some(Confirmation::Local);
        let failures: Vec<String> = outcome
            .verifications
            .iter()
            .filter(|(_, result)| result.is_failed())
            .map(|(archive, result)| format!("{}: {}", archive.display(), result.summary()))
            .collect();

        if failures.is_empty() {
            outcome.detail = format!("{} archive(s) verified", outcome.verifications.len());
        } else {
            outcome.success = false;
            outcome.detail = failures.join("; ");
        }

        Ok(outcome)
    }

    /// Validate the archives the tool left in the temp directory.
    ///
    /// Archives are looked up per plan entry under `{temp_dir}/{remote_key}`.
    /// If at least one exists, every archive unit is validated and an absent
    /// one fails as not found. If none exist, the single
    /// `{temp_dir}/{name}.tar.gz` is checked against the whole source.
    async fn validate_local_archives(
        &self,
        source: &SourceSpec,
        plan: PartitionPlan,
    ) -> Result<Vec<(PathBuf, VerificationResult)>> {
        let temp_dir = self.config.backup.temp_dir.clone();
        let fallback = self.config.backup.archive_path(&source.name);
        let root = source.path.clone();
        let policy = self.config.validation.policy();

        blocking(move || {
            let units: Vec<_> = plan
                .entries
                .iter()
                .filter(|entry| entry.kind != PartitionKind::SingleFile)
                .map(|entry| (entry, temp_dir.join(&entry.remote_key)))
                .collect();

            // Once any per-unit archive exists, a missing one is a failure
            if units.iter().any(|(_, archive)| archive.is_file()) {
                let results: Vec<_> = units
                    .into_iter()
                    .map(|(entry, archive)| {
                        let subtree = root.join(&entry.source_subpath);
                        let result = match entry.kind {
                            PartitionKind::LooseFilesArchive => {
                                validate_loose_archive(&archive, &subtree, &entry.members, &policy)
                            }
                            _ => validate_archive(&archive, &subtree, &policy),
                        };
                        (archive, result)
                    })
                    .collect();
                return Ok(results);
            }

            if fallback.is_file() {
                let result = validate_archive(&fallback, &root, &policy);
                return Ok(vec![(fallback, result)]);
            }

            Ok(Vec::new())
        })
        .await
    }

    fn confirm_from_output(&self, outcome: &mut SourceOutcome, output: &ToolOutput) {
        if output.reports_remote_success() {
            outcome.confirmation = Some(Confirmation::Remote);
            outcome.detail = "validated by the archiving tool".to_string();
        } else {
            warn!(
                "No local archive for {} and no validation report from the tool",
                outcome.name
            );
            outcome.confirmation = Some(Confirmation::Inconclusive);
            outcome.detail = "uploaded, validation inconclusive".to_string();
        }
    }

    async fn notify(&self, message: &str) {
        if let Err(e) = self.notifier.notify(message).await {
            error!("Failed to send notification: {}", e);
        }
    }
}

/// Run blocking file system work off the async runtime
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BackupError::Task(e.to_string()))?
}
