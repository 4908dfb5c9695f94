//! Invocation of the external archiving/upload tool.
//!
//! The tool receives the split depth and produces (and uploads) the archives
//! itself; this module only builds its command line, runs it under a
//! timeout and captures its output.

use crate::config::{Config, SourceSpec};
use crate::utils::errors::{BackupError, Result};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Output markers meaning the tool validated the upload itself
const REMOTE_SUCCESS_MARKERS: &[&str] = &["Validation passed", "uploaded successfully"];

/// Command line for one source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ToolInvocation {
    pub fn for_source(config: &Config, source: &SourceSpec) -> Self {
        let mut args = vec![
            "--bucket".to_string(),
            config.s3.bucket.clone(),
            "--name".to_string(),
            source.name.clone(),
            "--path".to_string(),
            source.path.display().to_string(),
            "--split-depth".to_string(),
            source.split_depth.to_string(),
            "--storage-class".to_string(),
            config.s3.storage_class.clone(),
        ];

        if config.validation.enabled {
            args.push("--validate".to_string());
        }
        if config.validation.keep_local_copy {
            args.push("--keep-local".to_string());
        }

        Self {
            program: config.backup.script_path.clone(),
            args,
        }
    }

    /// Printable form for logs
    pub fn display(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Run the tool to completion.
    ///
    /// Fails on a non-zero exit, when `timeout` elapses, or when `cancel`
    /// fires. The child process is killed in the last two cases.
    pub async fn run(&self, timeout: Duration, cancel: &CancellationToken) -> Result<ToolOutput> {
        info!("Running: {}", self.display());

        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::select! {
            result = tokio::time::timeout(timeout, child.wait_with_output()) => {
                match result {
                    Ok(output) => output?,
                    Err(_) => return Err(BackupError::Timeout(timeout)),
                }
            }
            _ = cancel.cancelled() => {
                return Err(BackupError::Cancelled);
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Err(BackupError::Tool {
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        debug!("Tool output: {}", stdout);
        Ok(ToolOutput { stdout, stderr })
    }
}

/// Captured output of a successful run
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Whether the tool reported a validated upload on stdout
    pub fn reports_remote_success(&self) -> bool {
        REMOTE_SUCCESS_MARKERS
            .iter()
            .any(|marker| self.stdout.contains(marker))
    }
}
