//! Custom error types for the backup runner.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Source path not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("Source holds {size} bytes, over the {limit} byte limit")]
    SourceTooLarge { size: u64, limit: u64 },

    #[error("Invalid split depth for {name}: {reason}")]
    InvalidSplitDepth { name: String, reason: String },

    #[error("Archiving tool failed ({status}): {stderr}")]
    Tool { status: String, stderr: String },

    #[error("Archiving tool timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Run cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, BackupError>;
