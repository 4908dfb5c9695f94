//! Logging configuration using tracing.
//!
//! Logs go to stdout and, when a log directory is configured, to a daily
//! `backup_YYYYMMDD.log` file in that directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_PREFIX: &str = "backup_";
const LOG_SUFFIX: &str = ".log";

/// Path of today's log file inside `log_dir`
pub fn log_file_path(log_dir: &Path) -> PathBuf {
    let today = chrono::Local::now().format("%Y%m%d");
    log_dir.join(format!("{}{}{}", LOG_PREFIX, today, LOG_SUFFIX))
}

/// Initialize logging with the specified level
pub fn init(level: &str, log_dir: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_file_path(dir))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(())
}

/// Remove `backup_*.log` files last modified more than `keep_days` ago.
///
/// Returns the number of files removed. Files that cannot be inspected or
/// removed are logged and left in place.
pub fn cleanup_old_logs(log_dir: &Path, keep_days: u64) -> std::io::Result<usize> {
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(keep_days.saturating_mul(24 * 60 * 60)))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut removed = 0;
    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with(LOG_PREFIX) || !name.ends_with(LOG_SUFFIX) {
            continue;
        }

        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                tracing::warn!("Cannot read mtime of {}: {}", name, e);
                continue;
            }
        };

        if modified < cutoff {
            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    tracing::info!("Removed old log file: {}", name);
                    removed += 1;
                }
                Err(e) => tracing::warn!("Failed to remove old log file {}: {}", name, e),
            }
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn age_file(path: &Path, days: u64) -> std::io::Result<()> {
        let file = fs::OpenOptions::new().write(true).open(path)?;
        file.set_modified(SystemTime::now() - Duration::from_secs(days * 24 * 60 * 60))
    }

    #[test]
    fn test_cleanup_removes_only_expired_backup_logs() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let dir = temp_dir.path();

        fs::write(dir.join("backup_20240101.log"), b"old")?;
        fs::write(dir.join("backup_20991231.log"), b"fresh")?;
        fs::write(dir.join("other.log"), b"unrelated")?;
        age_file(&dir.join("backup_20240101.log"), 45)?;
        age_file(&dir.join("other.log"), 45)?;

        let removed = cleanup_old_logs(dir, 30)?;

        assert_eq!(removed, 1);
        assert!(!dir.join("backup_20240101.log").exists());
        assert!(dir.join("backup_20991231.log").exists());
        assert!(dir.join("other.log").exists());
        Ok(())
    }

    #[test]
    fn test_cleanup_with_huge_retention_keeps_everything() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let dir = temp_dir.path();

        fs::write(dir.join("backup_20240101.log"), b"old")?;
        age_file(&dir.join("backup_20240101.log"), 45)?;

        assert_eq!(cleanup_old_logs(dir, u64::MAX)?, 0);
        assert!(dir.join("backup_20240101.log").exists());
        Ok(())
    }

    #[test]
    fn test_log_file_path_uses_daily_name() {
        let path = log_file_path(Path::new("/var/log/backup"));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("backup_"));
        assert!(name.ends_with(".log"));
        assert_eq!(name.len(), "backup_YYYYMMDD.log".len());
    }
}
