//! Configuration management for the backup runner.
//!
//! Loads configuration from a TOML file with environment variable overrides
//! (`BACKUP_RUNNER__SECTION__KEY`). When the file does not exist a template
//! is written in its place and loading fails so the operator can fill it in.

use crate::validator::{ValidationPolicy, DEFAULT_SAMPLE_LIMIT};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

const TOKEN_PLACEHOLDER: &str = "YOUR_TELEGRAM_TOKEN_HERE";
const CHAT_ID_PLACEHOLDER: &str = "YOUR_CHAT_ID_HERE";
const BUCKET_PLACEHOLDER: &str = "YOUR_S3_BUCKET_HERE";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Notification target; notifications only go to the log without it
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
    pub s3: S3Config,
    pub backup: BackupConfig,
    pub folders: Vec<SourceSpec>,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot API token
    pub token: String,

    /// Chat receiving the messages
    pub chat_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// Destination bucket
    pub bucket: String,

    /// Storage class passed to the archiving tool
    #[serde(default = "default_storage_class")]
    pub storage_class: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// External archiving/upload tool
    pub script_path: PathBuf,

    /// Where the tool leaves `{name}.tar.gz` and where inventories go
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Largest source accepted for one run, in GB; 0 disables the check
    #[serde(default = "default_max_size_gb")]
    pub max_size_gb: u64,

    /// Per-source limit for one tool invocation
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// A named backup target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Unique name, also the first component of every remote key
    pub name: String,

    /// Directory (or single file) to back up
    pub path: PathBuf,

    /// Tree depth at which archive units are cut; 0 archives the whole tree
    pub split_depth: i64,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily log files; stdout only when unset
    #[serde(default = "default_log_dir")]
    pub dir: Option<PathBuf>,

    /// Days to keep old log files
    #[serde(default = "default_keep_days")]
    pub keep_days: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Fingerprint sources and ask the tool to validate remotely
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Ask the tool to keep its local archive copy
    #[serde(default)]
    pub keep_local_copy: bool,

    /// Extract and compare local archives
    #[serde(default = "default_true")]
    pub deep_validation: bool,

    /// Maximum files content-compared per archive
    #[serde(default = "default_sample_limit")]
    pub sample_limit: usize,
}

// Default values
fn default_true() -> bool {
    true
}

fn default_storage_class() -> String {
    "DEEP_ARCHIVE".to_string()
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_max_size_gb() -> u64 {
    1024
}

fn default_timeout_secs() -> u64 {
    3600
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> Option<PathBuf> {
    Some(PathBuf::from("logs"))
}

fn default_keep_days() -> u64 {
    30
}

fn default_sample_limit() -> usize {
    DEFAULT_SAMPLE_LIMIT
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: default_log_dir(),
            keep_days: default_keep_days(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            keep_local_copy: false,
            deep_validation: true,
            sample_limit: default_sample_limit(),
        }
    }
}

impl ValidationConfig {
    pub fn policy(&self) -> ValidationPolicy {
        ValidationPolicy {
            deep_validation: self.deep_validation,
            sample_limit: self.sample_limit,
            seed: None,
        }
    }
}

impl BackupConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Size ceiling in bytes, `None` when unlimited
    pub fn max_size_bytes(&self) -> Option<u64> {
        match self.max_size_gb {
            0 => None,
            gb => Some(gb.saturating_mul(1024 * 1024 * 1024)),
        }
    }

    /// Local archive the tool produces for `name`
    pub fn archive_path(&self, name: &str) -> PathBuf {
        self.temp_dir.join(format!("{}.tar.gz", name))
    }

    /// File inventory written before archiving `name`
    pub fn listing_path(&self, name: &str) -> PathBuf {
        self.temp_dir.join(format!("{}_files.txt", name))
    }
}

impl Config {
    /// Load configuration from a TOML file plus environment overrides.
    ///
    /// A missing file is replaced by a template and reported as an error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            Self::write_template(path)?;
            bail!(
                "Configuration file created at {}; edit it and run again",
                path.display()
            );
        }

        let config: Config = ::config::Config::builder()
            .add_source(::config::File::from(path).format(::config::FileFormat::Toml))
            .add_source(
                ::config::Environment::with_prefix("BACKUP_RUNNER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read {}", path.display()))?
            .try_deserialize()
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string (no environment overrides)
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration with placeholder values, written for first-time setup
    pub fn template() -> Self {
        Config {
            telegram: Some(TelegramConfig {
                token: TOKEN_PLACEHOLDER.to_string(),
                chat_id: CHAT_ID_PLACEHOLDER.to_string(),
            }),
            s3: S3Config {
                bucket: BUCKET_PLACEHOLDER.to_string(),
                storage_class: default_storage_class(),
            },
            backup: BackupConfig {
                script_path: PathBuf::from("/usr/local/bin/backup.sh"),
                temp_dir: default_temp_dir(),
                max_size_gb: default_max_size_gb(),
                timeout_secs: default_timeout_secs(),
            },
            folders: vec![SourceSpec {
                name: "config".to_string(),
                path: PathBuf::from("/mnt/storage/config"),
                split_depth: 1,
                enabled: true,
            }],
            log: LogConfig::default(),
            validation: ValidationConfig::default(),
        }
    }

    fn write_template(path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(&Self::template())?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write template to {}", path.display()))?;
        Ok(())
    }

    /// Reject incomplete or placeholder configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(telegram) = &self.telegram {
            if telegram.token.is_empty() || telegram.token == TOKEN_PLACEHOLDER {
                bail!("Set telegram.token in the configuration file");
            }
            if telegram.chat_id.is_empty() || telegram.chat_id == CHAT_ID_PLACEHOLDER {
                bail!("Set telegram.chat_id in the configuration file");
            }
        }

        if self.s3.bucket.is_empty() || self.s3.bucket == BUCKET_PLACEHOLDER {
            bail!("Set s3.bucket in the configuration file");
        }

        if self.validation.sample_limit == 0 {
            bail!("validation.sample_limit must be at least 1");
        }

        let mut names = HashSet::new();
        for folder in &self.folders {
            if folder.name.is_empty() || folder.name.contains('/') {
                bail!("Invalid folder name {:?}", folder.name);
            }
            if !names.insert(folder.name.as_str()) {
                bail!("Duplicate folder name {:?}", folder.name);
            }
        }

        Ok(())
    }

    /// Enabled sources, optionally restricted to one by name.
    pub fn selected_sources(&self, only: Option<&str>) -> anyhow::Result<Vec<SourceSpec>> {
        let sources: Vec<SourceSpec> = self
            .folders
            .iter()
            .filter(|f| f.enabled)
            .filter(|f| only.map_or(true, |name| f.name == name))
            .cloned()
            .collect();

        if let Some(name) = only {
            if sources.is_empty() {
                bail!("Folder '{}' not found or disabled", name);
            }
        }

        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
[s3]
bucket = "archive-bucket"

[backup]
script_path = "/opt/backup.sh"

[[folders]]
name = "config"
path = "/mnt/storage/config"
split_depth = 1

[[folders]]
name = "photos"
path = "/mnt/storage/photos"
split_depth = 2
enabled = false
"#;

    #[test]
    fn test_defaults_applied() -> anyhow::Result<()> {
        let config = Config::from_toml(SAMPLE)?;

        assert!(config.telegram.is_none());
        assert_eq!(config.s3.storage_class, "DEEP_ARCHIVE");
        assert_eq!(config.backup.temp_dir, PathBuf::from("/tmp"));
        assert_eq!(config.backup.timeout(), Duration::from_secs(3600));
        assert_eq!(config.log.keep_days, 30);
        assert!(config.validation.deep_validation);
        assert_eq!(config.validation.policy().sample_limit, 100);
        assert!(config.folders[0].enabled);
        Ok(())
    }

    #[test]
    fn test_selected_sources() -> anyhow::Result<()> {
        let config = Config::from_toml(SAMPLE)?;

        let all = config.selected_sources(None)?;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "config");

        assert!(config.selected_sources(Some("photos")).is_err());
        assert!(config.selected_sources(Some("missing")).is_err());
        assert_eq!(config.selected_sources(Some("config"))?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_template_is_rejected_until_edited() {
        let err = Config::template().validate().unwrap_err();
        assert!(err.to_string().contains("telegram.token"));
    }

    #[test]
    fn test_duplicate_folder_names_rejected() {
        let doubled = format!(
            "{}\n[[folders]]\nname = \"config\"\npath = \"/elsewhere\"\nsplit_depth = 0\n",
            SAMPLE
        );
        assert!(Config::from_toml(&doubled).is_err());
    }

    #[test]
    fn test_archive_paths() -> anyhow::Result<()> {
        let config = Config::from_toml(SAMPLE)?;
        assert_eq!(config.backup.archive_path("config"), PathBuf::from("/tmp/config.tar.gz"));
        assert_eq!(config.backup.listing_path("config"), PathBuf::from("/tmp/config_files.txt"));
        Ok(())
    }

    #[test]
    fn test_max_size_limit() -> anyhow::Result<()> {
        let mut config = Config::from_toml(SAMPLE)?;
        assert_eq!(config.backup.max_size_bytes(), Some(1024 * 1024 * 1024 * 1024));

        config.backup.max_size_gb = 0;
        assert_eq!(config.backup.max_size_bytes(), None);

        config.backup.max_size_gb = u64::MAX;
        assert_eq!(config.backup.max_size_bytes(), Some(u64::MAX));
        Ok(())
    }

    #[test]
    fn test_load_missing_file_writes_template() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("config.toml");

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("edit it"));
        assert!(path.exists());

        // The template parses but still carries placeholders
        let written: Config = toml::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(written.folders.len(), 1);
        assert!(written.validate().is_err());
        Ok(())
    }

    #[test]
    fn test_load_existing_file() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE)?;

        let config = Config::load(&path)?;
        assert_eq!(config.s3.bucket, "archive-bucket");
        assert_eq!(config.folders.len(), 2);
        assert_eq!(config.folders[1].split_depth, 2);
        Ok(())
    }
}
