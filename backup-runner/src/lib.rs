//! Backup Runner Library
//!
//! Split-depth archive planning, source fingerprinting and archive integrity
//! validation around an external archive-and-upload tool.

pub mod config;
pub mod daemon;
pub mod executor;
pub mod fs;
pub mod notify;
pub mod planner;
pub mod utils;
pub mod validator;

// Re-export commonly used types
pub use config::{Config, SourceSpec};
pub use utils::errors::BackupError;
pub type Result<T> = std::result::Result<T, BackupError>;
