//! Run notifications.
//!
//! The executor reports progress through a [`Notifier`]; delivery failures
//! are logged by the caller and never fail a backup.

pub mod telegram;

use crate::utils::errors::Result;
use std::future::Future;
use tracing::info;

pub use telegram::TelegramNotifier;

/// Delivers short HTML-formatted status messages
pub trait Notifier {
    fn notify(&self, message: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Notifier that only writes to the log, used when no chat is configured
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) -> Result<()> {
        info!("[notify] {}", message);
        Ok(())
    }
}

/// Escape text for Telegram's HTML parse mode
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
