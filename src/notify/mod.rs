//! Alert sink adapter.
//!
//! The core only depends on the narrow [`AlertSink`] contract; the bundled
//! implementation forwards messages to a Telegram chat over the Bot API.

mod telegram;

pub use telegram::TelegramNotifier;

use async_trait::async_trait;

use crate::error::NotifierResult;

/// External messaging endpoint for alerts and status updates.
///
/// Delivery is best-effort: callers log failures and move on, they never
/// retry past the sink's own bounded retry policy.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Send one human-readable message.
    async fn send_notification(&self, message: &str) -> NotifierResult<()>;
}
