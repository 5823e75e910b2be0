//! Delivery of new items to a destination's target.
//!
//! Rendering of the outbound message belongs to the receiving side; items
//! leave here as plain JSON or a log line.

pub mod webhook;

use async_trait::async_trait;

use crate::app::{Result, TributaryError};
use crate::domain::Item;

pub use webhook::WebhookNotifier;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one item. Called once per item, oldest first.
    async fn deliver(&self, target: &str, item: &Item) -> Result<()>;
}

/// Writes items to the log. Target `log` or `stdout`.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, target: &str, item: &Item) -> Result<()> {
        tracing::info!(
            target_handle = target,
            id = %item.id,
            title = %item.title,
            link = item.link.as_deref().unwrap_or("-"),
            published = %item.timestamp.to_rfc3339(),
            "New item"
        );
        Ok(())
    }
}

/// Routes each delivery by the target's scheme.
#[derive(Clone, Default)]
pub struct TargetNotifier {
    webhook: WebhookNotifier,
    log: LogNotifier,
}

impl TargetNotifier {
    pub fn new(webhook: WebhookNotifier) -> Self {
        Self {
            webhook,
            log: LogNotifier,
        }
    }
}

#[async_trait]
impl Notifier for TargetNotifier {
    async fn deliver(&self, target: &str, item: &Item) -> Result<()> {
        let target = target.trim();
        if target.eq_ignore_ascii_case("log") || target.eq_ignore_ascii_case("stdout") {
            self.log.deliver(target, item).await
        } else if target.starts_with("http://") || target.starts_with("https://") {
            self.webhook.deliver(target, item).await
        } else {
            Err(TributaryError::DeliveryFailed {
                target: target.to_string(),
                reason: "unsupported target".to_string(),
            })
        }
    }
}
