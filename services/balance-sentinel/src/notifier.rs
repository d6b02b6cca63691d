//! Notifier trait for sending alerts

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An alert to deliver to the configured webhook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub webhook_url: String,
    pub text: String,
}

/// Trait for sending notifications
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync + std::fmt::Debug {
    /// Send a notification
    async fn notify(&self, notification: &Notification) -> crate::Result<()>;
}

/// Deliver `notification` in the background.
///
/// Delivery never gates the caller; failures are logged and dropped.
pub fn dispatch(notifier: std::sync::Arc<dyn Notifier>, notification: Notification) {
    tokio::spawn(async move {
        match notifier.notify(&notification).await {
            Ok(()) => tracing::info!("Alert delivered to webhook"),
            Err(e) => tracing::warn!("Alert delivery failed: {}", e),
        }
    });
}
