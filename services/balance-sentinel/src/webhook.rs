//! JSON webhook notifier (Slack-compatible `{"text": ...}` payload)

use std::sync::Arc;

use async_trait::async_trait;

use crate::io::HttpClient;
use crate::notifier::{Notification, Notifier};

/// Posts alerts to an incoming-webhook URL
pub struct WebhookNotifier {
    http: Arc<dyn HttpClient>,
}

impl std::fmt::Debug for WebhookNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookNotifier").finish()
    }
}

impl WebhookNotifier {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> crate::Result<()> {
        let payload = serde_json::json!({ "text": notification.text });

        tracing::debug!("Sending webhook alert ({} chars)", notification.text.len());

        let response = self
            .http
            .post_json(&notification.webhook_url, &payload)
            .await?;

        if !response.is_success() {
            return Err(crate::SentinelError::Notifier(format!(
                "Webhook returned status {}: {}",
                response.status, response.body
            )));
        }

        tracing::debug!("Webhook alert sent successfully");
        Ok(())
    }
}
