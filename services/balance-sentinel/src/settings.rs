//! User-owned settings: alert webhook and balance thresholds
//!
//! Settings live in the key-value store next to the schedule state. They are
//! edited through the API and read fresh at the start of every cycle.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SentinelError};
use crate::thresholds::Threshold;

/// Alert webhook and threshold table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub thresholds: Vec<Threshold>,
}

impl Settings {
    /// Webhook URL, treating a blank string as unset
    pub fn webhook_url(&self) -> Option<&str> {
        self.webhook_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// Thresholds that can take part in evaluation, in input order.
    ///
    /// Entries edited by hand into the store may be invalid; they are
    /// reported and left out rather than failing the cycle.
    pub fn usable_thresholds(&self) -> Vec<Threshold> {
        self.thresholds
            .iter()
            .filter(|t| {
                let ok = t.is_valid();
                if !ok {
                    tracing::warn!(
                        "Ignoring invalid threshold: limit={}, interval={}",
                        t.limit,
                        t.interval
                    );
                }
                ok
            })
            .cloned()
            .collect()
    }

    /// Validate settings submitted through the API
    pub fn validate(&self) -> Result<()> {
        if let Some(url) = self.webhook_url() {
            let parsed = reqwest::Url::parse(url).map_err(|e| {
                SentinelError::InvalidSettings(format!("webhook URL {:?} is not valid: {}", url, e))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(SentinelError::InvalidSettings(format!(
                    "webhook URL must use http or https, got {:?}",
                    parsed.scheme()
                )));
            }
        }

        for threshold in &self.thresholds {
            if threshold.limit_balance().is_none() {
                return Err(SentinelError::InvalidSettings(format!(
                    "limit must be a non-negative number, got {}",
                    threshold.limit
                )));
            }
            if threshold.interval < 1 {
                return Err(SentinelError::InvalidSettings(
                    "interval must be at least 1 minute".to_string(),
                ));
            }
        }

        Ok(())
    }
}
