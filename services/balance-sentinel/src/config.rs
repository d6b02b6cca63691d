//! Configuration types for the balance sentinel service

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub billing_page: BillingPageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Where the balance lives and how to wait for it to render
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingPageConfig {
    #[serde(default = "default_billing_url")]
    pub url: String,
    #[serde(default = "default_balance_selector")]
    pub balance_selector: String,
    #[serde(default = "default_loading_marker")]
    pub loading_marker: String,
    #[serde(default = "default_settle_timeout_ms")]
    pub settle_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for BillingPageConfig {
    fn default() -> Self {
        Self {
            url: default_billing_url(),
            balance_selector: default_balance_selector(),
            loading_marker: default_loading_marker(),
            settle_timeout_ms: default_settle_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Scheduler timing and history settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_alarm_name")]
    pub alarm_name: String,
    #[serde(default = "default_interval_minutes")]
    pub default_interval_minutes: u32,
    #[serde(default = "default_watchdog_timeout_ms")]
    pub watchdog_timeout_ms: u64,
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    #[serde(default = "default_true")]
    pub scrape_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            alarm_name: default_alarm_name(),
            default_interval_minutes: default_interval_minutes(),
            watchdog_timeout_ms: default_watchdog_timeout_ms(),
            history_size: default_history_size(),
            scrape_on_start: true,
        }
    }
}

/// Key-value store location; in-memory when no path is given
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// HTTP API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_api_port(),
        }
    }
}

fn default_billing_url() -> String {
    "https://console.anthropic.com/settings/billing".to_string()
}

fn default_balance_selector() -> String {
    r#"[data-testid="credit-balance"] .text-text-000"#.to_string()
}

fn default_loading_marker() -> String {
    "Loading".to_string()
}

fn default_settle_timeout_ms() -> u64 {
    20_000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_alarm_name() -> String {
    "scrapeBillingBalance".to_string()
}

fn default_interval_minutes() -> u32 {
    crate::thresholds::DEFAULT_INTERVAL_MINUTES
}

fn default_watchdog_timeout_ms() -> u64 {
    60_000
}

fn default_history_size() -> usize {
    100
}

fn default_true() -> bool {
    true
}

fn default_api_port() -> u16 {
    11120
}

impl Config {
    /// Reject values the service cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.scheduler.default_interval_minutes == 0 {
            return Err(crate::SentinelError::Config(
                "scheduler.default_interval_minutes must be at least 1".to_string(),
            ));
        }
        if self.scheduler.history_size == 0 {
            return Err(crate::SentinelError::Config(
                "scheduler.history_size must be at least 1".to_string(),
            ));
        }
        if self.scheduler.watchdog_timeout_ms == 0 {
            return Err(crate::SentinelError::Config(
                "scheduler.watchdog_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.billing_page.poll_interval_ms == 0 {
            return Err(crate::SentinelError::Config(
                "billing_page.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load configuration from a JSON file
pub fn load_config(path: &Path) -> crate::Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        crate::SentinelError::Config(format!("Failed to read config file {:?}: {}", path, e))
    })?;
    let config: Config = serde_json::from_str(&content)?;
    Ok(config)
}
