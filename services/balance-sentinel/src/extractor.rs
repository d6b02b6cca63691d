//! Value extractor: waits for the balance element to render and reads its text

use std::time::Duration;

use scraper::{Html, Selector};
use tokio::time::Instant;

use crate::config::BillingPageConfig;
use crate::error::{Result, SentinelError};
use crate::render::RenderContext;

/// Text reported when the balance element is not on the page
pub const MISSING_BALANCE_TEXT: &str = "N/A";

/// What the extractor found on the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// Trimmed text content of the balance element
    Text(String),
    /// The balance element was not present when extraction finished
    Missing,
}

/// Reads the balance text out of a rendering context
#[derive(Debug, Clone)]
pub struct Extractor {
    selector: String,
    loading_marker: String,
    settle_timeout: Duration,
    poll_interval: Duration,
}

impl Extractor {
    pub fn new(
        selector: &str,
        loading_marker: &str,
        settle_timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self> {
        Selector::parse(selector).map_err(|e| {
            SentinelError::Config(format!("Invalid balance selector {:?}: {}", selector, e))
        })?;

        Ok(Self {
            selector: selector.to_string(),
            loading_marker: loading_marker.to_string(),
            settle_timeout,
            poll_interval,
        })
    }

    pub fn from_config(config: &BillingPageConfig) -> Result<Self> {
        Self::new(
            &config.balance_selector,
            &config.loading_marker,
            Duration::from_millis(config.settle_timeout_ms),
            Duration::from_millis(config.poll_interval_ms),
        )
    }

    /// Wait for the balance element, let its value settle, and extract it.
    ///
    /// The wait for the element to appear is unbounded; the coordinator's
    /// watchdog owns that limit. Once the element is present, the wait for
    /// the loading marker to clear is bounded by the settle timeout, after
    /// which whatever text is present is returned.
    pub async fn extract(&self, page: &dyn RenderContext) -> Extraction {
        let mut current = loop {
            if let Some(text) = self.read(page).await {
                tracing::debug!("Balance element detected");
                break Some(text);
            }
            tokio::time::sleep(self.poll_interval).await;
        };

        let started = Instant::now();
        loop {
            if let Some(text) = &current {
                if !text.contains(&self.loading_marker) {
                    tracing::debug!("Balance loaded: {}", text);
                    return Extraction::Text(text.clone());
                }
            }

            if started.elapsed() >= self.settle_timeout {
                tracing::warn!(
                    "Timed out after {:?} waiting for the balance value to load",
                    self.settle_timeout
                );
                return match current {
                    Some(text) => Extraction::Text(text),
                    None => Extraction::Missing,
                };
            }

            tokio::time::sleep(self.poll_interval).await;
            current = self.read(page).await;
        }
    }

    async fn read(&self, page: &dyn RenderContext) -> Option<String> {
        match page.document().await {
            Ok(html) => find_balance_text(&html, &self.selector),
            Err(e) => {
                tracing::debug!("Reading page document failed: {}", e);
                None
            }
        }
    }
}

/// Trimmed text of the first element matching `selector`, if any
pub fn find_balance_text(html: &str, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    let document = Html::parse_document(html);
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
}
