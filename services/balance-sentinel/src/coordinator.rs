//! Scrape coordinator: one in-flight extraction at a time
//!
//! Each scrape opens a fresh rendering context tagged with a new context id,
//! runs the extractor against it in a background task, and waits for that
//! context's result on a shared hand-off channel. Results tagged with any
//! other id belong to an abandoned scrape and are dropped. A watchdog bounds
//! the whole run so a page that never reports back resolves to
//! [`ScrapeResult::Timeout`] instead of stalling the cycle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};

use crate::error::{Result, SentinelError};
use crate::extractor::{Extraction, Extractor, MISSING_BALANCE_TEXT};
use crate::render::Renderer;

/// Outcome of one scrape
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrapeResult {
    /// Raw balance text as shown on the page
    Success(String),
    /// The page did not show a balance at all
    Unparseable(String),
    /// The page never reported back before the watchdog fired
    Timeout,
}

/// Result sent back from a rendering context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionMessage {
    pub context_id: u64,
    pub extraction: Extraction,
}

/// Owns the single in-flight scrape
pub struct ScrapeCoordinator {
    url: String,
    renderer: Arc<dyn Renderer>,
    extractor: Extractor,
    watchdog: Duration,
    next_context_id: AtomicU64,
    in_flight: Mutex<Option<u64>>,
    handoff_tx: mpsc::Sender<ExtractionMessage>,
    handoff_rx: tokio::sync::Mutex<mpsc::Receiver<ExtractionMessage>>,
}

impl std::fmt::Debug for ScrapeCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScrapeCoordinator")
            .field("url", &self.url)
            .field("watchdog", &self.watchdog)
            .field("in_flight", &self.in_flight_context())
            .finish()
    }
}

/// Clears the in-flight slot when the scrape ends, even if its future is dropped
struct InFlight<'a> {
    slot: &'a Mutex<Option<u64>>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl ScrapeCoordinator {
    pub fn new(
        url: &str,
        renderer: Arc<dyn Renderer>,
        extractor: Extractor,
        watchdog: Duration,
    ) -> Self {
        let (handoff_tx, handoff_rx) = mpsc::channel(8);
        Self {
            url: url.to_string(),
            renderer,
            extractor,
            watchdog,
            next_context_id: AtomicU64::new(1),
            in_flight: Mutex::new(None),
            handoff_tx,
            handoff_rx: tokio::sync::Mutex::new(handoff_rx),
        }
    }

    /// Sender for extraction results; every message must carry its context id
    pub fn handoff_sender(&self) -> mpsc::Sender<ExtractionMessage> {
        self.handoff_tx.clone()
    }

    /// Id of the context currently being scraped, if any
    pub fn in_flight_context(&self) -> Option<u64> {
        *self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn claim(&self) -> Result<(u64, InFlight<'_>)> {
        let mut slot = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(active) = *slot {
            tracing::warn!("Scrape requested while context {} is still open", active);
            return Err(SentinelError::Busy);
        }
        let id = self.next_context_id.fetch_add(1, Ordering::SeqCst);
        *slot = Some(id);
        Ok((
            id,
            InFlight {
                slot: &self.in_flight,
            },
        ))
    }

    /// Run one scrape of the billing page.
    ///
    /// Fails with [`SentinelError::Busy`] if a scrape is already running;
    /// every other failure is folded into the returned [`ScrapeResult`].
    pub async fn run_scrape(&self) -> Result<ScrapeResult> {
        let (context_id, _in_flight) = self.claim()?;
        let deadline = Instant::now() + self.watchdog;

        let page = match timeout_at(deadline, self.renderer.open(&self.url)).await {
            Ok(Ok(page)) => page,
            Ok(Err(e)) => {
                tracing::warn!("Failed to open billing page {}: {}", self.url, e);
                return Ok(ScrapeResult::Timeout);
            }
            Err(_) => {
                tracing::warn!("Opening billing page {} timed out", self.url);
                return Ok(ScrapeResult::Timeout);
            }
        };
        tracing::info!("Opened context {} to scrape billing data", context_id);

        let extractor = self.extractor.clone();
        let handoff = self.handoff_tx.clone();
        let task_page = Arc::clone(&page);
        let task = tokio::spawn(async move {
            let extraction = extractor.extract(task_page.as_ref()).await;
            let message = ExtractionMessage {
                context_id,
                extraction,
            };
            if handoff.send(message).await.is_err() {
                tracing::debug!("Coordinator gone before context {} reported", context_id);
            }
        });

        let result = match timeout_at(deadline, self.await_handoff(context_id)).await {
            Ok(Some(Extraction::Text(text))) => {
                tracing::debug!("Billing data received from context {}: {}", context_id, text);
                ScrapeResult::Success(text)
            }
            Ok(Some(Extraction::Missing)) => {
                tracing::warn!("Credit balance element not found in context {}", context_id);
                ScrapeResult::Unparseable(MISSING_BALANCE_TEXT.to_string())
            }
            Ok(None) => {
                tracing::warn!("Hand-off channel closed while waiting for context {}", context_id);
                task.abort();
                ScrapeResult::Timeout
            }
            Err(_) => {
                tracing::warn!(
                    "Context {} did not report a balance within {:?}",
                    context_id,
                    self.watchdog
                );
                task.abort();
                ScrapeResult::Timeout
            }
        };

        match page.close().await {
            Ok(()) => tracing::debug!("Closed context {}", context_id),
            Err(e) => tracing::warn!("Failed to close context {}: {}", context_id, e),
        }

        Ok(result)
    }

    async fn await_handoff(&self, context_id: u64) -> Option<Extraction> {
        let mut rx = self.handoff_rx.lock().await;
        while let Some(message) = rx.recv().await {
            if message.context_id == context_id {
                return Some(message.extraction);
            }
            tracing::debug!(
                "Ignoring extraction from stale context {} (waiting for {})",
                message.context_id,
                context_id
            );
        }
        None
    }
}
