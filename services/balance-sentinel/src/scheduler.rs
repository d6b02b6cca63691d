//! Scheduler: the cycle state machine
//!
//! A single task consumes triggers one at a time and drives each cycle
//! through `Idle -> Scraping -> Resolving -> Persisting -> Idle`. The phase is
//! published on a watch channel so the API can observe it and so claiming a
//! cycle is a compare-and-set on that channel.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::alarm::Alarm;
use crate::balance::{parse_balance, Balance};
use crate::coordinator::{ScrapeCoordinator, ScrapeResult};
use crate::error::{Result, SentinelError};
use crate::notifier::{dispatch, Notification, Notifier};
use crate::store::{LogEntry, ScheduleState, StateStore};
use crate::thresholds::{evaluate_alert, parse_failure_message, resolve_interval_or, Alert};

/// Where the scheduler is within a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Scraping,
    Resolving,
    Persisting,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Scraping => "scraping",
            Phase::Resolving => "resolving",
            Phase::Persisting => "persisting",
        };
        f.write_str(name)
    }
}

/// What started a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The recurring alarm fired; `generation` identifies the arming that fired
    Alarm { generation: u64 },
    /// Requested through the API; the cycle was claimed when the request was accepted
    Manual { request: u64 },
}

/// How a cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Balance scraped, state persisted, alarm re-armed
    Completed {
        balance: Balance,
        interval_minutes: u32,
        alert: Option<Alert>,
    },
    /// No usable thresholds; nothing scraped and the alarm left as it was
    Skipped,
    /// The page never produced a balance in time
    TimedOut,
    /// The page produced text that holds no balance
    Unparseable { raw: String },
    /// Settings could not be read or a scrape was already running
    Failed,
}

/// Published after every cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub trigger: Trigger,
    pub outcome: CycleOutcome,
}

/// Cloneable handle used to trigger cycles and observe the phase
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    triggers: mpsc::Sender<Trigger>,
    phase: Arc<watch::Sender<Phase>>,
    reports: broadcast::Sender<CycleReport>,
    next_request: Arc<AtomicU64>,
}

impl SchedulerHandle {
    /// Create a handle and the trigger queue the scheduler consumes
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Trigger>) {
        let (triggers, rx) = mpsc::channel(capacity);
        let (phase, _) = watch::channel(Phase::Idle);
        let (reports, _) = broadcast::channel(16);
        (
            Self {
                triggers,
                phase: Arc::new(phase),
                reports,
                next_request: Arc::new(AtomicU64::new(1)),
            },
            rx,
        )
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Sender the alarm uses to deliver its fires
    pub fn alarm_sender(&self) -> mpsc::Sender<Trigger> {
        self.triggers.clone()
    }

    pub fn subscribe_reports(&self) -> broadcast::Receiver<CycleReport> {
        self.reports.subscribe()
    }

    /// Move `Idle -> Scraping`; false if a cycle is already running
    pub fn try_claim(&self) -> bool {
        self.phase.send_if_modified(|phase| {
            if *phase == Phase::Idle {
                *phase = Phase::Scraping;
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn set_phase(&self, next: Phase) {
        self.phase.send_if_modified(|phase| {
            if *phase == next {
                return false;
            }
            tracing::debug!("Scheduler phase {} -> {}", phase, next);
            *phase = next;
            true
        });
    }

    /// Claim a cycle and queue a manual trigger for it.
    ///
    /// Returns the request id carried by the trigger, or
    /// [`SentinelError::Busy`] if a cycle is already running.
    pub fn trigger_manual(&self) -> Result<u64> {
        if !self.try_claim() {
            return Err(SentinelError::Busy);
        }
        let request = self.next_request.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.triggers.try_send(Trigger::Manual { request }) {
            self.set_phase(Phase::Idle);
            return Err(SentinelError::Api(format!("scheduler is not accepting triggers: {}", e)));
        }
        tracing::info!("Manual scrape {} queued", request);
        Ok(request)
    }

    /// Trigger a manual cycle and wait for its outcome
    pub async fn run_manual(&self) -> Result<CycleOutcome> {
        let mut reports = self.reports.subscribe();
        let request = self.trigger_manual()?;
        loop {
            match reports.recv().await {
                Ok(report) if report.trigger == (Trigger::Manual { request }) => {
                    return Ok(report.outcome);
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("Missed {} cycle reports while waiting", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(SentinelError::Api("scheduler stopped".to_string()));
                }
            }
        }
    }
}

/// Format a time the way the history and alerts display it
pub fn display_time(at: &DateTime<Local>) -> String {
    at.format("%-m/%-d/%Y, %-I:%M:%S %p").to_string()
}

/// Runs cycles in response to triggers
#[derive(Debug)]
pub struct Scheduler {
    coordinator: Arc<ScrapeCoordinator>,
    store: Arc<StateStore>,
    notifier: Arc<dyn Notifier>,
    alarm: Arc<dyn Alarm>,
    handle: SchedulerHandle,
    default_interval: u32,
}

impl Scheduler {
    pub fn new(
        coordinator: Arc<ScrapeCoordinator>,
        store: Arc<StateStore>,
        notifier: Arc<dyn Notifier>,
        alarm: Arc<dyn Alarm>,
        handle: SchedulerHandle,
        default_interval: u32,
    ) -> Self {
        Self {
            coordinator,
            store,
            notifier,
            alarm,
            handle,
            default_interval,
        }
    }

    pub fn handle(&self) -> &SchedulerHandle {
        &self.handle
    }

    /// Consume triggers until cancelled, then clear the alarm
    pub async fn run(&self, mut triggers: mpsc::Receiver<Trigger>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Scheduler cancelled");
                    break;
                }
                trigger = triggers.recv() => match trigger {
                    Some(trigger) => {
                        self.handle_trigger(trigger).await;
                    }
                    None => {
                        tracing::debug!("Trigger queue closed");
                        break;
                    }
                },
            }
        }
        self.alarm.clear();
    }

    /// Run one cycle for `trigger`.
    ///
    /// Returns `None` for an alarm fire that is stale (the alarm was re-armed
    /// or cleared after it fired) or that arrived mid-cycle.
    pub async fn handle_trigger(&self, trigger: Trigger) -> Option<CycleOutcome> {
        match trigger {
            Trigger::Alarm { generation } => {
                if !self.alarm.is_current(generation) {
                    tracing::debug!("Dropping stale alarm fire from generation {}", generation);
                    return None;
                }
                if !self.handle.try_claim() {
                    tracing::debug!("Alarm fired during {} phase, skipping", self.handle.phase());
                    return None;
                }
                tracing::info!("Alarm triggered, scraping billing data");
            }
            Trigger::Manual { request } => {
                tracing::info!("Running manual scrape {}", request);
                self.handle.set_phase(Phase::Scraping);
            }
        }

        let outcome = self.run_cycle().await;
        self.handle.set_phase(Phase::Idle);
        // No subscribers is not an error
        let _ = self.handle.reports.send(CycleReport {
            trigger,
            outcome: outcome.clone(),
        });
        Some(outcome)
    }

    fn rearm(&self, interval_minutes: u32) {
        self.alarm.arm(interval_minutes);
    }

    async fn run_cycle(&self) -> CycleOutcome {
        let settings = match self.store.settings().await {
            Ok(settings) => settings,
            Err(e) => {
                tracing::error!("Failed to read settings: {}", e);
                self.rearm(self.default_interval);
                return CycleOutcome::Failed;
            }
        };

        let thresholds = settings.usable_thresholds();
        if thresholds.is_empty() {
            tracing::warn!("No balance thresholds set. Scraping is skipped.");
            return CycleOutcome::Skipped;
        }

        let webhook_url = settings.webhook_url().map(str::to_string);
        if webhook_url.is_none() {
            tracing::warn!("No webhook URL set. Balance will be tracked but no alerts sent.");
        }

        let raw = match self.coordinator.run_scrape().await {
            Ok(ScrapeResult::Success(raw)) => raw,
            Ok(ScrapeResult::Unparseable(raw)) => {
                return self.unparseable(raw, webhook_url);
            }
            Ok(ScrapeResult::Timeout) => {
                tracing::warn!("Scrape timed out, retrying in {} minutes", self.default_interval);
                self.rearm(self.default_interval);
                return CycleOutcome::TimedOut;
            }
            Err(e) => {
                tracing::warn!("Scrape could not start: {}", e);
                self.rearm(self.default_interval);
                return CycleOutcome::Failed;
            }
        };

        let balance = match parse_balance(&raw) {
            Ok(balance) => balance,
            Err(failure) => {
                return self.unparseable(failure.raw, webhook_url);
            }
        };

        self.handle.set_phase(Phase::Resolving);
        let interval_minutes = resolve_interval_or(balance, &thresholds, self.default_interval);
        let alert = evaluate_alert(balance, &thresholds);
        tracing::info!(
            "Balance {}, next scrape in {} minutes",
            balance.to_display(),
            interval_minutes
        );

        self.handle.set_phase(Phase::Persisting);
        let now = Local::now();
        let scraped_at = display_time(&now);
        let serial = now.timestamp_millis().max(0) as u64;
        let next = now + chrono::Duration::minutes(i64::from(interval_minutes));
        let entry = LogEntry {
            serial,
            balance: balance.to_display(),
            timestamp: scraped_at.clone(),
        };
        let schedule = ScheduleState {
            last_balance: balance.to_string(),
            last_scrape_time: serial,
            next_scrape_interval: interval_minutes,
            next_scrape_time: display_time(&next),
        };
        if let Err(e) = self.store.commit(entry, &schedule).await {
            tracing::error!("Failed to persist scrape results: {}", e);
        }

        if let (Some(alert), Some(url)) = (&alert, &webhook_url) {
            dispatch(
                Arc::clone(&self.notifier),
                Notification {
                    webhook_url: url.clone(),
                    text: alert.message(&scraped_at),
                },
            );
        }

        self.rearm(interval_minutes);
        CycleOutcome::Completed {
            balance,
            interval_minutes,
            alert,
        }
    }

    fn unparseable(&self, raw: String, webhook_url: Option<String>) -> CycleOutcome {
        tracing::warn!("Invalid balance value scraped: {:?}", raw);
        if let Some(url) = webhook_url {
            dispatch(
                Arc::clone(&self.notifier),
                Notification {
                    webhook_url: url,
                    text: parse_failure_message(&raw, &display_time(&Local::now())),
                },
            );
        }
        self.rearm(self.default_interval);
        CycleOutcome::Unparseable { raw }
    }
}
