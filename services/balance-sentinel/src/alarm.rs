//! Named, single-instance recurring alarm
//!
//! Arming always clears the previous alarm first, so at most one is
//! outstanding. The alarm keeps firing at its period until re-armed or
//! cleared. Every arm and clear starts a new generation; fires carry the
//! generation that produced them, so a fire already queued when the alarm
//! was replaced can be recognised and dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::scheduler::Trigger;

/// Description of the currently armed alarm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmedAlarm {
    pub name: String,
    pub period_minutes: u32,
    pub armed_at_epoch_ms: u64,
    pub next_fire_epoch_ms: u64,
}

/// A recurring timer that feeds scheduler triggers
#[cfg_attr(test, mockall::automock)]
pub trait Alarm: Send + Sync + std::fmt::Debug {
    /// Clear any armed alarm, then arm one firing every `period_minutes`
    fn arm(&self, period_minutes: u32);

    /// Clear the alarm if armed
    fn clear(&self);

    /// The currently armed alarm, if any
    fn armed(&self) -> Option<ArmedAlarm>;

    /// Whether a fire tagged `generation` came from the alarm armed right now
    fn is_current(&self, generation: u64) -> bool;
}

struct Slot {
    task: JoinHandle<()>,
    period_minutes: u32,
    armed_at_epoch_ms: u64,
}

/// Alarm driven by a tokio interval task
pub struct TokioAlarm {
    name: String,
    minute: Duration,
    triggers: mpsc::Sender<Trigger>,
    slot: Mutex<Option<Slot>>,
    generation: AtomicU64,
}

impl std::fmt::Debug for TokioAlarm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioAlarm")
            .field("name", &self.name)
            .field("minute", &self.minute)
            .finish()
    }
}

impl TokioAlarm {
    pub fn new(name: &str, triggers: mpsc::Sender<Trigger>) -> Self {
        Self::with_minute(name, triggers, Duration::from_secs(60))
    }

    /// Alarm whose "minute" lasts `minute`; used to compress time in tests
    pub fn with_minute(name: &str, triggers: mpsc::Sender<Trigger>, minute: Duration) -> Self {
        Self {
            name: name.to_string(),
            minute,
            triggers,
            slot: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Slot>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn period(&self, period_minutes: u32) -> Duration {
        self.minute * period_minutes.max(1)
    }
}

impl Alarm for TokioAlarm {
    fn arm(&self, period_minutes: u32) {
        let mut slot = self.lock();
        if let Some(previous) = slot.take() {
            previous.task.abort();
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let period = self.period(period_minutes);
        let name = self.name.clone();
        let triggers = self.triggers.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                tracing::debug!("Alarm '{}' fired (generation {})", name, generation);
                if triggers.send(Trigger::Alarm { generation }).await.is_err() {
                    tracing::debug!("Scheduler gone, stopping alarm '{}'", name);
                    break;
                }
            }
        });

        *slot = Some(Slot {
            task,
            period_minutes,
            armed_at_epoch_ms: current_epoch_ms(),
        });
        tracing::info!(
            "Alarm '{}' set to trigger every {} minutes",
            self.name,
            period_minutes
        );
    }

    fn clear(&self) {
        let mut slot = self.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(previous) = slot.take() {
            previous.task.abort();
            tracing::debug!("Alarm '{}' cleared", self.name);
        }
    }

    fn armed(&self) -> Option<ArmedAlarm> {
        let slot = self.lock();
        let slot = slot.as_ref()?;
        let period_ms = self.period(slot.period_minutes).as_millis() as u64;
        let elapsed = current_epoch_ms().saturating_sub(slot.armed_at_epoch_ms);
        let fires_so_far = elapsed / period_ms.max(1);
        Some(ArmedAlarm {
            name: self.name.clone(),
            period_minutes: slot.period_minutes,
            armed_at_epoch_ms: slot.armed_at_epoch_ms,
            next_fire_epoch_ms: slot.armed_at_epoch_ms + (fires_so_far + 1) * period_ms,
        })
    }

    fn is_current(&self, generation: u64) -> bool {
        let slot = self.lock();
        slot.is_some() && self.generation.load(Ordering::SeqCst) == generation
    }
}

impl Drop for TokioAlarm {
    fn drop(&mut self) {
        if let Some(previous) = self.lock().take() {
            previous.task.abort();
        }
    }
}

pub(crate) fn current_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
