//! Durable key-value store and the typed state layered on top of it
//!
//! The underlying store is a flat JSON mapping. [`StateStore`] owns the key
//! layout, writes each cycle's results as a single batch, and broadcasts one
//! [`StateChanged`] per batch so observers re-read once.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex, RwLock};

use crate::error::{Result, SentinelError};
use crate::settings::Settings;

/// Flat key-value mapping as stored on disk
pub type Entries = serde_json::Map<String, Value>;

pub const KEY_WEBHOOK_URL: &str = "webhookUrl";
pub const KEY_THRESHOLDS: &str = "thresholds";
pub const KEY_LAST_BALANCE: &str = "lastBalance";
pub const KEY_LAST_SCRAPE_TIME: &str = "lastScrapeTime";
pub const KEY_NEXT_SCRAPE_INTERVAL: &str = "nextScrapeInterval";
pub const KEY_NEXT_SCRAPE_TIME: &str = "nextScrapeTime";
pub const KEY_SCRAPE_LOGS: &str = "scrapeLogs";

/// A flat key-value store with atomic batch writes
#[async_trait]
pub trait KeyValueStore: Send + Sync + std::fmt::Debug {
    /// Fetch the given keys; absent keys are omitted from the result
    async fn get(&self, keys: &[&str]) -> Result<Entries>;

    /// Write all entries in one batch. A `null` value removes the key.
    async fn set(&self, entries: Entries) -> Result<()>;
}

fn apply(target: &mut Entries, entries: Entries) {
    for (key, value) in entries {
        if value.is_null() {
            target.remove(&key);
        } else {
            target.insert(key, value);
        }
    }
}

fn select(source: &Entries, keys: &[&str]) -> Entries {
    keys.iter()
        .filter_map(|key| source.get(*key).map(|v| (key.to_string(), v.clone())))
        .collect()
}

/// In-memory store, used when no store path is configured
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<Entries>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, keys: &[&str]) -> Result<Entries> {
        Ok(select(&*self.entries.read().await, keys))
    }

    async fn set(&self, entries: Entries) -> Result<()> {
        apply(&mut *self.entries.write().await, entries);
        Ok(())
    }
}

/// Store backed by a single JSON object file.
///
/// Every read goes to disk so edits made outside the service are picked up.
/// Writes go to a sibling temp file that is renamed over the original.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Entries> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Entries::new()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(Entries::new());
        }
        match serde_json::from_str::<Value>(&content)? {
            Value::Object(map) => Ok(map),
            other => Err(SentinelError::Store(format!(
                "{:?} does not hold a JSON object (found {})",
                self.path,
                json_kind(&other)
            ))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, keys: &[&str]) -> Result<Entries> {
        Ok(select(&self.read_all().await?, keys))
    }

    async fn set(&self, entries: Entries) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut all = self.read_all().await?;
        apply(&mut all, entries);

        let serialized = serde_json::to_string_pretty(&Value::Object(all))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serialized).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        tracing::debug!("Wrote store {:?}", self.path);
        Ok(())
    }
}

/// One row of the scrape history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Epoch milliseconds of the scrape, used as a monotonic serial
    pub serial: u64,
    pub balance: String,
    pub timestamp: String,
}

/// Result of the last successful cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleState {
    pub last_balance: String,
    pub last_scrape_time: u64,
    pub next_scrape_interval: u32,
    pub next_scrape_time: String,
}

/// Broadcast after every committed batch; observers re-read the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChanged;

/// Typed view of the store shared by the scheduler and the API
#[derive(Debug)]
pub struct StateStore {
    kv: Arc<dyn KeyValueStore>,
    history_size: usize,
    changes: broadcast::Sender<StateChanged>,
    commit_lock: Mutex<()>,
}

impl StateStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, history_size: usize) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            kv,
            history_size,
            changes,
            commit_lock: Mutex::new(()),
        }
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<StateChanged> {
        self.changes.subscribe()
    }

    fn notify(&self) {
        // No subscribers is not an error
        let _ = self.changes.send(StateChanged);
    }

    /// Read the current settings
    pub async fn settings(&self) -> Result<Settings> {
        let entries = self.kv.get(&[KEY_WEBHOOK_URL, KEY_THRESHOLDS]).await?;
        Ok(serde_json::from_value(Value::Object(entries))?)
    }

    /// Replace the settings and notify observers
    pub async fn save_settings(&self, settings: &Settings) -> Result<()> {
        let mut batch = Entries::new();
        batch.insert(
            KEY_WEBHOOK_URL.to_string(),
            settings
                .webhook_url()
                .map(|url| Value::String(url.to_string()))
                .unwrap_or(Value::Null),
        );
        batch.insert(
            KEY_THRESHOLDS.to_string(),
            serde_json::to_value(&settings.thresholds)?,
        );

        {
            let _guard = self.commit_lock.lock().await;
            self.kv.set(batch).await?;
        }
        tracing::info!(
            "Settings updated: {} threshold(s), webhook {}",
            settings.thresholds.len(),
            if settings.webhook_url().is_some() {
                "set"
            } else {
                "not set"
            }
        );
        self.notify();
        Ok(())
    }

    /// State of the last successful cycle, if any
    pub async fn schedule_state(&self) -> Result<Option<ScheduleState>> {
        let entries = self
            .kv
            .get(&[
                KEY_LAST_BALANCE,
                KEY_LAST_SCRAPE_TIME,
                KEY_NEXT_SCRAPE_INTERVAL,
                KEY_NEXT_SCRAPE_TIME,
            ])
            .await?;
        if !entries.contains_key(KEY_LAST_SCRAPE_TIME) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(Value::Object(entries))?))
    }

    /// Scrape history, oldest first
    pub async fn logs(&self) -> Result<Vec<LogEntry>> {
        let mut entries = self.kv.get(&[KEY_SCRAPE_LOGS]).await?;
        match entries.remove(KEY_SCRAPE_LOGS) {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    /// Persist one cycle's results as a single batch.
    ///
    /// Appends `entry` to the history (evicting the oldest entries beyond the
    /// configured size), overwrites the schedule state, then sends exactly one
    /// change notification.
    pub async fn commit(&self, entry: LogEntry, schedule: &ScheduleState) -> Result<()> {
        {
            let _guard = self.commit_lock.lock().await;

            let mut logs = self.logs().await?;
            logs.push(entry);
            if logs.len() > self.history_size {
                let excess = logs.len() - self.history_size;
                logs.drain(..excess);
            }

            let mut batch = match serde_json::to_value(schedule)? {
                Value::Object(map) => map,
                _ => Entries::new(),
            };
            batch.insert(KEY_SCRAPE_LOGS.to_string(), serde_json::to_value(&logs)?);

            self.kv.set(batch).await?;
        }

        tracing::debug!("Cycle state committed");
        self.notify();
        Ok(())
    }
}
