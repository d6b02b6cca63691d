//! BDD test world for balance sentinel service

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use cucumber::World;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use balance_sentinel::alarm::{Alarm, ArmedAlarm};
use balance_sentinel::balance::{Balance, ParseFailure};
use balance_sentinel::coordinator::{ScrapeCoordinator, ScrapeResult};
use balance_sentinel::extractor::Extractor;
use balance_sentinel::notifier::{Notification, Notifier};
use balance_sentinel::render::{RenderContext, Renderer};
use balance_sentinel::scheduler::{CycleOutcome, Scheduler, SchedulerHandle, Trigger};
use balance_sentinel::settings::Settings;
use balance_sentinel::store::{MemoryStore, StateStore};
use balance_sentinel::thresholds::{Alert, Threshold};

pub const SELECTOR: &str = "#balance";
pub const SETTLE_TIMEOUT: Duration = Duration::from_millis(200);
pub const WATCHDOG: Duration = Duration::from_millis(400);

/// The billing site; its balance text can change mid-scenario
#[derive(Debug, Default)]
pub struct FakeSite {
    balance: Mutex<Option<String>>,
    pub opened: AtomicUsize,
    pub open_now: AtomicUsize,
    pub max_open: AtomicUsize,
}

impl FakeSite {
    pub fn show(&self, text: Option<&str>) {
        *self.balance.lock().unwrap() = text.map(str::to_string);
    }

    fn document(&self) -> String {
        match self.balance.lock().unwrap().as_deref() {
            Some(text) => format!(r#"<html><body><p id="balance">{}</p></body></html>"#, text),
            None => "<html><body><p>Rendering...</p></body></html>".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct FakeRenderer(pub Arc<FakeSite>);

#[async_trait]
impl Renderer for FakeRenderer {
    async fn open(&self, _url: &str) -> balance_sentinel::Result<Arc<dyn RenderContext>> {
        let site = &self.0;
        site.opened.fetch_add(1, Ordering::SeqCst);
        let now = site.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        site.max_open.fetch_max(now, Ordering::SeqCst);
        Ok(Arc::new(FakePage(Arc::clone(site))))
    }
}

#[derive(Debug)]
struct FakePage(Arc<FakeSite>);

#[async_trait]
impl RenderContext for FakePage {
    async fn document(&self) -> balance_sentinel::Result<String> {
        Ok(self.0.document())
    }

    async fn close(&self) -> balance_sentinel::Result<()> {
        self.0.open_now.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Records every arm and clear
#[derive(Debug, Default)]
pub struct RecordingAlarm {
    pub arms: Mutex<Vec<u32>>,
}

impl RecordingAlarm {
    /// Each arm starts a new generation
    pub fn generation(&self) -> u64 {
        self.arms.lock().unwrap().len() as u64
    }
}

impl Alarm for RecordingAlarm {
    fn arm(&self, period_minutes: u32) {
        self.arms.lock().unwrap().push(period_minutes);
    }

    fn clear(&self) {}

    fn armed(&self) -> Option<ArmedAlarm> {
        self.arms.lock().unwrap().last().map(|period| ArmedAlarm {
            name: "scrapeBillingBalance".to_string(),
            period_minutes: *period,
            armed_at_epoch_ms: 0,
            next_fire_epoch_ms: u64::from(*period) * 60_000,
        })
    }

    fn is_current(&self, generation: u64) -> bool {
        generation == self.generation()
    }
}

#[derive(Debug)]
pub struct CapturingNotifier(mpsc::UnboundedSender<Notification>);

#[async_trait]
impl Notifier for CapturingNotifier {
    async fn notify(&self, notification: &Notification) -> balance_sentinel::Result<()> {
        self.0
            .send(notification.clone())
            .map_err(|e| balance_sentinel::SentinelError::Notifier(e.to_string()))
    }
}

#[derive(Debug, Default, World)]
pub struct BalanceWorld {
    // Threshold and parsing rules
    pub thresholds: Vec<Threshold>,
    pub webhook_url: Option<String>,
    pub resolved_interval: Option<u32>,
    pub evaluated_alert: Option<Option<Alert>>,
    pub parse_result: Option<Result<Balance, ParseFailure>>,

    // Scraping
    pub site: Arc<FakeSite>,
    pub coordinator: Option<Arc<ScrapeCoordinator>>,
    pub scrape_results: Vec<balance_sentinel::Result<ScrapeResult>>,

    // Scheduling
    pub store: Option<Arc<StateStore>>,
    pub alarm: Arc<RecordingAlarm>,
    pub notifications: Option<mpsc::UnboundedReceiver<Notification>>,
    pub scheduler: Option<Arc<Scheduler>>,
    pub handle: Option<SchedulerHandle>,
    pub triggers: Option<mpsc::Receiver<Trigger>>,
    pub queued_fire: Option<Trigger>,
    pub outcome: Option<Option<CycleOutcome>>,

    // API
    pub router: Option<Router>,
    pub cancel: Option<CancellationToken>,
    pub response: Option<(u16, serde_json::Value)>,
}

impl BalanceWorld {
    pub fn store(&mut self) -> Arc<StateStore> {
        Arc::clone(
            self.store
                .get_or_insert_with(|| Arc::new(StateStore::new(Arc::new(MemoryStore::new()), 100))),
        )
    }

    pub fn coordinator(&mut self) -> Arc<ScrapeCoordinator> {
        let site = Arc::clone(&self.site);
        Arc::clone(self.coordinator.get_or_insert_with(|| {
            let extractor = Extractor::new(
                SELECTOR,
                "Loading",
                SETTLE_TIMEOUT,
                Duration::from_millis(10),
            )
            .unwrap();
            Arc::new(ScrapeCoordinator::new(
                "https://billing.example.com",
                Arc::new(FakeRenderer(site)),
                extractor,
                WATCHDOG,
            ))
        }))
    }

    /// Save the scenario's settings and wire a scheduler around them
    pub async fn scheduler(&mut self) -> Arc<Scheduler> {
        if let Some(scheduler) = &self.scheduler {
            return Arc::clone(scheduler);
        }

        let store = self.store();
        store
            .save_settings(&Settings {
                webhook_url: self.webhook_url.clone(),
                thresholds: self.thresholds.clone(),
            })
            .await
            .unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        self.notifications = Some(rx);
        let (handle, triggers) = SchedulerHandle::channel(8);
        let scheduler = Arc::new(Scheduler::new(
            self.coordinator(),
            store,
            Arc::new(CapturingNotifier(tx)),
            Arc::clone(&self.alarm) as Arc<dyn Alarm>,
            handle.clone(),
            60,
        ));
        self.handle = Some(handle);
        self.triggers = Some(triggers);
        self.scheduler = Some(Arc::clone(&scheduler));
        scheduler
    }

    pub fn handle(&self) -> &SchedulerHandle {
        self.handle.as_ref().expect("scheduler not built")
    }
}
