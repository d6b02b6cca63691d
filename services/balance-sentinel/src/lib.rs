//! Balance Sentinel - adaptive billing balance watcher
//!
//! Scrapes an account balance from a rendered billing page, adapts the
//! polling interval to the balance, and alerts a webhook when the balance
//! drops to a configured limit.

pub mod alarm;
pub mod api;
pub mod balance;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod extractor;
pub mod io;
pub mod notifier;
pub mod render;
pub mod scheduler;
pub mod settings;
pub mod store;
pub mod thresholds;
pub mod webhook;


pub use config::{load_config, Config};
pub use error::{Result, SentinelError};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::alarm::{Alarm, TokioAlarm};
use crate::coordinator::ScrapeCoordinator;
use crate::extractor::Extractor;
use crate::io::{HttpClient, ReqwestHttpClient};
use crate::notifier::Notifier;
use crate::render::{HttpRenderer, Renderer};
use crate::scheduler::{Scheduler, SchedulerHandle, Trigger};
use crate::store::{JsonFileStore, KeyValueStore, MemoryStore, StateStore};
use crate::webhook::WebhookNotifier;

const TRIGGER_QUEUE_SIZE: usize = 16;

/// Builder for the balance sentinel service
pub struct BalanceSentinelBuilder {
    config: Config,
    http: Option<Arc<dyn HttpClient>>,
    renderer: Option<Arc<dyn Renderer>>,
    store: Option<Arc<dyn KeyValueStore>>,
    notifier: Option<Arc<dyn Notifier>>,
    cancel: Option<CancellationToken>,
}

impl BalanceSentinelBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            http: None,
            renderer: None,
            store: None,
            notifier: None,
            cancel: None,
        }
    }

    /// HTTP client shared by the default renderer and webhook notifier
    pub fn with_http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Key-value store to use instead of the one named in the config
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Validate the config and wire all components
    pub async fn build(self) -> Result<BalanceSentinel> {
        let config = self.config;
        config.validate()?;

        let http: Arc<dyn HttpClient> = self
            .http
            .unwrap_or_else(|| Arc::new(ReqwestHttpClient::default()));
        let renderer = self
            .renderer
            .unwrap_or_else(|| Arc::new(HttpRenderer::new(Arc::clone(&http))));
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(WebhookNotifier::new(Arc::clone(&http))));

        let kv: Arc<dyn KeyValueStore> = match (self.store, &config.store.path) {
            (Some(store), _) => store,
            (None, Some(path)) => {
                tracing::info!("Persisting state to {:?}", path);
                Arc::new(JsonFileStore::new(path.clone()))
            }
            (None, None) => {
                tracing::info!("No store path configured, state is kept in memory");
                Arc::new(MemoryStore::new())
            }
        };
        let store = Arc::new(StateStore::new(kv, config.scheduler.history_size));

        let extractor = Extractor::from_config(&config.billing_page)?;
        let coordinator = Arc::new(ScrapeCoordinator::new(
            &config.billing_page.url,
            renderer,
            extractor,
            Duration::from_millis(config.scheduler.watchdog_timeout_ms),
        ));

        let (handle, triggers) = SchedulerHandle::channel(TRIGGER_QUEUE_SIZE);
        let alarm: Arc<dyn Alarm> = Arc::new(TokioAlarm::new(
            &config.scheduler.alarm_name,
            handle.alarm_sender(),
        ));
        let scheduler = Scheduler::new(
            coordinator,
            Arc::clone(&store),
            notifier,
            Arc::clone(&alarm),
            handle,
            config.scheduler.default_interval_minutes,
        );

        Ok(BalanceSentinel {
            config,
            store,
            alarm,
            scheduler,
            triggers,
            cancel: self.cancel.unwrap_or_default(),
        })
    }
}

/// A fully wired service, ready to start
pub struct BalanceSentinel {
    config: Config,
    store: Arc<StateStore>,
    alarm: Arc<dyn Alarm>,
    scheduler: Scheduler,
    triggers: mpsc::Receiver<Trigger>,
    cancel: CancellationToken,
}

impl BalanceSentinel {
    pub fn store(&self) -> Arc<StateStore> {
        Arc::clone(&self.store)
    }

    pub fn scheduler_handle(&self) -> SchedulerHandle {
        self.scheduler.handle().clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the scheduler and API until cancelled or ctrl-c
    pub async fn start(self) -> Result<()> {
        let BalanceSentinel {
            config,
            store,
            alarm,
            scheduler,
            triggers,
            cancel,
        } = self;

        let settings = store.settings().await?;
        if settings.usable_thresholds().is_empty() {
            tracing::info!(
                "No balance thresholds configured. Add at least one threshold through PUT /api/settings to start tracking."
            );
        }

        if config.scheduler.scrape_on_start {
            if let Err(e) = scheduler.handle().trigger_manual() {
                tracing::warn!("Could not queue initial scrape: {}", e);
            }
        }

        // Setup shutdown handler
        let cancel_for_signal = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => match result {
                    Ok(()) => tracing::info!("Shutdown signal received"),
                    Err(e) => {
                        tracing::error!("Failed to listen for ctrl-c: {}", e);
                        return;
                    }
                },
                _ = cancel_for_signal.cancelled() => return,
            }
            cancel_for_signal.cancel();
        });

        if config.api.enabled {
            let api_port = config.api.port;
            let api_state = api::ApiState {
                store: Arc::clone(&store),
                scheduler: scheduler.handle().clone(),
                alarm: Arc::clone(&alarm),
            };
            let cancel_for_api = cancel.clone();

            tokio::spawn(async move {
                let router = api::build_router(api_state);
                let addr = SocketAddr::from(([0, 0, 0, 0], api_port));

                let listener = match tokio::net::TcpListener::bind(addr).await {
                    Ok(l) => l,
                    Err(e) => {
                        tracing::error!(
                            "Failed to bind API to port {}: {}. Continuing without API.",
                            api_port,
                            e
                        );
                        return;
                    }
                };
                tracing::info!("API listening on http://{}", addr);

                axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        cancel_for_api.cancelled().await;
                    })
                    .await
                    .ok();

                tracing::debug!("API stopped");
            });
        }

        tracing::info!("Balance sentinel started");

        // Blocks until cancelled
        scheduler.run(triggers, cancel).await;

        tracing::info!("Balance sentinel stopped");
        Ok(())
    }
}
