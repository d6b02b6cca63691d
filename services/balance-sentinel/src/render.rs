//! Rendering contexts: isolated page instances the extractor reads from

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::io::HttpClient;

/// An open page whose current document can be inspected
#[async_trait]
pub trait RenderContext: Send + Sync + std::fmt::Debug {
    /// Current serialized document of the page
    async fn document(&self) -> crate::Result<String>;

    /// Tear the page down
    async fn close(&self) -> crate::Result<()>;
}

/// Opens rendering contexts
#[async_trait]
pub trait Renderer: Send + Sync + std::fmt::Debug {
    /// Open a hidden page navigated to `url`
    async fn open(&self, url: &str) -> crate::Result<Arc<dyn RenderContext>>;
}

/// How long an [`HttpRenderer`] page serves its last fetched body before
/// fetching again
pub const DEFAULT_REFRESH: Duration = Duration::from_secs(5);

/// Renderer that loads the page over HTTP when opened and re-fetches it at
/// most once per refresh period while the extractor polls
#[derive(Clone)]
pub struct HttpRenderer {
    http: Arc<dyn HttpClient>,
    refresh: Duration,
}

impl std::fmt::Debug for HttpRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRenderer")
            .field("refresh", &self.refresh)
            .finish()
    }
}

impl HttpRenderer {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self::with_refresh(http, DEFAULT_REFRESH)
    }

    pub fn with_refresh(http: Arc<dyn HttpClient>, refresh: Duration) -> Self {
        Self { http, refresh }
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn open(&self, url: &str) -> crate::Result<Arc<dyn RenderContext>> {
        tracing::debug!("Opening HTTP page context for {}", url);
        let body = fetch(self.http.as_ref(), url).await?;
        Ok(Arc::new(HttpPage {
            url: url.to_string(),
            http: Arc::clone(&self.http),
            refresh: self.refresh,
            loaded: Mutex::new(Loaded {
                at: Instant::now(),
                body,
            }),
        }))
    }
}

async fn fetch(http: &dyn HttpClient, url: &str) -> crate::Result<String> {
    let response = http.get(url).await?;
    if !response.is_success() {
        return Err(crate::SentinelError::Render(format!(
            "{} returned status {}",
            url, response.status
        )));
    }
    Ok(response.body)
}

struct Loaded {
    at: Instant,
    body: String,
}

struct HttpPage {
    url: String,
    http: Arc<dyn HttpClient>,
    refresh: Duration,
    loaded: Mutex<Loaded>,
}

impl std::fmt::Debug for HttpPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPage").field("url", &self.url).finish()
    }
}

#[async_trait]
impl RenderContext for HttpPage {
    async fn document(&self) -> crate::Result<String> {
        let mut loaded = self.loaded.lock().await;
        if loaded.at.elapsed() >= self.refresh {
            tracing::debug!("Refreshing {}", self.url);
            // Restart the period even on failure so errors are not retried per poll
            loaded.at = Instant::now();
            loaded.body = fetch(self.http.as_ref(), &self.url).await?;
        }
        Ok(loaded.body.clone())
    }

    async fn close(&self) -> crate::Result<()> {
        tracing::debug!("Closed HTTP page context for {}", self.url);
        Ok(())
    }
}
