//! HTTP API: manual trigger, status, history, settings and change events

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::alarm::{Alarm, ArmedAlarm};
use crate::error::SentinelError;
use crate::scheduler::{CycleOutcome, Phase, SchedulerHandle};
use crate::settings::Settings;
use crate::store::{ScheduleState, StateStore};

/// API application state
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<StateStore>,
    pub scheduler: SchedulerHandle,
    pub alarm: Arc<dyn Alarm>,
}

/// Build the API axum router
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/status", get(status_handler))
        .route("/api/logs", get(logs_handler))
        .route("/api/settings", get(get_settings_handler).put(put_settings_handler))
        .route("/api/scrape", post(scrape_handler))
        .route("/api/events", get(events_handler))
        .with_state(state)
}

struct ApiError(SentinelError);

impl From<SentinelError> for ApiError {
    fn from(e: SentinelError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            SentinelError::InvalidSettings(_) => StatusCode::BAD_REQUEST,
            SentinelError::Busy => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("API request failed: {}", self.0);
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    phase: Phase,
    #[serde(flatten)]
    schedule: Option<ScheduleState>,
    armed_alarm: Option<ArmedAlarm>,
}

async fn health_handler() -> impl IntoResponse {
    "OK"
}

async fn status_handler(State(api): State<ApiState>) -> Result<Json<StatusResponse>, ApiError> {
    Ok(Json(StatusResponse {
        phase: api.scheduler.phase(),
        schedule: api.store.schedule_state().await?,
        armed_alarm: api.alarm.armed(),
    }))
}

async fn logs_handler(State(api): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let mut logs = api.store.logs().await?;
    logs.reverse();
    Ok(Json(logs))
}

async fn get_settings_handler(State(api): State<ApiState>) -> Result<Json<Settings>, ApiError> {
    Ok(Json(api.store.settings().await?))
}

async fn put_settings_handler(
    State(api): State<ApiState>,
    Json(settings): Json<Settings>,
) -> Result<Json<Settings>, ApiError> {
    settings.validate()?;
    api.store.save_settings(&settings).await?;
    Ok(Json(api.store.settings().await?))
}

async fn scrape_handler(State(api): State<ApiState>) -> impl IntoResponse {
    let (status, label) = match api.scheduler.run_manual().await {
        Ok(CycleOutcome::Completed { .. }) | Ok(CycleOutcome::Skipped) => (StatusCode::OK, "success"),
        Ok(outcome) => {
            tracing::warn!("Manual scrape did not complete: {:?}", outcome);
            (StatusCode::SERVICE_UNAVAILABLE, "failed")
        }
        Err(SentinelError::Busy) => (StatusCode::CONFLICT, "busy"),
        Err(e) => {
            tracing::warn!("Manual scrape failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "failed")
        }
    };
    (status, Json(serde_json::json!({ "status": label })))
}

async fn events_handler(
    State(api): State<ApiState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(api.store.subscribe()).filter_map(|change| match change {
        Ok(_) => Some(Ok(Event::default().event("state-changed").data("{}"))),
        Err(e) => {
            tracing::debug!("Event subscriber lagged: {}", e);
            None
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
