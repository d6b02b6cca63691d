//! BDD step definitions for HTTP API feature

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request};
use cucumber::gherkin::Step;
use cucumber::{given, then, when};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use balance_sentinel::alarm::Alarm;
use balance_sentinel::api::{build_router, ApiState};

use crate::world::BalanceWorld;

#[given("the service API is running")]
async fn api_running(world: &mut BalanceWorld) {
    let scheduler = world.scheduler().await;
    let triggers = world.triggers.take().expect("trigger queue already taken");
    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    let runner = Arc::clone(&scheduler);
    tokio::spawn(async move { runner.run(triggers, run_cancel).await });

    world.router = Some(build_router(ApiState {
        store: world.store(),
        scheduler: scheduler.handle().clone(),
        alarm: Arc::clone(&world.alarm) as Arc<dyn Alarm>,
    }));
    world.cancel = Some(cancel);
}

async fn send(world: &mut BalanceWorld, request: Request<Body>) {
    let router = world.router.clone().expect("API not running");
    let response = router.oneshot(request).await.unwrap();
    let status = response.status().as_u16();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    world.response = Some((status, json));
}

#[when(expr = "a client posts to {string}")]
async fn post(world: &mut BalanceWorld, uri: String) {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(world, request).await;
}

#[when(expr = "a client gets {string}")]
async fn get(world: &mut BalanceWorld, uri: String) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(world, request).await;
}

#[when("a client puts these settings:")]
async fn put_settings(world: &mut BalanceWorld, step: &Step) {
    let json = step.docstring.clone().expect("settings docstring missing");
    let request = Request::builder()
        .method(Method::PUT)
        .uri("/api/settings")
        .header("content-type", "application/json")
        .body(Body::from(json))
        .unwrap();
    send(world, request).await;
}

#[then(expr = "the response status is {int}")]
fn response_status(world: &mut BalanceWorld, status: u16) {
    let (actual, body) = world.response.as_ref().expect("no response");
    assert_eq!(*actual, status, "{}", body);
}

#[then(expr = "the response field {string} is {string}")]
fn response_field(world: &mut BalanceWorld, field: String, value: String) {
    let (_, body) = world.response.as_ref().expect("no response");
    assert_eq!(body[field.as_str()], serde_json::Value::String(value), "{}", body);
}

#[then(expr = "the stored webhook URL is {string}")]
async fn stored_webhook(world: &mut BalanceWorld, url: String) {
    let settings = world.store().settings().await.unwrap();
    assert_eq!(settings.webhook_url(), Some(url.as_str()));
}

#[then(expr = "{int} thresholds are stored")]
async fn stored_thresholds(world: &mut BalanceWorld, count: usize) {
    let settings = world.store().settings().await.unwrap();
    assert_eq!(settings.thresholds.len(), count);
}
