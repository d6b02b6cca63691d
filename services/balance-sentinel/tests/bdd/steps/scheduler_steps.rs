//! BDD step definitions for scheduler feature

use std::time::Duration;

use cucumber::{given, then, when};

use balance_sentinel::alarm::Alarm;
use balance_sentinel::scheduler::{CycleOutcome, Trigger};
use balance_sentinel::store::{LogEntry, ScheduleState};

use crate::world::BalanceWorld;

fn outcome(world: &BalanceWorld) -> &CycleOutcome {
    world
        .outcome
        .as_ref()
        .expect("no trigger handled")
        .as_ref()
        .expect("trigger was ignored")
}

#[given(expr = "a webhook URL {string}")]
fn webhook(world: &mut BalanceWorld, url: String) {
    world.webhook_url = Some(url);
}

#[given("no webhook URL is configured")]
fn no_webhook(world: &mut BalanceWorld) {
    world.webhook_url = None;
}

#[given(expr = "the history already holds {int} entries")]
async fn seed_history(world: &mut BalanceWorld, count: u64) {
    let store = world.store();
    for serial in 1..=count {
        store
            .commit(
                LogEntry {
                    serial,
                    balance: "$50.00".to_string(),
                    timestamp: "1/1/2024, 9:00:00 AM".to_string(),
                },
                &ScheduleState {
                    last_balance: "50.00".to_string(),
                    last_scrape_time: serial,
                    next_scrape_interval: 60,
                    next_scrape_time: "1/1/2024, 10:00:00 AM".to_string(),
                },
            )
            .await
            .unwrap();
    }
}

#[given("a cycle is already running")]
async fn cycle_running(world: &mut BalanceWorld) {
    world.scheduler().await;
    assert!(world.handle().try_claim());
}

#[when("the alarm fires")]
async fn alarm_fires(world: &mut BalanceWorld) {
    let scheduler = world.scheduler().await;
    let generation = world.alarm.generation();
    world.outcome = Some(scheduler.handle_trigger(Trigger::Alarm { generation }).await);
}

#[given("an alarm fire is queued and the alarm is re-armed before it is handled")]
async fn fire_queued_then_rearmed(world: &mut BalanceWorld) {
    world.scheduler().await;
    let generation = world.alarm.generation();
    world.queued_fire = Some(Trigger::Alarm { generation });
    world.alarm.arm(15);
}

#[when("the queued alarm fire is handled")]
async fn queued_fire_handled(world: &mut BalanceWorld) {
    let scheduler = world.scheduler().await;
    let fire = world.queued_fire.take().expect("no queued fire");
    world.outcome = Some(scheduler.handle_trigger(fire).await);
}

#[then(expr = "the cycle completes with balance {string} and interval {int} minutes")]
fn cycle_completes(world: &mut BalanceWorld, balance: String, minutes: u32) {
    match outcome(world) {
        CycleOutcome::Completed {
            balance: actual,
            interval_minutes,
            ..
        } => {
            assert_eq!(actual.to_string(), balance);
            assert_eq!(*interval_minutes, minutes);
        }
        other => panic!("expected a completed cycle, got {:?}", other),
    }
}

#[then("the cycle is skipped")]
fn cycle_skipped(world: &mut BalanceWorld) {
    assert_eq!(outcome(world), &CycleOutcome::Skipped);
}

#[then("the cycle times out")]
fn cycle_times_out(world: &mut BalanceWorld) {
    assert_eq!(outcome(world), &CycleOutcome::TimedOut);
}

#[then(expr = "the cycle reports unparseable text {string}")]
fn cycle_unparseable(world: &mut BalanceWorld, raw: String) {
    assert_eq!(outcome(world), &CycleOutcome::Unparseable { raw });
}

#[then("the alarm fire is ignored")]
fn alarm_ignored(world: &mut BalanceWorld) {
    assert_eq!(world.outcome, Some(None));
    assert_eq!(world.site.opened.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[then(expr = "the last balance is {string}")]
async fn last_balance(world: &mut BalanceWorld, expected: String) {
    let state = world.store().schedule_state().await.unwrap();
    assert_eq!(state.map(|s| s.last_balance), Some(expected));
}

#[then("nothing is persisted")]
async fn nothing_persisted(world: &mut BalanceWorld) {
    let store = world.store();
    assert!(store.schedule_state().await.unwrap().is_none());
    assert!(store.logs().await.unwrap().is_empty());
}

#[then(regex = r"^the history holds (\d+) entr(?:y|ies)$")]
async fn history_holds(world: &mut BalanceWorld, count: usize) {
    assert_eq!(world.store().logs().await.unwrap().len(), count);
}

#[then(expr = "the oldest history entry has serial {int}")]
async fn oldest_serial(world: &mut BalanceWorld, serial: u64) {
    let logs = world.store().logs().await.unwrap();
    assert_eq!(logs.first().map(|entry| entry.serial), Some(serial));
}

#[then(expr = "the alarm is armed every {int} minutes")]
fn alarm_armed(world: &mut BalanceWorld, minutes: u32) {
    assert_eq!(world.alarm.arms.lock().unwrap().last(), Some(&minutes));
}

#[then("the alarm is not re-armed")]
fn alarm_not_armed(world: &mut BalanceWorld) {
    assert!(world.alarm.arms.lock().unwrap().is_empty());
}

#[then(expr = "a low balance alert mentioning {string} is sent")]
async fn low_balance_alert_sent(world: &mut BalanceWorld, text: String) {
    let sent = next_notification(world).await.expect("no alert sent");
    assert!(sent.text.contains("Billing Balance Alert"), "{}", sent.text);
    assert!(sent.text.contains(&text), "{}", sent.text);
    assert_eq!(Some(sent.webhook_url), world.webhook_url);
}

#[then("a parse error alert is sent")]
async fn parse_error_alert_sent(world: &mut BalanceWorld) {
    let sent = next_notification(world).await.expect("no alert sent");
    assert!(sent.text.contains("Unable to parse balance value"), "{}", sent.text);
}

#[then("no alert is sent")]
async fn no_alert_sent(world: &mut BalanceWorld) {
    assert!(next_notification(world).await.is_none());
}

async fn next_notification(
    world: &mut BalanceWorld,
) -> Option<balance_sentinel::notifier::Notification> {
    let rx = world.notifications.as_mut().expect("scheduler not built");
    tokio::time::timeout(Duration::from_millis(200), rx.recv())
        .await
        .ok()
        .flatten()
}
