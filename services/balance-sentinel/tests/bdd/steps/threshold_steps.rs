//! BDD step definitions for threshold resolution feature

use cucumber::{given, then, when};

use balance_sentinel::balance::{parse_balance, Balance};
use balance_sentinel::thresholds::{evaluate_alert, resolve_interval, Alert, Threshold};

use crate::world::BalanceWorld;

fn balance(text: &str) -> Balance {
    parse_balance(text).expect("scenario balance must parse")
}

#[given(expr = "a threshold of {float} with interval {int} minutes")]
fn threshold(world: &mut BalanceWorld, limit: f64, interval: u32) {
    world.thresholds.push(Threshold::new(limit, interval));
}

#[given("no thresholds are configured")]
fn no_thresholds(world: &mut BalanceWorld) {
    world.thresholds.clear();
}

#[when(expr = "the balance {string} is resolved")]
fn resolve(world: &mut BalanceWorld, amount: String) {
    world.resolved_interval = Some(resolve_interval(balance(&amount), &world.thresholds));
}

#[when(expr = "the balance {string} is evaluated")]
fn evaluate(world: &mut BalanceWorld, amount: String) {
    world.evaluated_alert = Some(evaluate_alert(balance(&amount), &world.thresholds));
}

#[then(expr = "the next interval is {int} minutes")]
fn next_interval(world: &mut BalanceWorld, minutes: u32) {
    assert_eq!(world.resolved_interval, Some(minutes));
}

#[then(expr = "a low balance alert names the limit {string}")]
fn low_balance_alert(world: &mut BalanceWorld, limit: String) {
    match world.evaluated_alert.as_ref().expect("nothing evaluated") {
        Some(Alert::LowBalance { limit: actual, .. }) => assert_eq!(*actual, balance(&limit)),
        other => panic!("expected a low balance alert, got {:?}", other),
    }
}

#[then("the alert warns that no thresholds are configured")]
fn no_thresholds_alert(world: &mut BalanceWorld) {
    assert_eq!(world.evaluated_alert, Some(Some(Alert::NoThresholds)));
}

#[then("no alert is raised")]
fn no_alert(world: &mut BalanceWorld) {
    assert_eq!(world.evaluated_alert, Some(None));
}
