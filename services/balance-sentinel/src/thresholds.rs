//! Threshold table: interval resolution and alert evaluation
//!
//! Both operations work on a copy of the thresholds sorted ascending by limit
//! and pick the first threshold whose limit is at or above the balance. The
//! sort is stable, so thresholds sharing a limit resolve in input order.

use serde::{Deserialize, Serialize};

use crate::balance::Balance;

/// Polling interval used when no threshold matches
pub const DEFAULT_INTERVAL_MINUTES: u32 = 60;

/// A balance ceiling paired with the polling interval to use at or below it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub limit: f64,
    pub interval: u32,
}

impl Threshold {
    pub fn new(limit: f64, interval: u32) -> Self {
        Self { limit, interval }
    }

    /// Limit in cents, or `None` when the limit is negative or not a number
    pub fn limit_balance(&self) -> Option<Balance> {
        Balance::from_amount(self.limit)
    }

    /// A threshold is usable when its limit is a non-negative amount and its
    /// interval is at least one minute
    pub fn is_valid(&self) -> bool {
        self.limit_balance().is_some() && self.interval >= 1
    }
}

/// Outcome of alert evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    /// The balance is at or below a configured limit
    LowBalance { balance: Balance, limit: Balance },
    /// Nothing to compare the balance against
    NoThresholds,
}

impl Alert {
    /// Render the webhook text for this alert
    pub fn message(&self, time: &str) -> String {
        match self {
            Alert::LowBalance { balance, .. } => format!(
                "🚨 *Billing Balance Alert*\n\n\
                 Your credit balance is running low!\n\n\
                 • Current Balance: `{}`\n\
                 • Time: `{}`\n\n\
                 _Please top up your credits to avoid service interruption._",
                balance.to_display(),
                time
            ),
            Alert::NoThresholds => format!(
                "⚠️ *Billing Balance Warning*\n\n\
                 No balance thresholds are configured, so the balance cannot be checked.\n\
                 • Time: `{}`\n\
                 • Please add at least one threshold in the settings.",
                time
            ),
        }
    }
}

/// Webhook text for a scrape whose balance text could not be parsed
pub fn parse_failure_message(raw: &str, time: &str) -> String {
    format!(
        "🚨 *Billing Balance Tracker Error*\n\n\
         Unable to parse balance value.\n\
         • Raw balance received: `{}`\n\
         • Time: `{}`\n\
         • Please check your balance and update the tracker settings.",
        raw, time
    )
}

/// Copy of `thresholds` with usable entries only, stably sorted ascending by limit
fn sorted(thresholds: &[Threshold]) -> Vec<(Balance, &Threshold)> {
    let mut sorted: Vec<(Balance, &Threshold)> = thresholds
        .iter()
        .filter(|t| t.interval >= 1)
        .filter_map(|t| t.limit_balance().map(|limit| (limit, t)))
        .collect();
    sorted.sort_by_key(|(limit, _)| *limit);
    sorted
}

/// First threshold, in ascending limit order, whose limit is at or above `balance`
fn first_match(balance: Balance, thresholds: &[Threshold]) -> Option<(Balance, &Threshold)> {
    sorted(thresholds)
        .into_iter()
        .find(|(limit, _)| *limit >= balance)
}

/// Pick the next polling interval in minutes for `balance`.
///
/// Falls back to [`DEFAULT_INTERVAL_MINUTES`] when the list is empty or the
/// balance exceeds every limit.
pub fn resolve_interval(balance: Balance, thresholds: &[Threshold]) -> u32 {
    resolve_interval_or(balance, thresholds, DEFAULT_INTERVAL_MINUTES)
}

/// [`resolve_interval`] with a caller-supplied fallback interval
pub fn resolve_interval_or(balance: Balance, thresholds: &[Threshold], fallback: u32) -> u32 {
    first_match(balance, thresholds)
        .map(|(_, threshold)| threshold.interval)
        .unwrap_or(fallback)
}

/// Decide whether `balance` warrants an alert.
///
/// Evaluated independently of [`resolve_interval`]. A list with no usable
/// threshold yields [`Alert::NoThresholds`] rather than silence.
pub fn evaluate_alert(balance: Balance, thresholds: &[Threshold]) -> Option<Alert> {
    if sorted(thresholds).is_empty() {
        return Some(Alert::NoThresholds);
    }

    match first_match(balance, thresholds) {
        Some((limit, _)) => Some(Alert::LowBalance { balance, limit }),
        None => {
            tracing::debug!("No alert needed, balance {} is above all thresholds", balance);
            None
        }
    }
}
