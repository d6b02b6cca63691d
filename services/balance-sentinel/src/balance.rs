//! Fixed-point balance values and the rule for parsing scraped balance text

use std::fmt;

/// A non-negative currency amount held as whole cents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Balance(u64);

impl Balance {
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    pub const fn cents(self) -> u64 {
        self.0
    }

    /// Convert a configured amount to cents, rounding half-up.
    ///
    /// Returns `None` for negative or non-finite amounts.
    pub fn from_amount(amount: f64) -> Option<Self> {
        if !amount.is_finite() || amount < 0.0 {
            return None;
        }
        let cents = (amount * 100.0).round();
        if cents >= u64::MAX as f64 {
            return None;
        }
        Some(Self(cents as u64))
    }

    /// Dollar-prefixed form used in log entries and alert text
    pub fn to_display(self) -> String {
        format!("${}", self)
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Scraped text that carries no usable numeric balance
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no numeric balance in {raw:?}")]
pub struct ParseFailure {
    pub raw: String,
}

/// Parse scraped balance text such as `"US$1,234.56"`.
///
/// Every character that is not an ASCII digit or `.` is dropped. What remains
/// must hold at least one digit and at most one decimal point. The value is
/// rounded half-up to two decimal places.
pub fn parse_balance(raw: &str) -> Result<Balance, ParseFailure> {
    let fail = || ParseFailure {
        raw: raw.to_string(),
    };

    let stripped: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    let (whole, fraction) = stripped
        .split_once('.')
        .unwrap_or((stripped.as_str(), ""));

    if fraction.contains('.') || (whole.is_empty() && fraction.is_empty()) {
        return Err(fail());
    }

    let mut cents: u64 = 0;
    for digit in whole.bytes() {
        cents = cents
            .checked_mul(10)
            .and_then(|c| c.checked_add(u64::from(digit - b'0')))
            .ok_or_else(fail)?;
    }
    cents = cents.checked_mul(100).ok_or_else(fail)?;

    let mut digits = fraction.bytes().map(|d| u64::from(d - b'0'));
    let tenths = digits.next().unwrap_or(0);
    let hundredths = digits.next().unwrap_or(0);
    let round_up = u64::from(digits.next().is_some_and(|d| d >= 5));

    cents
        .checked_add(tenths * 10 + hundredths + round_up)
        .map(Balance)
        .ok_or_else(fail)
}
