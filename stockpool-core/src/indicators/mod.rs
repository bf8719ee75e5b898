//! Indicator math used by the bundled technical strategies.
//!
//! Indicators are pure functions: bar history in, numeric series out, same
//! length as the input with NaN during warmup. Each has a series form
//! (`*_of_series`) so composed indicators (MACD) can feed one into another.

pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;

pub use ema::{ema_of_series, Ema};
pub use macd::{macd_of_series, Macd, MacdSeries};
pub use rsi::{rsi_of_series, Rsi};
pub use sma::{rolling_max, sma_of_series, Sma};

use crate::domain::Bar;

/// Indicators take a full bar series and produce an output series of the same
/// length. The first `lookback()` values are `f64::NAN`.
///
/// No value at bar t may depend on data from bar t+1 or later.
pub trait Indicator: Send + Sync {
    /// Human-readable name (e.g., "sma_20", "rsi_14").
    fn name(&self) -> &str;

    /// Number of bars needed before the indicator produces valid output.
    fn lookback(&self) -> usize;

    fn compute(&self, bars: &[Bar]) -> Vec<f64>;
}

/// Last non-NaN value of a series together with its index.
pub fn last_valid(series: &[f64]) -> Option<(usize, f64)> {
    series
        .iter()
        .enumerate()
        .rev()
        .find(|(_, v)| !v.is_nan())
        .map(|(i, v)| (i, *v))
}

/// Synthetic bars from close prices for tests.
///
/// open = previous close, high/low = max/min(open, close) ± 1% , volume = 1000.
#[cfg(test)]
pub fn make_bars(closes: &[f64]) -> Vec<Bar> {
    let base_date = chrono::NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Bar {
                date: base_date + chrono::Duration::days(i as i64),
                open,
                high: open.max(close) * 1.01,
                low: open.min(close) * 0.99,
                close,
                volume: 1000.0,
            }
        })
        .collect()
}

#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;
