//! Simple moving average and rolling maximum.

use super::Indicator;
use crate::domain::{bar::closes, Bar};

#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
    name: String,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            name: format!("sma_{period}"),
        }
    }
}

impl Indicator for Sma {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period - 1
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        sma_of_series(&closes(bars), self.period)
    }
}

/// Rolling mean. A window containing NaN yields NaN.
pub fn sma_of_series(values: &[f64], period: usize) -> Vec<f64> {
    rolling(values, period, |w| w.iter().sum::<f64>() / w.len() as f64)
}

/// Rolling maximum over the `period` values ending at each index.
pub fn rolling_max(values: &[f64], period: usize) -> Vec<f64> {
    rolling(values, period, |w| w.iter().copied().fold(f64::MIN, f64::max))
}

fn rolling(values: &[f64], period: usize, f: impl Fn(&[f64]) -> f64) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period {
        return result;
    }
    for (offset, window) in values.windows(period).enumerate() {
        if window.iter().any(|v| v.is_nan()) {
            continue;
        }
        result[offset + period - 1] = f(window);
    }
    result
}
