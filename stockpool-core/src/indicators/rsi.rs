//! Relative Strength Index with Wilder smoothing.
//!
//! RSI = 100 - 100 / (1 + avg_gain / avg_loss). Lookback: period.

use super::Indicator;
use crate::domain::{bar::closes, Bar};

#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    name: String,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            name: format!("rsi_{period}"),
        }
    }
}

impl Indicator for Rsi {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        rsi_of_series(&closes(bars), self.period)
    }
}

pub fn rsi_of_series(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n <= period {
        return result;
    }

    let changes: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
    let seed = &changes[..period];
    if seed.iter().any(|c| c.is_nan()) {
        return result;
    }
    let mut avg_gain = seed.iter().filter(|c| **c > 0.0).sum::<f64>() / period as f64;
    let mut avg_loss = -seed.iter().filter(|c| **c < 0.0).sum::<f64>() / period as f64;
    result[period] = rsi_value(avg_gain, avg_loss);

    let alpha = 1.0 / period as f64;
    for (i, &change) in changes.iter().enumerate().skip(period) {
        if change.is_nan() {
            break;
        }
        avg_gain = alpha * change.max(0.0) + (1.0 - alpha) * avg_gain;
        avg_loss = alpha * (-change).max(0.0) + (1.0 - alpha) * avg_loss;
        result[i + 1] = rsi_value(avg_gain, avg_loss);
    }
    result
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    match (avg_gain == 0.0, avg_loss == 0.0) {
        (true, true) => 50.0,
        (false, true) => 100.0,
        (true, false) => 0.0,
        (false, false) => 100.0 - 100.0 / (1.0 + avg_gain / avg_loss),
    }
}
