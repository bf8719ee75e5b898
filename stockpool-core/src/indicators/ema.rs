//! Exponential moving average.
//!
//! EMA[t] = alpha * x[t] + (1 - alpha) * EMA[t-1], alpha = 2 / (period + 1),
//! seeded with the SMA of the first `period` valid values. Leading NaNs (the
//! warmup of an upstream indicator) are skipped; a NaN after the seed taints
//! the rest of the series.

use super::Indicator;
use crate::domain::{bar::closes, Bar};

#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    name: String,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            name: format!("ema_{period}"),
        }
    }
}

impl Indicator for Ema {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period - 1
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        ema_of_series(&closes(bars), self.period)
    }
}

pub fn ema_of_series(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 {
        return result;
    }
    let Some(start) = values.iter().position(|v| !v.is_nan()) else {
        return result;
    };
    let seed_end = start + period;
    if seed_end > n {
        return result;
    }

    let seed_window = &values[start..seed_end];
    if seed_window.iter().any(|v| v.is_nan()) {
        return result;
    }
    let mut prev = seed_window.iter().sum::<f64>() / period as f64;
    result[seed_end - 1] = prev;

    let alpha = 2.0 / (period as f64 + 1.0);
    for i in seed_end..n {
        if values[i].is_nan() {
            break;
        }
        prev = alpha * values[i] + (1.0 - alpha) * prev;
        result[i] = prev;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, make_bars, DEFAULT_EPSILON};

    #[test]
    fn ema_3_known_values() {
        // alpha = 0.5, seed SMA(10,11,12) = 11
        let bars = make_bars(&[10.0, 11.0, 12.0, 13.0, 14.0]);
        let result = Ema::new(3).compute(&bars);
        assert!(result[0].is_nan() && result[1].is_nan());
        assert_approx(result[2], 11.0, DEFAULT_EPSILON);
        assert_approx(result[3], 12.0, DEFAULT_EPSILON);
        assert_approx(result[4], 13.0, DEFAULT_EPSILON);
    }

    #[test]
    fn leading_nan_is_warmup() {
        let result = ema_of_series(&[f64::NAN, f64::NAN, 10.0, 11.0, 12.0, 13.0], 3);
        assert!(result[..4].iter().all(|v| v.is_nan()));
        assert_approx(result[4], 11.0, DEFAULT_EPSILON);
        assert_approx(result[5], 12.0, DEFAULT_EPSILON);
    }

    #[test]
    fn nan_after_seed_taints_rest() {
        let result = ema_of_series(&[10.0, 11.0, 12.0, f64::NAN, 14.0], 3);
        assert_approx(result[2], 11.0, DEFAULT_EPSILON);
        assert!(result[3].is_nan() && result[4].is_nan());
    }
}
