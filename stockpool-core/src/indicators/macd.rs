//! MACD: DIF = EMA(fast) - EMA(slow), DEA = EMA(signal) of DIF,
//! histogram = 2 * (DIF - DEA) as quoted on mainland exchanges.

use super::ema::ema_of_series;
use super::Indicator;
use crate::domain::{bar::closes, Bar};

#[derive(Debug, Clone, PartialEq)]
pub struct MacdSeries {
    pub dif: Vec<f64>,
    pub dea: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn macd_of_series(values: &[f64], fast: usize, slow: usize, signal: usize) -> MacdSeries {
    let fast_ema = ema_of_series(values, fast);
    let slow_ema = ema_of_series(values, slow);
    let dif: Vec<f64> = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| f - s)
        .collect();
    let dea = ema_of_series(&dif, signal);
    let histogram = dif.iter().zip(&dea).map(|(d, e)| 2.0 * (d - e)).collect();
    MacdSeries {
        dif,
        dea,
        histogram,
    }
}

/// Exposes the DIF line through the single-series `Indicator` trait.
#[derive(Debug, Clone)]
pub struct Macd {
    fast: usize,
    slow: usize,
    signal: usize,
    name: String,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self {
            fast,
            slow,
            signal,
            name: format!("macd_{fast}_{slow}_{signal}"),
        }
    }

    pub fn compute_all(&self, bars: &[Bar]) -> MacdSeries {
        macd_of_series(&closes(bars), self.fast, self.slow, self.signal)
    }
}

impl Indicator for Macd {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.fast.max(self.slow).saturating_sub(1)
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        self.compute_all(bars).dif
    }
}
