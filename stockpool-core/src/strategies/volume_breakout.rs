//! Volume-confirmed breakout.
//!
//! Compares the last close with the highest high of the preceding
//! `breakout_period` bars, the last volume with its moving average and the
//! MACD DIF line. Score (0–100):
//! `40·min(2, vr−1) + 35·(p−h)/h + 25·max(0, dif)/max(0.01, |dif|)`, clamped.
//! Only entities scoring above `min_score` are reported.

use std::collections::BTreeMap;

use crate::domain::{Namespace, StrategyValue, TechnicalDetail};
use crate::indicators::{last_valid, macd_of_series, sma_of_series};
use crate::registry::{ResolutionError, StrategyDescriptor};
use crate::strategy::{EntityInput, RawResult, Strategy, StrategyContext, StrategyError};

use super::require_period;

/// Close must clear the prior high by this factor to count as a breakout.
const BREAKOUT_BUFFER: f64 = 1.015;

#[derive(Debug, Clone)]
pub struct VolumeBreakout {
    name: String,
    breakout_period: usize,
    volume_ma_period: usize,
    volume_multiplier: f64,
    macd_fast: usize,
    macd_slow: usize,
    macd_signal: usize,
    min_score: f64,
}

impl VolumeBreakout {
    pub fn from_descriptor(d: &StrategyDescriptor) -> Result<Self, ResolutionError> {
        let p = d.params();
        Ok(Self {
            name: d.name.clone(),
            breakout_period: require_period(&d.name, "breakout_period", p.usize_or(&["breakout_period"], 13)?)?,
            volume_ma_period: require_period(&d.name, "volume_ma_period", p.usize_or(&["volume_ma_period"], 5)?)?,
            volume_multiplier: p.f64_or(&["volume_multiplier"], 1.8)?,
            macd_fast: require_period(&d.name, "macd_fast", p.usize_or(&["macd_fast"], 12)?)?,
            macd_slow: require_period(&d.name, "macd_slow", p.usize_or(&["macd_slow"], 26)?)?,
            macd_signal: require_period(&d.name, "macd_signal", p.usize_or(&["macd_signal"], 9)?)?,
            min_score: p.f64_or(&["min_score"], 60.0)?,
        })
    }

    fn required_bars(&self) -> usize {
        (self.breakout_period + 1)
            .max(self.volume_ma_period)
            .max(self.macd_slow + self.macd_signal)
    }
}

/// Breakout strength on a 0–100 scale.
pub fn breakout_score(volume_ratio: f64, price: f64, breakout_high: f64, dif: f64) -> f64 {
    let volume_term = 40.0 * (volume_ratio - 1.0).min(2.0);
    let breakout_term = if breakout_high != 0.0 {
        35.0 * (price - breakout_high) / breakout_high
    } else {
        0.0
    };
    let momentum_term = if dif != 0.0 {
        25.0 * dif.max(0.0) / dif.abs().max(0.01)
    } else {
        0.0
    };
    (volume_term + breakout_term + momentum_term).clamp(0.0, 100.0)
}

impl Strategy for VolumeBreakout {
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> Namespace {
        Namespace::Tech
    }

    fn score(
        &self,
        input: &EntityInput,
        _ctx: &StrategyContext,
    ) -> Result<Option<RawResult>, StrategyError> {
        let bars = &input.bars;
        let needed = self.required_bars();
        if bars.len() < needed {
            return Err(StrategyError::InsufficientData {
                needed,
                available: bars.len(),
            });
        }

        let n = bars.len();
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
        let prior = &bars[n - 1 - self.breakout_period..n - 1];
        let breakout_high = prior.iter().map(|b| b.high).fold(f64::MIN, f64::max);

        let price = closes[n - 1];
        let volume = volumes[n - 1];
        let avg_volume = sma_of_series(&volumes, self.volume_ma_period)[n - 1];
        let macd = macd_of_series(&closes, self.macd_fast, self.macd_slow, self.macd_signal);
        let dif = macd.dif[n - 1];

        if breakout_high.is_nan() || volume.is_nan() || avg_volume.is_nan() || dif.is_nan() {
            return Err(StrategyError::InvalidInput("indicators undefined".into()));
        }

        let volume_ratio = if avg_volume != 0.0 { volume / avg_volume } else { 0.0 };
        let breakout = price > breakout_high * BREAKOUT_BUFFER
            && volume_ratio >= self.volume_multiplier
            && dif > 0.0;
        let score = breakout_score(volume_ratio, price, breakout_high, dif);
        if score <= self.min_score {
            return Ok(None);
        }

        let dea = last_valid(&macd.dea).map(|(_, v)| v).unwrap_or(f64::NAN);
        let mut summary = format!(
            "close={price:.2}, breakout_high={breakout_high:.2}, volume={volume:.0}, avg_volume={avg_volume:.0}, volume_ratio={volume_ratio:.2}, DIF={dif:.4}"
        );
        if breakout {
            summary.push_str(" (volume breakout)");
        }
        let indicators = BTreeMap::from([
            ("close".to_string(), price),
            ("breakout_high".to_string(), breakout_high),
            ("volume".to_string(), volume),
            ("avg_volume".to_string(), avg_volume),
            ("volume_ratio".to_string(), volume_ratio),
            ("macd_dif".to_string(), dif),
            ("macd_dea".to_string(), dea),
            ("breakout".to_string(), if breakout { 1.0 } else { 0.0 }),
        ]);

        Ok(Some(RawResult::new(
            input.id.clone(),
            Some(score),
            StrategyValue::Technical(TechnicalDetail {
                summary,
                indicators,
            }),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProgramRef;
    use crate::strategies::fixtures::{flat_volume, input};
    use crate::strategy::Phase;

    fn strategy() -> VolumeBreakout {
        let d = StrategyDescriptor::new("volume_breakout", ProgramRef::new("volume_breakout_strategy", "VolumeBreakoutStrategy"));
        VolumeBreakout::from_descriptor(&d).unwrap()
    }

    #[test]
    fn score_formula() {
        // vr=3 → 80, 2% breakout → 0.7, positive dif → 25
        let s = breakout_score(3.0, 10.2, 10.0, 0.5);
        assert!((s - 100.0).abs() < 1e-9);
        let s = breakout_score(2.0, 10.2, 10.0, 0.5);
        assert!((s - (40.0 + 0.7 + 25.0)).abs() < 1e-9);
        assert_eq!(breakout_score(0.5, 9.0, 10.0, -0.2), 0.0);
    }

    #[test]
    fn volume_surge_above_prior_high_is_selected() {
        let mut closes: Vec<f64> = (0..40).map(|i| 10.0 + i as f64 * 0.05).collect();
        let last = closes[closes.len() - 1];
        closes.push(last * 1.05);
        let mut volumes = vec![1000.0; 40];
        volumes.push(4000.0);
        let ctx = StrategyContext::new(Phase::Technical);
        let result = strategy().score(&input(&closes, &volumes), &ctx).unwrap().unwrap();
        assert!(result.score.unwrap() > 60.0);
        let StrategyValue::Technical(d) = result.value else {
            panic!("expected technical detail");
        };
        assert_eq!(d.indicators["breakout"], 1.0);
    }

    #[test]
    fn quiet_market_has_no_opinion() {
        let closes: Vec<f64> = (0..41).map(|i| 10.0 + (i % 3) as f64 * 0.01).collect();
        let ctx = StrategyContext::new(Phase::Technical);
        assert!(strategy().score(&flat_volume(&closes), &ctx).unwrap().is_none());
    }

    #[test]
    fn short_history_is_an_error() {
        let ctx = StrategyContext::new(Phase::Technical);
        assert!(matches!(
            strategy().score(&flat_volume(&[10.0; 10]), &ctx),
            Err(StrategyError::InsufficientData { needed: 35, .. })
        ));
    }
}
