//! Three moving averages in bullish arrangement.
//!
//! Selects an entity when close > MA_short > MA_mid > MA_long and all three
//! averages rose on the last bar. Score (0–100):
//! `50·(s−m)/m + 30·(m−l)/l + 20·(p−s)/s`, clamped.

use std::collections::BTreeMap;

use crate::domain::{Namespace, StrategyValue, TechnicalDetail};
use crate::indicators::sma_of_series;
use crate::registry::{ResolutionError, StrategyDescriptor};
use crate::strategy::{EntityInput, RawResult, Strategy, StrategyContext, StrategyError};

use super::require_period;

#[derive(Debug, Clone)]
pub struct ThreeMaBullish {
    name: String,
    short: usize,
    mid: usize,
    long: usize,
}

impl ThreeMaBullish {
    pub fn new(name: impl Into<String>, short: usize, mid: usize, long: usize) -> Self {
        Self {
            name: name.into(),
            short,
            mid,
            long,
        }
    }

    /// Parameters: `short`/`mid`/`long` (aliases `ma_short`/`ma_mid`/`ma_long`), default 5/13/34.
    pub fn from_descriptor(d: &StrategyDescriptor) -> Result<Self, ResolutionError> {
        let p = d.params();
        let short = require_period(&d.name, "short", p.usize_or(&["short", "ma_short"], 5)?)?;
        let mid = require_period(&d.name, "mid", p.usize_or(&["mid", "ma_mid"], 13)?)?;
        let long = require_period(&d.name, "long", p.usize_or(&["long", "ma_long"], 34)?)?;
        if !(short < mid && mid < long) {
            return Err(ResolutionError::InvalidParameter {
                name: d.name.clone(),
                parameter: "short/mid/long".into(),
                reason: format!("expected short < mid < long, got {short}/{mid}/{long}"),
            });
        }
        Ok(Self::new(d.name.clone(), short, mid, long))
    }

    fn required_bars(&self) -> usize {
        // one extra bar to measure the slope of the longest average
        self.long + 1
    }
}

fn last_two(series: &[f64]) -> Option<(f64, f64)> {
    match series {
        [.., prev, last] if !prev.is_nan() && !last.is_nan() => Some((*prev, *last)),
        _ => None,
    }
}

impl Strategy for ThreeMaBullish {
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
        let needed = self.required_bars();
        if input.bars.len() < needed {
            return Err(StrategyError::InsufficientData {
                needed,
                available: input.bars.len(),
            });
        }

        let closes: Vec<f64> = input.bars.iter().map(|b| b.close).collect();
        let (Some((s_prev, s)), Some((m_prev, m)), Some((l_prev, l))) = (
            last_two(&sma_of_series(&closes, self.short)),
            last_two(&sma_of_series(&closes, self.mid)),
            last_two(&sma_of_series(&closes, self.long)),
        ) else {
            return Err(StrategyError::InvalidInput("moving averages undefined".into()));
        };
        let price = closes[closes.len() - 1];

        let arranged = price > s && s > m && m > l;
        let rising = s > s_prev && m > m_prev && l > l_prev;
        if !arranged || !rising {
            return Ok(None);
        }
        if s == 0.0 || m == 0.0 || l == 0.0 {
            return Err(StrategyError::InvalidInput("zero moving average".into()));
        }

        let score = (50.0 * (s - m) / m + 30.0 * (m - l) / l + 20.0 * (price - s) / s).clamp(0.0, 100.0);
        let golden_cross = s_prev <= m_prev && s > m;

        let mut summary = format!(
            "bullish arrangement: close={price:.2}, MA{}={s:.2}, MA{}={m:.2}, MA{}={l:.2}",
            self.short, self.mid, self.long
        );
        if golden_cross {
            summary.push_str(" (golden cross)");
        }
        let indicators = BTreeMap::from([
            ("close".to_string(), price),
            (format!("ma_{}", self.short), s),
            (format!("ma_{}", self.mid), m),
            (format!("ma_{}", self.long), l),
            ("golden_cross".to_string(), if golden_cross { 1.0 } else { 0.0 }),
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
