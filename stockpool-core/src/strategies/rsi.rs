//! RSI reversal: reports entities whose RSI crossed a threshold on the last bar.
//!
//! A cross up through `oversold` is bullish, a cross down through
//! `overbought` is bearish. Score is `100 − RSI` on the crossing bar, so a
//! fresh exit from oversold scores high and a roll-over from overbought low.

use std::collections::BTreeMap;

use crate::domain::{Namespace, StrategyValue, TechnicalDetail};
use crate::indicators::rsi_of_series;
use crate::registry::{ResolutionError, StrategyDescriptor};
use crate::strategy::{EntityInput, RawResult, Strategy, StrategyContext, StrategyError};

use super::require_period;

#[derive(Debug, Clone)]
pub struct RsiReversal {
    name: String,
    period: usize,
    overbought: f64,
    oversold: f64,
}

impl RsiReversal {
    pub fn from_descriptor(d: &StrategyDescriptor) -> Result<Self, ResolutionError> {
        let p = d.params();
        let period = require_period(&d.name, "period", p.usize_or(&["period", "rsi_period"], 14)?)?;
        let overbought = p.f64_or(&["overbought"], 70.0)?;
        let oversold = p.f64_or(&["oversold"], 30.0)?;
        if !(0.0..=100.0).contains(&oversold) || !(0.0..=100.0).contains(&overbought) || oversold >= overbought {
            return Err(ResolutionError::InvalidParameter {
                name: d.name.clone(),
                parameter: "oversold/overbought".into(),
                reason: format!("expected 0 <= oversold < overbought <= 100, got {oversold}/{overbought}"),
            });
        }
        Ok(Self {
            name: d.name.clone(),
            period,
            overbought,
            oversold,
        })
    }
}

impl Strategy for RsiReversal {
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
        let needed = self.period + 2;
        if input.bars.len() < needed {
            return Err(StrategyError::InsufficientData {
                needed,
                available: input.bars.len(),
            });
        }

        let closes: Vec<f64> = input.bars.iter().map(|b| b.close).collect();
        let rsi = rsi_of_series(&closes, self.period);
        let (prev, last) = match rsi.as_slice() {
            [.., prev, last] if !prev.is_nan() && !last.is_nan() => (*prev, *last),
            _ => return Err(StrategyError::InvalidInput("RSI undefined".into())),
        };

        let label = if prev <= self.oversold && last > self.oversold {
            "BUY"
        } else if prev >= self.overbought && last < self.overbought {
            "SELL"
        } else {
            return Ok(None);
        };

        let indicators = BTreeMap::from([
            (format!("rsi_{}", self.period), last),
            ("rsi_prev".to_string(), prev),
        ]);
        Ok(Some(RawResult::new(
            input.id.clone(),
            Some(100.0 - last),
            StrategyValue::Technical(TechnicalDetail {
                summary: format!("{label}: RSI{} {prev:.2} -> {last:.2}", self.period),
                indicators,
            }),
        )))
    }
}
