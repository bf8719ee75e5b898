//! Make strategy values safe to persist.
//!
//! JSON has no NaN or infinity and the stored documents should never carry a
//! negative zero. Floats that cannot be represented are dropped from maps and
//! replaced by 0.0 in scalar positions.

use crate::domain::{FusionResult, StrategyValue};
use std::collections::BTreeMap;

/// Finite floats pass through (with -0.0 folded to 0.0); others become `None`.
pub fn clean_f64(v: f64) -> Option<f64> {
    if !v.is_finite() {
        None
    } else if v == 0.0 {
        Some(0.0)
    } else {
        Some(v)
    }
}

fn clean_map(map: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    map.iter()
        .filter_map(|(k, v)| clean_f64(*v).map(|v| (k.clone(), v)))
        .collect()
}

fn clean_fusion(f: &FusionResult) -> FusionResult {
    FusionResult {
        score_calc: clean_f64(f.score_calc).unwrap_or(0.0),
        score_ai: clean_f64(f.score_ai).unwrap_or(0.0),
        ..f.clone()
    }
}

/// Recursively sanitize a value.
pub fn sanitize(value: &StrategyValue) -> StrategyValue {
    match value {
        StrategyValue::Technical(d) => {
            let mut d = d.clone();
            d.indicators = clean_map(&d.indicators);
            StrategyValue::Technical(d)
        }
        StrategyValue::Fundamental(d) => {
            let mut d = d.clone();
            d.metrics = clean_map(&d.metrics);
            StrategyValue::Fundamental(d)
        }
        StrategyValue::Sentiment(d) => {
            let mut d = d.clone();
            d.sentiment = clean_f64(d.sentiment).unwrap_or(0.0);
            StrategyValue::Sentiment(d)
        }
        StrategyValue::Fusion(f) => StrategyValue::Fusion(clean_fusion(f)),
        StrategyValue::Opaque(s) => StrategyValue::Opaque(s.clone()),
        StrategyValue::Raw(v) => StrategyValue::Raw(v.clone()),
    }
}
