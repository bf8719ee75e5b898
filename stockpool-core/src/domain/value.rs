//! Structured strategy detail: the `value` half of a strategy result.
//!
//! One variant per strategy family, a tagged free-text `Opaque`, and `Raw` for
//! anything another producer wrote that this build does not understand.
//! Reading is lenient: a bare string or an unrecognised JSON shape is kept as
//! `Raw` and written back exactly as it was read.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use super::signal::FusionResult;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TechnicalDetail {
    pub summary: String,
    #[serde(default)]
    pub indicators: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FundamentalDetail {
    pub summary: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SentimentDetail {
    pub summary: String,
    /// Net sentiment in [-1, 1].
    pub sentiment: f64,
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StrategyValue {
    Technical(TechnicalDetail),
    Fundamental(FundamentalDetail),
    Sentiment(SentimentDetail),
    Fusion(FusionResult),
    Opaque(String),
    /// Stored JSON this build does not model. Serialized untagged and unchanged.
    #[serde(untagged)]
    Raw(serde_json::Value),
}

impl Default for StrategyValue {
    fn default() -> Self {
        Self::Raw(serde_json::Value::Null)
    }
}

impl StrategyValue {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Opaque(s.into())
    }

    /// Interpret an arbitrary stored JSON value.
    pub fn from_json(raw: serde_json::Value) -> Self {
        let tagged = matches!(&raw, serde_json::Value::Object(map) if map.contains_key("kind"));
        if tagged {
            if let Ok(value) = serde_json::from_value::<StrategyValue>(raw.clone()) {
                return value;
            }
        }
        Self::Raw(raw)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Raw(serde_json::Value::Null))
    }

    /// Human-readable one-liner, used when handing details to the secondary scorer.
    pub fn summary(&self) -> String {
        match self {
            Self::Technical(d) => d.summary.clone(),
            Self::Fundamental(d) => d.summary.clone(),
            Self::Sentiment(d) => d.summary.clone(),
            Self::Fusion(f) => format!(
                "count={} score_calc={:.2} signal_calc={} score_ai={:.2} signal_ai={}",
                f.count, f.score_calc, f.signal_calc, f.score_ai, f.signal_ai
            ),
            Self::Opaque(s) => s.clone(),
            Self::Raw(serde_json::Value::String(s)) => s.clone(),
            Self::Raw(serde_json::Value::Null) => String::new(),
            Self::Raw(other) => other.to_string(),
        }
    }

    pub fn as_fusion(&self) -> Option<&FusionResult> {
        match self {
            Self::Fusion(f) => Some(f),
            _ => None,
        }
    }
}

/// `deserialize_with` helper backing the lenient read of stored values.
pub fn lenient_value<'de, D>(deserializer: D) -> Result<StrategyValue, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    Ok(StrategyValue::from_json(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tagged_roundtrip() {
        let value = StrategyValue::Technical(TechnicalDetail {
            summary: "close=10.20, MA5=10.01".into(),
            indicators: BTreeMap::from([("ma_5".to_string(), 10.01)]),
        });
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json["kind"], "technical");
        assert_eq!(StrategyValue::from_json(json), value);
    }

    #[test]
    fn bare_string_is_kept_as_is() {
        let raw = json!("收盘价=10.2, MA5=10.0");
        let v = StrategyValue::from_json(raw.clone());
        assert_eq!(v.summary(), "收盘价=10.2, MA5=10.0");
        assert_eq!(serde_json::to_value(&v).unwrap(), raw);
    }

    #[test]
    fn unknown_shape_writes_back_unchanged() {
        let raw = json!({"ratio": 1.5, "flag": true});
        let v = StrategyValue::from_json(raw.clone());
        assert_eq!(v, StrategyValue::Raw(raw.clone()));
        assert_eq!(serde_json::to_value(&v).unwrap(), raw);
    }

    #[test]
    fn malformed_tagged_value_is_not_rewritten() {
        let raw = json!({"kind": "technical", "detail": 7});
        let v = StrategyValue::from_json(raw.clone());
        assert_eq!(serde_json::to_value(&v).unwrap(), raw);
    }

    #[test]
    fn null_is_the_default() {
        let v = StrategyValue::from_json(serde_json::Value::Null);
        assert_eq!(v, StrategyValue::default());
        assert!(v.is_null());
        assert_eq!(v.summary(), "");
    }
}
