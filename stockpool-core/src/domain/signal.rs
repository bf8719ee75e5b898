//! Trading signals, actions and the fusion audit record.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Rule-based trading signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Hold,
    Sell,
}

impl Signal {
    /// Threshold rule shared by the calculated and heuristic signals:
    /// `< 0.4` sell, `0.4..=0.7` hold, `> 0.7` buy.
    pub fn from_score(score: f64) -> Self {
        if score < 0.4 {
            Self::Sell
        } else if score <= 0.7 {
            Self::Hold
        } else {
            Self::Buy
        }
    }

    /// Lenient parse of a signal label produced by an external scorer.
    pub fn parse_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "BUY" | "买入" => Some(Self::Buy),
            "HOLD" | "持有" => Some(Self::Hold),
            "SELL" | "卖出" => Some(Self::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Buy => "BUY",
            Self::Hold => "HOLD",
            Self::Sell => "SELL",
        })
    }
}

/// Final actionable decision. `None` serializes as the empty string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
    #[serde(rename = "")]
    None,
}

impl Action {
    /// BUY only when both agree on BUY; SELL when either says SELL.
    pub fn combine(calc: Signal, ai: Signal) -> Self {
        match (calc, ai) {
            (Signal::Sell, _) | (_, Signal::Sell) => Self::Sell,
            (Signal::Buy, Signal::Buy) => Self::Buy,
            _ => Self::None,
        }
    }

    pub fn is_actionable(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::None => "",
        })
    }
}

/// Audit trail of one entity's signal fusion, stored under `signals`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionResult {
    /// Entries with a non-zero score.
    pub count: usize,
    pub score_calc: f64,
    pub signal_calc: Signal,
    pub score_ai: f64,
    pub signal_ai: Signal,
    pub action: Action,
    pub reason_ai: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds() {
        assert_eq!(Signal::from_score(0.0), Signal::Sell);
        assert_eq!(Signal::from_score(0.3999), Signal::Sell);
        assert_eq!(Signal::from_score(0.4), Signal::Hold);
        assert_eq!(Signal::from_score(0.7), Signal::Hold);
        assert_eq!(Signal::from_score(0.7001), Signal::Buy);
    }

    #[test]
    fn action_serializes_none_as_empty() {
        assert_eq!(serde_json::to_string(&Action::None).unwrap(), "\"\"");
        assert_eq!(serde_json::to_string(&Action::Buy).unwrap(), "\"BUY\"");
        let back: Action = serde_json::from_str("\"\"").unwrap();
        assert_eq!(back, Action::None);
    }

    #[test]
    fn signal_labels() {
        assert_eq!(Signal::parse_label(" buy "), Some(Signal::Buy));
        assert_eq!(Signal::parse_label("卖出"), Some(Signal::Sell));
        assert_eq!(Signal::parse_label("maybe"), None);
    }
}
