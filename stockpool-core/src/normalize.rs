//! Score normalization.
//!
//! Strategies report scores on whatever scale suits them (0–1 probabilities,
//! 0–100 percentages, sometimes nothing at all). Everything stored in a pool
//! record is first mapped into `[0.0, 1.0]` here.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// What the producer promises about its raw score scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleHint {
    /// Anything above 1.0 is taken to be a percentage.
    #[default]
    Auto,
    /// Already in [0, 1]; only clamped.
    Unit,
    /// Always a percentage.
    Percent,
}

/// Map a raw score into `[0.0, 1.0]`.
///
/// Missing, NaN and infinite inputs become 0.0. Never fails. `Auto` and
/// `Unit` are idempotent.
pub fn normalize(raw: Option<f64>, hint: ScaleHint) -> f64 {
    let Some(value) = raw else {
        warn!("missing score, using 0.0");
        return 0.0;
    };
    if !value.is_finite() {
        warn!(raw = %value, "non-finite score, using 0.0");
        return 0.0;
    }

    let scaled = match hint {
        ScaleHint::Auto if value > 1.0 => value / 100.0,
        ScaleHint::Auto | ScaleHint::Unit => value,
        ScaleHint::Percent => value / 100.0,
    };
    let clamped = scaled.clamp(0.0, 1.0);
    // -0.0 compares equal to 0.0 but prints differently
    if clamped == 0.0 {
        0.0
    } else {
        clamped
    }
}

/// Round to two decimals, the precision scores are persisted with.
pub fn round_score(score: f64) -> f64 {
    if !score.is_finite() {
        return 0.0;
    }
    let rounded = (score * 100.0).round() / 100.0;
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentages_are_scaled() {
        assert_eq!(normalize(Some(85.0), ScaleHint::Auto), 0.85);
        assert_eq!(normalize(Some(0.85), ScaleHint::Auto), 0.85);
        assert_eq!(normalize(Some(1.0), ScaleHint::Auto), 1.0);
    }

    #[test]
    fn out_of_range_is_clamped() {
        assert_eq!(normalize(Some(250.0), ScaleHint::Auto), 1.0);
        assert_eq!(normalize(Some(-3.0), ScaleHint::Auto), 0.0);
        assert_eq!(normalize(Some(7.0), ScaleHint::Unit), 1.0);
    }

    #[test]
    fn percent_hint_always_divides() {
        assert_eq!(normalize(Some(0.5), ScaleHint::Percent), 0.005);
        assert_eq!(normalize(Some(50.0), ScaleHint::Percent), 0.5);
    }

    #[test]
    fn missing_and_non_finite_become_zero() {
        assert_eq!(normalize(None, ScaleHint::Auto), 0.0);
        assert_eq!(normalize(Some(f64::NAN), ScaleHint::Auto), 0.0);
        assert_eq!(normalize(Some(f64::INFINITY), ScaleHint::Auto), 0.0);
        assert_eq!(normalize(Some(f64::NEG_INFINITY), ScaleHint::Unit), 0.0);
    }

    #[test]
    fn negative_zero_is_positive() {
        assert!(normalize(Some(-0.0), ScaleHint::Auto).is_sign_positive());
        assert!(round_score(-0.001).is_sign_positive());
    }

    #[test]
    fn rounding() {
        assert_eq!(round_score(0.456), 0.46);
        assert_eq!(round_score(0.454), 0.45);
        assert_eq!(round_score(f64::NAN), 0.0);
    }
}
