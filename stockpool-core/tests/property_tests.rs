//! Property tests for normalization, sanitization and record reads.
//!
//! 1. Normalized scores always land in [0, 1]
//! 2. Normalization is idempotent for Auto and Unit hints
//! 3. Rounding keeps scores in range and at two decimals
//! 4. Sanitized values always serialize
//! 5. Stored scores are read leniently, never failing the load

use proptest::prelude::*;
use std::collections::BTreeMap;
use stockpool_core::domain::{StrategyResult, StrategyValue, TechnicalDetail};
use stockpool_core::{normalize, round_score, sanitize, ScaleHint};

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_raw_score() -> impl Strategy<Value = Option<f64>> {
    prop_oneof![
        Just(None),
        Just(Some(f64::NAN)),
        Just(Some(f64::INFINITY)),
        Just(Some(f64::NEG_INFINITY)),
        Just(Some(-0.0)),
        (-1_000.0..1_000.0_f64).prop_map(Some),
        (0.0..=1.0_f64).prop_map(Some),
    ]
}

fn arb_hint() -> impl Strategy<Value = ScaleHint> {
    prop_oneof![
        Just(ScaleHint::Auto),
        Just(ScaleHint::Unit),
        Just(ScaleHint::Percent),
    ]
}

fn arb_float() -> impl Strategy<Value = f64> {
    prop_oneof![
        Just(f64::NAN),
        Just(f64::INFINITY),
        Just(-0.0),
        any::<f64>(),
    ]
}

// ── 1–3. Normalization ───────────────────────────────────────────────

proptest! {
    #[test]
    fn normalized_score_in_unit_range(raw in arb_raw_score(), hint in arb_hint()) {
        let n = normalize(raw, hint);
        prop_assert!((0.0..=1.0).contains(&n));
        prop_assert!(n.is_sign_positive());
    }

    #[test]
    fn normalization_is_idempotent(raw in arb_raw_score()) {
        for hint in [ScaleHint::Auto, ScaleHint::Unit] {
            let once = normalize(raw, hint);
            let twice = normalize(Some(once), hint);
            prop_assert_eq!(once, twice);
        }
    }

    #[test]
    fn rounding_stays_in_range(raw in arb_raw_score()) {
        let r = round_score(normalize(raw, ScaleHint::Auto));
        prop_assert!((0.0..=1.0).contains(&r));
        prop_assert!(((r * 100.0).round() - r * 100.0).abs() < 1e-9);
    }
}

// ── 4. Sanitization ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn sanitized_values_serialize(values in prop::collection::vec(arb_float(), 0..8)) {
        let indicators: BTreeMap<String, f64> = values
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("k{i}"), *v))
            .collect();
        let value = StrategyValue::Technical(TechnicalDetail {
            summary: "p".into(),
            indicators,
        });
        let clean = sanitize(&value);
        let json = serde_json::to_string(&clean);
        prop_assert!(json.is_ok());
        if let StrategyValue::Technical(d) = clean {
            prop_assert!(d.indicators.values().all(|v| v.is_finite() && !(v == &0.0 && v.is_sign_negative())));
        }
    }
}

// ── 5. Lenient reads ─────────────────────────────────────────────────

proptest! {
    #[test]
    fn stored_score_never_fails_the_load(text in "\\PC{0,12}", num in -1e6..1e6_f64) {
        for raw in [
            serde_json::json!({"score": text.clone(), "value": text.clone()}),
            serde_json::json!({"score": num, "value": {"unexpected": num}}),
            serde_json::json!({"score": null}),
            serde_json::json!({}),
        ] {
            let parsed: Result<StrategyResult, _> = serde_json::from_value(raw);
            prop_assert!(parsed.is_ok());
            prop_assert!(parsed.unwrap().score.is_finite());
        }
    }
}
