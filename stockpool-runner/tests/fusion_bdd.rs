//! BDD tests for signal fusion.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use stockpool_core::domain::{
    Action, CycleKey, EntityId, EntityRecord, Namespace, PoolRecord, Signal, StrategyResult,
    StrategyValue,
};
use stockpool_core::scoring::{
    ExternalCallError, HeuristicScorer, SecondaryScorer, SecondaryVerdict, StrategyTuple,
};
use stockpool_runner::{
    global_strategy_count, CancelToken, MemoryPoolStore, PoolMergeEngine, PoolStore,
    SignalFusionEngine,
};

/// Always answers with the given signal.
struct Says(Signal);

impl SecondaryScorer for Says {
    fn name(&self) -> &str {
        "says"
    }

    fn evaluate(&self, _: &EntityId, _: &[StrategyTuple]) -> Result<SecondaryVerdict, ExternalCallError> {
        let score = match self.0 {
            Signal::Buy => 0.9,
            Signal::Hold => 0.5,
            Signal::Sell => 0.1,
        };
        Ok(SecondaryVerdict {
            score,
            signal: self.0,
            reasoning: format!("always {}", self.0),
        })
    }
}

/// Fails for one entity, answers BUY for the rest.
struct FlakyFor(&'static str, AtomicUsize);

impl SecondaryScorer for FlakyFor {
    fn name(&self) -> &str {
        "flaky"
    }

    fn evaluate(&self, entity: &EntityId, _: &[StrategyTuple]) -> Result<SecondaryVerdict, ExternalCallError> {
        self.1.fetch_add(1, Ordering::SeqCst);
        if entity.as_str() == self.0 {
            return Err(ExternalCallError::Status {
                status: 503,
                body: "overloaded".into(),
            });
        }
        Ok(SecondaryVerdict {
            score: 0.9,
            signal: Signal::Buy,
            reasoning: "fine".into(),
        })
    }
}

struct Sleepy;

impl SecondaryScorer for Sleepy {
    fn name(&self) -> &str {
        "sleepy"
    }

    fn evaluate(&self, _: &EntityId, _: &[StrategyTuple]) -> Result<SecondaryVerdict, ExternalCallError> {
        std::thread::sleep(Duration::from_millis(300));
        Ok(SecondaryVerdict {
            score: 0.9,
            signal: Signal::Buy,
            reasoning: "late".into(),
        })
    }
}

fn three_entry_record(id: &str) -> EntityRecord {
    let mut e = EntityRecord::from(id);
    e.trend.insert("three_ma".into(), StrategyResult::new(0.85, StrategyValue::default()));
    e.tech.insert("rsi".into(), StrategyResult::new(0.75, StrategyValue::default()));
    e.fund.insert("pe".into(), StrategyResult::new(0.90, StrategyValue::default()));
    e
}

#[test]
fn bdd_scenario_sparse_entity_against_eight_strategies_is_sell() {
    // GIVEN an entity with scores {0.85, 0.75, 0.90} out of 8 possible strategies
    let engine = SignalFusionEngine::new(Arc::new(Says(Signal::Buy)));

    // WHEN it is fused
    let r = engine.fuse(&three_entry_record("600519"), 8);

    // THEN the missing five count as zeros
    assert!((r.score_calc - 0.3125).abs() < 1e-12);
    assert_eq!(r.count, 3);
    assert_eq!(r.signal_calc, Signal::Sell);
    assert_eq!(r.action, Action::Sell);
}

#[test]
fn bdd_scenario_full_entity_against_three_strategies() {
    // GIVEN the same entity scored by every one of 3 strategies
    let record = three_entry_record("600519");

    // WHEN the secondary scorer also says BUY
    let buy = SignalFusionEngine::new(Arc::new(Says(Signal::Buy))).fuse(&record, 3);

    // THEN both agree and the action is BUY
    assert!((buy.score_calc - 2.5 / 3.0).abs() < 1e-12);
    assert_eq!(buy.signal_calc, Signal::Buy);
    assert_eq!(buy.action, Action::Buy);

    // WHEN the secondary scorer says HOLD instead
    let hold = SignalFusionEngine::new(Arc::new(Says(Signal::Hold))).fuse(&record, 3);

    // THEN there is no action
    assert_eq!(hold.signal_calc, Signal::Buy);
    assert_eq!(hold.action, Action::None);
}

#[test]
fn bdd_action_table_covers_all_nine_combinations() {
    // GIVEN entities whose calculated signal is BUY, HOLD and SELL respectively
    let calc_cases = [(0.9, Signal::Buy), (0.5, Signal::Hold), (0.1, Signal::Sell)];
    let ai_cases = [Signal::Buy, Signal::Hold, Signal::Sell];

    for (score, calc) in calc_cases {
        let mut record = EntityRecord::from("600519");
        record.tech.insert("only".into(), StrategyResult::new(score, StrategyValue::default()));
        for ai in ai_cases {
            // WHEN fused against a scorer saying `ai`
            let r = SignalFusionEngine::new(Arc::new(Says(ai))).fuse(&record, 1);

            // THEN the action follows the table exactly
            let expected = match (calc, ai) {
                (Signal::Buy, Signal::Buy) => Action::Buy,
                (Signal::Sell, _) | (_, Signal::Sell) => Action::Sell,
                _ => Action::None,
            };
            assert_eq!(r.signal_calc, calc);
            assert_eq!(r.signal_ai, ai);
            assert_eq!(r.action, expected, "calc={calc} ai={ai}");
        }
    }
}

#[test]
fn bdd_scorer_failure_falls_back_and_batch_continues() {
    // GIVEN a pool of three entities and a scorer that fails on the middle one
    let store = MemoryPoolStore::new();
    let cycle = CycleKey::parse("2024-23").unwrap();
    store
        .create(PoolRecord::new(
            cycle.clone(),
            vec![three_entry_record("600519"), three_entry_record("000001"), three_entry_record("300750")],
            Utc::now(),
        ))
        .unwrap();
    let merge = PoolMergeEngine::new(Arc::new(store));
    let scorer = Arc::new(FlakyFor("000001", AtomicUsize::new(0)));
    let engine = SignalFusionEngine::new(scorer.clone());

    // WHEN the cycle is fused
    let out = engine.fuse_cycle(&merge, None, &CancelToken::new()).unwrap();

    // THEN every entity gets a fusion result and only the failing one falls back
    assert_eq!(scorer.1.load(Ordering::SeqCst), 3);
    assert_eq!(out.fused, 3);
    assert_eq!(out.ai_fallbacks, 1);
    assert_eq!(out.global_strategy_count, 3);
    assert_eq!((out.buys, out.sells), (2, 0));
    assert_eq!(out.actionable(), 2);
    let pool = merge.store().load(&cycle).unwrap();
    let failed = pool.entities[1].signals["signal_fusion"].value.as_fusion().unwrap();
    assert_eq!(failed.score_ai, 0.0);
    assert_eq!(failed.signal_ai, Signal::Hold);
    assert!(failed.reason_ai.contains("503"));
    let ok = pool.entities[0].signals["signal_fusion"].value.as_fusion().unwrap();
    assert_eq!(ok.action, Action::Buy);
    // stored score is score_calc rounded to two decimals
    assert_eq!(pool.entities[0].signals["signal_fusion"].score, 0.83);
}

#[test]
fn bdd_scorer_timeout_falls_back_to_hold() {
    // GIVEN a scorer slower than the fusion deadline
    let engine = SignalFusionEngine::new(Arc::new(Sleepy)).with_timeout(Duration::from_millis(25));

    // WHEN an entity is fused
    let r = engine.fuse(&three_entry_record("600519"), 3);

    // THEN the secondary opinion is a HOLD with the timeout as rationale
    assert_eq!(r.signal_ai, Signal::Hold);
    assert_eq!(r.score_ai, 0.0);
    assert!(!r.reason_ai.is_empty());
    assert_eq!(r.action, Action::None);
}

#[test]
fn bdd_previous_signals_do_not_feed_back_into_fusion() {
    // GIVEN a pool already fused once
    let store = MemoryPoolStore::new();
    let cycle = CycleKey::parse("2024-24").unwrap();
    store
        .create(PoolRecord::new(cycle.clone(), vec![three_entry_record("600519")], Utc::now()))
        .unwrap();
    let merge = PoolMergeEngine::new(Arc::new(store));
    let engine = SignalFusionEngine::new(Arc::new(HeuristicScorer));
    let first = engine.fuse_cycle(&merge, Some(&cycle), &CancelToken::new()).unwrap();

    // WHEN it is fused again
    let second = engine.fuse_cycle(&merge, Some(&cycle), &CancelToken::new()).unwrap();

    // THEN the denominator and stored result are unchanged
    let pool = merge.store().load(&cycle).unwrap();
    assert_eq!(first.global_strategy_count, 3);
    assert_eq!(second.global_strategy_count, 3);
    assert_eq!(global_strategy_count(&pool), 3);
    assert_eq!(pool.entities[0].signals.len(), 1);
    assert_eq!(pool.entities[0].scored_entry_count(), 3);
    assert!(pool.phase_timestamp(Namespace::Signals).is_some());
}

#[test]
fn bdd_cancelled_fusion_writes_nothing_for_remaining_entities() {
    // GIVEN a pool and an already-cancelled token
    let store = MemoryPoolStore::new();
    let cycle = CycleKey::parse("2024-25").unwrap();
    store
        .create(PoolRecord::new(cycle.clone(), vec![three_entry_record("600519")], Utc::now()))
        .unwrap();
    let merge = PoolMergeEngine::new(Arc::new(store));
    let before = merge.store().load(&cycle).unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();

    // WHEN fusion runs
    let out = SignalFusionEngine::new(Arc::new(HeuristicScorer))
        .fuse_cycle(&merge, Some(&cycle), &cancel)
        .unwrap();

    // THEN the entity is counted as cancelled and the pool is not stamped
    assert_eq!(out.cancelled, 1);
    assert_eq!(out.fused, 0);
    assert_eq!(out.actionable(), 0);
    let pool = merge.store().load(&cycle).unwrap();
    assert!(pool.entities[0].signals.is_empty());
    assert!(pool.phase_timestamp(Namespace::Signals).is_none());
    assert_eq!(pool, before);
}
