//! Signal fusion: the final BUY/SELL decision per entity.
//!
//! The calculated score averages every stored strategy score over the number
//! of strategies that *could* have scored the entity, so an entity scored by
//! few strategies is pulled toward zero. A secondary scorer gives a second
//! opinion under a deadline; its failure never fails fusion.

use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use stockpool_core::domain::{
    Action, CycleKey, EntityId, EntityRecord, FusionResult, Namespace, PoolRecord, Signal,
    StrategyValue,
};
use stockpool_core::scoring::{ExternalCallError, SecondaryScorer, SecondaryVerdict, StrategyTuple};
use stockpool_core::{RawResult, ScaleHint};

use crate::merge::{MergeOutcome, PoolMergeEngine};
use crate::runner::CancelToken;
use crate::store::PersistenceError;

/// Strategy name fusion results are stored under in `signals`.
pub const DEFAULT_FUSION_STRATEGY: &str = "signal_fusion";

pub const DEFAULT_SCORER_TIMEOUT: Duration = Duration::from_secs(30);

/// Distinct `(namespace, strategy)` keys across the pool's scored namespaces.
///
/// Taken over every entity rather than a single reference entity, so an
/// entity that missed a phase still gets the full denominator.
pub fn global_strategy_count(pool: &PoolRecord) -> usize {
    let mut keys: BTreeSet<(Namespace, &str)> = BTreeSet::new();
    for entity in &pool.entities {
        for ns in Namespace::SCORED {
            keys.extend(entity.namespace(ns).keys().map(|name| (ns, name.as_str())));
        }
    }
    keys.len()
}

fn tuples_of(record: &EntityRecord) -> Vec<StrategyTuple> {
    Namespace::SCORED
        .iter()
        .flat_map(|ns| {
            record.namespace(*ns).iter().map(move |(name, result)| StrategyTuple {
                namespace: *ns,
                strategy: name.clone(),
                score: if result.score.is_finite() { result.score } else { 0.0 },
                value: result.value.clone(),
            })
        })
        .collect()
}

fn validate(verdict: SecondaryVerdict) -> Result<SecondaryVerdict, ExternalCallError> {
    if !verdict.score.is_finite() {
        return Err(ExternalCallError::Malformed(format!(
            "non-finite score {}",
            verdict.score
        )));
    }
    Ok(SecondaryVerdict {
        score: verdict.score.clamp(0.0, 1.0),
        ..verdict
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct FusionOutcome {
    pub cycle: CycleKey,
    pub global_strategy_count: usize,
    pub fused: usize,
    /// Entities whose secondary opinion fell back to HOLD.
    pub ai_fallbacks: usize,
    pub cancelled: usize,
    pub failed: Vec<EntityId>,
    /// Entities fused this run with a BUY action.
    pub buys: usize,
    /// Entities fused this run with a SELL action.
    pub sells: usize,
    pub merge: MergeOutcome,
}

impl FusionOutcome {
    /// Entities with a BUY or SELL action.
    pub fn actionable(&self) -> usize {
        self.buys + self.sells
    }
}

pub struct SignalFusionEngine {
    scorer: Arc<dyn SecondaryScorer>,
    timeout: Duration,
    strategy_name: String,
}

impl std::fmt::Debug for SignalFusionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalFusionEngine")
            .field("scorer", &self.scorer.name())
            .field("timeout", &self.timeout)
            .field("strategy_name", &self.strategy_name)
            .finish()
    }
}

impl SignalFusionEngine {
    pub fn new(scorer: Arc<dyn SecondaryScorer>) -> Self {
        Self {
            scorer,
            timeout: DEFAULT_SCORER_TIMEOUT,
            strategy_name: DEFAULT_FUSION_STRATEGY.to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_strategy_name(mut self, name: impl Into<String>) -> Self {
        self.strategy_name = name.into();
        self
    }

    pub fn strategy_name(&self) -> &str {
        &self.strategy_name
    }

    /// Fuse one entity's stored scores into a decision.
    pub fn fuse(&self, record: &EntityRecord, global_strategy_count: usize) -> FusionResult {
        self.fuse_tracked(record, global_strategy_count).0
    }

    /// `fuse`, also reporting whether the secondary opinion fell back.
    fn fuse_tracked(&self, record: &EntityRecord, global_strategy_count: usize) -> (FusionResult, bool) {
        let tuples = tuples_of(record);
        let count = tuples.iter().filter(|t| t.score != 0.0).count();
        let total: f64 = tuples.iter().map(|t| t.score).sum();
        let score_calc = if global_strategy_count > 0 {
            total / global_strategy_count as f64
        } else {
            0.0
        };
        let signal_calc = Signal::from_score(score_calc);

        let (score_ai, signal_ai, reason_ai, fallback) = match self.ask_scorer(&record.id, tuples) {
            Ok(verdict) => (verdict.score, verdict.signal, verdict.reasoning, false),
            Err(err) => {
                warn!(entity = %record.id, scorer = self.scorer.name(), error = %err, "secondary scorer failed, holding");
                (0.0, Signal::Hold, format!("secondary scorer failed: {err}"), true)
            }
        };

        let action = Action::combine(signal_calc, signal_ai);
        debug!(
            entity = %record.id,
            count,
            score_calc,
            %signal_calc,
            score_ai,
            %signal_ai,
            %action,
            "fused"
        );
        let result = FusionResult {
            count,
            score_calc,
            signal_calc,
            score_ai,
            signal_ai,
            action,
            reason_ai,
        };
        (result, fallback)
    }

    /// Run the scorer on its own thread and wait at most `timeout`.
    ///
    /// A scorer that overruns is left to finish in the background; its reply
    /// is discarded.
    fn ask_scorer(
        &self,
        entity: &EntityId,
        tuples: Vec<StrategyTuple>,
    ) -> Result<SecondaryVerdict, ExternalCallError> {
        let (tx, rx) = mpsc::channel();
        let scorer = Arc::clone(&self.scorer);
        let id = entity.clone();
        thread::Builder::new()
            .name(format!("scorer-{entity}"))
            .spawn(move || {
                let _ = tx.send(scorer.evaluate(&id, &tuples));
            })
            .map_err(|e| ExternalCallError::Unavailable(format!("cannot spawn scorer thread: {e}")))?;

        match rx.recv_timeout(self.timeout) {
            Ok(reply) => reply.and_then(validate),
            Err(RecvTimeoutError::Timeout) => Err(ExternalCallError::Timeout(self.timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(ExternalCallError::Unavailable(
                "scorer thread exited without replying".into(),
            )),
        }
    }

    /// Fuse every entity of a pool and store the results under `signals`.
    ///
    /// Uses the latest pool when `cycle` is `None`.
    pub fn fuse_cycle(
        &self,
        merge: &PoolMergeEngine,
        cycle: Option<&CycleKey>,
        cancel: &CancelToken,
    ) -> Result<FusionOutcome, PersistenceError> {
        let pool = match cycle {
            Some(cycle) => merge.store().load(cycle)?,
            None => merge.store().latest()?,
        };
        let global = global_strategy_count(&pool);
        info!(cycle = %pool.cycle_key, entities = pool.entities.len(), global_strategy_count = global, "fusing signals");

        let mut results = Vec::with_capacity(pool.entities.len());
        let mut ai_fallbacks = 0;
        let mut cancelled = 0;
        let mut buys = 0;
        let mut sells = 0;
        let mut failed = Vec::new();

        for record in &pool.entities {
            if cancel.is_cancelled() {
                cancelled += 1;
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| self.fuse_tracked(record, global))) {
                Ok((fusion, fallback)) => {
                    if fallback {
                        ai_fallbacks += 1;
                    }
                    match fusion.action {
                        Action::Buy => buys += 1,
                        Action::Sell => sells += 1,
                        Action::None => {}
                    }
                    results.push(RawResult::new(
                        record.id.clone(),
                        Some(fusion.score_calc),
                        StrategyValue::Fusion(fusion),
                    ));
                }
                Err(_) => {
                    warn!(entity = %record.id, "fusion panicked, entity skipped");
                    failed.push(record.id.clone());
                }
            }
        }
        if cancelled > 0 {
            info!(cycle = %pool.cycle_key, cancelled, "fusion cancelled");
        }

        let merge_outcome = merge.merge_with_hint(
            &pool.cycle_key,
            Namespace::Signals,
            &self.strategy_name,
            &results,
            ScaleHint::Unit,
        )?;

        Ok(FusionOutcome {
            cycle: pool.cycle_key,
            global_strategy_count: global,
            fused: results.len(),
            ai_fallbacks,
            cancelled,
            failed,
            buys,
            sells,
            merge: merge_outcome,
        })
    }
}
