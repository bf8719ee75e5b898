//! Strategy runner: executes one strategy over a set of entities.
//!
//! Entities are independent: a strategy error or panic for one entity is
//! caught, reported and the batch continues. Cancellation is cooperative at
//! entity granularity.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

use stockpool_core::domain::EntityId;
use stockpool_core::{EntityInput, RawResult, Strategy, StrategyContext, StrategyError};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Strategy(#[from] StrategyError),

    #[error("strategy panicked: {0}")]
    Panicked(String),

    #[error("cancelled before execution")]
    Cancelled,
}

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Score entities on the rayon pool.
    pub parallel: bool,
}

/// Outcome of running one strategy over a batch.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub strategy: String,
    pub successes: Vec<RawResult>,
    pub failures: Vec<(EntityId, ExecutionError)>,
    /// Entity ids that appeared in more than one result.
    pub duplicates: Vec<EntityId>,
    /// Entities the strategy had no opinion on.
    pub no_opinion: usize,
}

impl RunReport {
    pub fn cancelled(&self) -> usize {
        self.failures
            .iter()
            .filter(|(_, e)| matches!(e, ExecutionError::Cancelled))
            .count()
    }

    pub fn attempted(&self) -> usize {
        self.successes.len() + self.failures.len() + self.no_opinion
    }
}

enum Outcome {
    Scored(RawResult),
    NoOpinion,
    Failed(ExecutionError),
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct StrategyRunner {
    options: RunOptions,
    cancel: CancelToken,
}

impl StrategyRunner {
    pub fn new(options: RunOptions) -> Self {
        Self {
            options,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    fn score_one(&self, strategy: &dyn Strategy, input: &EntityInput, ctx: &StrategyContext) -> Outcome {
        if self.cancel.is_cancelled() {
            return Outcome::Failed(ExecutionError::Cancelled);
        }
        match catch_unwind(AssertUnwindSafe(|| strategy.score(input, ctx))) {
            Ok(Ok(Some(result))) => Outcome::Scored(result),
            Ok(Ok(None)) => Outcome::NoOpinion,
            Ok(Err(err)) => Outcome::Failed(err.into()),
            Err(payload) => Outcome::Failed(ExecutionError::Panicked(panic_message(payload.as_ref()))),
        }
    }

    pub fn run(
        &self,
        strategy: &dyn Strategy,
        entities: &[EntityInput],
        ctx: &StrategyContext,
    ) -> RunReport {
        let outcomes: Vec<(EntityId, Outcome)> = if self.options.parallel {
            entities
                .par_iter()
                .map(|input| (input.id.clone(), self.score_one(strategy, input, ctx)))
                .collect()
        } else {
            entities
                .iter()
                .map(|input| (input.id.clone(), self.score_one(strategy, input, ctx)))
                .collect()
        };

        let mut report = RunReport {
            strategy: strategy.name().to_string(),
            ..RunReport::default()
        };
        for (id, outcome) in outcomes {
            match outcome {
                Outcome::Scored(result) => report.successes.push(result),
                Outcome::NoOpinion => report.no_opinion += 1,
                Outcome::Failed(err) => {
                    if !matches!(err, ExecutionError::Cancelled) {
                        warn!(strategy = strategy.name(), entity = %id, error = %err, "entity failed");
                    }
                    report.failures.push((id, err));
                }
            }
        }

        let mut seen: HashMap<&EntityId, usize> = HashMap::new();
        for result in &report.successes {
            *seen.entry(&result.entity_id).or_default() += 1;
        }
        let mut duplicates: Vec<EntityId> = seen
            .into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|(id, _)| id.clone())
            .collect();
        duplicates.sort();
        if !duplicates.is_empty() {
            warn!(strategy = strategy.name(), duplicates = ?duplicates, "strategy returned duplicate entity results");
        }
        report.duplicates = duplicates;

        let cancelled = report.cancelled();
        if cancelled > 0 {
            info!(strategy = strategy.name(), cancelled, "run cancelled");
        }
        debug!(
            strategy = strategy.name(),
            scored = report.successes.len(),
            failed = report.failures.len() - cancelled,
            no_opinion = report.no_opinion,
            "run finished"
        );
        report
    }
}
