//! Phase orchestration: one selector agent's pass over the current pool.
//!
//! Load the pool, resolve the agent's strategies, fetch bars for the pool's
//! entities, then run and merge each strategy in turn. Per-entity and
//! per-strategy failures are collected into the outcome; only persistence
//! failures abort the phase.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use stockpool_core::data::{DataError, DataProvider, Window};
use stockpool_core::domain::{CycleKey, EntityId, PoolRecord};
use stockpool_core::{
    EntityInput, Phase, ResolutionError, StrategyContext, StrategyDescriptor, StrategyRegistry,
};

use crate::config::AgentConfig;
use crate::fusion::{FusionOutcome, SignalFusionEngine};
use crate::merge::{MergeOutcome, PoolMergeEngine};
use crate::runner::{CancelToken, ExecutionError, RunOptions, StrategyRunner};
use crate::store::PersistenceError;

pub const DEFAULT_WINDOW_DAYS: u32 = 120;

#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("no pool to work on: {0}")]
    PoolNotFound(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("phase {0} needs a signal fusion engine")]
    FusionUnavailable(Phase),
}

/// Whether entities already holding a non-zero score for a strategy are
/// scored again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SkipPolicy {
    #[default]
    SkipAlreadyScored,
    RescoreAll,
}

impl SkipPolicy {
    pub fn from_flag(skip_already_scored: bool) -> Self {
        if skip_already_scored {
            Self::SkipAlreadyScored
        } else {
            Self::RescoreAll
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StrategyReport {
    pub name: String,
    /// Entities handed to the strategy.
    pub attempted: usize,
    /// Entities left alone because they were already scored.
    pub skipped: usize,
    pub scored: usize,
    pub no_opinion: usize,
    pub failures: Vec<(EntityId, ExecutionError)>,
    pub duplicates: Vec<EntityId>,
    /// `None` when nothing was run.
    pub merge: Option<MergeOutcome>,
}

#[derive(Debug)]
pub struct PhaseOutcome {
    pub agent: String,
    pub phase: Phase,
    pub cycle: CycleKey,
    pub strategies: Vec<StrategyReport>,
    pub resolution_errors: Vec<ResolutionError>,
    pub data_failures: Vec<(EntityId, DataError)>,
    pub fusion: Option<FusionOutcome>,
}

impl PhaseOutcome {
    fn empty(agent: &AgentConfig, cycle: CycleKey) -> Self {
        Self {
            agent: agent.name.clone(),
            phase: agent.phase,
            cycle,
            strategies: Vec::new(),
            resolution_errors: Vec::new(),
            data_failures: Vec::new(),
            fusion: None,
        }
    }

    /// At least one strategy's results (or the fusion results) reached the pool.
    pub fn is_success(&self) -> bool {
        self.fusion.is_some() || self.strategies.iter().any(|s| s.merge.is_some())
    }

    pub fn updated_entities(&self) -> usize {
        let from_strategies: usize = self
            .strategies
            .iter()
            .filter_map(|s| s.merge.as_ref())
            .map(MergeOutcome::updated_count)
            .sum();
        from_strategies + self.fusion.as_ref().map_or(0, |f| f.merge.updated_count())
    }
}

pub struct PhaseRunner {
    registry: Arc<StrategyRegistry>,
    provider: Arc<dyn DataProvider>,
    merge: Arc<PoolMergeEngine>,
    fusion: Option<Arc<SignalFusionEngine>>,
    descriptors: Vec<StrategyDescriptor>,
    window_days: u32,
    cancel: CancelToken,
}

impl std::fmt::Debug for PhaseRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseRunner")
            .field("provider", &self.provider.name())
            .field("descriptors", &self.descriptors.len())
            .field("window_days", &self.window_days)
            .finish()
    }
}

impl PhaseRunner {
    pub fn new(
        registry: Arc<StrategyRegistry>,
        provider: Arc<dyn DataProvider>,
        merge: Arc<PoolMergeEngine>,
    ) -> Self {
        Self {
            registry,
            provider,
            merge,
            fusion: None,
            descriptors: Vec::new(),
            window_days: DEFAULT_WINDOW_DAYS,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_fusion(mut self, fusion: Arc<SignalFusionEngine>) -> Self {
        self.fusion = Some(fusion);
        self
    }

    pub fn with_descriptors(mut self, descriptors: Vec<StrategyDescriptor>) -> Self {
        self.descriptors = descriptors;
        self
    }

    pub fn with_window_days(mut self, days: u32) -> Self {
        self.window_days = days;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    fn load_pool(&self, cycle: Option<&CycleKey>) -> Result<PoolRecord, PhaseError> {
        let loaded = match cycle {
            Some(cycle) => self.merge.store().load(cycle),
            None => self.merge.store().latest(),
        };
        match loaded {
            Ok(pool) => Ok(pool),
            Err(err @ (PersistenceError::PoolNotFound(_) | PersistenceError::NoPools)) => {
                Err(PhaseError::PoolNotFound(err.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Run one agent against `cycle`, or the latest pool when `None`.
    pub fn run(&self, agent: &AgentConfig, cycle: Option<&CycleKey>) -> Result<PhaseOutcome, PhaseError> {
        let pool = self.load_pool(cycle)?;
        let mut outcome = PhaseOutcome::empty(agent, pool.cycle_key.clone());
        info!(agent = %agent.name, phase = %agent.phase, cycle = %pool.cycle_key, entities = pool.entities.len(), "phase started");

        if agent.phase == Phase::SignalFusion {
            let fusion = self
                .fusion
                .as_ref()
                .ok_or(PhaseError::FusionUnavailable(agent.phase))?;
            outcome.fusion = Some(fusion.fuse_cycle(&self.merge, Some(&pool.cycle_key), &self.cancel)?);
            return Ok(outcome);
        }

        let mut descriptors = Vec::with_capacity(agent.strategies.len());
        for name in &agent.strategies {
            match self.descriptors.iter().find(|d| &d.name == name) {
                Some(d) => descriptors.push(d.clone()),
                None => {
                    warn!(agent = %agent.name, strategy = %name, "no descriptor for strategy");
                    outcome
                        .resolution_errors
                        .push(ResolutionError::MissingDescriptor { name: name.clone() });
                }
            }
        }
        let (resolved, errors) = self.registry.resolve_all(&descriptors);
        outcome.resolution_errors.extend(errors);
        if resolved.is_empty() {
            warn!(agent = %agent.name, "no runnable strategies");
            return Ok(outcome);
        }

        let ids = pool.entity_ids();
        let end = pool.selection_date.unwrap_or_else(|| Utc::now().date_naive());
        let batch = self.provider.fetch(&ids, Window::ending(end, self.window_days));
        let inputs: Vec<EntityInput> = ids
            .iter()
            .map(|id| EntityInput::new(id.clone(), batch.bars(id)))
            .collect();
        outcome.data_failures = batch.failures;

        let namespace = agent.phase.namespace();
        let policy = SkipPolicy::from_flag(agent.skip_already_scored);
        let cycle_key = pool.cycle_key.clone();
        let ctx = StrategyContext::with_pool(agent.phase, Arc::new(pool));
        let runner = StrategyRunner::new(RunOptions {
            parallel: agent.parallel,
        })
        .with_cancel(self.cancel.clone());

        for item in resolved {
            if self.cancel.is_cancelled() {
                info!(agent = %agent.name, "phase cancelled");
                break;
            }
            let name = item.descriptor.name.as_str();
            let strategy = item.strategy.as_ref();
            if strategy.family() != namespace {
                warn!(strategy = name, family = %strategy.family(), %namespace, "strategy family differs from phase namespace, writing to phase namespace");
            }

            let todo: Vec<EntityInput> = match policy {
                SkipPolicy::RescoreAll => inputs.clone(),
                SkipPolicy::SkipAlreadyScored => inputs
                    .iter()
                    .filter(|input| {
                        !ctx.pool
                            .as_ref()
                            .and_then(|p| p.entity(&input.id))
                            .is_some_and(|e| e.has_valid_score(namespace, name))
                    })
                    .cloned()
                    .collect(),
            };
            let mut report = StrategyReport {
                name: name.to_string(),
                attempted: todo.len(),
                skipped: inputs.len() - todo.len(),
                ..StrategyReport::default()
            };
            if todo.is_empty() {
                info!(strategy = name, skipped = report.skipped, "every entity already scored");
                outcome.strategies.push(report);
                continue;
            }

            let run = runner.run(strategy, &todo, &ctx);
            report.scored = run.successes.len();
            report.no_opinion = run.no_opinion;
            report.duplicates = run.duplicates;
            report.failures = run.failures;
            report.merge = Some(self.merge.merge_with_hint(
                &cycle_key,
                namespace,
                name,
                &run.successes,
                strategy.scale_hint(),
            )?);
            outcome.strategies.push(report);
        }

        info!(
            agent = %agent.name,
            cycle = %outcome.cycle,
            strategies = outcome.strategies.len(),
            resolution_errors = outcome.resolution_errors.len(),
            data_failures = outcome.data_failures.len(),
            updated = outcome.updated_entities(),
            "phase finished"
        );
        Ok(outcome)
    }
}
