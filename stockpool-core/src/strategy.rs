//! Strategy contract: what every scorer plugged into the pool implements.
//!
//! A strategy scores one entity at a time and never touches persistence: it
//! returns `RawResult`s that the runner collects and the merge engine folds
//! into the pool. The only view of stored state a strategy gets is the
//! read-only pool snapshot in `StrategyContext`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{Bar, CycleKey, EntityId, Namespace, PoolRecord, StrategyResult, StrategyValue};
use crate::normalize::ScaleHint;

// ─── Phase ───────────────────────────────────────────────────────────

/// Analysis phase. Each phase owns exactly one namespace of the entity record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Trend,
    Technical,
    Fundamental,
    PublicOpinion,
    SignalFusion,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Trend,
        Phase::Technical,
        Phase::Fundamental,
        Phase::PublicOpinion,
        Phase::SignalFusion,
    ];

    pub fn namespace(&self) -> Namespace {
        match self {
            Self::Trend => Namespace::Trend,
            Self::Technical => Namespace::Tech,
            Self::Fundamental => Namespace::Fund,
            Self::PublicOpinion => Namespace::Pub,
            Self::SignalFusion => Namespace::Signals,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trend => "trend",
            Self::Technical => "technical",
            Self::Fundamental => "fundamental",
            Self::PublicOpinion => "public_opinion",
            Self::SignalFusion => "signal_fusion",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    /// Accepts the phase name or the name of the namespace it writes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trend" => Ok(Self::Trend),
            "technical" | "tech" => Ok(Self::Technical),
            "fundamental" | "fund" => Ok(Self::Fundamental),
            "public_opinion" | "pub" => Ok(Self::PublicOpinion),
            "signal_fusion" | "signals" | "fusion" => Ok(Self::SignalFusion),
            other => Err(format!("unknown phase: {other}")),
        }
    }
}

// ─── Inputs / outputs ────────────────────────────────────────────────

/// One entity as handed to a strategy: its id plus whatever market data the
/// phase fetched for it (possibly empty).
#[derive(Debug, Clone, PartialEq)]
pub struct EntityInput {
    pub id: EntityId,
    pub bars: Vec<Bar>,
}

impl EntityInput {
    pub fn new(id: impl Into<EntityId>, bars: Vec<Bar>) -> Self {
        Self {
            id: id.into(),
            bars,
        }
    }

    pub fn last_close(&self) -> Option<f64> {
        self.bars.last().map(|b| b.close)
    }
}

/// A strategy's unnormalized verdict for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResult {
    pub entity_id: EntityId,
    /// Any scale; `None` when the strategy produced no number.
    pub score: Option<f64>,
    pub value: StrategyValue,
}

impl RawResult {
    pub fn new(entity_id: EntityId, score: Option<f64>, value: StrategyValue) -> Self {
        Self {
            entity_id,
            score,
            value,
        }
    }
}

/// Read-only view a strategy executes against.
#[derive(Debug, Clone)]
pub struct StrategyContext {
    pub phase: Phase,
    pub cycle: Option<CycleKey>,
    pub pool: Option<Arc<PoolRecord>>,
}

impl StrategyContext {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            cycle: None,
            pool: None,
        }
    }

    pub fn with_pool(phase: Phase, pool: Arc<PoolRecord>) -> Self {
        Self {
            phase,
            cycle: Some(pool.cycle_key.clone()),
            pool: Some(pool),
        }
    }

    /// What `strategy` previously stored for `entity` in `ns`, if anything.
    pub fn existing(&self, entity: &EntityId, ns: Namespace, strategy: &str) -> Option<&StrategyResult> {
        self.pool
            .as_ref()
            .and_then(|p| p.entity(entity))
            .and_then(|e| e.entry(ns, strategy))
    }
}

// ─── Errors ──────────────────────────────────────────────────────────

/// Failure scoring a single entity.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StrategyError {
    #[error("insufficient data: need {needed} bars, have {available}")]
    InsufficientData { needed: usize, available: usize },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("external call failed: {0}")]
    External(String),
}

// ─── Trait ───────────────────────────────────────────────────────────

/// A scorer for one namespace family.
///
/// Parameters are fixed at construction. Implementations must be safe to call
/// concurrently for different entities.
pub trait Strategy: Send + Sync {
    /// Name results are stored under (the descriptor name).
    fn name(&self) -> &str;

    /// Namespace this strategy's results belong in.
    fn family(&self) -> Namespace;

    /// Scale of the scores this strategy reports.
    fn scale_hint(&self) -> ScaleHint {
        ScaleHint::Auto
    }

    /// Score one entity. `Ok(None)` means "no opinion" and nothing is stored.
    fn score(
        &self,
        input: &EntityInput,
        ctx: &StrategyContext,
    ) -> Result<Option<RawResult>, StrategyError>;

    /// Batch form: score every input, dropping failures after logging them.
    ///
    /// The runner calls `score` directly so it can report failures; this is
    /// for callers that only want the results.
    fn execute(
        &self,
        inputs: &[EntityInput],
        phase: Phase,
        ctx: &StrategyContext,
    ) -> Vec<RawResult> {
        if phase != ctx.phase {
            debug!(strategy = self.name(), %phase, ctx_phase = %ctx.phase, "phase differs from context");
        }
        inputs
            .iter()
            .filter_map(|input| match self.score(input, ctx) {
                Ok(result) => result,
                Err(err) => {
                    warn!(strategy = self.name(), entity = %input.id, error = %err, "scoring failed");
                    None
                }
            })
            .collect()
    }
}

impl fmt::Debug for dyn Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Strategy")
            .field("name", &self.name())
            .field("family", &self.family())
            .finish()
    }
}
