//! Secondary scoring: the second opinion the fusion engine asks for.
//!
//! A secondary scorer sees every `(namespace_strategy, score, value)` tuple
//! of one entity and returns its own score and signal. It is an external,
//! failure-prone collaborator: the fusion engine bounds it with a deadline and
//! falls back to HOLD when it fails.

pub mod heuristic;
pub mod http;

pub use heuristic::HeuristicScorer;
pub use http::{parse_verdict, HttpLlmConfig, HttpLlmScorer};

use std::time::Duration;

use thiserror::Error;

use crate::domain::{EntityId, Namespace, Signal, StrategyValue};

/// One strategy's stored contribution, as handed to a secondary scorer.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyTuple {
    pub namespace: Namespace,
    pub strategy: String,
    pub score: f64,
    pub value: StrategyValue,
}

impl StrategyTuple {
    /// `<namespace>_<strategy>`, e.g. `tech_three_ma`.
    pub fn key(&self) -> String {
        format!("{}_{}", self.namespace, self.strategy)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SecondaryVerdict {
    /// In [0, 1].
    pub score: f64,
    pub signal: Signal,
    pub reasoning: String,
}

/// Failure of a call to an external collaborator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExternalCallError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("circuit breaker open, retry in {0:?}")]
    CircuitOpen(Duration),

    #[error("scorer unavailable: {0}")]
    Unavailable(String),
}

pub trait SecondaryScorer: Send + Sync {
    fn name(&self) -> &str;

    fn evaluate(
        &self,
        entity: &EntityId,
        tuples: &[StrategyTuple],
    ) -> Result<SecondaryVerdict, ExternalCallError>;
}
