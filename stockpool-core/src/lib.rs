//! StockPool Core: domain types, normalization, the strategy contract and
//! registry, bundled strategies, and the collaborators they depend on.
//!
//! - Domain types (pool and entity records, namespaces, signals, values)
//! - Score normalization and value sanitization
//! - `Strategy` trait, `StrategyRegistry` and descriptor resolution
//! - Indicators and the bundled technical strategies
//! - Data providers, rate limiter, circuit breaker
//! - Secondary scorers used by signal fusion

pub mod data;
pub mod domain;
pub mod indicators;
pub mod normalize;
pub mod registry;
pub mod sanitize;
pub mod scoring;
pub mod strategies;
pub mod strategy;

pub use normalize::{normalize, round_score, ScaleHint};
pub use registry::{
    ProgramRef, ResolutionError, ResolvedStrategy, StrategyDescriptor, StrategyParams,
    StrategyRegistry,
};
pub use sanitize::sanitize;
pub use strategy::{EntityInput, Phase, RawResult, Strategy, StrategyContext, StrategyError};
