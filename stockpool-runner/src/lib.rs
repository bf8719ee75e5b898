//! StockPool Runner: executing strategies and folding their results into pools.
//!
//! This crate builds on `stockpool-core` to provide:
//! - Pool persistence (in-memory and JSON directory stores)
//! - Strategy runner with per-entity error and panic isolation
//! - Pool merge engine with field-atomic or versioned writes
//! - Signal fusion with a deadline-bounded secondary scorer
//! - Phase orchestration for selector agents
//! - TOML configuration

pub mod config;
pub mod fusion;
pub mod merge;
pub mod phase;
pub mod runner;
pub mod store;

pub use config::{AgentConfig, ConfigError, MergeModeKind, ScorerKind, StockPoolConfig};
pub use fusion::{global_strategy_count, FusionOutcome, SignalFusionEngine, DEFAULT_FUSION_STRATEGY};
pub use merge::{MergeConflictError, MergeMode, MergeOutcome, PoolMergeEngine};
pub use phase::{PhaseError, PhaseOutcome, PhaseRunner, SkipPolicy, StrategyReport};
pub use runner::{CancelToken, ExecutionError, RunOptions, RunReport, StrategyRunner};
pub use store::{JsonPoolStore, MemoryPoolStore, PersistenceError, PoolStore};
