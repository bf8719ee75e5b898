//! Pool merge engine: folds one strategy's results into one namespace.
//!
//! Every write is a targeted `entities[i].<namespace>.<strategy>` update
//! through `PoolStore::apply`. Scores are normalized and rounded to two
//! decimals, values are sanitized, and results for entities outside the pool
//! are dropped and reported.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use stockpool_core::domain::{CycleKey, EntityId, Namespace, NamespacePatch, StrategyResult};
use stockpool_core::{normalize, round_score, sanitize, RawResult, ScaleHint};

use crate::store::{PersistenceError, PoolStore};

/// How writes guard against concurrent writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Apply under the store lock with no revision check.
    FieldAtomic,
    /// Conditional write against the loaded revision, retried on conflict.
    Versioned { max_retries: u32 },
}

impl Default for MergeMode {
    fn default() -> Self {
        Self::FieldAtomic
    }
}

/// A result addressed to an entity the pool does not contain.
///
/// Logged and counted by the merge engine, never returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("entity {entity} is not in pool {cycle}; {namespace}.{strategy} result dropped")]
pub struct MergeConflictError {
    pub cycle: CycleKey,
    pub entity: EntityId,
    pub namespace: Namespace,
    pub strategy: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub cycle: CycleKey,
    pub namespace: Namespace,
    pub strategy_name: String,
    pub updated: Vec<EntityId>,
    pub skipped: Vec<EntityId>,
    /// Pool revision after the write.
    pub revision: u64,
    /// Store writes attempted, including rejected conditional writes.
    pub attempts: u32,
}

impl MergeOutcome {
    pub fn updated_count(&self) -> usize {
        self.updated.len()
    }
}

pub struct PoolMergeEngine {
    store: Arc<dyn PoolStore>,
    mode: MergeMode,
}

impl std::fmt::Debug for PoolMergeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolMergeEngine").field("mode", &self.mode).finish()
    }
}

impl PoolMergeEngine {
    pub fn new(store: Arc<dyn PoolStore>) -> Self {
        Self {
            store,
            mode: MergeMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: MergeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> MergeMode {
        self.mode
    }

    pub fn store(&self) -> &Arc<dyn PoolStore> {
        &self.store
    }

    /// Merge with automatic scale detection.
    pub fn merge_namespace(
        &self,
        cycle: &CycleKey,
        namespace: Namespace,
        strategy_name: &str,
        results: &[RawResult],
    ) -> Result<MergeOutcome, PersistenceError> {
        self.merge_with_hint(cycle, namespace, strategy_name, results, ScaleHint::Auto)
    }

    pub fn merge_with_hint(
        &self,
        cycle: &CycleKey,
        namespace: Namespace,
        strategy_name: &str,
        results: &[RawResult],
        hint: ScaleHint,
    ) -> Result<MergeOutcome, PersistenceError> {
        let writes: Vec<(EntityId, StrategyResult)> = results
            .iter()
            .map(|raw| {
                let score = round_score(normalize(raw.score, hint));
                (raw.entity_id.clone(), StrategyResult::new(score, sanitize(&raw.value)))
            })
            .collect();
        let patch = NamespacePatch {
            namespace,
            strategy_name: strategy_name.to_string(),
            writes,
        };

        let (report, attempts) = match self.mode {
            MergeMode::FieldAtomic => (self.store.apply(cycle, &patch, None)?, 1),
            MergeMode::Versioned { max_retries } => self.apply_versioned(cycle, &patch, max_retries)?,
        };

        for entity in &report.missing {
            let conflict = MergeConflictError {
                cycle: cycle.clone(),
                entity: entity.clone(),
                namespace,
                strategy: strategy_name.to_string(),
            };
            warn!(%cycle, %namespace, strategy = strategy_name, entity = %entity, "{conflict}");
        }
        info!(
            %cycle,
            %namespace,
            strategy = strategy_name,
            updated = report.updated.len(),
            skipped = report.missing.len(),
            revision = report.revision,
            "namespace merged"
        );

        Ok(MergeOutcome {
            cycle: cycle.clone(),
            namespace,
            strategy_name: strategy_name.to_string(),
            updated: report.updated,
            skipped: report.missing,
            revision: report.revision,
            attempts,
        })
    }

    fn apply_versioned(
        &self,
        cycle: &CycleKey,
        patch: &NamespacePatch,
        max_retries: u32,
    ) -> Result<(stockpool_core::domain::ApplyReport, u32), PersistenceError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let expected = self.store.load(cycle)?.revision;
            match self.store.apply(cycle, patch, Some(expected)) {
                Ok(report) => return Ok((report, attempts)),
                Err(PersistenceError::RevisionConflict { actual, .. }) if attempts <= max_retries => {
                    debug!(%cycle, expected, actual, attempt = attempts, "revision conflict, retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }
}
