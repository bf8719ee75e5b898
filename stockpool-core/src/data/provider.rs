//! Data provider trait and structured error types.
//!
//! A fetch covers many entities at once; one entity failing degrades only
//! that entity, the rest of the batch is still returned.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{Bar, EntityId};

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Window {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// The `days` calendar days ending at (and including) `end`.
    pub fn ending(end: NaiveDate, days: u32) -> Self {
        let span = i64::from(days.max(1)) - 1;
        Self {
            start: end - Duration::days(span),
            end,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    #[error("no data for entity '{entity}'")]
    NotFound { entity: String },

    #[error("I/O error reading '{entity}': {message}")]
    Io { entity: String, message: String },

    #[error("malformed data for '{entity}' at row {row}: {message}")]
    Parse {
        entity: String,
        row: usize,
        message: String,
    },

    #[error("hard stop: provider blocked (circuit breaker open)")]
    CircuitOpen,

    #[error("data error: {0}")]
    Other(String),
}

/// Result of a multi-entity fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchBatch {
    pub series: BTreeMap<EntityId, Vec<Bar>>,
    pub failures: Vec<(EntityId, DataError)>,
}

impl FetchBatch {
    /// Bars for `id`, empty when the fetch failed.
    pub fn bars(&self, id: &EntityId) -> Vec<Bar> {
        self.series.get(id).cloned().unwrap_or_default()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Source of daily bars.
pub trait DataProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Bars for one entity inside `window`, oldest first.
    fn fetch_one(&self, id: &EntityId, window: Window) -> Result<Vec<Bar>, DataError>;

    /// Bars for many entities. Per-entity failures are collected, not raised.
    fn fetch(&self, ids: &[EntityId], window: Window) -> FetchBatch {
        let mut batch = FetchBatch::default();
        for id in ids {
            match self.fetch_one(id, window) {
                Ok(bars) => {
                    debug!(provider = self.name(), entity = %id, bars = bars.len(), "fetched");
                    batch.series.insert(id.clone(), bars);
                }
                Err(err) => {
                    warn!(provider = self.name(), entity = %id, error = %err, "fetch failed");
                    batch.failures.push((id.clone(), err));
                }
            }
        }
        batch
    }
}

/// In-memory provider for tests and demos.
#[derive(Debug, Clone, Default)]
pub struct StaticDataProvider {
    series: BTreeMap<EntityId, Vec<Bar>>,
}

impl StaticDataProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(mut self, id: impl Into<EntityId>, mut bars: Vec<Bar>) -> Self {
        bars.sort_by_key(|b| b.date);
        self.series.insert(id.into(), bars);
        self
    }
}

impl DataProvider for StaticDataProvider {
    fn name(&self) -> &str {
        "static"
    }

    fn fetch_one(&self, id: &EntityId, window: Window) -> Result<Vec<Bar>, DataError> {
        let bars = self.series.get(id).ok_or_else(|| DataError::NotFound {
            entity: id.to_string(),
        })?;
        Ok(bars
            .iter()
            .filter(|b| window.contains(b.date))
            .cloned()
            .collect())
    }
}
