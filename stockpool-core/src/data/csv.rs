//! CSV file provider: one `<dir>/<code>.csv` per entity.
//!
//! Columns (header required, order-independent): `date,open,high,low,close,volume`.
//! Dates are `YYYY-MM-DD`. Rows are sorted by date after reading; void rows
//! are dropped.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::debug;

use super::provider::{DataError, DataProvider, Window};
use super::rate_limit::RateLimiter;
use crate::domain::{Bar, EntityId};

#[derive(Debug, Deserialize)]
struct CsvBarRow {
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl From<CsvBarRow> for Bar {
    fn from(row: CsvBarRow) -> Self {
        Bar {
            date: row.date,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        }
    }
}

#[derive(Debug)]
pub struct CsvDataProvider {
    dir: PathBuf,
    limiter: RateLimiter,
}

impl CsvDataProvider {
    pub fn new(dir: impl Into<PathBuf>, limiter: RateLimiter) -> Self {
        Self {
            dir: dir.into(),
            limiter,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &EntityId) -> PathBuf {
        self.dir.join(format!("{}.csv", id.as_str()))
    }
}

impl DataProvider for CsvDataProvider {
    fn name(&self) -> &str {
        "csv"
    }

    fn fetch_one(&self, id: &EntityId, window: Window) -> Result<Vec<Bar>, DataError> {
        let path = self.path_for(id);
        if !path.exists() {
            return Err(DataError::NotFound {
                entity: id.to_string(),
            });
        }
        self.limiter.acquire();

        let mut reader = ::csv::Reader::from_path(&path).map_err(|e| DataError::Io {
            entity: id.to_string(),
            message: e.to_string(),
        })?;

        let mut bars = Vec::new();
        let mut dropped = 0usize;
        for (i, row) in reader.deserialize::<CsvBarRow>().enumerate() {
            let row = row.map_err(|e| DataError::Parse {
                entity: id.to_string(),
                // header is line 1
                row: i + 2,
                message: e.to_string(),
            })?;
            let bar = Bar::from(row);
            if bar.is_void() {
                dropped += 1;
                continue;
            }
            if window.contains(bar.date) {
                bars.push(bar);
            }
        }
        bars.sort_by_key(|b| b.date);
        if dropped > 0 {
            debug!(entity = %id, dropped, "dropped void rows");
        }
        Ok(bars)
    }
}
