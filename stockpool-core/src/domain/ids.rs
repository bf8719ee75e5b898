use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable entity identifier (stock code).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid cycle key '{0}': expected YYYY-WW")]
pub struct CycleKeyError(pub String);

/// Identifier of one selection cycle: ISO year and ISO week, e.g. `2024-23`.
///
/// Always stored zero padded so that string order is chronological order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CycleKey {
    year: i32,
    week: u32,
}

impl CycleKey {
    pub fn new(year: i32, week: u32) -> Result<Self, CycleKeyError> {
        if !(1..=53).contains(&week) {
            return Err(CycleKeyError(format!("{year}-{week}")));
        }
        Ok(Self { year, week })
    }

    /// Cycle containing `date`, using the ISO week-numbering year.
    pub fn from_date(date: NaiveDate) -> Self {
        let iso = date.iso_week();
        Self {
            year: iso.year(),
            week: iso.week(),
        }
    }

    /// Parse `YYYY-WW`. The unpadded form (`2024-5`) is accepted and canonicalised.
    pub fn parse(s: &str) -> Result<Self, CycleKeyError> {
        let (year, week) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| CycleKeyError(s.to_string()))?;
        let year: i32 = year.parse().map_err(|_| CycleKeyError(s.to_string()))?;
        let week: u32 = week.parse().map_err(|_| CycleKeyError(s.to_string()))?;
        Self::new(year, week).map_err(|_| CycleKeyError(s.to_string()))
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn week(&self) -> u32 {
        self.week
    }
}

impl fmt::Display for CycleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.week)
    }
}

impl TryFrom<String> for CycleKey {
    type Error = CycleKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CycleKey> for String {
    fn from(key: CycleKey) -> Self {
        key.to_string()
    }
}
