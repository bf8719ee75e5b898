//! The fixed analysis namespaces of an entity record.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the top-level analysis categories inside an `EntityRecord`.
///
/// Namespaces are disjoint fields: writes into different namespaces never
/// interact, which is what makes phase ordering irrelevant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Trend,
    Tech,
    Fund,
    Pub,
    Signals,
}

impl Namespace {
    pub const ALL: [Namespace; 5] = [
        Namespace::Trend,
        Namespace::Tech,
        Namespace::Fund,
        Namespace::Pub,
        Namespace::Signals,
    ];

    /// Namespaces that hold strategy scores (everything except `signals`).
    pub const SCORED: [Namespace; 4] = [
        Namespace::Trend,
        Namespace::Tech,
        Namespace::Fund,
        Namespace::Pub,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trend => "trend",
            Self::Tech => "tech",
            Self::Fund => "fund",
            Self::Pub => "pub",
            Self::Signals => "signals",
        }
    }

    /// Name of the pool-level timestamp written when this namespace is merged.
    pub fn timestamp_field(&self) -> String {
        format!("{}_at", self.as_str())
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trend" => Ok(Self::Trend),
            "tech" => Ok(Self::Tech),
            "fund" => Ok(Self::Fund),
            "pub" => Ok(Self::Pub),
            "signals" => Ok(Self::Signals),
            other => Err(format!("unknown namespace: {other}")),
        }
    }
}
