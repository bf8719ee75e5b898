//! Pool and entity records: the shared per-cycle document.
//!
//! A `PoolRecord` is created once per cycle by the entity selector and then
//! mutated only through `apply_patch`, which writes exactly one
//! `entities[i].<namespace>.<strategy>` field per entity and never adds or
//! removes entities.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use super::ids::{CycleKey, EntityId};
use super::namespace::Namespace;
use super::value::{lenient_value, StrategyValue};

/// Top-level pool fields written by older producers that are dropped on every write.
pub const DEPRECATED_POOL_FIELDS: &[&str] = &[
    "selected_stocks_count",
    "strategy_execution_time",
    "strategy_version",
    "total_stocks_analyzed",
];

/// One strategy's normalized contribution to one namespace of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyResult {
    #[serde(default, deserialize_with = "lenient_score")]
    pub score: f64,
    #[serde(
        default,
        deserialize_with = "lenient_value",
        skip_serializing_if = "StrategyValue::is_null"
    )]
    pub value: StrategyValue,
}

impl StrategyResult {
    pub fn new(score: f64, value: StrategyValue) -> Self {
        Self { score, value }
    }

    /// A stored score counts as "already analyzed" only when it is non-zero.
    pub fn is_valid_score(&self) -> bool {
        self.score.is_finite() && self.score != 0.0
    }
}

/// Numbers pass through, numeric strings are parsed, anything else reads as 0.
fn lenient_score<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    let score = match raw {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        serde_json::Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        serde_json::Value::Bool(true) => 1.0,
        _ => 0.0,
    };
    Ok(if score.is_finite() { score } else { 0.0 })
}

/// Strategy name → result.
pub type NamespaceMap = BTreeMap<String, StrategyResult>;

/// Per-entity record holding one map per namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    #[serde(alias = "code")]
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub trend: NamespaceMap,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tech: NamespaceMap,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fund: NamespaceMap,
    #[serde(rename = "pub", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub public: NamespaceMap,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub signals: NamespaceMap,
    /// Fields this build does not model (name, golden_cross, ...). Always preserved.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl EntityRecord {
    pub fn new(id: impl Into<EntityId>) -> Self {
        Self {
            id: id.into(),
            trend: NamespaceMap::new(),
            tech: NamespaceMap::new(),
            fund: NamespaceMap::new(),
            public: NamespaceMap::new(),
            signals: NamespaceMap::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn namespace(&self, ns: Namespace) -> &NamespaceMap {
        match ns {
            Namespace::Trend => &self.trend,
            Namespace::Tech => &self.tech,
            Namespace::Fund => &self.fund,
            Namespace::Pub => &self.public,
            Namespace::Signals => &self.signals,
        }
    }

    pub fn namespace_mut(&mut self, ns: Namespace) -> &mut NamespaceMap {
        match ns {
            Namespace::Trend => &mut self.trend,
            Namespace::Tech => &mut self.tech,
            Namespace::Fund => &mut self.fund,
            Namespace::Pub => &mut self.public,
            Namespace::Signals => &mut self.signals,
        }
    }

    pub fn entry(&self, ns: Namespace, strategy: &str) -> Option<&StrategyResult> {
        self.namespace(ns).get(strategy)
    }

    /// Whether `strategy` has already left a non-zero score in `ns`.
    pub fn has_valid_score(&self, ns: Namespace, strategy: &str) -> bool {
        self.entry(ns, strategy)
            .is_some_and(StrategyResult::is_valid_score)
    }

    /// Number of strategy entries across every namespace except `signals`.
    pub fn scored_entry_count(&self) -> usize {
        Namespace::SCORED
            .iter()
            .map(|ns| self.namespace(*ns).len())
            .sum()
    }
}

impl From<&str> for EntityRecord {
    fn from(id: &str) -> Self {
        Self::new(EntityId::from(id))
    }
}

/// One selection cycle's shared document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolRecord {
    pub cycle_key: CycleKey,
    /// Incremented by every successful write.
    #[serde(default)]
    pub revision: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, alias = "stocks")]
    pub entities: Vec<EntityRecord>,
    /// Unmodelled top-level fields, including the `<namespace>_at` merge timestamps.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A batch of targeted field writes into one namespace for one strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct NamespacePatch {
    pub namespace: Namespace,
    pub strategy_name: String,
    pub writes: Vec<(EntityId, StrategyResult)>,
}

/// What a patch did to a pool record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub updated: Vec<EntityId>,
    pub missing: Vec<EntityId>,
    pub revision: u64,
}

impl PoolRecord {
    pub fn new(cycle_key: CycleKey, entities: Vec<EntityRecord>, now: DateTime<Utc>) -> Self {
        Self {
            cycle_key,
            revision: 0,
            selection_date: None,
            created_at: now,
            updated_at: now,
            entities,
            extra: BTreeMap::new(),
        }
    }

    pub fn entity(&self, id: &EntityId) -> Option<&EntityRecord> {
        self.entities.iter().find(|e| &e.id == id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entity(id).is_some()
    }

    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.entities.iter().map(|e| e.id.clone()).collect()
    }

    /// Time of the last merge into `ns`, read from the top-level `<ns>_at` field.
    pub fn phase_timestamp(&self, ns: Namespace) -> Option<DateTime<Utc>> {
        match self.extra.get(&ns.timestamp_field())? {
            serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            _ => None,
        }
    }

    /// Every namespace merged so far, with its timestamp.
    pub fn phase_timestamps(&self) -> Vec<(Namespace, DateTime<Utc>)> {
        Namespace::ALL
            .iter()
            .filter_map(|ns| self.phase_timestamp(*ns).map(|t| (*ns, t)))
            .collect()
    }

    pub fn drop_deprecated_fields(&mut self) {
        for field in DEPRECATED_POOL_FIELDS {
            self.extra.remove(*field);
        }
    }

    /// Apply targeted writes: only `entities[i].<ns>.<strategy>` changes.
    ///
    /// Writes for entities not present are reported as missing and ignored.
    /// A patch that matches no entity leaves the record untouched, revision
    /// and timestamps included.
    pub fn apply_patch(&mut self, patch: &NamespacePatch, now: DateTime<Utc>) -> ApplyReport {
        let index: HashMap<EntityId, usize> = self
            .entities
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.clone(), i))
            .collect();

        let mut report = ApplyReport::default();
        let mut seen = HashSet::new();

        for (id, result) in &patch.writes {
            match index.get(id) {
                Some(&i) => {
                    self.entities[i]
                        .namespace_mut(patch.namespace)
                        .insert(patch.strategy_name.clone(), result.clone());
                    if seen.insert(id.clone()) {
                        report.updated.push(id.clone());
                    }
                }
                None => report.missing.push(id.clone()),
            }
        }

        report.revision = self.revision;
        if report.updated.is_empty() {
            return report;
        }

        self.extra.insert(
            patch.namespace.timestamp_field(),
            serde_json::Value::String(now.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        );
        self.updated_at = now;
        self.drop_deprecated_fields();
        self.revision += 1;
        report.revision = self.revision;
        report
    }
}
