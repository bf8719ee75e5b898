//! Pool persistence.
//!
//! `PoolStore::apply` is the only mutation path after creation: it applies a
//! `NamespacePatch` to one pool under the store's lock, so concurrent merges
//! into different namespaces (or different strategies of one namespace)
//! never lose each other's writes. With `expected_revision` set, the write is
//! conditional and fails with `RevisionConflict` if someone wrote first.
//! A patch that matches no entity is not persisted.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use fd_lock::RwLock;
use thiserror::Error;
use tracing::{debug, info};

use stockpool_core::domain::{ApplyReport, CycleKey, NamespacePatch, PoolRecord};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("no pool for cycle {0}")]
    PoolNotFound(CycleKey),

    #[error("no pools stored")]
    NoPools,

    #[error("pool for cycle {0} already exists")]
    AlreadyExists(CycleKey),

    #[error("revision conflict on cycle {cycle}: expected {expected}, found {actual}")]
    RevisionConflict {
        cycle: CycleKey,
        expected: u64,
        actual: u64,
    },

    #[error("I/O error at {path}: {message}")]
    Io { path: String, message: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl PersistenceError {
    fn io(path: &Path, err: impl std::fmt::Display) -> Self {
        Self::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

pub trait PoolStore: Send + Sync {
    /// Store a new pool. Fails if the cycle already has one.
    fn create(&self, pool: PoolRecord) -> Result<(), PersistenceError>;

    fn load(&self, cycle: &CycleKey) -> Result<PoolRecord, PersistenceError>;

    /// Stored cycle keys, oldest first.
    fn list(&self) -> Result<Vec<CycleKey>, PersistenceError>;

    /// The pool with the greatest cycle key.
    fn latest(&self) -> Result<PoolRecord, PersistenceError> {
        let latest = self.list()?.pop().ok_or(PersistenceError::NoPools)?;
        self.load(&latest)
    }

    /// Apply targeted field writes atomically. Nothing is written on error.
    fn apply(
        &self,
        cycle: &CycleKey,
        patch: &NamespacePatch,
        expected_revision: Option<u64>,
    ) -> Result<ApplyReport, PersistenceError>;
}

fn check_revision(pool: &PoolRecord, expected: Option<u64>) -> Result<(), PersistenceError> {
    match expected {
        Some(expected) if expected != pool.revision => Err(PersistenceError::RevisionConflict {
            cycle: pool.cycle_key.clone(),
            expected,
            actual: pool.revision,
        }),
        _ => Ok(()),
    }
}

// ─── In-memory store ─────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryPoolStore {
    pools: Mutex<BTreeMap<CycleKey, PoolRecord>>,
}

impl MemoryPoolStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<CycleKey, PoolRecord>> {
        self.pools.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PoolStore for MemoryPoolStore {
    fn create(&self, pool: PoolRecord) -> Result<(), PersistenceError> {
        let mut pools = self.lock();
        if pools.contains_key(&pool.cycle_key) {
            return Err(PersistenceError::AlreadyExists(pool.cycle_key));
        }
        pools.insert(pool.cycle_key.clone(), pool);
        Ok(())
    }

    fn load(&self, cycle: &CycleKey) -> Result<PoolRecord, PersistenceError> {
        self.lock()
            .get(cycle)
            .cloned()
            .ok_or_else(|| PersistenceError::PoolNotFound(cycle.clone()))
    }

    fn list(&self) -> Result<Vec<CycleKey>, PersistenceError> {
        Ok(self.lock().keys().cloned().collect())
    }

    fn apply(
        &self,
        cycle: &CycleKey,
        patch: &NamespacePatch,
        expected_revision: Option<u64>,
    ) -> Result<ApplyReport, PersistenceError> {
        let mut pools = self.lock();
        let pool = pools
            .get_mut(cycle)
            .ok_or_else(|| PersistenceError::PoolNotFound(cycle.clone()))?;
        check_revision(pool, expected_revision)?;
        Ok(pool.apply_patch(patch, Utc::now()))
    }
}

// ─── JSON file store ─────────────────────────────────────────────────

/// One `<cycle>.json` document per cycle in `dir`.
///
/// Writers take an exclusive OS lock on a `<cycle>.json.lock` sibling for the
/// whole read, check and write, so separate handles and separate processes
/// serialize on the same pool. Documents are written to a uniquely named temp
/// file and renamed into place, so readers never see a half-written pool.
#[derive(Debug)]
pub struct JsonPoolStore {
    dir: PathBuf,
}

impl JsonPoolStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| PersistenceError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, cycle: &CycleKey) -> PathBuf {
        self.dir.join(format!("{cycle}.json"))
    }

    fn lock_path_for(&self, cycle: &CycleKey) -> PathBuf {
        self.dir.join(format!("{cycle}.json.lock"))
    }

    /// Run `f` while holding the cycle's exclusive file lock.
    fn locked<T>(
        &self,
        cycle: &CycleKey,
        f: impl FnOnce() -> Result<T, PersistenceError>,
    ) -> Result<T, PersistenceError> {
        let path = self.lock_path_for(cycle);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| PersistenceError::io(&path, e))?;
        let mut lock = RwLock::new(file);
        let _held = lock.write().map_err(|e| PersistenceError::io(&path, e))?;
        f()
    }

    fn read(&self, cycle: &CycleKey) -> Result<PoolRecord, PersistenceError> {
        let path = self.path_for(cycle);
        if !path.exists() {
            return Err(PersistenceError::PoolNotFound(cycle.clone()));
        }
        let text = fs::read_to_string(&path).map_err(|e| PersistenceError::io(&path, e))?;
        serde_json::from_str(&text)
            .map_err(|e| PersistenceError::Serialization(format!("{}: {e}", path.display())))
    }

    fn write(&self, pool: &PoolRecord) -> Result<(), PersistenceError> {
        let path = self.path_for(&pool.cycle_key);
        let json = serde_json::to_string_pretty(pool)
            .map_err(|e| PersistenceError::Serialization(e.to_string()))?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".pool-")
            .suffix(".tmp")
            .tempfile_in(&self.dir)
            .map_err(|e| PersistenceError::io(&self.dir, e))?;
        tmp.write_all(json.as_bytes())
            .map_err(|e| PersistenceError::io(&self.dir, e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| PersistenceError::io(&self.dir, e))?;
        tmp.persist(&path)
            .map_err(|e| PersistenceError::io(&path, format!("atomic rename failed: {}", e.error)))?;
        debug!(cycle = %pool.cycle_key, revision = pool.revision, "pool written");
        Ok(())
    }
}

impl PoolStore for JsonPoolStore {
    fn create(&self, pool: PoolRecord) -> Result<(), PersistenceError> {
        self.locked(&pool.cycle_key, || {
            if self.path_for(&pool.cycle_key).exists() {
                return Err(PersistenceError::AlreadyExists(pool.cycle_key.clone()));
            }
            self.write(&pool)
        })?;
        info!(cycle = %pool.cycle_key, entities = pool.entities.len(), "pool created");
        Ok(())
    }

    fn load(&self, cycle: &CycleKey) -> Result<PoolRecord, PersistenceError> {
        self.read(cycle)
    }

    fn list(&self) -> Result<Vec<CycleKey>, PersistenceError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| PersistenceError::io(&self.dir, e))?;
        let mut keys = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| PersistenceError::io(&self.dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            match CycleKey::parse(stem) {
                Ok(key) => keys.push(key),
                Err(_) => debug!(file = %path.display(), "ignoring non-pool file"),
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn apply(
        &self,
        cycle: &CycleKey,
        patch: &NamespacePatch,
        expected_revision: Option<u64>,
    ) -> Result<ApplyReport, PersistenceError> {
        self.locked(cycle, || {
            let mut pool = self.read(cycle)?;
            check_revision(&pool, expected_revision)?;
            let report = pool.apply_patch(patch, Utc::now());
            if !report.updated.is_empty() {
                self.write(&pool)?;
            }
            Ok(report)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockpool_core::domain::{EntityId, EntityRecord, Namespace, StrategyResult, StrategyValue};

    fn pool(key: &str) -> PoolRecord {
        PoolRecord::new(
            CycleKey::parse(key).unwrap(),
            vec![EntityRecord::from("600519"), EntityRecord::from("000001")],
            Utc::now(),
        )
    }

    fn patch(ns: Namespace, strategy: &str, score: f64) -> NamespacePatch {
        NamespacePatch {
            namespace: ns,
            strategy_name: strategy.into(),
            writes: vec![(
                EntityId::from("600519"),
                StrategyResult::new(score, StrategyValue::default()),
            )],
        }
    }

    fn exercise(store: &dyn PoolStore) {
        store.create(pool("2024-5")).unwrap();
        store.create(pool("2024-23")).unwrap();
        assert!(matches!(
            store.create(pool("2024-23")),
            Err(PersistenceError::AlreadyExists(_))
        ));

        let latest = store.latest().unwrap();
        assert_eq!(latest.cycle_key.to_string(), "2024-23");

        let cycle = latest.cycle_key.clone();
        let report = store.apply(&cycle, &patch(Namespace::Tech, "rsi", 0.4), Some(0)).unwrap();
        assert_eq!(report.revision, 1);

        let conflict = store.apply(&cycle, &patch(Namespace::Tech, "rsi", 0.9), Some(0));
        assert!(matches!(
            conflict,
            Err(PersistenceError::RevisionConflict { expected: 0, actual: 1, .. })
        ));
        // the rejected write left nothing behind
        let stored = store.load(&cycle).unwrap();
        assert_eq!(stored.entities[0].tech["rsi"].score, 0.4);
        assert_eq!(stored.revision, 1);

        let missing = CycleKey::parse("2023-01").unwrap();
        assert!(matches!(
            store.apply(&missing, &patch(Namespace::Tech, "rsi", 0.1), None),
            Err(PersistenceError::PoolNotFound(_))
        ));
    }

    #[test]
    fn memory_store_contract() {
        exercise(&MemoryPoolStore::new());
    }

    #[test]
    fn json_store_contract() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&JsonPoolStore::open(dir.path()).unwrap());
    }

    #[test]
    fn json_store_ignores_foreign_files_and_leaves_no_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonPoolStore::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("notes.json"), "{}").unwrap();
        std::fs::write(dir.path().join("README"), "x").unwrap();
        store.create(pool("2024-10")).unwrap();
        store
            .apply(&CycleKey::parse("2024-10").unwrap(), &patch(Namespace::Fund, "f", 0.5), None)
            .unwrap();

        assert_eq!(store.list().unwrap().len(), 1);
        let tmp_left = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .any(|e| e.path().to_string_lossy().ends_with(".tmp"));
        assert!(!tmp_left);
    }

    #[test]
    fn json_store_leaves_other_namespaces_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let doc = serde_json::json!({
            "cycle_key": "2024-23",
            "created_at": "2024-06-03T00:00:00Z",
            "updated_at": "2024-06-03T00:00:00Z",
            "trend_at": "2024-06-03T08:00:00Z",
            "entities": [{
                "id": "600519",
                "trend": {
                    "ma": {"score": 0.8, "value": {"ratio": 1.5}},
                    "legacy": {"score": 0.4, "value": "close=10.2, MA5=10.0"}
                },
                "fund": {"pe": {"score": 0.6}}
            }]
        });
        std::fs::write(dir.path().join("2024-23.json"), doc.to_string()).unwrap();
        let store = JsonPoolStore::open(dir.path()).unwrap();
        let cycle = CycleKey::parse("2024-23").unwrap();

        store.apply(&cycle, &patch(Namespace::Tech, "rsi", 0.4), None).unwrap();

        let text = std::fs::read_to_string(dir.path().join("2024-23.json")).unwrap();
        let written: serde_json::Value = serde_json::from_str(&text).unwrap();
        let entity = &written["entities"][0];
        assert_eq!(entity["trend"], doc["entities"][0]["trend"]);
        assert_eq!(entity["fund"], doc["entities"][0]["fund"]);
        assert_eq!(written["trend_at"], doc["trend_at"]);
        assert_eq!(entity["tech"]["rsi"]["score"], serde_json::json!(0.4));
        assert!(written.get("tech_at").is_some());
    }

    #[test]
    fn json_store_does_not_rewrite_for_unmatched_patch() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonPoolStore::open(dir.path()).unwrap();
        store.create(pool("2024-23")).unwrap();
        let cycle = CycleKey::parse("2024-23").unwrap();
        let path = dir.path().join("2024-23.json");
        let before = std::fs::read_to_string(&path).unwrap();

        let stranger = NamespacePatch {
            namespace: Namespace::Tech,
            strategy_name: "rsi".into(),
            writes: vec![(
                EntityId::from("999999"),
                StrategyResult::new(0.7, StrategyValue::default()),
            )],
        };
        let report = store.apply(&cycle, &stranger, None).unwrap();

        assert_eq!(report.missing, vec![EntityId::from("999999")]);
        assert_eq!(report.revision, 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn separate_json_handles_do_not_lose_updates() {
        let dir = tempfile::tempdir().unwrap();
        JsonPoolStore::open(dir.path()).unwrap().create(pool("2024-23")).unwrap();
        let cycle = CycleKey::parse("2024-23").unwrap();

        std::thread::scope(|scope| {
            for ns in [Namespace::Tech, Namespace::Fund] {
                let store = JsonPoolStore::open(dir.path()).unwrap();
                let cycle = cycle.clone();
                scope.spawn(move || {
                    for i in 0..30 {
                        store
                            .apply(&cycle, &patch(ns, &format!("s{i}"), 0.5), None)
                            .unwrap();
                    }
                });
            }
        });

        let stored = JsonPoolStore::open(dir.path()).unwrap().load(&cycle).unwrap();
        assert_eq!(stored.revision, 60);
        assert_eq!(stored.entities[0].tech.len(), 30);
        assert_eq!(stored.entities[0].fund.len(), 30);
    }

    #[test]
    fn empty_store_has_no_latest() {
        assert!(matches!(MemoryPoolStore::new().latest(), Err(PersistenceError::NoPools)));
    }
}
