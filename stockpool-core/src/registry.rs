//! Strategy registry: turns stored descriptors into runnable strategies.
//!
//! Constructors are registered explicitly under a `(module_ref, class_ref)`
//! key. Module references are canonicalised before lookup, so the forms a
//! descriptor may have been written with (`foo`, `foo.py`, `strategies.foo`)
//! all land on the same constructor.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::strategies::{RsiReversal, ThreeMaBullish, VolumeBreakout};
use crate::strategy::Strategy;

// ─── Descriptor ──────────────────────────────────────────────────────

/// Where a strategy's implementation lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgramRef {
    pub module_ref: String,
    pub class_ref: String,
}

impl ProgramRef {
    pub fn new(module_ref: impl Into<String>, class_ref: impl Into<String>) -> Self {
        Self {
            module_ref: module_ref.into(),
            class_ref: class_ref.into(),
        }
    }

    /// Canonical `(module, class)` lookup key.
    pub fn canonical(&self) -> (String, String) {
        (
            canonical_module_ref(&self.module_ref),
            self.class_ref.trim().to_string(),
        )
    }
}

impl fmt::Display for ProgramRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.module_ref, self.class_ref)
    }
}

/// Strip a trailing `.py` and a leading `strategies.` / `strategies/` package.
pub fn canonical_module_ref(raw: &str) -> String {
    let mut s = raw.trim();
    if let Some(stripped) = s.strip_suffix(".py") {
        s = stripped;
    }
    for prefix in ["strategies.", "strategies/"] {
        if let Some(stripped) = s.strip_prefix(prefix) {
            s = stripped;
        }
    }
    s.to_string()
}

/// A stored strategy configuration. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyDescriptor {
    pub name: String,
    /// Uses `BTreeMap` so serialization (and the fingerprint) is deterministic.
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub program: ProgramRef,
}

impl StrategyDescriptor {
    pub fn new(name: impl Into<String>, program: ProgramRef) -> Self {
        Self {
            name: name.into(),
            parameters: BTreeMap::new(),
            program,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn params(&self) -> StrategyParams<'_> {
        StrategyParams {
            strategy: &self.name,
            values: &self.parameters,
        }
    }

    /// BLAKE3 hex digest of name + canonical program + parameters.
    pub fn fingerprint(&self) -> String {
        let (module, class) = self.program.canonical();
        let canonical = serde_json::json!({
            "name": self.name,
            "module": module,
            "class": class,
            "parameters": self.parameters,
        });
        blake3::hash(canonical.to_string().as_bytes())
            .to_hex()
            .to_string()
    }
}

// ─── Parameters ──────────────────────────────────────────────────────

/// Typed view over a descriptor's parameter map.
///
/// Each accessor takes a list of accepted keys (canonical name first, then
/// aliases) and a default used when none of them is present.
#[derive(Debug, Clone, Copy)]
pub struct StrategyParams<'a> {
    strategy: &'a str,
    values: &'a BTreeMap<String, serde_json::Value>,
}

impl<'a> StrategyParams<'a> {
    fn lookup<'b>(&self, keys: &[&'b str]) -> Option<(&'b str, &'a serde_json::Value)> {
        keys.iter()
            .find_map(|k| self.values.get(*k).map(|v| (*k, v)))
            .filter(|(_, v)| !v.is_null())
    }

    fn invalid(&self, parameter: &str, reason: impl Into<String>) -> ResolutionError {
        ResolutionError::InvalidParameter {
            name: self.strategy.to_string(),
            parameter: parameter.to_string(),
            reason: reason.into(),
        }
    }

    /// Number or numeric string.
    pub fn f64_or(&self, keys: &[&str], default: f64) -> Result<f64, ResolutionError> {
        let Some((key, value)) = self.lookup(keys) else {
            return Ok(default);
        };
        let parsed = match value {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        match parsed {
            Some(v) if v.is_finite() => Ok(v),
            _ => Err(self.invalid(key, format!("expected a number, got {value}"))),
        }
    }

    /// Non-negative integer (integral floats and numeric strings accepted).
    pub fn usize_or(&self, keys: &[&str], default: usize) -> Result<usize, ResolutionError> {
        let Some((key, _)) = self.lookup(keys) else {
            return Ok(default);
        };
        let v = self.f64_or(keys, default as f64)?;
        if v < 0.0 || v.fract() != 0.0 {
            return Err(self.invalid(key, format!("expected a non-negative integer, got {v}")));
        }
        Ok(v as usize)
    }

    pub fn str_or(&self, keys: &[&str], default: &str) -> Result<String, ResolutionError> {
        match self.lookup(keys) {
            None => Ok(default.to_string()),
            Some((_, serde_json::Value::String(s))) => Ok(s.clone()),
            Some((key, other)) => Err(self.invalid(key, format!("expected a string, got {other}"))),
        }
    }
}

// ─── Errors ──────────────────────────────────────────────────────────

/// Why a descriptor could not be turned into a strategy.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolutionError {
    #[error("strategy '{name}': no implementation registered for {module_ref}::{class_ref}")]
    UnknownProgram {
        name: String,
        module_ref: String,
        class_ref: String,
    },
    #[error("strategy '{name}': empty program reference")]
    EmptyReference { name: String },
    #[error("strategy '{name}': invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        name: String,
        parameter: String,
        reason: String,
    },
    #[error("strategy '{name}': construction failed: {reason}")]
    Construction { name: String, reason: String },
    #[error("strategy '{name}': no descriptor configured")]
    MissingDescriptor { name: String },
}

impl ResolutionError {
    /// Name of the descriptor that failed.
    pub fn descriptor_name(&self) -> &str {
        match self {
            Self::UnknownProgram { name, .. }
            | Self::EmptyReference { name }
            | Self::InvalidParameter { name, .. }
            | Self::Construction { name, .. }
            | Self::MissingDescriptor { name } => name,
        }
    }
}

// ─── Registry ────────────────────────────────────────────────────────

/// Builds a strategy from its descriptor.
pub type StrategyConstructor =
    Box<dyn Fn(&StrategyDescriptor) -> Result<Arc<dyn Strategy>, ResolutionError> + Send + Sync>;

/// A descriptor together with the strategy it resolved to.
#[derive(Debug, Clone)]
pub struct ResolvedStrategy {
    pub descriptor: StrategyDescriptor,
    pub strategy: Arc<dyn Strategy>,
}

#[derive(Default)]
pub struct StrategyRegistry {
    constructors: HashMap<(String, String), StrategyConstructor>,
    instances: Option<Mutex<HashMap<String, Arc<dyn Strategy>>>>,
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.constructors.keys().collect();
        keys.sort();
        f.debug_struct("StrategyRegistry")
            .field("programs", &keys)
            .field("instance_cache", &self.instances.is_some())
            .finish()
    }
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the bundled strategies.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            "three_ma_bullish_arrangement_strategy",
            "ThreeMABullishArrangementStrategy",
            |d| Ok(Arc::new(ThreeMaBullish::from_descriptor(d)?)),
        );
        registry.register(
            "volume_breakout_strategy",
            "VolumeBreakoutStrategy",
            |d| Ok(Arc::new(VolumeBreakout::from_descriptor(d)?)),
        );
        registry.register("rsi_strategy", "RsiStrategy", |d| {
            Ok(Arc::new(RsiReversal::from_descriptor(d)?))
        });
        registry
    }

    /// Share one instance per distinct descriptor fingerprint.
    pub fn with_instance_cache(mut self) -> Self {
        self.instances = Some(Mutex::new(HashMap::new()));
        self
    }

    /// Register (or replace) the constructor for a program reference.
    pub fn register<F>(&mut self, module_ref: &str, class_ref: &str, constructor: F)
    where
        F: Fn(&StrategyDescriptor) -> Result<Arc<dyn Strategy>, ResolutionError>
            + Send
            + Sync
            + 'static,
    {
        let key = ProgramRef::new(module_ref, class_ref).canonical();
        if self.constructors.insert(key.clone(), Box::new(constructor)).is_some() {
            debug!(module = %key.0, class = %key.1, "replaced strategy constructor");
        }
    }

    pub fn is_registered(&self, program: &ProgramRef) -> bool {
        self.constructors.contains_key(&program.canonical())
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }

    /// Build the strategy a descriptor points at.
    pub fn resolve(
        &self,
        descriptor: &StrategyDescriptor,
    ) -> Result<Arc<dyn Strategy>, ResolutionError> {
        let (module, class) = descriptor.program.canonical();
        if module.is_empty() || class.is_empty() {
            return Err(ResolutionError::EmptyReference {
                name: descriptor.name.clone(),
            });
        }

        let fingerprint = self.instances.as_ref().map(|_| descriptor.fingerprint());
        if let (Some(cache), Some(fp)) = (&self.instances, &fingerprint) {
            let cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(hit) = cache.get(fp) {
                return Ok(Arc::clone(hit));
            }
        }

        let constructor = self.constructors.get(&(module.clone(), class.clone())).ok_or_else(|| {
            ResolutionError::UnknownProgram {
                name: descriptor.name.clone(),
                module_ref: module,
                class_ref: class,
            }
        })?;
        let strategy = constructor(descriptor)?;

        if let (Some(cache), Some(fp)) = (&self.instances, fingerprint) {
            cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(fp, Arc::clone(&strategy));
        }
        Ok(strategy)
    }

    /// Resolve a batch. Failures are collected, never fatal to the batch.
    pub fn resolve_all(
        &self,
        descriptors: &[StrategyDescriptor],
    ) -> (Vec<ResolvedStrategy>, Vec<ResolutionError>) {
        let mut resolved = Vec::with_capacity(descriptors.len());
        let mut errors = Vec::new();
        for descriptor in descriptors {
            match self.resolve(descriptor) {
                Ok(strategy) => resolved.push(ResolvedStrategy {
                    descriptor: descriptor.clone(),
                    strategy,
                }),
                Err(err) => {
                    warn!(strategy = %descriptor.name, error = %err, "strategy resolution failed");
                    errors.push(err);
                }
            }
        }
        (resolved, errors)
    }
}
