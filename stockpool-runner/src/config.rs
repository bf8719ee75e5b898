//! TOML configuration: where pools and data live, how fusion behaves, the
//! strategy descriptors and the agents that run them.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use stockpool_core::data::CircuitBreaker;
use stockpool_core::scoring::{HeuristicScorer, HttpLlmConfig, HttpLlmScorer, SecondaryScorer};
use stockpool_core::{Phase, StrategyDescriptor};

use crate::fusion::DEFAULT_FUSION_STRATEGY;
use crate::merge::MergeMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {message}")]
    Io { path: String, message: String },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    pub store_dir: PathBuf,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("pools"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSection {
    /// Directory of `<code>.csv` daily bar files.
    pub csv_dir: PathBuf,
    /// Calendar days of history fetched per phase run.
    pub window_days: u32,
    pub min_request_interval_ms: u64,
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            csv_dir: PathBuf::from("data"),
            window_days: 120,
            min_request_interval_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionSection {
    pub strategy_name: String,
    pub scorer_timeout_ms: u64,
    pub merge_mode: MergeModeKind,
    /// Conflict retries in `versioned` mode.
    pub max_retries: u32,
}

impl Default for FusionSection {
    fn default() -> Self {
        Self {
            strategy_name: DEFAULT_FUSION_STRATEGY.to_string(),
            scorer_timeout_ms: 30_000,
            merge_mode: MergeModeKind::FieldAtomic,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeModeKind {
    #[default]
    FieldAtomic,
    Versioned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScorerKind {
    #[default]
    Heuristic,
    Http,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerSection {
    pub kind: ScorerKind,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    /// Environment variable holding the API key. The key itself never goes in the file.
    pub api_key_env: Option<String>,
    pub timeout_secs: u64,
    pub breaker_threshold: u32,
    pub breaker_cooldown_secs: u64,
}

impl Default for ScorerSection {
    fn default() -> Self {
        Self {
            kind: ScorerKind::Heuristic,
            endpoint: None,
            model: None,
            api_key_env: None,
            timeout_secs: 30,
            breaker_threshold: 3,
            breaker_cooldown_secs: 60,
        }
    }
}

/// A selector agent: one phase, the strategies it runs, and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    pub phase: Phase,
    /// Descriptor names from `[[strategies]]`.
    #[serde(default)]
    pub strategies: Vec<String>,
    #[serde(default = "default_true")]
    pub skip_already_scored: bool,
    #[serde(default)]
    pub parallel: bool,
}

fn default_true() -> bool {
    true
}

impl AgentConfig {
    pub fn new(name: impl Into<String>, phase: Phase) -> Self {
        Self {
            name: name.into(),
            phase,
            strategies: Vec::new(),
            skip_already_scored: true,
            parallel: false,
        }
    }

    pub fn with_strategies<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.strategies = names.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StockPoolConfig {
    pub pool: PoolSection,
    pub data: DataSection,
    pub fusion: FusionSection,
    pub scorer: ScorerSection,
    pub strategies: Vec<StrategyDescriptor>,
    pub agents: Vec<AgentConfig>,
}

impl StockPoolConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data.window_days == 0 {
            return Err(ConfigError::Invalid("data.window_days must be positive".into()));
        }
        if self.fusion.strategy_name.trim().is_empty() {
            return Err(ConfigError::Invalid("fusion.strategy_name is empty".into()));
        }

        let mut names = HashSet::new();
        for descriptor in &self.strategies {
            if !names.insert(descriptor.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate strategy name '{}'",
                    descriptor.name
                )));
            }
        }

        let mut agents = HashSet::new();
        for agent in &self.agents {
            if !agents.insert(agent.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate agent '{}'", agent.name)));
            }
            // surfaced as MissingDescriptor when the agent runs
            for name in agent.strategies.iter().filter(|n| !names.contains(n.as_str())) {
                warn!(agent = %agent.name, strategy = %name, "agent references unknown strategy");
            }
        }

        if self.scorer.kind == ScorerKind::Http && self.scorer.endpoint.is_none() {
            return Err(ConfigError::Invalid("scorer.kind = \"http\" needs scorer.endpoint".into()));
        }
        Ok(())
    }

    pub fn merge_mode(&self) -> MergeMode {
        match self.fusion.merge_mode {
            MergeModeKind::FieldAtomic => MergeMode::FieldAtomic,
            MergeModeKind::Versioned => MergeMode::Versioned {
                max_retries: self.fusion.max_retries,
            },
        }
    }

    pub fn scorer_timeout(&self) -> Duration {
        Duration::from_millis(self.fusion.scorer_timeout_ms)
    }

    pub fn agent(&self, name: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.name == name)
    }

    /// Descriptors an agent runs, in the agent's order.
    pub fn descriptors_for(&self, agent: &AgentConfig) -> Vec<StrategyDescriptor> {
        agent
            .strategies
            .iter()
            .filter_map(|name| self.strategies.iter().find(|d| &d.name == name).cloned())
            .collect()
    }

    pub fn build_scorer(&self) -> Result<Arc<dyn SecondaryScorer>, ConfigError> {
        match self.scorer.kind {
            ScorerKind::Heuristic => Ok(Arc::new(HeuristicScorer)),
            ScorerKind::Http => {
                let endpoint = self
                    .scorer
                    .endpoint
                    .clone()
                    .ok_or_else(|| ConfigError::Invalid("scorer.endpoint missing".into()))?;
                let api_key = self
                    .scorer
                    .api_key_env
                    .as_deref()
                    .and_then(|var| std::env::var(var).ok());
                let config = HttpLlmConfig {
                    endpoint,
                    model: self.scorer.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string()),
                    api_key,
                    timeout: Duration::from_secs(self.scorer.timeout_secs),
                };
                let breaker = Arc::new(CircuitBreaker::new(
                    Duration::from_secs(self.scorer.breaker_cooldown_secs),
                    self.scorer.breaker_threshold,
                ));
                let scorer = HttpLlmScorer::new(config, breaker)
                    .map_err(|e| ConfigError::Invalid(format!("cannot build HTTP scorer: {e}")))?;
                Ok(Arc::new(scorer))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[pool]
store_dir = "/tmp/pools"

[data]
csv_dir = "/tmp/bars"
window_days = 90

[fusion]
merge_mode = "versioned"
max_retries = 5

[[strategies]]
name = "three_ma"
program = { module_ref = "strategies.three_ma_bullish_arrangement_strategy", class_ref = "ThreeMABullishArrangementStrategy" }
[strategies.parameters]
short = 5
mid = 13
long = 34

[[strategies]]
name = "rsi"
program = { module_ref = "rsi_strategy.py", class_ref = "RsiStrategy" }

[[agents]]
name = "technical"
phase = "technical"
strategies = ["three_ma", "rsi"]
parallel = true
"#;

    #[test]
    fn parses_full_sample() {
        let config = StockPoolConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.data.window_days, 90);
        assert_eq!(config.merge_mode(), MergeMode::Versioned { max_retries: 5 });
        assert_eq!(config.strategies.len(), 2);
        assert_eq!(config.strategies[0].parameters["mid"], serde_json::json!(13));

        let agent = config.agent("technical").unwrap();
        assert_eq!(agent.phase, Phase::Technical);
        assert!(agent.skip_already_scored);
        assert!(agent.parallel);
        let names: Vec<_> = config.descriptors_for(agent).into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["three_ma", "rsi"]);
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config = StockPoolConfig::from_toml_str("").unwrap();
        assert_eq!(config.fusion.strategy_name, "signal_fusion");
        assert_eq!(config.merge_mode(), MergeMode::FieldAtomic);
        assert_eq!(config.scorer.kind, ScorerKind::Heuristic);
        assert!(config.build_scorer().is_ok());
    }

    #[test]
    fn unknown_agent_strategy_does_not_block_loading() {
        let text = r#"
[[strategies]]
name = "rsi"
program = { module_ref = "rsi_strategy", class_ref = "RsiStrategy" }

[[agents]]
name = "technical"
phase = "technical"
strategies = ["missing", "rsi"]

[[agents]]
name = "trend"
phase = "trend"
strategies = ["rsi"]
"#;
        let config = StockPoolConfig::from_toml_str(text).unwrap();
        let agent = config.agent("technical").unwrap();
        let names: Vec<_> = config.descriptors_for(agent).into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["rsi"]);
        assert!(config.agent("trend").is_some());
    }

    #[test]
    fn duplicate_descriptor_is_rejected() {
        let text = r#"
[[strategies]]
name = "rsi"
program = { module_ref = "rsi_strategy", class_ref = "RsiStrategy" }

[[strategies]]
name = "rsi"
program = { module_ref = "rsi_strategy", class_ref = "RsiStrategy" }
"#;
        assert!(matches!(
            StockPoolConfig::from_toml_str(text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn zero_window_is_rejected() {
        let text = "[data]\nwindow_days = 0\n";
        assert!(StockPoolConfig::from_toml_str(text).is_err());
    }

    #[test]
    fn bad_merge_mode_is_a_parse_error() {
        let text = "[fusion]\nmerge_mode = \"yolo\"\n";
        assert!(matches!(
            StockPoolConfig::from_toml_str(text),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn http_scorer_needs_endpoint() {
        let text = "[scorer]\nkind = \"http\"\n";
        assert!(StockPoolConfig::from_toml_str(text).is_err());
    }

    #[test]
    fn shipped_example_config_is_valid() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../stockpool.example.toml");
        let config = StockPoolConfig::from_file(path).unwrap();
        assert_eq!(config.agents.len(), 3);
        let registry = stockpool_core::StrategyRegistry::with_builtin();
        let (resolved, errors) = registry.resolve_all(&config.strategies);
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(resolved.len(), 3);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = StockPoolConfig::from_file("/nonexistent/stockpool.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
