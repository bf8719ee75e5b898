//! StockPool CLI: seed a cycle's pool, run selector agents, fuse signals.
//!
//! Commands:
//! - `seed`: create the pool for a cycle from a list of entity codes
//! - `phase`: run one configured agent against a pool
//! - `fuse`: run signal fusion over a pool
//! - `show`: print a pool, or one entity of it, as JSON
//! - `list`: list stored cycles

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use stockpool_core::data::{CsvDataProvider, RateLimiter};
use stockpool_core::domain::{CycleKey, EntityId, EntityRecord, PoolRecord};
use stockpool_core::StrategyRegistry;
use stockpool_runner::{
    CancelToken, JsonPoolStore, PhaseRunner, PoolMergeEngine, PoolStore, SignalFusionEngine,
    StockPoolConfig,
};

#[derive(Parser)]
#[command(name = "stockpool", about = "StockPool: weekly multi-strategy stock pool")]
struct Cli {
    /// Path to a TOML config file. Built-in defaults when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the pool for a cycle.
    Seed {
        /// Entity codes (e.g., 600519 000001).
        codes: Vec<String>,

        /// File with one entity code per line.
        #[arg(long)]
        from_file: Option<PathBuf>,

        /// Selection date (YYYY-MM-DD). Defaults to today; also picks the cycle.
        #[arg(long)]
        date: Option<String>,

        /// Cycle key (YYYY-WW). Defaults to the ISO week of the selection date.
        #[arg(long)]
        cycle: Option<String>,
    },
    /// Run a configured agent against a pool.
    Phase {
        /// Agent name from `[[agents]]`.
        agent: String,

        /// Cycle key. Defaults to the latest pool.
        #[arg(long)]
        cycle: Option<String>,
    },
    /// Fuse every entity's scores into a trading signal.
    Fuse {
        /// Cycle key. Defaults to the latest pool.
        #[arg(long)]
        cycle: Option<String>,
    },
    /// Print a pool as JSON.
    Show {
        /// Cycle key. Defaults to the latest pool.
        #[arg(long)]
        cycle: Option<String>,

        /// Print only this entity.
        #[arg(long)]
        entity: Option<String>,
    },
    /// List stored cycles, oldest first.
    List,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => StockPoolConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => StockPoolConfig::default(),
    };

    match cli.command {
        Commands::Seed {
            codes,
            from_file,
            date,
            cycle,
        } => run_seed(&config, codes, from_file, date, cycle),
        Commands::Phase { agent, cycle } => run_phase(&config, &agent, cycle),
        Commands::Fuse { cycle } => run_fuse(&config, cycle),
        Commands::Show { cycle, entity } => run_show(&config, cycle, entity),
        Commands::List => run_list(&config),
    }
}

fn parse_cycle(cycle: Option<String>) -> Result<Option<CycleKey>> {
    Ok(cycle.as_deref().map(CycleKey::parse).transpose()?)
}

fn open_store(config: &StockPoolConfig) -> Result<Arc<JsonPoolStore>> {
    let store = JsonPoolStore::open(&config.pool.store_dir)
        .with_context(|| format!("opening pool store {}", config.pool.store_dir.display()))?;
    Ok(Arc::new(store))
}

fn merge_engine(config: &StockPoolConfig) -> Result<Arc<PoolMergeEngine>> {
    let engine = PoolMergeEngine::new(open_store(config)?).with_mode(config.merge_mode());
    Ok(Arc::new(engine))
}

fn fusion_engine(config: &StockPoolConfig) -> Result<SignalFusionEngine> {
    Ok(SignalFusionEngine::new(config.build_scorer()?)
        .with_timeout(config.scorer_timeout())
        .with_strategy_name(config.fusion.strategy_name.clone()))
}

fn run_seed(
    config: &StockPoolConfig,
    mut codes: Vec<String>,
    from_file: Option<PathBuf>,
    date: Option<String>,
    cycle: Option<String>,
) -> Result<()> {
    if let Some(path) = from_file {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        codes.extend(
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(String::from),
        );
    }
    if codes.is_empty() {
        bail!("no entity codes given");
    }
    let mut seen = std::collections::HashSet::new();
    codes.retain(|c| seen.insert(c.clone()));

    let selection_date = date
        .as_deref()
        .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .transpose()?
        .unwrap_or_else(|| Utc::now().date_naive());
    let cycle = parse_cycle(cycle)?.unwrap_or_else(|| CycleKey::from_date(selection_date));

    let entities = codes.iter().map(|c| EntityRecord::new(EntityId::new(c.as_str()))).collect();
    let mut pool = PoolRecord::new(cycle.clone(), entities, Utc::now());
    pool.selection_date = Some(selection_date);

    open_store(config)?.create(pool)?;
    println!("Seeded pool {cycle} with {} entities", codes.len());
    Ok(())
}

fn run_phase(config: &StockPoolConfig, agent_name: &str, cycle: Option<String>) -> Result<()> {
    let Some(agent) = config.agent(agent_name) else {
        bail!("no agent named '{agent_name}' in config");
    };
    let cycle = parse_cycle(cycle)?;

    let provider = CsvDataProvider::new(
        &config.data.csv_dir,
        RateLimiter::new(Duration::from_millis(config.data.min_request_interval_ms)),
    );
    let runner = PhaseRunner::new(
        Arc::new(StrategyRegistry::with_builtin().with_instance_cache()),
        Arc::new(provider),
        merge_engine(config)?,
    )
    .with_fusion(Arc::new(fusion_engine(config)?))
    .with_descriptors(config.descriptors_for(agent))
    .with_window_days(config.data.window_days);

    let outcome = runner.run(agent, cycle.as_ref())?;

    println!("Agent {} ({}) on cycle {}", outcome.agent, outcome.phase, outcome.cycle);
    for report in &outcome.strategies {
        println!(
            "  {:<24} attempted {:>4}  skipped {:>4}  scored {:>4}  failed {:>4}",
            report.name,
            report.attempted,
            report.skipped,
            report.scored,
            report.failures.len()
        );
    }
    for err in &outcome.resolution_errors {
        println!("  unresolved: {err}");
    }
    if !outcome.data_failures.is_empty() {
        println!("  data failures: {}", outcome.data_failures.len());
    }
    if let Some(fusion) = &outcome.fusion {
        println!(
            "  fused {} entities, {} actionable, {} scorer fallbacks",
            fusion.fused, fusion.actionable(), fusion.ai_fallbacks
        );
    }
    if !outcome.is_success() {
        bail!("agent '{}' stored no results", outcome.agent);
    }
    Ok(())
}

fn run_fuse(config: &StockPoolConfig, cycle: Option<String>) -> Result<()> {
    let cycle = parse_cycle(cycle)?;
    let merge = merge_engine(config)?;
    let outcome = fusion_engine(config)?.fuse_cycle(&merge, cycle.as_ref(), &CancelToken::new())?;
    info!(cycle = %outcome.cycle, fused = outcome.fused, "fusion complete");

    let pool = merge.store().load(&outcome.cycle)?;
    println!(
        "Cycle {}: {} strategies in play, {} entities fused, {} scorer fallbacks",
        outcome.cycle, outcome.global_strategy_count, outcome.fused, outcome.ai_fallbacks
    );
    for id in &outcome.merge.updated {
        let Some(result) = pool
            .entity(id)
            .and_then(|e| e.signals.get(&config.fusion.strategy_name))
            .and_then(|r| r.value.as_fusion())
        else {
            continue;
        };
        if result.action.is_actionable() {
            println!(
                "  {:<8} {:<4} calc {:.2} ({})  ai {:.2} ({})",
                id,
                result.action,
                result.score_calc,
                result.signal_calc,
                result.score_ai,
                result.signal_ai
            );
        }
    }
    println!("  {} BUY, {} SELL", outcome.buys, outcome.sells);
    Ok(())
}

fn run_show(config: &StockPoolConfig, cycle: Option<String>, entity: Option<String>) -> Result<()> {
    let store = open_store(config)?;
    let pool = match parse_cycle(cycle)? {
        Some(cycle) => store.load(&cycle)?,
        None => store.latest()?,
    };
    let json = match entity {
        Some(code) => {
            let id = EntityId::new(code);
            let record = pool
                .entity(&id)
                .with_context(|| format!("entity {id} not in pool {}", pool.cycle_key))?;
            serde_json::to_string_pretty(record)?
        }
        None => serde_json::to_string_pretty(&pool)?,
    };
    println!("{json}");
    Ok(())
}

fn run_list(config: &StockPoolConfig) -> Result<()> {
    let store = open_store(config)?;
    for cycle in store.list()? {
        let pool = store.load(&cycle)?;
        let phases: Vec<&str> = pool
            .phase_timestamps()
            .into_iter()
            .map(|(ns, _)| ns.as_str())
            .collect();
        println!(
            "{cycle}  {:>4} entities  rev {:>3}  [{}]",
            pool.entities.len(),
            pool.revision,
            phases.join(", ")
        );
    }
    Ok(())
}
