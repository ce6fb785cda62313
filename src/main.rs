// =============================================================================
// Ensemble Trading Engine — Main Entry Point
// =============================================================================

mod allocator;
mod api;
mod clock;
mod config;
mod correlation;
mod ensemble;
mod error;
mod execution;
mod liquidation;
mod market_data;
mod normalizer;
mod orchestrator;
mod risk;
mod state_store;
mod strategy;
mod types;
mod validator;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::clock::SystemClock;
use crate::config::{EngineConfig, StateStoreBackend};
use crate::execution::optimizer::OptimizationStrategy;
use crate::execution::{ExecutionEngine, OrderOptimizer, SimulatedOrderVenue};
use crate::market_data::{MarketFeed, SimulatedMarketDataSource};
use crate::orchestrator::PipelineRunner;
use crate::state_store::{KvStateStore, SqlStateStore, StateStore};
use crate::strategy::momentum::MomentumStrategy;
use crate::strategy::StrategyRegistry;

#[derive(Parser)]
#[command(name = "ensemble-engine", about = "Ensemble strategy trading engine")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Start the pipeline and its status/command HTTP surface.
    Run {
        #[arg(long, default_value = "engine_config.json")]
        config: String,
    },
    /// Replay the state store's checkpoint + trade log without trading.
    Recover {
        #[arg(long, default_value = "engine_config.json")]
        config: String,
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        CliCommand::Run { config } => run(config).await,
        CliCommand::Recover { config, dry_run } => recover_only(config, dry_run).await,
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            error!(error = %e, "engine exited with a fatal error");
            std::process::exit(e.exit_code());
        }
    }
}

async fn build_state_store(config: &EngineConfig) -> anyhow::Result<Arc<dyn StateStore>> {
    Ok(match config.state_store.backend {
        StateStoreBackend::EmbeddedKv => Arc::new(KvStateStore::new(&config.state_store.path)?),
        StateStoreBackend::Sql => Arc::new(SqlStateStore::connect(&config.state_store.path).await?),
    })
}

async fn run(config_path: String) -> Result<(), crate::error::EngineError> {
    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Ensemble Trading Engine — Starting Up             ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config = EngineConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        EngineConfig::default()
    });

    let symbols = std::env::var("SYMBOLS")
        .ok()
        .map(|s| s.split(',').map(|sym| sym.trim().to_uppercase()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_else(|| vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]);

    let trading_mode = std::env::var("TRADING_MODE").unwrap_or_else(|_| "paper".to_string());
    let environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
    info!(%trading_mode, %environment, symbols = ?symbols, "engine configuration resolved");

    let clock = Arc::new(SystemClock);
    let source = SimulatedMarketDataSource::new(clock.clone(), symbols.clone(), 100.0);
    let market_feed = MarketFeed::new(vec![Box::new(source)], config.market_feed.clone());

    let mut strategies = StrategyRegistry::new(config.strategy_registry.clone());
    strategies.register(Arc::new(MomentumStrategy::new("momentum", 1.0)));

    let order_optimizer = OrderOptimizer::new(config.order_optimizer.clone(), OptimizationStrategy::SizeAware, 1.0);

    let venue = Arc::new(SimulatedOrderVenue::new(clock.clone(), 5.0, config.order_optimizer.market_impact_bps));
    let execution = ExecutionEngine::new(venue, config.orchestrator.starting_cash);

    let state_store = build_state_store(&config)
        .await
        .map_err(|e| crate::error::EngineError::fatal_init(e.to_string()))?;

    let runner = Arc::new(PipelineRunner::new(
        config.clone(),
        clock,
        market_feed,
        strategies,
        order_optimizer,
        execution,
        state_store,
        symbols,
    ));

    if let Err(e) = runner.recover().await {
        warn!(error = %e, "starting in degraded mode after failed recovery");
    }

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".to_string());
    let api_runner = runner.clone();
    tokio::spawn(async move {
        let app = api::router(api_runner);
        match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(listener) => {
                info!(%bind_addr, "status/command API listening");
                if let Err(e) = axum::serve(listener, app).await {
                    error!(error = %e, "API server error");
                }
            }
            Err(e) => error!(error = %e, %bind_addr, "failed to bind API server"),
        }
    });

    let (_shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::select! {
        result = runner.run(shutdown_rx) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, shutting down");
            Ok(())
        }
    }
}

async fn recover_only(config_path: String, dry_run: bool) -> Result<(), crate::error::EngineError> {
    let config = EngineConfig::load(&config_path).unwrap_or_else(|_| EngineConfig::default());
    let state_store = build_state_store(&config)
        .await
        .map_err(|e| crate::error::EngineError::fatal_init(e.to_string()))?;

    let recovered = state_store::recover(state_store.as_ref()).await?;
    info!(
        had_checkpoint = recovered.checkpoint.is_some(),
        replayed_trades = recovered.replay_trades.len(),
        dry_run,
        "recovery summary"
    );
    Ok(())
}
