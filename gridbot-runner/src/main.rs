//! Binary entrypoint (§6): parses `-config PATH`, loads and validates the
//! config, wires up the exchange client, store, breaker and alert queue,
//! then drives the supervisory loop until a clean stop or a fatal error.

mod config;
mod dedup;
mod reconcile;
mod runner;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use gridbot_core::alerts::{AlertQueue, LogNotifier, Notifier};
use gridbot_core::circuit_breaker::CircuitBreakers;
use gridbot_core::model::{GridState, RunMode};
use gridbot_core::store::{InstanceLock, LockOptions, Store};
use gridbot_exchange::BinanceSpotClient;
use gridbot_strategies::{GridStrategy, SpotDual};

use config::GridBotConfig;
use runner::Supervisor;

#[derive(Parser, Debug)]
#[command(name = "gridbot", about = "Single-instrument geometric grid trading bot")]
struct Cli {
    /// Path to the TOML config file driving this instance.
    #[arg(short = 'c', long = "config")]
    config: std::path::PathBuf,
}

fn mode_str(mode: RunMode) -> &'static str {
    match mode {
        RunMode::Backtest => "backtest",
        RunMode::Testnet => "testnet",
        RunMode::Live => "live",
    }
}

fn init_logging(cfg: &config::LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_new(&cfg.level).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if cfg.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match GridBotConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("config error: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.logging);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("gridbot exited with error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: GridBotConfig) -> anyhow::Result<()> {
    let mode = mode_str(config.mode);

    let lock_opts = LockOptions {
        takeover: config.state.lock_takeover,
        stale_after: std::time::Duration::from_secs(config.state.lock_stale_sec),
    };
    let instance_root = config.state.dir.join("state").join(mode).join(&config.symbol).join(&config.instance_id);
    let lock = InstanceLock::acquire(&instance_root, &lock_opts)?;

    let store = Arc::new(Store::open(mode, &config.symbol, &config.instance_id, &config.state.dir)?);

    let exchange: Arc<dyn gridbot_core::exchange::ExchangePort> = Arc::new(
        BinanceSpotClient::new(
            config.symbol.clone(),
            config.exchange.base_url.clone(),
            config.exchange.ws_url.clone(),
            config.exchange.api_key.clone(),
            config.exchange.api_secret.clone(),
            config.instance_id.clone(),
            std::time::Duration::from_secs(config.exchange.timeout_sec),
            std::time::Duration::from_secs(config.exchange.keepalive_sec),
        )
        .await?,
    );

    let breaker = Arc::new(CircuitBreakers::new(config.circuit_breaker.to_core_config()));

    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let alerts = Arc::new(AlertQueue::spawn_with_capacity(
        notifier,
        config.alerts.queue_capacity,
        std::time::Duration::from_secs(config.alerts.notify_timeout_sec),
        std::time::Duration::from_secs(config.alerts.drop_report_interval_sec),
    ));

    let rules = exchange.get_rules(&config.symbol).await?;

    let strategy: Box<dyn GridStrategy> = match store.read_grid_state()? {
        Some(state) => Box::new(restore_strategy(state, config.symbol.clone(), rules, exchange.clone(), store.clone(), breaker.clone())),
        None => {
            let price = exchange.ticker_price(&config.symbol).await?;
            let mut fresh = SpotDual::new(
                config.symbol.clone(),
                config.grid.to_strategy_config(),
                rules,
                exchange.clone(),
                store.clone(),
                breaker.clone(),
            );
            GridStrategy::init(&mut fresh, price).await?;
            Box::new(fresh)
        }
    };

    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
    ctrlc::set_handler(move || {
        let _ = cancel_tx.send(true);
    })?;

    let supervisor = Supervisor::new(config, exchange, store, breaker, alerts.clone(), cancel_rx);
    let result = supervisor.run(strategy).await;

    if let Ok(queue) = Arc::try_unwrap(alerts) {
        queue.close(std::time::Duration::from_secs(5)).await;
    }
    lock.release();

    match result {
        Ok(()) => Ok(()),
        Err(gridbot_core::error::RunnerError::Cancelled) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn restore_strategy(
    state: GridState,
    symbol: String,
    rules: gridbot_core::model::Rules,
    exchange: Arc<dyn gridbot_core::exchange::ExchangePort>,
    store: Arc<Store>,
    breaker: Arc<CircuitBreakers>,
) -> SpotDual {
    SpotDual::from_snapshot(symbol, state, rules, exchange, store, breaker)
}
