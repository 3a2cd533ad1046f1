//! Orderflow Trader - Main Entry Point
//!
//! Runs the live trading engine against configured venues, or a paper
//! trading session against mock venues when no live flag is set.

use anyhow::Result;
use clap::{Parser, Subcommand};
use orderflow_trader::config::Config;
use orderflow_trader::engine::TradingEngine;
use orderflow_trader::persistence::TradeStore;
use orderflow_trader::portfolio::PortfolioMonitor;
use orderflow_trader::venue::{
    BookLevel, BookLevels, KucoinAdapter, MockVenueAdapter, VenueAdapter,
};
use rand::Rng;
use rust_decimal::Decimal;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Orderflow Trader CLI
#[derive(Parser)]
#[command(name = "orderflow-trader")]
#[command(version, about = "Cross-venue order-flow momentum trading engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a performance report from the persisted trade log
    Report {
        /// Path to the SQLite trade log
        #[arg(short, long, default_value = "data/trades.db")]
        db: String,
    },
}

/// Trading mode: Live (real venues) or Paper (mock venues).
#[derive(Debug, Clone, Copy, PartialEq)]
enum TradingMode {
    Live,
    Paper,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    if let Some(Commands::Report { db }) = cli.command {
        return run_report(&db).await;
    }

    info!("╔══════════════════════════════════════════════╗");
    info!(
        "║         Orderflow Trader v{}              ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚══════════════════════════════════════════════╝");

    let trading_mode = if std::env::var("LIVE_TRADING").unwrap_or_default() == "true" {
        warn!("LIVE TRADING MODE - real money at risk");
        TradingMode::Live
    } else {
        info!("PAPER TRADING MODE - mock venues");
        TradingMode::Paper
    };

    // Configuration failures are fatal; the engine must not start half-set-up
    let config = Config::load()?;
    config.validate()?;

    let (adapters, mocks) = build_adapters(&config, trading_mode)?;
    anyhow::ensure!(!adapters.is_empty(), "No usable venue adapters configured");

    let store = Arc::new(TradeStore::open("data/trades.db")?);
    let engine = TradingEngine::new(config.clone(), adapters, Some(store)).await?;

    // Paper mode needs a price process to trade against
    spawn_paper_feeders(&config, &mocks);

    let shutdown = engine.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
        shutdown.store(true, Ordering::SeqCst);
    });

    engine.run().await
}

/// Build one adapter per configured venue name. In paper mode the mock
/// handles are returned alongside so the price feeders can drive them.
fn build_adapters(
    config: &Config,
    mode: TradingMode,
) -> Result<(Vec<Arc<dyn VenueAdapter>>, Vec<Arc<MockVenueAdapter>>)> {
    let venue_names: Vec<&String> = config
        .market_data
        .primary_venues
        .iter()
        .chain(config.market_data.secondary_venues.iter())
        .collect();

    let mut adapters: Vec<Arc<dyn VenueAdapter>> = Vec::new();
    let mut mocks: Vec<Arc<MockVenueAdapter>> = Vec::new();
    for name in venue_names {
        match mode {
            TradingMode::Paper => {
                let mock = Arc::new(MockVenueAdapter::new(name.clone()));
                mocks.push(mock.clone());
                adapters.push(mock);
            }
            TradingMode::Live => {
                if name == "kucoin" {
                    adapters.push(Arc::new(KucoinAdapter::new(name.clone(), &config.kucoin)?));
                } else {
                    warn!(venue = %name, "Unsupported venue, skipping");
                }
            }
        }
    }
    Ok((adapters, mocks))
}

/// Drive each mock venue with a slow random walk so the paper engine has
/// books to aggregate and quotes to fill against.
fn spawn_paper_feeders(config: &Config, mocks: &[Arc<MockVenueAdapter>]) {
    for mock in mocks {
        for symbol in &config.engine.symbols {
            let mock = mock.clone();
            let symbol = symbol.clone();
            let interval = Duration::from_millis(config.market_data.update_frequency_ms.max(100));
            tokio::spawn(async move {
                let mut mid: f64 = 100.0;
                loop {
                    let (book, step) = {
                        let mut rng = rand::thread_rng();
                        let step = rng.gen_range(-0.0005..0.0005);
                        (synthetic_book(mid, &mut rng), step)
                    };
                    mock.set_book(&symbol, book).await;
                    mid *= 1.0 + step;
                    tokio::time::sleep(interval).await;
                }
            });
        }
    }
}

fn synthetic_book(mid: f64, rng: &mut impl Rng) -> BookLevels {
    let spread = mid * 0.0005;
    let level = |price: f64, volume: f64| {
        BookLevel::new(
            Decimal::from_f64_retain(price).unwrap_or_default(),
            Decimal::from_f64_retain(volume).unwrap_or_default(),
        )
    };

    let mut bids = Vec::new();
    let mut asks = Vec::new();
    for i in 0..5 {
        let offset = spread * (1.0 + i as f64);
        bids.push(level(mid - offset, rng.gen_range(0.5..8.0)));
        asks.push(level(mid + offset, rng.gen_range(0.5..8.0)));
    }
    BookLevels { bids, asks }
}

async fn run_report(db: &str) -> Result<()> {
    let store = TradeStore::open(db)?;
    let trades = store.load_trades()?;
    if trades.is_empty() {
        println!("No trades recorded yet.");
        return Ok(());
    }

    let config = Config::load().unwrap_or_default();
    let monitor = PortfolioMonitor::new(config.engine.initial_capital);
    monitor.restore(trades).await;
    println!("{}", monitor.report().await);
    Ok(())
}

fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "orderflow-trader.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer guard alive for the program's lifetime
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("orderflow_trader=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .init();

    Ok(())
}
