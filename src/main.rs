use anyhow::{bail, Result};
use std::sync::atomic::Ordering;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use adaptive_split_trader::bot::TradingBot;
use adaptive_split_trader::config::{Config, ConfigStore};
use adaptive_split_trader::exchange::{HistoricalExchange, PaperBroker, PriceBoard};
use adaptive_split_trader::trading::events::{EventSink, FanoutSink, JsonlSink, TracingSink};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    if !cfg.paper_trade {
        bail!("no live execution gateway is configured; run with PAPER_TRADE=true");
    }

    let board = PriceBoard::new();
    let mut market = HistoricalExchange::load_dir(&cfg.data_dir, &cfg.symbols, board.clone())?;
    market.warm_start(cfg.bar_count);
    let gateway = PaperBroker::new(&cfg, board).with_state_dir(&cfg.log_dir);

    let mut sinks: Vec<Box<dyn EventSink>> = vec![Box::new(TracingSink)];
    match JsonlSink::open(&cfg.log_dir) {
        Ok(sink) => {
            info!("Event log: {}", sink.path().display());
            sinks.push(Box::new(sink));
        }
        Err(e) => warn!("Event log disabled: {}", e),
    }

    let store = ConfigStore::new(cfg)?;
    let mut bot = TradingBot::new(
        store,
        Box::new(market),
        Box::new(gateway),
        Box::new(FanoutSink::new(sinks)),
    );

    let stop = bot.stop_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, finishing the current symbol");
            stop.store(true, Ordering::SeqCst);
        }
    });

    bot.run().await
}
