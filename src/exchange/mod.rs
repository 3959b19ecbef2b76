pub mod historical;
pub mod paper;

pub use historical::HistoricalExchange;
pub use paper::PaperBroker;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::models::{AccountSnapshot, BrokerPosition, Candle, CandleSeries, OrderRequest, Timeframe};

/// Source of price bars.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Up to `count` bars, oldest first. Never returns malformed rows; an
    /// empty or unreachable feed is an error.
    async fn get_bars(&mut self, symbol: &str, tf: Timeframe, count: usize) -> Result<CandleSeries>;

    /// Clock the engine should treat as "now".
    async fn server_time(&mut self) -> Result<DateTime<Utc>> {
        Ok(Utc::now())
    }

    /// Move a replaying feed forward by one bar. Live feeds ignore this.
    fn advance(&mut self) {}

    /// True once a replaying feed has no more bars to show.
    fn finished(&self) -> bool {
        false
    }
}

/// Broker side: account, orders and open positions.
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    async fn account(&mut self) -> Result<AccountSnapshot>;
    async fn place(&mut self, order: &OrderRequest) -> Result<u64>;
    async fn modify(&mut self, ticket: u64, stop_loss: f64, take_profit: f64) -> Result<()>;
    async fn close(&mut self, ticket: u64) -> Result<()>;
    async fn list_open_positions(&mut self) -> Result<Vec<BrokerPosition>>;
}

/// Latest bar per symbol, shared between a replay feed and the paper broker
/// so fills happen at the prices the engine just saw.
#[derive(Clone, Default)]
pub struct PriceBoard {
    latest: Arc<RwLock<HashMap<String, Candle>>>,
}

impl PriceBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, symbol: &str, candle: &Candle) {
        if let Ok(mut latest) = self.latest.write() {
            latest.insert(symbol.to_string(), candle.clone());
        }
    }

    pub fn latest(&self, symbol: &str) -> Option<Candle> {
        self.latest.read().ok()?.get(symbol).cloned()
    }
}
