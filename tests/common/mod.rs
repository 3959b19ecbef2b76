#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use adaptive_split_trader::config::{Config, IndicatorConfig, SymbolConfig};
use adaptive_split_trader::core::snapshot::{Crossover, IndicatorEngine};
use adaptive_split_trader::exchange::{ExecutionGateway, MarketData};
use adaptive_split_trader::models::{
    AccountSnapshot, BrokerPosition, Candle, CandleSeries, OrderRequest, Timeframe,
};

pub fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-15T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// `decline` bars falling 1.0 per bar from 200, then `rally` bars rising 3.0
/// per bar. 15-minute spacing.
pub fn cross_up_candles(decline: usize, rally: usize) -> Vec<Candle> {
    let close_at = |i: usize| {
        if i < decline {
            200.0 - i as f64
        } else {
            200.0 - decline as f64 + 3.0 * (i + 1 - decline) as f64
        }
    };
    (0..decline + rally)
        .map(|i| {
            let close = close_at(i);
            let open = if i == 0 { close + 1.0 } else { close_at(i - 1) };
            Candle {
                timestamp: t0() + Duration::minutes(15 * i as i64),
                open,
                high: open.max(close) + 0.5,
                low: open.min(close) - 0.5,
                close,
                volume: 100.0,
            }
        })
        .collect()
}

/// The decline-then-rally series cut off at the bar where the fast MA first
/// crosses above the slow MA.
pub fn cross_up_bars(indicators: &IndicatorConfig) -> CandleSeries {
    let all = CandleSeries::new(cross_up_candles(60, 30));
    let engine = IndicatorEngine::new(indicators);
    for end in engine.required_bars()..=all.len() {
        let head = all.head(end);
        if let Ok(pair) = engine.compute_pair(&head) {
            if pair.ma_crossover() == Some(Crossover::Bullish) {
                return head;
            }
        }
    }
    panic!("series never crosses up");
}

/// Same bars with the last close moved to `close`.
pub fn with_last_close(bars: &CandleSeries, close: f64) -> CandleSeries {
    let mut raw: Vec<Candle> = bars.iter().cloned().collect();
    if let Some(last) = raw.last_mut() {
        last.close = close;
        last.high = last.high.max(close);
        last.low = last.low.min(close);
    }
    CandleSeries::new(raw)
}

/// Rising bars with no crossover on the last bar.
pub fn steady_bars(n: usize) -> CandleSeries {
    let candles = (0..n)
        .map(|i| {
            let open = 100.0 + i as f64;
            Candle {
                timestamp: t0() + Duration::minutes(15 * i as i64),
                open,
                high: open + 1.5,
                low: open - 0.5,
                close: open + 1.0,
                volume: 100.0,
            }
        })
        .collect();
    CandleSeries::new(candles)
}

/// One-unit contracts and only the trend stage switched on, so a crossover
/// alone produces a full-confidence signal.
pub fn test_symbol(name: &str) -> SymbolConfig {
    let mut s = SymbolConfig::new(name);
    s.timeframe = Timeframe::M15;
    s.pip_size = 0.01;
    s.price_digits = 2;
    s.contract_size = 1.0;
    s.volume_step = 0.01;
    s.min_volume = 0.01;
    s.max_volume = 1000.0;
    s.filters.rsi_enabled = false;
    s.filters.macd_enabled = false;
    s.filters.adx_filter_enabled = false;
    s.filters.volume_enabled = false;
    s.filters.hour_filter_enabled = false;
    s
}

pub fn test_config(symbols: &[&str]) -> Config {
    Config {
        symbols: symbols.iter().map(|s| test_symbol(s)).collect(),
        bar_count: 200,
        poll_interval_secs: 1,
        call_timeout_ms: 200,
        ..Config::default()
    }
}

#[derive(Default)]
struct MarketState {
    bars: HashMap<String, CandleSeries>,
    failing: HashSet<String>,
    delays: HashMap<String, u64>,
    stop_after: Option<(String, Arc<AtomicBool>)>,
    requests: Vec<String>,
}

/// Scripted market data. Clones share state so a test can keep a handle
/// after boxing one into the bot.
#[derive(Clone, Default)]
pub struct MockMarket {
    state: Arc<Mutex<MarketState>>,
}

impl MockMarket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_bars(&self, symbol: &str, bars: CandleSeries) {
        self.state.lock().unwrap().bars.insert(symbol.to_string(), bars);
    }

    pub fn fail(&self, symbol: &str) {
        self.state.lock().unwrap().failing.insert(symbol.to_string());
    }

    pub fn delay(&self, symbol: &str, millis: u64) {
        self.state.lock().unwrap().delays.insert(symbol.to_string(), millis);
    }

    /// Raise `flag` once bars for `symbol` have been served.
    pub fn stop_after(&self, symbol: &str, flag: Arc<AtomicBool>) {
        self.state.lock().unwrap().stop_after = Some((symbol.to_string(), flag));
    }

    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }
}

#[async_trait]
impl MarketData for MockMarket {
    async fn get_bars(&mut self, symbol: &str, _tf: Timeframe, count: usize) -> Result<CandleSeries> {
        let delay = {
            let mut s = self.state.lock().unwrap();
            s.requests.push(symbol.to_string());
            s.delays.get(symbol).copied()
        };
        if let Some(ms) = delay {
            tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
        }

        let s = self.state.lock().unwrap();
        if let Some((sym, flag)) = &s.stop_after {
            if sym == symbol {
                flag.store(true, Ordering::SeqCst);
            }
        }
        if s.failing.contains(symbol) {
            bail!("feed down for {}", symbol);
        }
        match s.bars.get(symbol) {
            Some(bars) => Ok(bars.tail(count)),
            None => bail!("no bars for {}", symbol),
        }
    }

    async fn server_time(&mut self) -> Result<DateTime<Utc>> {
        let s = self.state.lock().unwrap();
        Ok(s
            .bars
            .values()
            .filter_map(|b| b.last().map(|c| c.timestamp))
            .max()
            .unwrap_or_else(t0))
    }
}

struct GatewayState {
    account: AccountSnapshot,
    fill_price: f64,
    positions: Vec<BrokerPosition>,
    orders: Vec<OrderRequest>,
    place_attempts: usize,
    failing_attempts: HashSet<usize>,
    modifies: Vec<(u64, f64, f64)>,
    failing_modifies: u32,
    closes: Vec<u64>,
    next_ticket: u64,
}

/// In-memory broker with failure injection.
#[derive(Clone)]
pub struct MockGateway {
    state: Arc<Mutex<GatewayState>>,
}

impl MockGateway {
    pub fn new(balance: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(GatewayState {
                account: AccountSnapshot {
                    balance,
                    equity: balance,
                },
                fill_price: 0.0,
                positions: Vec::new(),
                orders: Vec::new(),
                place_attempts: 0,
                failing_attempts: HashSet::new(),
                modifies: Vec::new(),
                failing_modifies: 0,
                closes: Vec::new(),
                next_ticket: 1001,
            })),
        }
    }

    pub fn set_balance(&self, balance: f64) {
        self.state.lock().unwrap().account = AccountSnapshot {
            balance,
            equity: balance,
        };
    }

    pub fn set_fill_price(&self, price: f64) {
        self.state.lock().unwrap().fill_price = price;
    }

    /// Zero-based placement attempts that should be refused.
    pub fn fail_placements(&self, attempts: &[usize]) {
        self.state.lock().unwrap().failing_attempts = attempts.iter().copied().collect();
    }

    pub fn fail_next_modifies(&self, n: u32) {
        self.state.lock().unwrap().failing_modifies = n;
    }

    pub fn add_position(&self, position: BrokerPosition) {
        self.state.lock().unwrap().positions.push(position);
    }

    /// Drop a position as if the broker had hit its stop or target.
    pub fn remove_position(&self, ticket: u64) {
        self.state.lock().unwrap().positions.retain(|p| p.ticket != ticket);
    }

    pub fn positions(&self) -> Vec<BrokerPosition> {
        self.state.lock().unwrap().positions.clone()
    }

    pub fn orders(&self) -> Vec<OrderRequest> {
        self.state.lock().unwrap().orders.clone()
    }

    pub fn modifies(&self) -> Vec<(u64, f64, f64)> {
        self.state.lock().unwrap().modifies.clone()
    }

    pub fn closes(&self) -> Vec<u64> {
        self.state.lock().unwrap().closes.clone()
    }
}

#[async_trait]
impl ExecutionGateway for MockGateway {
    async fn account(&mut self) -> Result<AccountSnapshot> {
        Ok(self.state.lock().unwrap().account)
    }

    async fn place(&mut self, order: &OrderRequest) -> Result<u64> {
        let mut s = self.state.lock().unwrap();
        let attempt = s.place_attempts;
        s.place_attempts += 1;
        if s.failing_attempts.contains(&attempt) {
            bail!("order rejected by broker");
        }
        let ticket = s.next_ticket;
        s.next_ticket += 1;
        let entry_price = s.fill_price;
        s.orders.push(order.clone());
        s.positions.push(BrokerPosition {
            ticket,
            symbol: order.symbol.clone(),
            direction: order.direction,
            volume: order.volume,
            entry_price,
            stop_loss: order.stop_loss,
            take_profit: order.take_profit,
            opened_at: t0(),
        });
        Ok(ticket)
    }

    async fn modify(&mut self, ticket: u64, stop_loss: f64, take_profit: f64) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        if s.failing_modifies > 0 {
            s.failing_modifies -= 1;
            bail!("modify rejected for #{}", ticket);
        }
        s.modifies.push((ticket, stop_loss, take_profit));
        match s.positions.iter_mut().find(|p| p.ticket == ticket) {
            Some(p) => {
                p.stop_loss = stop_loss;
                p.take_profit = take_profit;
                Ok(())
            }
            None => bail!("position #{} not found", ticket),
        }
    }

    async fn close(&mut self, ticket: u64) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        s.closes.push(ticket);
        s.positions.retain(|p| p.ticket != ticket);
        Ok(())
    }

    async fn list_open_positions(&mut self) -> Result<Vec<BrokerPosition>> {
        Ok(self.state.lock().unwrap().positions.clone())
    }
}
