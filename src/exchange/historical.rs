use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::config::SymbolConfig;
use crate::exchange::{MarketData, PriceBoard};
use crate::models::{Candle, CandleSeries, Timeframe};

/// A market-data feed that replays pre-loaded bars.
/// A cursor (`now`) controls which bars are visible: only bars with
/// timestamp <= now are returned, simulating a forward walk.
pub struct HistoricalExchange {
    data: HashMap<(String, Timeframe), Vec<Candle>>,
    now: DateTime<Utc>,
    board: PriceBoard,
    exhausted: bool,
}

impl HistoricalExchange {
    pub fn new(board: PriceBoard) -> Self {
        Self {
            data: HashMap::new(),
            now: DateTime::<Utc>::MIN_UTC,
            board,
            exhausted: false,
        }
    }

    /// Bars must be sorted oldest-first.
    pub fn load(&mut self, symbol: &str, tf: Timeframe, candles: Vec<Candle>) {
        self.data.insert((symbol.to_string(), tf), candles);
    }

    /// Load `<dir>/<SYMBOL>_<tf>.json` for every enabled symbol. Each file is a
    /// JSON array of bars.
    pub fn load_dir(dir: impl AsRef<Path>, symbols: &[SymbolConfig], board: PriceBoard) -> Result<Self> {
        let mut exchange = Self::new(board);
        for s in symbols.iter().filter(|s| s.enabled) {
            let path = dir
                .as_ref()
                .join(format!("{}_{}.json", s.symbol, s.timeframe.as_str()));
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading bar file {}", path.display()))?;
            let mut candles: Vec<Candle> = serde_json::from_str(&raw)
                .with_context(|| format!("parsing bar file {}", path.display()))?;
            if let Some(i) = candles.iter().position(|c| !c.is_finite()) {
                bail!("{}: bar {} carries a non-finite value", path.display(), i);
            }
            candles.sort_by_key(|c| c.timestamp);
            info!("Loaded {} {} bars for {}", candles.len(), s.timeframe, s.symbol);
            exchange.load(&s.symbol, s.timeframe, candles);
        }
        Ok(exchange)
    }

    pub fn set_time(&mut self, t: DateTime<Utc>) {
        self.now = t;
        self.exhausted = false;
    }

    pub fn current_time(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn earliest_time(&self) -> Option<DateTime<Utc>> {
        self.data
            .values()
            .filter_map(|v| v.first().map(|c| c.timestamp))
            .min()
    }

    pub fn latest_time(&self) -> Option<DateTime<Utc>> {
        self.data
            .values()
            .filter_map(|v| v.last().map(|c| c.timestamp))
            .max()
    }

    /// Position the cursor so every loaded series shows at least `bars` bars
    /// (or all of them, if shorter).
    pub fn warm_start(&mut self, bars: usize) {
        let start = self
            .data
            .values()
            .filter_map(|v| {
                let idx = bars.min(v.len()).checked_sub(1)?;
                Some(v[idx].timestamp)
            })
            .max();
        if let Some(t) = start {
            self.set_time(t);
        }
    }

    fn visible_candles(&self, symbol: &str, tf: Timeframe, limit: usize) -> CandleSeries {
        let all = match self.data.get(&(symbol.to_string(), tf)) {
            Some(all) => all,
            None => return CandleSeries::default(),
        };

        // Binary search for the rightmost bar <= now
        let end = match all.partition_point(|c| c.timestamp <= self.now) {
            0 => return CandleSeries::default(),
            n => n,
        };

        let start = end.saturating_sub(limit);
        CandleSeries::new(all[start..end].to_vec())
    }

    fn next_time(&self) -> Option<DateTime<Utc>> {
        self.data
            .values()
            .filter_map(|v| {
                let i = v.partition_point(|c| c.timestamp <= self.now);
                v.get(i).map(|c| c.timestamp)
            })
            .min()
    }
}

#[async_trait]
impl MarketData for HistoricalExchange {
    async fn get_bars(&mut self, symbol: &str, tf: Timeframe, count: usize) -> Result<CandleSeries> {
        let series = self.visible_candles(symbol, tf, count);
        match series.last() {
            Some(last) => self.board.publish(symbol, last),
            None => bail!("no {} bars for {} at {}", tf, symbol, self.now),
        }
        Ok(series)
    }

    async fn server_time(&mut self) -> Result<DateTime<Utc>> {
        Ok(self.now)
    }

    /// Also publishes each series' newly visible bar so the paper broker can
    /// settle against it before the next round of bar requests.
    fn advance(&mut self) {
        let t = match self.next_time() {
            Some(t) => t,
            None => {
                self.exhausted = true;
                return;
            }
        };
        self.now = t;
        for ((symbol, _), candles) in &self.data {
            let end = candles.partition_point(|c| c.timestamp <= t);
            if let Some(bar) = end.checked_sub(1).and_then(|i| candles.get(i)) {
                self.board.publish(symbol, bar);
            }
        }
    }

    fn finished(&self) -> bool {
        self.exhausted
    }
}
