use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::Config;
use crate::exchange::{ExecutionGateway, PriceBoard};
use crate::models::{AccountSnapshot, BrokerPosition, Direction, OrderRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitKind {
    StopLoss,
    TakeProfit,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub position: BrokerPosition,
    pub exit_price: f64,
    pub exit_time: DateTime<Utc>,
    pub exit: ExitKind,
    pub pnl: f64,
}

/// Simulated execution gateway. Fills at the latest bar close on the shared
/// price board and settles stop-loss / take-profit hits against each new
/// bar's range, stop first when both are touched.
pub struct PaperBroker {
    board: PriceBoard,
    balance: f64,
    contract_sizes: HashMap<String, f64>,
    positions: Vec<BrokerPosition>,
    history: Vec<ClosedTrade>,
    next_ticket: u64,
    settled_through: HashMap<String, DateTime<Utc>>,
    state_file: Option<PathBuf>,
}

impl PaperBroker {
    pub fn new(cfg: &Config, board: PriceBoard) -> Self {
        Self {
            board,
            balance: cfg.initial_balance,
            contract_sizes: cfg
                .symbols
                .iter()
                .map(|s| (s.symbol.clone(), s.contract_size))
                .collect(),
            positions: Vec::new(),
            history: Vec::new(),
            next_ticket: 1,
            settled_through: HashMap::new(),
            state_file: None,
        }
    }

    /// Persist balance and positions to `<dir>/paper_state.json` after every
    /// change, resuming from it if it already exists.
    pub fn with_state_dir(mut self, dir: impl AsRef<Path>) -> Self {
        let path = dir.as_ref().join("paper_state.json");
        self.state_file = Some(path);
        self.load_state();
        self
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn history(&self) -> &[ClosedTrade] {
        &self.history
    }

    fn contract_size(&self, symbol: &str) -> f64 {
        self.contract_sizes.get(symbol).copied().unwrap_or(1.0)
    }

    fn pnl(&self, pos: &BrokerPosition, exit_price: f64) -> f64 {
        (exit_price - pos.entry_price) * pos.direction.sign() * pos.volume * self.contract_size(&pos.symbol)
    }

    fn close_at(&mut self, index: usize, price: f64, at: DateTime<Utc>, exit: ExitKind) {
        let pos = self.positions.remove(index);
        let pnl = self.pnl(&pos, price);
        self.balance += pnl;
        info!(
            "[PAPER] #{} {} {} closed by {:?} @ {} | PnL {:.2} | balance {:.2}",
            pos.ticket, pos.symbol, pos.direction, exit, price, pnl, self.balance
        );
        self.history.push(ClosedTrade {
            position: pos,
            exit_price: price,
            exit_time: at,
            exit,
            pnl,
        });
    }

    /// Apply every bar published since the last settlement.
    fn settle(&mut self) {
        let mut changed = false;
        let mut i = 0;
        while i < self.positions.len() {
            let pos = &self.positions[i];
            let bar = match self.board.latest(&pos.symbol) {
                Some(bar) if bar.timestamp > pos.opened_at => bar,
                _ => {
                    i += 1;
                    continue;
                }
            };
            if self
                .settled_through
                .get(&pos.symbol)
                .map_or(false, |t| *t >= bar.timestamp)
            {
                i += 1;
                continue;
            }

            let (stop_hit, target_hit) = match pos.direction {
                Direction::Long => (bar.low <= pos.stop_loss, bar.high >= pos.take_profit),
                Direction::Short => (bar.high >= pos.stop_loss, bar.low <= pos.take_profit),
            };
            if stop_hit {
                let price = pos.stop_loss;
                self.close_at(i, price, bar.timestamp, ExitKind::StopLoss);
                changed = true;
            } else if target_hit {
                let price = pos.take_profit;
                self.close_at(i, price, bar.timestamp, ExitKind::TakeProfit);
                changed = true;
            } else {
                i += 1;
            }
        }
        let symbols: Vec<String> = self.contract_sizes.keys().cloned().collect();
        for symbol in symbols {
            if let Some(bar) = self.board.latest(&symbol) {
                self.settled_through.insert(symbol, bar.timestamp);
            }
        }
        if changed {
            self.save_state();
        }
    }

    fn save_state(&self) {
        let path = match &self.state_file {
            Some(p) => p,
            None => return,
        };
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let state = serde_json::json!({
            "balance": self.balance,
            "next_ticket": self.next_ticket,
            "positions": self.positions,
            "history": self.history,
        });
        match serde_json::to_string_pretty(&state) {
            Ok(json) => {
                if let Err(e) = fs::write(path, json) {
                    warn!("Failed to save paper state: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialise paper state: {}", e),
        }
    }

    fn load_state(&mut self) {
        let path = match &self.state_file {
            Some(p) => p.clone(),
            None => return,
        };
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => return,
        };
        let state: serde_json::Value = match serde_json::from_str(&content) {
            Ok(v) => v,
            Err(e) => {
                warn!("Ignoring unreadable paper state {}: {}", path.display(), e);
                return;
            }
        };
        self.balance = state["balance"].as_f64().unwrap_or(self.balance);
        self.next_ticket = state["next_ticket"].as_u64().unwrap_or(1);
        if let Ok(positions) = serde_json::from_value::<Vec<BrokerPosition>>(state["positions"].clone()) {
            self.positions = positions;
        }
        if let Ok(history) = serde_json::from_value::<Vec<ClosedTrade>>(state["history"].clone()) {
            self.history = history;
        }
        info!(
            "[PAPER] Resumed: balance {:.2}, {} open positions",
            self.balance,
            self.positions.len()
        );
    }
}

#[async_trait]
impl ExecutionGateway for PaperBroker {
    async fn account(&mut self) -> Result<AccountSnapshot> {
        self.settle();
        let unrealized: f64 = self
            .positions
            .iter()
            .filter_map(|p| self.board.latest(&p.symbol).map(|bar| self.pnl(p, bar.close)))
            .sum();
        Ok(AccountSnapshot {
            balance: self.balance,
            equity: self.balance + unrealized,
        })
    }

    async fn place(&mut self, order: &OrderRequest) -> Result<u64> {
        let bar = self
            .board
            .latest(&order.symbol)
            .ok_or_else(|| anyhow!("no price for {}", order.symbol))?;
        let price = bar.close;
        if !(order.volume > 0.0) {
            bail!("volume must be positive, got {}", order.volume);
        }
        let sane = match order.direction {
            Direction::Long => order.stop_loss < price && price < order.take_profit,
            Direction::Short => order.take_profit < price && price < order.stop_loss,
        };
        if !sane {
            bail!(
                "invalid stops for {} @ {}: SL {} TP {}",
                order.direction,
                price,
                order.stop_loss,
                order.take_profit
            );
        }

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.positions.push(BrokerPosition {
            ticket,
            symbol: order.symbol.clone(),
            direction: order.direction,
            volume: order.volume,
            entry_price: price,
            stop_loss: order.stop_loss,
            take_profit: order.take_profit,
            opened_at: bar.timestamp,
        });
        info!(
            "[PAPER] #{} {} {} {} @ {} | SL {} TP {} ({})",
            ticket, order.direction, order.volume, order.symbol, price, order.stop_loss, order.take_profit, order.comment
        );
        self.save_state();
        Ok(ticket)
    }

    async fn modify(&mut self, ticket: u64, stop_loss: f64, take_profit: f64) -> Result<()> {
        let pos = self
            .positions
            .iter_mut()
            .find(|p| p.ticket == ticket)
            .ok_or_else(|| anyhow!("position #{} not found", ticket))?;
        pos.stop_loss = stop_loss;
        pos.take_profit = take_profit;
        self.save_state();
        Ok(())
    }

    async fn close(&mut self, ticket: u64) -> Result<()> {
        let index = self
            .positions
            .iter()
            .position(|p| p.ticket == ticket)
            .ok_or_else(|| anyhow!("position #{} not found", ticket))?;
        let symbol = self.positions[index].symbol.clone();
        let bar = self
            .board
            .latest(&symbol)
            .ok_or_else(|| anyhow!("no price for {}", symbol))?;
        self.close_at(index, bar.close, bar.timestamp, ExitKind::Manual);
        self.save_state();
        Ok(())
    }

    async fn list_open_positions(&mut self) -> Result<Vec<BrokerPosition>> {
        self.settle();
        Ok(self.positions.clone())
    }
}
