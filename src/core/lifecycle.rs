use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

use crate::config::LifecycleConfig;
use crate::core::risk::round_to;
use crate::models::{BrokerPosition, Direction, PositionState};

/// A broker-confirmed position under management.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedPosition {
    pub ticket: u64,
    /// Shared by every leg placed for one entry signal.
    #[serde(default)]
    pub entry_id: u64,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    /// ATR at entry. All breakeven and trailing distances are multiples of it.
    pub entry_atr: f64,
    pub volume: f64,
    pub current_stop_loss: f64,
    pub take_profit: f64,
    pub opened_at: DateTime<Utc>,
    pub price_digits: u32,
    pub state: PositionState,
}

impl ManagedPosition {
    pub fn from_broker(pos: &BrokerPosition, entry_atr: f64, price_digits: u32) -> Self {
        Self {
            ticket: pos.ticket,
            entry_id: pos.ticket,
            symbol: pos.symbol.clone(),
            direction: pos.direction,
            entry_price: pos.entry_price,
            entry_atr,
            volume: pos.volume,
            current_stop_loss: pos.stop_loss,
            take_profit: pos.take_profit,
            opened_at: pos.opened_at,
            price_digits,
            state: PositionState::Opened,
        }
    }

    /// Floating profit in entry-ATR multiples.
    pub fn profit_atr(&self, price: f64) -> f64 {
        if self.entry_atr > 0.0 {
            (price - self.entry_price) * self.direction.sign() / self.entry_atr
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    MaxHoldElapsed,
}

/// Work for the execution gateway. Nothing is committed to the managed
/// position until the gateway acknowledges it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopInstruction {
    MoveStop {
        ticket: u64,
        symbol: String,
        new_stop: f64,
        take_profit: f64,
        target: PositionState,
    },
    Close {
        ticket: u64,
        symbol: String,
        reason: CloseReason,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub ticket: u64,
    pub symbol: String,
    pub from: PositionState,
    pub to: PositionState,
    pub stop_loss: f64,
}

#[derive(Debug, Default)]
pub struct PollResult {
    pub instructions: Vec<StopInstruction>,
    /// Transitions that needed no broker call and are already applied.
    pub transitions: Vec<StateTransition>,
}

pub struct PositionLifecycleManager {
    config: LifecycleConfig,
    positions: BTreeMap<u64, ManagedPosition>,
}

impl PositionLifecycleManager {
    pub fn new(config: &LifecycleConfig) -> Self {
        Self {
            config: config.clone(),
            positions: BTreeMap::new(),
        }
    }

    pub fn set_config(&mut self, config: &LifecycleConfig) {
        self.config = config.clone();
    }

    pub fn track(&mut self, position: ManagedPosition) {
        info!(
            "Tracking #{} {} {} @ {} (atr {:.5}, sl {})",
            position.ticket,
            position.symbol,
            position.direction,
            position.entry_price,
            position.entry_atr,
            position.current_stop_loss
        );
        self.positions.insert(position.ticket, position);
    }

    pub fn is_tracked(&self, ticket: u64) -> bool {
        self.positions.contains_key(&ticket)
    }

    pub fn get(&self, ticket: u64) -> Option<&ManagedPosition> {
        self.positions.get(&ticket)
    }

    pub fn positions_for<'a>(&'a self, symbol: &'a str) -> impl Iterator<Item = &'a ManagedPosition> + 'a {
        self.positions.values().filter(move |p| p.symbol == symbol)
    }

    /// Distinct entries held for `symbol`; the legs of one split count once.
    pub fn entries_for(&self, symbol: &str) -> usize {
        self.positions_for(symbol)
            .map(|p| p.entry_id)
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Drop every tracked position the broker no longer reports as open.
    pub fn reconcile(&mut self, open_tickets: &HashSet<u64>) -> Vec<StateTransition> {
        let gone: Vec<u64> = self
            .positions
            .keys()
            .filter(|t| !open_tickets.contains(t))
            .copied()
            .collect();
        gone.into_iter()
            .filter_map(|ticket| self.mark_closed(ticket))
            .collect()
    }

    /// Decide what to do with `symbol`'s positions at `price`.
    pub fn poll(&mut self, symbol: &str, price: f64, now: DateTime<Utc>) -> PollResult {
        let mut result = PollResult::default();
        if !price.is_finite() {
            return result;
        }
        let cfg = &self.config;

        for pos in self.positions.values_mut().filter(|p| p.symbol == symbol) {
            if pos.state == PositionState::Closed {
                continue;
            }

            // A window too large to represent never elapses.
            let max_hold = cfg
                .max_hold_minutes
                .and_then(|m| i64::try_from(m).ok())
                .and_then(Duration::try_minutes);
            if let Some(window) = max_hold {
                if now - pos.opened_at >= window {
                    result.instructions.push(StopInstruction::Close {
                        ticket: pos.ticket,
                        symbol: pos.symbol.clone(),
                        reason: CloseReason::MaxHoldElapsed,
                    });
                    continue;
                }
            }

            if !(pos.entry_atr > 0.0) {
                continue;
            }
            let profit = pos.profit_atr(price);
            let atr = pos.entry_atr;
            let dir = pos.direction;
            let digits = pos.price_digits;
            let round = |p: f64| round_to(p, digits);

            let mut best: Option<(f64, PositionState)> = None;

            if cfg.breakeven_enabled && pos.state == PositionState::Opened && profit > cfg.breakeven_trigger_atr {
                let be = round(dir.offset_favorable(pos.entry_price, cfg.breakeven_buffer_atr * atr));
                if dir.stop_improves(pos.current_stop_loss, be) {
                    best = Some((be, PositionState::BreakevenArmed));
                } else {
                    // Stop already sits beyond breakeven; arming needs no broker call.
                    let from = pos.state;
                    pos.state = PositionState::BreakevenArmed;
                    result.transitions.push(StateTransition {
                        ticket: pos.ticket,
                        symbol: pos.symbol.clone(),
                        from,
                        to: pos.state,
                        stop_loss: pos.current_stop_loss,
                    });
                }
            }

            let trailing_live = pos.state == PositionState::Trailing || profit > cfg.trailing_activation_atr;
            if cfg.trailing_enabled && trailing_live {
                let candidate = round(dir.offset_adverse(price, cfg.trailing_distance_atr * atr));
                let gain = (candidate - pos.current_stop_loss) * dir.sign();
                let beats_best = best.map_or(true, |(b, _)| dir.stop_improves(b, candidate));
                if dir.stop_improves(pos.current_stop_loss, candidate)
                    && gain >= cfg.trailing_step_atr * atr
                    && beats_best
                {
                    best = Some((candidate, PositionState::Trailing));
                } else if gain > 0.0 {
                    debug!(
                        "#{} trail move {:.6} below step {:.6}",
                        pos.ticket,
                        gain,
                        cfg.trailing_step_atr * atr
                    );
                }
            }

            if let Some((new_stop, target)) = best {
                result.instructions.push(StopInstruction::MoveStop {
                    ticket: pos.ticket,
                    symbol: pos.symbol.clone(),
                    new_stop,
                    take_profit: pos.take_profit,
                    target,
                });
            }
        }
        result
    }

    /// Commit a stop move the gateway acknowledged. Moves that would loosen
    /// the stop are ignored.
    pub fn confirm_stop(&mut self, ticket: u64, new_stop: f64, target: PositionState) -> Option<StateTransition> {
        let pos = self.positions.get_mut(&ticket)?;
        if pos.state == PositionState::Closed || !pos.direction.stop_improves(pos.current_stop_loss, new_stop) {
            return None;
        }
        let from = pos.state;
        pos.current_stop_loss = new_stop;
        // Trailing never falls back to BreakevenArmed.
        if !(from == PositionState::Trailing && target == PositionState::BreakevenArmed) {
            pos.state = target;
        }
        Some(StateTransition {
            ticket,
            symbol: pos.symbol.clone(),
            from,
            to: pos.state,
            stop_loss: new_stop,
        })
    }

    pub fn mark_closed(&mut self, ticket: u64) -> Option<StateTransition> {
        let pos = self.positions.remove(&ticket)?;
        info!("#{} {} closed from {}", ticket, pos.symbol, pos.state);
        Some(StateTransition {
            ticket,
            symbol: pos.symbol,
            from: pos.state,
            to: PositionState::Closed,
            stop_loss: pos.current_stop_loss,
        })
    }
}
