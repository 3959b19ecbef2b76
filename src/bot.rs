use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{Config, ConfigHandle, ConfigStore, SymbolConfig};
use crate::core::lifecycle::{ManagedPosition, PositionLifecycleManager, StopInstruction};
use crate::core::risk::{AccountState, AdaptiveRiskManager};
use crate::core::sessions::TradingClock;
use crate::core::snapshot::IndicatorEngine;
use crate::error::EngineError;
use crate::exchange::{ExecutionGateway, MarketData};
use crate::models::{BrokerPosition, OrderRequest, PositionState};
use crate::strategies::evaluator::SignalEvaluator;
use crate::trading::events::{EngineEvent, EventSink};
use crate::trading::split_planner::{PlanRequest, SplitOrderPlanner};

/// What one pass over the symbol list did.
#[derive(Debug, Default, Clone)]
pub struct CycleReport {
    pub evaluated: Vec<String>,
    pub skipped: Vec<(String, &'static str)>,
    pub orders_placed: usize,
    pub stopped_early: bool,
    /// Set by [`TradingBot::step`] once a replaying feed has no bars left.
    pub feed_exhausted: bool,
}

/// Single-writer polling loop. Owns the risk manager and every managed
/// position; nothing else mutates them.
pub struct TradingBot {
    store: ConfigStore,
    config: Arc<Config>,
    clock: TradingClock,
    market: Box<dyn MarketData>,
    gateway: Box<dyn ExecutionGateway>,
    sink: Box<dyn EventSink>,
    risk: AdaptiveRiskManager,
    lifecycle: PositionLifecycleManager,
    stop: Arc<AtomicBool>,
}

/// Bound a collaborator call. The outer error is the timeout; the inner
/// result is the collaborator's own.
async fn bounded<T, F>(timeout_ms: u64, operation: &str, fut: F) -> Result<anyhow::Result<T>, EngineError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    tokio::time::timeout(Duration::from_millis(timeout_ms), fut)
        .await
        .map_err(|_| EngineError::Timeout {
            operation: operation.to_string(),
            timeout_ms,
        })
}

impl TradingBot {
    pub fn new(
        store: ConfigStore,
        market: Box<dyn MarketData>,
        gateway: Box<dyn ExecutionGateway>,
        sink: Box<dyn EventSink>,
    ) -> Self {
        let config = store.active();
        let clock = TradingClock::new(config.trading_timezone);

        info!("{}", "=".repeat(60));
        info!("Adaptive split trader starting up");
        info!(
            "Mode: {}",
            if config.paper_trade {
                "PAPER TRADING"
            } else {
                "LIVE TRADING"
            }
        );
        info!("Timezone: {} | poll every {}s", config.trading_timezone, config.poll_interval_secs);
        for s in config.enabled_symbols() {
            let f = &s.filters;
            info!(
                "  {} {}: rsi={} macd={} adx={} volume={} hours={} micro={} min_conf={:.2}",
                s.symbol,
                s.timeframe,
                f.rsi_enabled,
                f.macd_enabled,
                f.adx_filter_enabled && s.indicators.adx_enabled,
                f.volume_enabled,
                f.hour_filter_enabled,
                f.micro_cross_enabled,
                f.min_confidence
            );
        }
        info!(
            "Risk: base {:.2}% x [{:.2}, {:.2}] | max DD {:.1}% | TP/SL mode {}",
            config.risk.base_risk_percent,
            config.risk.min_risk_multiplier,
            config.risk.max_risk_multiplier,
            config.risk.max_drawdown_percent,
            config.split.mode.label()
        );
        info!("{}", "=".repeat(60));

        Self {
            risk: AdaptiveRiskManager::new(&config.risk, clock, config.initial_balance),
            lifecycle: PositionLifecycleManager::new(&config.lifecycle),
            store,
            config,
            clock,
            market,
            gateway,
            sink,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Setting this flag stops the loop at the next symbol boundary.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn config_handle(&self) -> ConfigHandle {
        self.store.handle()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn account_state(&self) -> &AccountState {
        self.risk.state()
    }

    pub fn risk_mut(&mut self) -> &mut AdaptiveRiskManager {
        &mut self.risk
    }

    pub fn lifecycle(&self) -> &PositionLifecycleManager {
        &self.lifecycle
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn emit(&self, at: DateTime<Utc>, event: EngineEvent) {
        self.sink.emit(at, &event);
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        info!("Bot is now running. Press Ctrl+C to stop.");
        let mut cycles: u64 = 0;
        while !self.stopping() {
            let report = self.step().await;
            cycles += 1;
            debug!(
                "Cycle {}: {} evaluated, {} skipped, {} orders",
                cycles,
                report.evaluated.len(),
                report.skipped.len(),
                report.orders_placed
            );
            if report.feed_exhausted {
                info!("Market data exhausted after {} cycles", cycles);
                break;
            }
            if self.stopping() {
                break;
            }
            tokio::time::sleep(Duration::from_secs(self.config.poll_interval_secs)).await;
        }
        self.shutdown();
        Ok(())
    }

    /// Run one cycle, then move a replaying feed forward by one bar.
    pub async fn step(&mut self) -> CycleReport {
        let mut report = self.run_cycle().await;
        if !report.stopped_early && !self.market.finished() {
            self.market.advance();
        }
        report.feed_exhausted = self.market.finished();
        report
    }

    fn shutdown(&self) {
        let s = self.risk.state();
        info!("{}", "=".repeat(60));
        info!("Shutting down");
        info!(
            "Balance {:.2} | peak {:.2} | drawdown {:.2}% | trades today {}",
            s.balance,
            s.peak_balance,
            s.drawdown_percent(),
            s.daily_trade_count
        );
        info!("Managed positions left open: {}", self.lifecycle.len());
        info!("{}", "=".repeat(60));
    }

    /// One pass: config, account, positions, then every enabled symbol in
    /// order. Per-symbol failures are reported and never abort the pass.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        let timeout_ms = self.config.call_timeout_ms;

        let now = match bounded(timeout_ms, "server_time", self.market.server_time()).await {
            Ok(Ok(t)) => t,
            _ => Utc::now(),
        };

        let outcome = self.store.apply_pending().await;
        for e in outcome.rejected {
            self.emit(now, EngineEvent::ConfigRejected { reason: e.to_string() });
        }
        if outcome.applied {
            self.config = self.store.active();
            self.clock = TradingClock::new(self.config.trading_timezone);
            self.risk.set_config(&self.config.risk, self.clock);
            self.lifecycle.set_config(&self.config.lifecycle);
            self.emit(now, EngineEvent::ConfigApplied);
        }
        let cfg = self.config.clone();

        let account_ok = match bounded(timeout_ms, "account", self.gateway.account()).await {
            Ok(Ok(acct)) => {
                self.risk.on_account_update(acct.balance, acct.equity, now);
                true
            }
            Ok(Err(e)) => {
                warn!("Account read failed, no new entries this cycle: {:#}", e);
                false
            }
            Err(e) => {
                warn!("{}, no new entries this cycle", e);
                false
            }
        };

        let open = match bounded(timeout_ms, "list_open_positions", self.gateway.list_open_positions()).await {
            Ok(Ok(list)) => {
                let tickets: HashSet<u64> = list.iter().map(|p| p.ticket).collect();
                for t in self.lifecycle.reconcile(&tickets) {
                    self.emit(now, EngineEvent::PositionTransition(t));
                }
                Some(list)
            }
            Ok(Err(e)) => {
                warn!("Position list failed, skipping position management: {:#}", e);
                None
            }
            Err(e) => {
                warn!("{}, skipping position management", e);
                None
            }
        };

        for sym in cfg.enabled_symbols() {
            if self.stopping() {
                info!("Stop requested, leaving cycle before {}", sym.symbol);
                report.stopped_early = true;
                break;
            }
            match self.process_symbol(&cfg, sym, now, open.as_deref(), account_ok).await {
                Ok(placed) => {
                    report.orders_placed += placed;
                    report.evaluated.push(sym.symbol.clone());
                }
                Err(e) => {
                    self.emit(
                        now,
                        EngineEvent::SymbolSkipped {
                            symbol: sym.symbol.clone(),
                            kind: e.kind().to_string(),
                            reason: e.to_string(),
                        },
                    );
                    report.skipped.push((sym.symbol.clone(), e.kind()));
                }
            }
        }
        report
    }

    /// Returns the number of order legs placed.
    async fn process_symbol(
        &mut self,
        cfg: &Config,
        sym: &SymbolConfig,
        now: DateTime<Utc>,
        open: Option<&[BrokerPosition]>,
        account_ok: bool,
    ) -> Result<usize, EngineError> {
        let timeout_ms = cfg.call_timeout_ms;
        let symbol = sym.symbol.as_str();

        let bars = bounded(
            timeout_ms,
            "get_bars",
            self.market.get_bars(symbol, sym.timeframe, cfg.bar_count),
        )
        .await?
        .map_err(|e| EngineError::data_unavailable(symbol, format!("{:#}", e)))?;

        let pair = IndicatorEngine::new(&sym.indicators)
            .compute_pair(&bars)
            .map_err(|e| EngineError::data_unavailable(symbol, e))?;
        let price = pair.current.close;
        let atr = pair.current.atr;

        // Manage what is already open before looking for new entries.
        let open = match open {
            Some(open) => open,
            None => return Ok(0),
        };
        for pos in open.iter().filter(|p| p.symbol == symbol) {
            if !self.lifecycle.is_tracked(pos.ticket) {
                info!("Adopting untracked position #{} {}", pos.ticket, symbol);
                self.lifecycle
                    .track(ManagedPosition::from_broker(pos, atr, sym.price_digits));
            }
        }
        self.manage_positions(symbol, price, now, timeout_ms).await;

        if !account_ok {
            return Ok(0);
        }
        let held = self.lifecycle.entries_for(symbol);
        if held >= cfg.risk.max_positions_per_symbol {
            debug!("{} holds {} open entries, not evaluating", symbol, held);
            return Ok(0);
        }

        let hour = self.clock.local_hour(now);
        let signal = SignalEvaluator::evaluate(&pair.current, &pair.prior, sym, hour);
        let direction = match (signal.rejection, signal.direction.to_direction()) {
            (None, Some(d)) => d,
            (reason, _) => {
                if let Some(reason) = reason {
                    self.emit(
                        now,
                        EngineEvent::SignalRejected {
                            symbol: symbol.to_string(),
                            reason,
                            candidate: signal.candidate,
                            scores: signal.scores,
                        },
                    );
                }
                return Ok(0);
            }
        };
        self.emit(
            now,
            EngineEvent::SignalAccepted {
                symbol: symbol.to_string(),
                direction: signal.direction,
                confidence: signal.confidence,
                scores: signal.scores.clone(),
            },
        );

        let stop_distance = match SplitOrderPlanner::stop_distance(&cfg.split.mode, Some(atr), sym.pip_size) {
            Ok(d) => d,
            Err(e) => {
                self.emit(
                    now,
                    EngineEvent::PlanRejected {
                        symbol: symbol.to_string(),
                        reason: e.to_string(),
                    },
                );
                return Ok(0);
            }
        };

        let decision = self.risk.evaluate(&signal, sym, stop_distance);
        self.emit(
            now,
            EngineEvent::RiskDecided {
                symbol: symbol.to_string(),
                decision: decision.clone(),
            },
        );
        if !decision.approved {
            return Ok(0);
        }

        let request = PlanRequest {
            entry_price: price,
            direction,
            total_volume: decision.lot_size,
            atr: Some(atr),
        };
        let legs = match SplitOrderPlanner::plan(&request, &cfg.split, sym) {
            Ok(legs) => legs,
            Err(e) => {
                self.emit(
                    now,
                    EngineEvent::PlanRejected {
                        symbol: symbol.to_string(),
                        reason: e.to_string(),
                    },
                );
                return Ok(0);
            }
        };

        let mut placed = 0;
        let mut entry_id = None;
        for leg in &legs {
            let order = OrderRequest {
                symbol: symbol.to_string(),
                direction,
                volume: leg.volume,
                stop_loss: leg.stop_loss,
                take_profit: leg.take_profit,
                comment: format!("TP{}", leg.tp_level),
            };
            let result = match bounded(timeout_ms, "place", self.gateway.place(&order)).await {
                Ok(inner) => inner.map_err(|e| EngineError::execution("place", format!("{:#}", e))),
                Err(timeout) => Err(timeout),
            };
            match result {
                Ok(ticket) => {
                    self.emit(
                        now,
                        EngineEvent::OrderPlaced {
                            symbol: symbol.to_string(),
                            ticket,
                            tp_level: leg.tp_level,
                            volume: leg.volume,
                            stop_loss: leg.stop_loss,
                            take_profit: leg.take_profit,
                        },
                    );
                    self.lifecycle.track(ManagedPosition {
                        ticket,
                        entry_id: *entry_id.get_or_insert(ticket),
                        symbol: symbol.to_string(),
                        direction,
                        entry_price: price,
                        entry_atr: atr,
                        volume: leg.volume,
                        current_stop_loss: leg.stop_loss,
                        take_profit: leg.take_profit,
                        opened_at: now,
                        price_digits: sym.price_digits,
                        state: PositionState::Opened,
                    });
                    placed += 1;
                }
                Err(e) => self.emit(
                    now,
                    EngineEvent::OrderFailed {
                        symbol: symbol.to_string(),
                        tp_level: leg.tp_level,
                        reason: e.to_string(),
                    },
                ),
            }
        }
        if placed > 0 {
            self.risk.record_trade_opened(symbol);
        }
        Ok(placed)
    }

    /// Poll the lifecycle for `symbol` and carry out its instructions. A
    /// failed broker call leaves the position untouched so the next poll
    /// issues the same instruction again.
    async fn manage_positions(&mut self, symbol: &str, price: f64, now: DateTime<Utc>, timeout_ms: u64) {
        let result = self.lifecycle.poll(symbol, price, now);
        for t in result.transitions {
            self.emit(now, EngineEvent::PositionTransition(t));
        }

        for instruction in result.instructions {
            match instruction {
                StopInstruction::MoveStop {
                    ticket,
                    symbol,
                    new_stop,
                    take_profit,
                    target,
                } => {
                    let outcome = bounded(timeout_ms, "modify", self.gateway.modify(ticket, new_stop, take_profit)).await;
                    match outcome {
                        Ok(Ok(())) => {
                            if let Some(t) = self.lifecycle.confirm_stop(ticket, new_stop, target) {
                                self.emit(now, EngineEvent::PositionTransition(t));
                            }
                        }
                        Ok(Err(e)) => self.emit(
                            now,
                            EngineEvent::StopModifyFailed {
                                symbol,
                                ticket,
                                reason: format!("{:#}", e),
                            },
                        ),
                        Err(e) => self.emit(
                            now,
                            EngineEvent::StopModifyFailed {
                                symbol,
                                ticket,
                                reason: e.to_string(),
                            },
                        ),
                    }
                }
                StopInstruction::Close { ticket, symbol, reason } => {
                    self.emit(
                        now,
                        EngineEvent::CloseRequested {
                            symbol: symbol.clone(),
                            ticket,
                            reason,
                        },
                    );
                    let outcome = bounded(timeout_ms, "close", self.gateway.close(ticket)).await;
                    match outcome {
                        Ok(Ok(())) => {
                            if let Some(t) = self.lifecycle.mark_closed(ticket) {
                                self.emit(now, EngineEvent::PositionTransition(t));
                            }
                        }
                        Ok(Err(e)) => self.emit(
                            now,
                            EngineEvent::CloseFailed {
                                symbol,
                                ticket,
                                reason: format!("{:#}", e),
                            },
                        ),
                        Err(e) => self.emit(
                            now,
                            EngineEvent::CloseFailed {
                                symbol,
                                ticket,
                                reason: e.to_string(),
                            },
                        ),
                    }
                }
            }
        }
    }
}
