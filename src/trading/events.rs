use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::core::lifecycle::{CloseReason, StateTransition};
use crate::core::risk::RiskDecision;
use crate::models::{Direction, SignalDirection};
use crate::strategies::signals::{FilterRejection, ScoreBreakdown};

/// Structured record of everything the engine decides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    ConfigApplied,
    ConfigRejected {
        reason: String,
    },
    SymbolSkipped {
        symbol: String,
        kind: String,
        reason: String,
    },
    SignalRejected {
        symbol: String,
        reason: FilterRejection,
        candidate: Option<Direction>,
        scores: ScoreBreakdown,
    },
    SignalAccepted {
        symbol: String,
        direction: SignalDirection,
        confidence: f64,
        scores: ScoreBreakdown,
    },
    RiskDecided {
        symbol: String,
        decision: RiskDecision,
    },
    PlanRejected {
        symbol: String,
        reason: String,
    },
    OrderPlaced {
        symbol: String,
        ticket: u64,
        tp_level: usize,
        volume: f64,
        stop_loss: f64,
        take_profit: f64,
    },
    OrderFailed {
        symbol: String,
        tp_level: usize,
        reason: String,
    },
    PositionTransition(StateTransition),
    StopModifyFailed {
        symbol: String,
        ticket: u64,
        reason: String,
    },
    CloseRequested {
        symbol: String,
        ticket: u64,
        reason: CloseReason,
    },
    CloseFailed {
        symbol: String,
        ticket: u64,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: EngineEvent,
}

/// Consumer of engine events. Implementations must not fail the caller;
/// delivery problems are logged and dropped.
pub trait EventSink: Send + Sync {
    fn emit(&self, at: DateTime<Utc>, event: &EngineEvent);
}

/// Mirrors events into the tracing log.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, _at: DateTime<Utc>, event: &EngineEvent) {
        match event {
            EngineEvent::ConfigApplied => info!("Config update applied"),
            EngineEvent::ConfigRejected { reason } => warn!("Config update rejected: {}", reason),
            EngineEvent::SymbolSkipped { symbol, kind, reason } => {
                warn!("{} skipped this cycle ({}): {}", symbol, kind, reason)
            }
            EngineEvent::SignalRejected {
                symbol,
                reason,
                candidate,
                ..
            } => match candidate {
                Some(dir) => info!("{} {} signal rejected: {}", symbol, dir, reason),
                None => tracing::debug!("{} no signal: {}", symbol, reason),
            },
            EngineEvent::SignalAccepted {
                symbol,
                direction,
                confidence,
                ..
            } => info!("{} {} signal, confidence {:.3}", symbol, direction, confidence),
            EngineEvent::RiskDecided { symbol, decision } => match decision.rejection {
                Some(reason) => info!(
                    "{} risk rejected: {} (drawdown {:.2}%)",
                    symbol, reason, decision.drawdown_percent
                ),
                None => info!(
                    "{} risk approved: {:.2} lots, multiplier {:.3}",
                    symbol, decision.lot_size, decision.risk_multiplier
                ),
            },
            EngineEvent::PlanRejected { symbol, reason } => warn!("{} plan rejected: {}", symbol, reason),
            EngineEvent::OrderPlaced {
                symbol,
                ticket,
                tp_level,
                volume,
                stop_loss,
                take_profit,
            } => info!(
                "{} TP{} placed #{}: {} lots, SL {} TP {}",
                symbol, tp_level, ticket, volume, stop_loss, take_profit
            ),
            EngineEvent::OrderFailed {
                symbol,
                tp_level,
                reason,
            } => warn!("{} TP{} order failed: {}", symbol, tp_level, reason),
            EngineEvent::PositionTransition(t) => info!(
                "{} #{} {} -> {} (SL {})",
                t.symbol, t.ticket, t.from, t.to, t.stop_loss
            ),
            EngineEvent::StopModifyFailed { symbol, ticket, reason } => {
                warn!("{} #{} stop modify failed, retrying next poll: {}", symbol, ticket, reason)
            }
            EngineEvent::CloseRequested { symbol, ticket, reason } => {
                info!("{} #{} close requested: {:?}", symbol, ticket, reason)
            }
            EngineEvent::CloseFailed { symbol, ticket, reason } => {
                warn!("{} #{} close failed: {}", symbol, ticket, reason)
            }
        }
    }
}

/// Appends one JSON object per line to `<dir>/events.jsonl`.
pub struct JsonlSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlSink {
    pub fn open(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        fs::create_dir_all(dir.as_ref())?;
        let path = dir.as_ref().join("events.jsonl");
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for JsonlSink {
    fn emit(&self, at: DateTime<Utc>, event: &EngineEvent) {
        let record = EventRecord {
            at,
            event: event.clone(),
        };
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialise event: {}", e);
                return;
            }
        };
        match self.file.lock() {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{}", line) {
                    warn!("Failed to write {}: {}", self.path.display(), e);
                }
            }
            Err(_) => warn!("Event log lock poisoned, dropping event"),
        }
    }
}

/// Keeps every event in memory. Clones share the same buffer.
#[derive(Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<EventRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<EventRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.records().into_iter().map(|r| r.event).collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, at: DateTime<Utc>, event: &EngineEvent) {
        if let Ok(mut records) = self.records.lock() {
            records.push(EventRecord {
                at,
                event: event.clone(),
            });
        }
    }
}

/// Forwards each event to every inner sink in order.
pub struct FanoutSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Box<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, at: DateTime<Utc>, event: &EngineEvent) {
        for sink in &self.sinks {
            sink.emit(at, event);
        }
    }
}
