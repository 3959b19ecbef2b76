use serde::{Deserialize, Serialize};

use crate::config::{SplitConfig, SymbolConfig, TpSlMode};
use crate::core::risk::{floor_to_step, round_to};
use crate::models::Direction;

const ALLOCATION_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    #[error("no take-profit levels configured")]
    EmptyLevels,

    #[error("{levels} take-profit levels but {percents} close percentages")]
    LengthMismatch { levels: usize, percents: usize },

    #[error("take-profit levels must be strictly increasing")]
    LevelsNotIncreasing,

    #[error("close percentages sum to {total}, expected 100")]
    AllocationNot100 { total: f64 },

    #[error("stop distance {0} is not positive")]
    NonPositiveStop(f64),

    #[error("entry price {0} is not usable")]
    InvalidEntry(f64),

    #[error("total volume {0} is not usable")]
    InvalidVolume(f64),

    #[error("volatility mode needs a positive ATR")]
    MissingVolatility,

    #[error("leg {leg}: reward {reward} does not exceed risk {risk}")]
    RewardNotAboveRisk { leg: usize, reward: f64, risk: f64 },

    #[error("leg {leg}: take-profit distance {reward} does not exceed the previous leg's {previous}")]
    TakeProfitsNotIncreasing { leg: usize, reward: f64, previous: f64 },

    #[error("total volume {total} is below one tradeable leg")]
    VolumeTooSmall { total: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLeg {
    /// 1-based index of the take-profit level this leg closes at.
    pub tp_level: usize,
    pub volume: f64,
    pub volume_fraction: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub risk_distance: f64,
    pub reward_distance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanRequest {
    pub entry_price: f64,
    pub direction: Direction,
    pub total_volume: f64,
    /// Required in volatility mode, ignored in fixed mode.
    pub atr: Option<f64>,
}

/// Price distance one unit of the configured mode stands for.
fn unit_distance(mode: &TpSlMode, atr: Option<f64>, pip_size: f64) -> Result<f64, PlanError> {
    match mode {
        TpSlMode::Volatility { .. } => match atr {
            Some(a) if a.is_finite() && a > 0.0 => Ok(a),
            _ => Err(PlanError::MissingVolatility),
        },
        TpSlMode::Fixed { .. } => Ok(pip_size),
    }
}

pub struct SplitOrderPlanner;

impl SplitOrderPlanner {
    /// Shared stop-loss distance in price units.
    pub fn stop_distance(mode: &TpSlMode, atr: Option<f64>, pip_size: f64) -> Result<f64, PlanError> {
        let distance = mode.sl_units() * unit_distance(mode, atr, pip_size)?;
        if distance.is_finite() && distance > 0.0 {
            Ok(distance)
        } else {
            Err(PlanError::NonPositiveStop(distance))
        }
    }

    /// Split `req.total_volume` into one leg per take-profit level. All legs
    /// share one stop. Volumes are whole multiples of the symbol's volume
    /// step; the rounding remainder and any leg below the broker minimum are
    /// folded into the first leg, so the allocated total never exceeds the
    /// requested volume.
    pub fn plan(req: &PlanRequest, split: &SplitConfig, symbol: &SymbolConfig) -> Result<Vec<OrderLeg>, PlanError> {
        validate_allocation(split)?;
        if !(req.entry_price.is_finite() && req.entry_price > 0.0) {
            return Err(PlanError::InvalidEntry(req.entry_price));
        }
        if !(req.total_volume.is_finite() && req.total_volume > 0.0) {
            return Err(PlanError::InvalidVolume(req.total_volume));
        }

        let unit = unit_distance(&split.mode, req.atr, symbol.pip_size)?;
        let risk_raw = Self::stop_distance(&split.mode, req.atr, symbol.pip_size)?;
        let round = |p: f64| round_to(p, symbol.price_digits);
        let dir = req.direction;

        let stop_loss = round(dir.offset_adverse(req.entry_price, risk_raw));
        let risk = (req.entry_price - stop_loss).abs();
        if !(risk > 0.0) {
            return Err(PlanError::NonPositiveStop(risk));
        }

        let steps = allocate_steps(req.total_volume, split, symbol);
        let allocated: u64 = steps.iter().sum();
        if allocated == 0 {
            return Err(PlanError::VolumeTooSmall {
                total: req.total_volume,
            });
        }

        let mut legs = Vec::with_capacity(steps.len());
        let mut previous = risk;
        for (i, (level, leg_steps)) in split.tp_levels.iter().zip(&steps).enumerate() {
            let take_profit = round(dir.offset_favorable(req.entry_price, level * unit));
            let reward = (take_profit - req.entry_price).abs();
            if !(reward > risk) {
                return Err(PlanError::RewardNotAboveRisk { leg: i, reward, risk });
            }
            // Close levels can land on the same rounded price.
            if i > 0 && !(reward > previous) {
                return Err(PlanError::TakeProfitsNotIncreasing { leg: i, reward, previous });
            }
            previous = reward;
            if *leg_steps == 0 {
                continue;
            }
            legs.push(OrderLeg {
                tp_level: i + 1,
                volume: round_to(*leg_steps as f64 * symbol.volume_step, 8),
                volume_fraction: *leg_steps as f64 / allocated as f64,
                stop_loss,
                take_profit,
                risk_distance: risk,
                reward_distance: reward,
            });
        }
        Ok(legs)
    }
}

fn validate_allocation(split: &SplitConfig) -> Result<(), PlanError> {
    if split.tp_levels.is_empty() {
        return Err(PlanError::EmptyLevels);
    }
    if split.tp_levels.len() != split.close_percents.len() {
        return Err(PlanError::LengthMismatch {
            levels: split.tp_levels.len(),
            percents: split.close_percents.len(),
        });
    }
    if split.tp_levels.windows(2).any(|w| !(w[1] > w[0])) {
        return Err(PlanError::LevelsNotIncreasing);
    }
    let total: f64 = split.close_percents.iter().sum();
    if split.close_percents.iter().any(|p| !(*p > 0.0)) || (total - 100.0).abs() > ALLOCATION_TOLERANCE {
        return Err(PlanError::AllocationNot100 { total });
    }
    Ok(())
}

/// Volume per leg in whole volume steps.
fn allocate_steps(total_volume: f64, split: &SplitConfig, symbol: &SymbolConfig) -> Vec<u64> {
    let total_steps = (floor_to_step(total_volume, symbol.volume_step) / symbol.volume_step).round() as u64;
    let min_steps = (symbol.min_volume / symbol.volume_step - 1e-9).ceil().max(1.0) as u64;

    let mut steps: Vec<u64> = split
        .close_percents
        .iter()
        .map(|pct| (total_steps as f64 * pct / 100.0 + 1e-9).floor() as u64)
        .collect();

    let mut spare = total_steps - steps.iter().sum::<u64>().min(total_steps);
    for s in steps.iter_mut().skip(1) {
        if *s < min_steps {
            spare += *s;
            *s = 0;
        }
    }
    steps[0] += spare;
    if steps[0] < min_steps {
        steps[0] = 0;
    }
    steps
}
