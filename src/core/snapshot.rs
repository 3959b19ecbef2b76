use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{IndicatorConfig, MaKind};
use crate::core::indicators;
use crate::models::{CandleSeries, Direction};

/// A value that may be structurally absent for an instrument. Consumers treat
/// `Unavailable` as "bypass this stage", never as zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reading {
    Value(f64),
    Unavailable,
}

impl Reading {
    pub fn value(&self) -> Option<f64> {
        match self {
            Reading::Value(v) => Some(*v),
            Reading::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Reading::Value(_))
    }

    fn from_option(v: Option<f64>) -> Self {
        match v {
            Some(v) if v.is_finite() => Reading::Value(v),
            _ => Reading::Unavailable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IndicatorError {
    #[error("not enough bars: have {have}, need {need}")]
    NotReady { have: usize, need: usize },

    #[error("bar {index} carries a non-finite value")]
    MalformedBar { index: usize },
}

/// Derived features for one bar. Required fields are always finite; optional
/// inputs that the feed cannot support are `Unavailable`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    pub fast_ma: f64,
    pub slow_ma: f64,
    pub rsi: f64,
    pub macd_line: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub atr: f64,
    pub momentum: f64,
    pub micro_fast: f64,
    pub micro_slow: f64,
    pub adx: Reading,
    pub plus_di: Reading,
    pub minus_di: Reading,
    pub volume: Reading,
    pub volume_ma: Reading,
    pub obv: Reading,
    pub obv_slope: Reading,
    /// Side of fast vs slow MA on the latest bar, at or before this one,
    /// where the lines differed. Filled in by the engine.
    #[serde(default)]
    pub ma_last_side: Option<Side>,
    #[serde(default)]
    pub micro_last_side: Option<Side>,
}

impl IndicatorSnapshot {
    /// Where the MA pair last sat apart. Falls back to this bar's values.
    pub fn ma_side(&self) -> Option<Side> {
        self.ma_last_side.or_else(|| Side::of(self.fast_ma, self.slow_ma))
    }

    pub fn micro_side(&self) -> Option<Side> {
        self.micro_last_side
            .or_else(|| Side::of(self.micro_fast, self.micro_slow))
    }
}

/// The latest bar's snapshot together with the one before it, which is what
/// edge detection needs.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotPair {
    pub prior: IndicatorSnapshot,
    pub current: IndicatorSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Crossover {
    Bullish,
    Bearish,
}

/// Fast line relative to the slow line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Above,
    Below,
}

impl Side {
    /// `None` while the lines are equal.
    pub fn of(fast: f64, slow: f64) -> Option<Side> {
        if fast > slow {
            Some(Side::Above)
        } else if fast < slow {
            Some(Side::Below)
        } else {
            None
        }
    }
}

/// Last strict side at each index. Equal or undefined bars carry the
/// previous side forward.
fn last_sides(fast: &[Option<f64>], slow: &[Option<f64>]) -> Vec<Option<Side>> {
    let mut side = None;
    fast.iter()
        .zip(slow)
        .map(|(f, s)| {
            if let (Some(f), Some(s)) = (f, s) {
                side = Side::of(*f, *s).or(side);
            }
            side
        })
        .collect()
}

impl Crossover {
    pub fn direction(self) -> Direction {
        match self {
            Crossover::Bullish => Direction::Long,
            Crossover::Bearish => Direction::Short,
        }
    }
}

/// Fires only on the bar where the fast line lands on the other side of the
/// slow line from `prior_side`, the last side it held apart from it. A touch
/// followed by a return to the same side is not a crossing.
pub fn detect_crossover(prior_side: Option<Side>, fast: f64, slow: f64) -> Option<Crossover> {
    match Side::of(fast, slow) {
        Some(Side::Above) if prior_side != Some(Side::Above) => Some(Crossover::Bullish),
        Some(Side::Below) if prior_side != Some(Side::Below) => Some(Crossover::Bearish),
        _ => None,
    }
}

impl SnapshotPair {
    pub fn ma_crossover(&self) -> Option<Crossover> {
        detect_crossover(
            self.prior.ma_side(),
            self.current.fast_ma,
            self.current.slow_ma,
        )
    }
}

/// Bars needed before every required field is defined on both of the last two
/// bars. ADX is optional and not part of this count.
pub fn required_bars(cfg: &IndicatorConfig) -> usize {
    let needs = [
        cfg.slow_ma_period,
        cfg.fast_ma_period,
        cfg.rsi_period + 1,
        cfg.macd_slow + cfg.macd_signal - 1,
        cfg.atr_period,
        cfg.momentum_period + 1,
        cfg.micro_slow_period,
    ];
    // +1 so the prior bar is defined as well.
    needs.iter().copied().max().unwrap_or(0) + 1 + cfg.warmup_buffer
}

pub struct IndicatorEngine {
    cfg: IndicatorConfig,
}

impl IndicatorEngine {
    pub fn new(cfg: &IndicatorConfig) -> Self {
        Self { cfg: cfg.clone() }
    }

    pub fn required_bars(&self) -> usize {
        required_bars(&self.cfg)
    }

    /// Snapshot the last bar of `bars`.
    pub fn compute(&self, bars: &CandleSeries) -> Result<IndicatorSnapshot, IndicatorError> {
        self.compute_pair(bars).map(|pair| pair.current)
    }

    /// Snapshot the last two bars. Either both are fully computed or an error
    /// is returned; there is no partial result.
    pub fn compute_pair(&self, bars: &CandleSeries) -> Result<SnapshotPair, IndicatorError> {
        let need = self.required_bars();
        if bars.len() < need {
            return Err(IndicatorError::NotReady {
                have: bars.len(),
                need,
            });
        }
        if let Some(index) = bars.first_malformed() {
            return Err(IndicatorError::MalformedBar { index });
        }

        let cfg = &self.cfg;
        let candles = bars.as_slice();
        let closes = bars.closes();

        let ma = |period| match cfg.ma_kind {
            MaKind::Ema => indicators::ema(&closes, period),
            MaKind::Sma => indicators::sma(&closes, period),
        };
        let fast = ma(cfg.fast_ma_period);
        let slow = ma(cfg.slow_ma_period);
        let rsi = indicators::rsi(&closes, cfg.rsi_period);
        let macd = indicators::macd(&closes, cfg.macd_fast, cfg.macd_slow, cfg.macd_signal);
        let atr = indicators::atr(candles, cfg.atr_period);
        let momentum = indicators::rate_of_change(&closes, cfg.momentum_period);
        let micro_fast = indicators::ema(&closes, cfg.micro_fast_period);
        let micro_slow = indicators::ema(&closes, cfg.micro_slow_period);
        let ma_sides = last_sides(&fast, &slow);
        let micro_sides = last_sides(&micro_fast, &micro_slow);

        let adx = if cfg.adx_enabled {
            Some(indicators::adx(candles, cfg.adx_period))
        } else {
            None
        };

        let has_volume = bars.has_volume();
        let volumes = bars.volumes();
        let volume_ma = indicators::sma(&volumes, cfg.volume_ma_period);
        let obv = indicators::obv(candles);

        let at = |i: usize| -> Result<IndicatorSnapshot, IndicatorError> {
            let required = |series: &[Option<f64>]| {
                series[i]
                    .filter(|v| v.is_finite())
                    .ok_or(IndicatorError::NotReady {
                        have: bars.len(),
                        need,
                    })
            };
            let (adx_v, plus_v, minus_v) = match &adx {
                Some(a) => (
                    Reading::from_option(a.adx[i]),
                    Reading::from_option(a.plus_di[i]),
                    Reading::from_option(a.minus_di[i]),
                ),
                None => (Reading::Unavailable, Reading::Unavailable, Reading::Unavailable),
            };
            let (volume, vol_ma, obv_v, obv_slope) = if has_volume {
                let slope = i
                    .checked_sub(cfg.obv_slope_period)
                    .map(|j| obv[i] - obv[j]);
                (
                    Reading::Value(volumes[i]),
                    Reading::from_option(volume_ma[i].filter(|v| *v > 0.0)),
                    Reading::Value(obv[i]),
                    Reading::from_option(slope),
                )
            } else {
                (
                    Reading::Unavailable,
                    Reading::Unavailable,
                    Reading::Unavailable,
                    Reading::Unavailable,
                )
            };

            Ok(IndicatorSnapshot {
                timestamp: candles[i].timestamp,
                close: closes[i],
                fast_ma: required(&fast)?,
                slow_ma: required(&slow)?,
                rsi: required(&rsi)?,
                macd_line: required(&macd.line)?,
                macd_signal: required(&macd.signal)?,
                macd_histogram: required(&macd.histogram)?,
                atr: required(&atr)?,
                momentum: required(&momentum)?,
                micro_fast: required(&micro_fast)?,
                micro_slow: required(&micro_slow)?,
                adx: adx_v,
                plus_di: plus_v,
                minus_di: minus_v,
                volume,
                volume_ma: vol_ma,
                obv: obv_v,
                obv_slope,
                ma_last_side: ma_sides[i],
                micro_last_side: micro_sides[i],
            })
        };

        let last = bars.len() - 1;
        Ok(SnapshotPair {
            prior: at(last - 1)?,
            current: at(last)?,
        })
    }
}
