use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::sessions::HourClass;
use crate::models::{Direction, SignalDirection};

/// Why the filter pipeline stopped. Recorded on the signal for observability;
/// never raised as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterRejection {
    NoCrossover,
    RsiOverbought,
    RsiOversold,
    MacdSignMismatch,
    MacdTooWeak,
    AdxTooWeak,
    DeadHour,
    LowConfidence,
    InvalidScore,
}

impl FilterRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterRejection::NoCrossover => "no_crossover",
            FilterRejection::RsiOverbought => "rsi_overbought",
            FilterRejection::RsiOversold => "rsi_oversold",
            FilterRejection::MacdSignMismatch => "macd_sign_mismatch",
            FilterRejection::MacdTooWeak => "macd_too_weak",
            FilterRejection::AdxTooWeak => "adx_too_weak",
            FilterRejection::DeadHour => "dead_hour",
            FilterRejection::LowConfidence => "low_confidence",
            FilterRejection::InvalidScore => "invalid_score",
        }
    }
}

impl fmt::Display for FilterRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage scores in [0, 1]. `None` means the stage was disabled or its
/// input unavailable, so it did not take part in the weighted average.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub trend: Option<f64>,
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub adx: Option<f64>,
    pub volume: Option<f64>,
    pub hour_bonus: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub direction: SignalDirection,
    pub confidence: f64,
    pub rejection: Option<FilterRejection>,
    /// Direction the crossover proposed before any rejection.
    pub candidate: Option<Direction>,
    pub hour_class: HourClass,
    pub scores: ScoreBreakdown,
}

impl Signal {
    pub fn none() -> Self {
        Self {
            direction: SignalDirection::None,
            confidence: 0.0,
            rejection: None,
            candidate: None,
            hour_class: HourClass::Neutral,
            scores: ScoreBreakdown::default(),
        }
    }

    pub fn rejected(reason: FilterRejection) -> Self {
        Self {
            rejection: Some(reason),
            ..Self::none()
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.direction != SignalDirection::None
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rejection {
            Some(reason) => write!(f, "{} (rejected: {})", self.direction, reason),
            None => write!(f, "{} conf={:.3}", self.direction, self.confidence),
        }
    }
}
