use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }

    /// +1 for long, -1 for short. Multiplying a price move by this gives the
    /// move in the position's favour.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    /// Price that lies `distance` in the favourable direction from `from`.
    pub fn offset_favorable(&self, from: f64, distance: f64) -> f64 {
        from + self.sign() * distance
    }

    /// Price that lies `distance` against the position from `from`.
    pub fn offset_adverse(&self, from: f64, distance: f64) -> f64 {
        from - self.sign() * distance
    }

    /// True when `candidate` is strictly better than `current` as a stop for this side.
    pub fn stop_improves(&self, current: f64, candidate: f64) -> bool {
        match self {
            Direction::Long => candidate > current,
            Direction::Short => candidate < current,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalDirection {
    Buy,
    Sell,
    None,
}

impl fmt::Display for SignalDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalDirection::Buy => write!(f, "BUY"),
            SignalDirection::Sell => write!(f, "SELL"),
            SignalDirection::None => write!(f, "NONE"),
        }
    }
}

impl SignalDirection {
    pub fn to_direction(self) -> Option<Direction> {
        match self {
            SignalDirection::Buy => Some(Direction::Long),
            SignalDirection::Sell => Some(Direction::Short),
            SignalDirection::None => None,
        }
    }
}

impl From<Direction> for SignalDirection {
    fn from(d: Direction) -> Self {
        match d {
            Direction::Long => SignalDirection::Buy,
            Direction::Short => SignalDirection::Sell,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionState {
    Opened,
    BreakevenArmed,
    Trailing,
    Closed,
}

impl fmt::Display for PositionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionState::Opened => write!(f, "opened"),
            PositionState::BreakevenArmed => write!(f, "breakeven_armed"),
            PositionState::Trailing => write!(f, "trailing"),
            PositionState::Closed => write!(f, "closed"),
        }
    }
}
