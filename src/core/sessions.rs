use chrono::{DateTime, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::config::FilterConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HourClass {
    Dead,
    Golden,
    Neutral,
}

/// Maps wall-clock instants onto the trading timezone. All hour filtering and
/// daily-counter rollover goes through one of these so they agree on what
/// "today" and "hour 11" mean.
#[derive(Debug, Clone, Copy)]
pub struct TradingClock {
    tz: Tz,
}

impl TradingClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn local_hour(&self, utc_now: DateTime<Utc>) -> u32 {
        utc_now.with_timezone(&self.tz).hour()
    }

    pub fn trading_date(&self, utc_now: DateTime<Utc>) -> NaiveDate {
        utc_now.with_timezone(&self.tz).date_naive()
    }
}

/// Dead wins over golden, although validation keeps the sets disjoint.
pub fn classify_hour(filters: &FilterConfig, hour: u32) -> HourClass {
    if !filters.hour_filter_enabled {
        return HourClass::Neutral;
    }
    if filters.dead_hours.contains(&hour) {
        HourClass::Dead
    } else if filters.golden_hours.contains(&hour) {
        HourClass::Golden
    } else {
        HourClass::Neutral
    }
}
