use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{info, warn};

use crate::config::{PeakResetPolicy, RiskConfig, SymbolConfig};
use crate::core::sessions::TradingClock;
use crate::strategies::signals::Signal;

/// Tolerance when flooring to a volume step, so 0.3 / 0.01 does not land on 29.999...
const STEP_EPSILON: f64 = 1e-9;

/// Round `value` down to a whole number of `step`s.
pub fn floor_to_step(value: f64, step: f64) -> f64 {
    if !(value.is_finite() && step > 0.0) {
        return 0.0;
    }
    let steps = (value / step + STEP_EPSILON).floor().max(0.0);
    round_to(steps * step, 8)
}

pub fn round_to(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (value * factor).round() / factor
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskRejection {
    NoSignal,
    InvalidConfidence,
    InvalidBalance,
    DrawdownBreaker,
    DailyLossLimit,
    DailyTradeCap,
    SymbolTradeCap,
    InvalidStopDistance,
    TooSmall,
}

impl fmt::Display for RiskRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskRejection::NoSignal => "no_signal",
            RiskRejection::InvalidConfidence => "invalid_confidence",
            RiskRejection::InvalidBalance => "invalid_balance",
            RiskRejection::DrawdownBreaker => "drawdown_breaker",
            RiskRejection::DailyLossLimit => "daily_loss_limit",
            RiskRejection::DailyTradeCap => "daily_trade_cap",
            RiskRejection::SymbolTradeCap => "symbol_trade_cap",
            RiskRejection::InvalidStopDistance => "invalid_stop_distance",
            RiskRejection::TooSmall => "too_small",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskDecision {
    pub approved: bool,
    pub risk_multiplier: f64,
    pub lot_size: f64,
    pub drawdown_percent: f64,
    pub rejection: Option<RiskRejection>,
}

impl RiskDecision {
    fn rejected(reason: RiskRejection, drawdown_percent: f64) -> Self {
        Self {
            approved: false,
            risk_multiplier: 0.0,
            lot_size: 0.0,
            drawdown_percent,
            rejection: Some(reason),
        }
    }
}

/// Account health tracked across cycles. Written only by the polling loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: f64,
    pub equity: f64,
    pub peak_balance: f64,
    pub day_start_balance: f64,
    pub daily_loss: f64,
    pub daily_trade_count: u32,
    pub symbol_trade_counts: HashMap<String, u32>,
    pub last_reset_date: Option<NaiveDate>,
}

impl AccountState {
    pub fn new(balance: f64) -> Self {
        Self {
            balance,
            equity: balance,
            peak_balance: balance,
            day_start_balance: balance,
            daily_loss: 0.0,
            daily_trade_count: 0,
            symbol_trade_counts: HashMap::new(),
            last_reset_date: None,
        }
    }

    pub fn drawdown_percent(&self) -> f64 {
        if self.peak_balance > 0.0 {
            ((self.peak_balance - self.balance) / self.peak_balance * 100.0).max(0.0)
        } else {
            0.0
        }
    }

    pub fn symbol_trades(&self, symbol: &str) -> u32 {
        self.symbol_trade_counts.get(symbol).copied().unwrap_or(0)
    }
}

pub struct AdaptiveRiskManager {
    config: RiskConfig,
    clock: TradingClock,
    state: AccountState,
}

impl AdaptiveRiskManager {
    pub fn new(config: &RiskConfig, clock: TradingClock, initial_balance: f64) -> Self {
        Self::from_state(config, clock, AccountState::new(initial_balance))
    }

    pub fn from_state(config: &RiskConfig, clock: TradingClock, state: AccountState) -> Self {
        Self {
            config: config.clone(),
            clock,
            state,
        }
    }

    pub fn state(&self) -> &AccountState {
        &self.state
    }

    pub fn set_config(&mut self, config: &RiskConfig, clock: TradingClock) {
        self.config = config.clone();
        self.clock = clock;
    }

    /// Fold a fresh balance reading into the account state. Rolls the daily
    /// counters when the trading date has changed.
    pub fn on_account_update(&mut self, balance: f64, equity: f64, now: DateTime<Utc>) {
        if !balance.is_finite() {
            warn!("Ignoring non-finite balance update");
            return;
        }
        let today = self.clock.trading_date(now);
        if self.state.last_reset_date != Some(today) {
            self.roll_day(today, balance);
        }

        self.state.balance = balance;
        self.state.equity = equity;
        if balance > self.state.peak_balance {
            self.state.peak_balance = balance;
        }
        self.state.daily_loss = (self.state.day_start_balance - balance).max(0.0);
    }

    fn roll_day(&mut self, today: NaiveDate, balance: f64) {
        if self.state.last_reset_date.is_some() {
            info!(
                "New trading day {}: resetting daily counters ({} trades, loss {:.2})",
                today, self.state.daily_trade_count, self.state.daily_loss
            );
        }
        self.state.last_reset_date = Some(today);
        self.state.day_start_balance = balance;
        self.state.daily_loss = 0.0;
        self.state.daily_trade_count = 0;
        self.state.symbol_trade_counts.clear();
        if self.config.peak_reset == PeakResetPolicy::Daily {
            self.state.peak_balance = balance;
        }
    }

    /// Explicit operator reset of the drawdown reference.
    pub fn reset_peak(&mut self) {
        info!(
            "Peak balance reset {:.2} -> {:.2}",
            self.state.peak_balance, self.state.balance
        );
        self.state.peak_balance = self.state.balance;
    }

    /// Counters advance only for orders the broker accepted.
    pub fn record_trade_opened(&mut self, symbol: &str) {
        self.state.daily_trade_count += 1;
        *self
            .state
            .symbol_trade_counts
            .entry(symbol.to_string())
            .or_insert(0) += 1;
    }

    /// Confidence in [floor, 1] maps linearly onto [min, max], then the
    /// current drawdown scales it down before clamping.
    pub fn risk_multiplier(&self, confidence: f64) -> f64 {
        let c = &self.config;
        let t = ((confidence - c.confidence_floor) / (1.0 - c.confidence_floor)).clamp(0.0, 1.0);
        let raw = c.min_risk_multiplier + t * (c.max_risk_multiplier - c.min_risk_multiplier);
        let dd_ratio = (self.state.drawdown_percent() / c.max_drawdown_percent).clamp(0.0, 1.0);
        let damped = raw * (1.0 - c.drawdown_dampening * dd_ratio);
        damped.clamp(c.min_risk_multiplier, c.max_risk_multiplier)
    }

    /// `stop_distance` is in price units; the symbol's contract size turns it
    /// into account currency per lot.
    pub fn evaluate(&self, signal: &Signal, symbol: &SymbolConfig, stop_distance: f64) -> RiskDecision {
        let c = &self.config;
        let s = &self.state;
        let dd = s.drawdown_percent();

        if !signal.is_actionable() {
            return RiskDecision::rejected(RiskRejection::NoSignal, dd);
        }
        if !(signal.confidence.is_finite() && (0.0..=1.0).contains(&signal.confidence)) {
            return RiskDecision::rejected(RiskRejection::InvalidConfidence, dd);
        }
        if !(s.balance.is_finite() && s.balance > 0.0) {
            return RiskDecision::rejected(RiskRejection::InvalidBalance, dd);
        }
        if dd > c.max_drawdown_percent {
            warn!(
                "Drawdown breaker: {:.2}% > {:.2}% (peak {:.2}, balance {:.2})",
                dd, c.max_drawdown_percent, s.peak_balance, s.balance
            );
            return RiskDecision::rejected(RiskRejection::DrawdownBreaker, dd);
        }
        let loss_limit = s.day_start_balance * c.max_daily_loss_percent / 100.0;
        if s.daily_loss >= loss_limit {
            return RiskDecision::rejected(RiskRejection::DailyLossLimit, dd);
        }
        if s.daily_trade_count >= c.max_daily_trades {
            return RiskDecision::rejected(RiskRejection::DailyTradeCap, dd);
        }
        if s.symbol_trades(&symbol.symbol) >= c.max_trades_per_symbol {
            return RiskDecision::rejected(RiskRejection::SymbolTradeCap, dd);
        }
        if !(stop_distance.is_finite() && stop_distance > 0.0) {
            return RiskDecision::rejected(RiskRejection::InvalidStopDistance, dd);
        }

        let multiplier = self.risk_multiplier(signal.confidence);
        let risk_amount = s.balance * c.base_risk_percent / 100.0 * multiplier;
        let raw_lots = risk_amount / (stop_distance * symbol.contract_size);
        let lots = floor_to_step(raw_lots, symbol.volume_step);

        if !(lots >= symbol.min_volume) || lots <= 0.0 {
            return RiskDecision {
                risk_multiplier: multiplier,
                ..RiskDecision::rejected(RiskRejection::TooSmall, dd)
            };
        }

        RiskDecision {
            approved: true,
            risk_multiplier: multiplier,
            lot_size: lots.min(symbol.max_volume),
            drawdown_percent: dd,
            rejection: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, SignalDirection};
    use chrono::TimeZone;

    fn buy(confidence: f64) -> Signal {
        Signal {
            direction: SignalDirection::Buy,
            confidence,
            candidate: Some(Direction::Long),
            ..Signal::none()
        }
    }

    fn t(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    fn manager(balance: f64) -> AdaptiveRiskManager {
        let mut rm = AdaptiveRiskManager::new(
            &RiskConfig::default(),
            TradingClock::new(chrono_tz::UTC),
            balance,
        );
        rm.on_account_update(balance, balance, t(4, 8));
        rm
    }

    #[test]
    fn reference_buy_is_approved_with_a_real_lot() {
        use crate::config::SplitConfig;
        use crate::strategies::evaluator::SignalEvaluator;
        use crate::test_helpers::bullish_cross_pair;
        use crate::trading::split_planner::SplitOrderPlanner;

        let mut symbol = SymbolConfig::new("EURUSD");
        symbol.filters.dead_hours = vec![0, 1, 2];
        symbol.filters.golden_hours = vec![11];

        let (prior, current) = bullish_cross_pair();
        let signal = SignalEvaluator::evaluate(&current, &prior, &symbol, 11);
        assert_eq!(signal.direction, SignalDirection::Buy);
        assert!(signal.confidence >= symbol.filters.min_confidence);

        let stop = SplitOrderPlanner::stop_distance(&SplitConfig::default().mode, Some(current.atr), symbol.pip_size)
            .unwrap();
        let rm = manager(10_000.0);
        let d = rm.evaluate(&signal, &symbol, stop);
        assert!(d.approved, "rejected: {:?}", d.rejection);
        assert!(d.lot_size > 0.0);
        assert!(d.lot_size >= symbol.min_volume);
        assert!(d.risk_multiplier >= RiskConfig::default().min_risk_multiplier);
    }

    #[test]
    fn drawdown_breaker_trips() {
        let mut rm = manager(1000.0);
        rm.on_account_update(850.0, 850.0, t(5, 8));
        assert!((rm.state().drawdown_percent() - 15.0).abs() < 1e-9);

        let d = rm.evaluate(&buy(0.9), &SymbolConfig::new("EURUSD"), 0.0015);
        assert!(!d.approved);
        assert_eq!(d.rejection, Some(RiskRejection::DrawdownBreaker));
    }

    #[test]
    fn drawdown_exactly_at_limit_still_trades() {
        let mut rm = manager(100_000.0);
        rm.on_account_update(90_000.0, 90_000.0, t(5, 8));
        let d = rm.evaluate(&buy(0.9), &SymbolConfig::new("EURUSD"), 0.0015);
        assert!(d.approved, "{:?}", d);
    }

    #[test]
    fn peak_is_non_decreasing_across_days_by_default() {
        let mut rm = manager(1000.0);
        rm.on_account_update(1200.0, 1200.0, t(4, 10));
        rm.on_account_update(1100.0, 1100.0, t(5, 10));
        assert_eq!(rm.state().peak_balance, 1200.0);

        rm.reset_peak();
        assert_eq!(rm.state().peak_balance, 1100.0);
    }

    #[test]
    fn daily_policy_rebases_peak_at_day_boundary() {
        let cfg = RiskConfig {
            peak_reset: PeakResetPolicy::Daily,
            ..RiskConfig::default()
        };
        let mut rm = AdaptiveRiskManager::new(&cfg, TradingClock::new(chrono_tz::UTC), 1000.0);
        rm.on_account_update(1200.0, 1200.0, t(4, 10));
        rm.on_account_update(1100.0, 1100.0, t(4, 12));
        assert_eq!(rm.state().peak_balance, 1200.0);
        rm.on_account_update(1100.0, 1100.0, t(5, 0));
        assert_eq!(rm.state().peak_balance, 1100.0);
    }

    #[test]
    fn daily_counters_reset_only_on_date_change() {
        let mut rm = manager(10_000.0);
        rm.record_trade_opened("EURUSD");
        rm.record_trade_opened("EURUSD");
        rm.on_account_update(9_900.0, 9_900.0, t(4, 23));
        assert_eq!(rm.state().daily_trade_count, 2);
        assert!((rm.state().daily_loss - 100.0).abs() < 1e-9);

        rm.on_account_update(9_900.0, 9_900.0, t(5, 0));
        assert_eq!(rm.state().daily_trade_count, 0);
        assert_eq!(rm.state().symbol_trades("EURUSD"), 0);
        assert_eq!(rm.state().daily_loss, 0.0);
        assert_eq!(rm.state().day_start_balance, 9_900.0);
    }

    #[test]
    fn daily_loss_limit_rejects() {
        let mut rm = manager(10_000.0);
        rm.on_account_update(9_700.0, 9_700.0, t(4, 12));
        let d = rm.evaluate(&buy(0.9), &SymbolConfig::new("EURUSD"), 0.0015);
        assert_eq!(d.rejection, Some(RiskRejection::DailyLossLimit));
    }

    #[test]
    fn trade_caps_reject_at_the_cap() {
        let mut rm = manager(10_000.0);
        let sym = SymbolConfig::new("EURUSD");
        for _ in 0..3 {
            assert!(rm.evaluate(&buy(0.9), &sym, 0.0015).approved);
            rm.record_trade_opened("EURUSD");
        }
        let d = rm.evaluate(&buy(0.9), &sym, 0.0015);
        assert_eq!(d.rejection, Some(RiskRejection::SymbolTradeCap));

        // Another symbol still has room until the global cap.
        for i in 0..7 {
            rm.record_trade_opened(&format!("SYM{}", i));
        }
        let d = rm.evaluate(&buy(0.9), &SymbolConfig::new("GBPUSD"), 0.0015);
        assert_eq!(d.rejection, Some(RiskRejection::DailyTradeCap));
    }

    #[test]
    fn multiplier_tracks_confidence_within_bounds() {
        let rm = manager(10_000.0);
        assert!((rm.risk_multiplier(0.5) - 0.5).abs() < 1e-9);
        assert!((rm.risk_multiplier(0.75) - 1.0).abs() < 1e-9);
        assert!((rm.risk_multiplier(1.0) - 1.5).abs() < 1e-9);
        assert!((rm.risk_multiplier(0.1) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn drawdown_dampens_multiplier() {
        let mut rm = manager(10_000.0);
        rm.on_account_update(9_500.0, 9_500.0, t(5, 8)); // 5% of a 10% limit
        // 1.5 * (1 - 0.5 * 0.5)
        assert!((rm.risk_multiplier(1.0) - 1.125).abs() < 1e-9);
    }

    #[test]
    fn lot_size_follows_risk_formula() {
        let rm = manager(10_000.0);
        let d = rm.evaluate(&buy(0.75), &SymbolConfig::new("EURUSD"), 0.0010);
        // 10_000 * 1% * 1.0 / (0.0010 * 100_000) = 1.0
        assert!(d.approved);
        assert!((d.lot_size - 1.0).abs() < 1e-9);
        assert!((d.risk_multiplier - 1.0).abs() < 1e-9);
    }

    #[test]
    fn tiny_lot_is_too_small_not_minimum() {
        let rm = manager(100.0);
        let d = rm.evaluate(&buy(0.6), &SymbolConfig::new("EURUSD"), 0.0050);
        assert!(!d.approved);
        assert_eq!(d.rejection, Some(RiskRejection::TooSmall));
        assert_eq!(d.lot_size, 0.0);
    }

    #[test]
    fn degenerate_inputs_reject_without_panicking() {
        let rm = manager(10_000.0);
        let sym = SymbolConfig::new("EURUSD");
        assert_eq!(
            rm.evaluate(&buy(0.9), &sym, 0.0).rejection,
            Some(RiskRejection::InvalidStopDistance)
        );
        assert_eq!(
            rm.evaluate(&buy(f64::NAN), &sym, 0.001).rejection,
            Some(RiskRejection::InvalidConfidence)
        );
        assert_eq!(
            rm.evaluate(&Signal::none(), &sym, 0.001).rejection,
            Some(RiskRejection::NoSignal)
        );
    }

    #[test]
    fn lots_capped_at_max_volume() {
        let rm = manager(10_000_000.0);
        let d = rm.evaluate(&buy(1.0), &SymbolConfig::new("EURUSD"), 0.0010);
        assert!(d.approved);
        assert_eq!(d.lot_size, 50.0);
    }

    #[test]
    fn floor_to_step_handles_float_noise() {
        assert!((floor_to_step(0.3, 0.01) - 0.3).abs() < 1e-12);
        assert!((floor_to_step(0.879, 0.01) - 0.87).abs() < 1e-12);
        assert_eq!(floor_to_step(0.004, 0.01), 0.0);
        assert_eq!(floor_to_step(f64::NAN, 0.01), 0.0);
    }
}
