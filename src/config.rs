use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::error::ConfigError;
use crate::models::Timeframe;

pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Longest accepted max-hold window: one year.
pub const MAX_HOLD_MINUTES_LIMIT: u64 = 366 * 24 * 60;

/// Readers (dashboards, admin endpoints) see the active snapshot through this.
pub type SharedConfig = Arc<RwLock<Arc<Config>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaKind {
    Ema,
    Sma,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub ma_kind: MaKind,
    pub fast_ma_period: usize,
    pub slow_ma_period: usize,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub atr_period: usize,
    /// Off for instruments whose feed has no usable high/low range.
    pub adx_enabled: bool,
    pub adx_period: usize,
    pub volume_ma_period: usize,
    pub obv_slope_period: usize,
    pub momentum_period: usize,
    pub micro_fast_period: usize,
    pub micro_slow_period: usize,
    pub warmup_buffer: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            ma_kind: MaKind::Ema,
            fast_ma_period: 9,
            slow_ma_period: 21,
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            atr_period: 14,
            adx_enabled: true,
            adx_period: 14,
            volume_ma_period: 20,
            obv_slope_period: 5,
            momentum_period: 5,
            micro_fast_period: 3,
            micro_slow_period: 8,
            warmup_buffer: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub trend: f64,
    pub rsi: f64,
    pub macd: f64,
    pub adx: f64,
    pub volume: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            trend: 0.30,
            rsi: 0.15,
            macd: 0.25,
            adx: 0.15,
            volume: 0.15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub rsi_enabled: bool,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,

    pub macd_enabled: bool,
    pub macd_min_histogram: f64,
    /// |histogram| at this multiple of the minimum scores 1.0.
    pub macd_saturation: f64,

    pub adx_filter_enabled: bool,
    pub adx_min: f64,
    /// ADX at which the strength score saturates.
    pub adx_full: f64,

    pub volume_enabled: bool,
    /// volume / volume-MA ratio that scores 1.0.
    pub volume_full_ratio: f64,

    pub hour_filter_enabled: bool,
    pub dead_hours: Vec<u32>,
    pub golden_hours: Vec<u32>,
    pub golden_hour_bonus: f64,

    pub micro_cross_enabled: bool,
    pub micro_cross_score: f64,

    pub min_confidence: f64,
    pub weights: ScoreWeights,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            rsi_enabled: true,
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            macd_enabled: true,
            macd_min_histogram: 0.0005,
            macd_saturation: 2.0,
            adx_filter_enabled: true,
            adx_min: 20.0,
            adx_full: 40.0,
            volume_enabled: true,
            volume_full_ratio: 1.5,
            hour_filter_enabled: true,
            dead_hours: Vec::new(),
            golden_hours: Vec::new(),
            golden_hour_bonus: 0.1,
            micro_cross_enabled: false,
            micro_cross_score: 0.6,
            min_confidence: 0.6,
            weights: ScoreWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolConfig {
    pub symbol: String,
    pub enabled: bool,
    pub timeframe: Timeframe,
    pub pip_size: f64,
    pub price_digits: u32,
    /// Account-currency value of a 1.0 price move on one lot.
    pub contract_size: f64,
    pub volume_step: f64,
    pub min_volume: f64,
    pub max_volume: f64,
    pub indicators: IndicatorConfig,
    pub filters: FilterConfig,
}

impl Default for SymbolConfig {
    fn default() -> Self {
        Self {
            symbol: String::new(),
            enabled: true,
            timeframe: Timeframe::M15,
            pip_size: 0.0001,
            price_digits: 5,
            contract_size: 100_000.0,
            volume_step: 0.01,
            min_volume: 0.01,
            max_volume: 50.0,
            indicators: IndicatorConfig::default(),
            filters: FilterConfig::default(),
        }
    }
}

impl SymbolConfig {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeakResetPolicy {
    /// Peak only moves up, or via an explicit `reset_peak` call.
    Manual,
    /// Peak is re-based to the balance at each trading-day boundary.
    Daily,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub base_risk_percent: f64,
    pub min_risk_multiplier: f64,
    pub max_risk_multiplier: f64,
    /// Confidence mapped to the minimum multiplier.
    pub confidence_floor: f64,
    /// Fraction of the multiplier removed when drawdown reaches the maximum.
    pub drawdown_dampening: f64,
    pub max_drawdown_percent: f64,
    pub max_daily_loss_percent: f64,
    pub max_daily_trades: u32,
    pub max_trades_per_symbol: u32,
    /// Open entries allowed per symbol. The legs of one split count once.
    pub max_positions_per_symbol: usize,
    pub peak_reset: PeakResetPolicy,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            base_risk_percent: 1.0,
            min_risk_multiplier: 0.5,
            max_risk_multiplier: 1.5,
            confidence_floor: 0.5,
            drawdown_dampening: 0.5,
            max_drawdown_percent: 10.0,
            max_daily_loss_percent: 3.0,
            max_daily_trades: 10,
            max_trades_per_symbol: 3,
            max_positions_per_symbol: 1,
            peak_reset: PeakResetPolicy::Manual,
        }
    }
}

/// How stop-loss and take-profit distances are derived. Never mixed in one trade.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TpSlMode {
    /// SL and TP levels are multiples of ATR.
    Volatility { sl_atr_multiple: f64 },
    /// SL and TP levels are pip counts.
    Fixed { sl_pips: f64 },
}

impl TpSlMode {
    /// Stop distance in the mode's own unit (ATR multiples or pips).
    pub fn sl_units(&self) -> f64 {
        match self {
            TpSlMode::Volatility { sl_atr_multiple } => *sl_atr_multiple,
            TpSlMode::Fixed { sl_pips } => *sl_pips,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TpSlMode::Volatility { .. } => "volatility",
            TpSlMode::Fixed { .. } => "fixed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub mode: TpSlMode,
    /// Take-profit distances in the mode's unit, strictly increasing.
    pub tp_levels: Vec<f64>,
    /// Share of the total volume closed at each level; sums to 100.
    pub close_percents: Vec<f64>,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            mode: TpSlMode::Volatility {
                sl_atr_multiple: 1.5,
            },
            tp_levels: vec![2.0, 3.0, 4.5],
            close_percents: vec![50.0, 30.0, 20.0],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub breakeven_enabled: bool,
    /// Floating profit, in entry-ATR multiples, that arms breakeven.
    pub breakeven_trigger_atr: f64,
    pub breakeven_buffer_atr: f64,
    pub trailing_enabled: bool,
    pub trailing_activation_atr: f64,
    pub trailing_distance_atr: f64,
    /// Smallest stop move worth sending to the broker.
    pub trailing_step_atr: f64,
    /// Close positions held this long. At most [`MAX_HOLD_MINUTES_LIMIT`].
    pub max_hold_minutes: Option<u64>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            breakeven_enabled: true,
            breakeven_trigger_atr: 1.0,
            breakeven_buffer_atr: 0.1,
            trailing_enabled: true,
            trailing_activation_atr: 1.5,
            trailing_distance_atr: 1.0,
            trailing_step_atr: 0.1,
            max_hold_minutes: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub schema_version: u32,

    // Mode
    pub paper_trade: bool,
    pub initial_balance: f64,

    // Instruments
    pub symbols: Vec<SymbolConfig>,
    pub bar_count: usize,
    pub trading_timezone: Tz,

    // Loop
    pub poll_interval_secs: u64,
    pub call_timeout_ms: u64,

    pub risk: RiskConfig,
    pub split: SplitConfig,
    pub lifecycle: LifecycleConfig,

    // Paper-mode data
    pub data_dir: String,

    // Logging
    pub log_dir: String,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION,
            paper_trade: true,
            initial_balance: 10_000.0,
            symbols: vec![SymbolConfig::new("EURUSD")],
            bar_count: 300,
            trading_timezone: chrono_tz::UTC,
            poll_interval_secs: 5,
            call_timeout_ms: 5_000,
            risk: RiskConfig::default(),
            split: SplitConfig::default(),
            lifecycle: LifecycleConfig::default(),
            data_dir: "data".to_string(),
            log_dir: "logs".to_string(),
            log_level: "INFO".to_string(),
        }
    }
}

impl Config {
    /// Defaults, then `CONFIG_FILE` (JSON) if set, then environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        let mut cfg = match env("CONFIG_FILE") {
            Some(path) => {
                let raw = std::fs::read_to_string(&path)
                    .map_err(|e| ConfigError::Parse(format!("{}: {}", path, e)))?;
                Self::from_json_str(&raw)?
            }
            None => Config::default(),
        };

        let timeframe = match env("TIMEFRAME") {
            Some(tf) => Some(
                Timeframe::from_str_loose(&tf)
                    .ok_or_else(|| ConfigError::invalid("TIMEFRAME", format!("unknown timeframe {}", tf)))?,
            ),
            None => None,
        };

        if let Some(list) = env("SYMBOLS") {
            cfg.symbols = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(SymbolConfig::new)
                .collect();
        }
        if let Some(tf) = timeframe {
            for s in &mut cfg.symbols {
                s.timeframe = tf;
            }
        }

        if let Some(v) = env("PAPER_TRADE") {
            cfg.paper_trade = v.to_lowercase() == "true";
        }
        if let Some(v) = env("INITIAL_BALANCE") {
            cfg.initial_balance = parse_env("INITIAL_BALANCE", &v)?;
        }
        if let Some(v) = env("POLL_INTERVAL_SECS") {
            cfg.poll_interval_secs = parse_env("POLL_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = env("CALL_TIMEOUT_MS") {
            cfg.call_timeout_ms = parse_env("CALL_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = env("BASE_RISK_PERCENT") {
            cfg.risk.base_risk_percent = parse_env("BASE_RISK_PERCENT", &v)?;
        }
        if let Some(v) = env("MAX_DRAWDOWN_PERCENT") {
            cfg.risk.max_drawdown_percent = parse_env("MAX_DRAWDOWN_PERCENT", &v)?;
        }
        if let Some(v) = env("TRADING_TZ") {
            cfg.trading_timezone = v
                .parse::<Tz>()
                .map_err(|e| ConfigError::invalid("TRADING_TZ", e.to_string()))?;
        }
        if let Some(v) = env("DATA_DIR") {
            cfg.data_dir = v;
        }
        if let Some(v) = env("LOG_DIR") {
            cfg.log_dir = v;
        }
        if let Some(v) = env("LOG_LEVEL") {
            cfg.log_level = v;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let cfg: Config =
            serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn symbol(&self, name: &str) -> Option<&SymbolConfig> {
        self.symbols.iter().find(|s| s.symbol == name)
    }

    pub fn enabled_symbols(&self) -> impl Iterator<Item = &SymbolConfig> {
        self.symbols.iter().filter(|s| s.enabled)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schema_version != CONFIG_SCHEMA_VERSION {
            return Err(ConfigError::UnsupportedVersion {
                found: self.schema_version,
                expected: CONFIG_SCHEMA_VERSION,
            });
        }
        positive("initial_balance", self.initial_balance)?;
        if self.symbols.is_empty() {
            return Err(ConfigError::invalid("symbols", "at least one symbol is required"));
        }
        for (i, s) in self.symbols.iter().enumerate() {
            if self.symbols[..i].iter().any(|o| o.symbol == s.symbol) {
                return Err(ConfigError::invalid(
                    "symbols",
                    format!("duplicate symbol {}", s.symbol),
                ));
            }
            validate_symbol(s)?;
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::invalid("poll_interval_secs", "must be > 0"));
        }
        if self.call_timeout_ms == 0 {
            return Err(ConfigError::invalid("call_timeout_ms", "must be > 0"));
        }
        validate_risk(&self.risk)?;
        validate_split(&self.split)?;
        validate_lifecycle(&self.lifecycle)?;

        let largest_need = self
            .symbols
            .iter()
            .map(|s| crate::core::snapshot::required_bars(&s.indicators))
            .max()
            .unwrap_or(0);
        if self.bar_count < largest_need {
            return Err(ConfigError::invalid(
                "bar_count",
                format!("{} is below the {} bars the indicators need", self.bar_count, largest_need),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::invalid(key, e.to_string()))
}

fn positive(field: &str, v: f64) -> Result<(), ConfigError> {
    if v.is_finite() && v > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be a positive number, got {}", v)))
    }
}

fn unit_interval(field: &str, v: f64) -> Result<(), ConfigError> {
    if v.is_finite() && (0.0..=1.0).contains(&v) {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must lie in [0, 1], got {}", v)))
    }
}

fn period(field: &str, v: usize) -> Result<(), ConfigError> {
    if v == 0 {
        Err(ConfigError::invalid(field, "period must be > 0"))
    } else {
        Ok(())
    }
}

fn validate_symbol(s: &SymbolConfig) -> Result<(), ConfigError> {
    if s.symbol.trim().is_empty() {
        return Err(ConfigError::invalid("symbols.symbol", "must not be empty"));
    }
    let f = |name: &str| format!("symbols[{}].{}", s.symbol, name);

    positive(&f("pip_size"), s.pip_size)?;
    positive(&f("contract_size"), s.contract_size)?;
    positive(&f("volume_step"), s.volume_step)?;
    positive(&f("min_volume"), s.min_volume)?;
    positive(&f("max_volume"), s.max_volume)?;
    if s.min_volume > s.max_volume {
        return Err(ConfigError::invalid(f("min_volume"), "exceeds max_volume"));
    }
    if s.price_digits > 10 {
        return Err(ConfigError::invalid(f("price_digits"), "must be <= 10"));
    }

    let ind = &s.indicators;
    period(&f("indicators.fast_ma_period"), ind.fast_ma_period)?;
    period(&f("indicators.slow_ma_period"), ind.slow_ma_period)?;
    period(&f("indicators.rsi_period"), ind.rsi_period)?;
    period(&f("indicators.macd_fast"), ind.macd_fast)?;
    period(&f("indicators.macd_slow"), ind.macd_slow)?;
    period(&f("indicators.macd_signal"), ind.macd_signal)?;
    period(&f("indicators.atr_period"), ind.atr_period)?;
    period(&f("indicators.adx_period"), ind.adx_period)?;
    period(&f("indicators.volume_ma_period"), ind.volume_ma_period)?;
    period(&f("indicators.obv_slope_period"), ind.obv_slope_period)?;
    period(&f("indicators.momentum_period"), ind.momentum_period)?;
    period(&f("indicators.micro_fast_period"), ind.micro_fast_period)?;
    period(&f("indicators.micro_slow_period"), ind.micro_slow_period)?;
    if ind.fast_ma_period >= ind.slow_ma_period {
        return Err(ConfigError::invalid(
            f("indicators.fast_ma_period"),
            "must be below slow_ma_period",
        ));
    }
    if ind.macd_fast >= ind.macd_slow {
        return Err(ConfigError::invalid(f("indicators.macd_fast"), "must be below macd_slow"));
    }
    if ind.micro_fast_period >= ind.micro_slow_period {
        return Err(ConfigError::invalid(
            f("indicators.micro_fast_period"),
            "must be below micro_slow_period",
        ));
    }

    let flt = &s.filters;
    if !(flt.rsi_oversold > 0.0 && flt.rsi_oversold < flt.rsi_overbought && flt.rsi_overbought < 100.0)
    {
        return Err(ConfigError::invalid(
            f("filters.rsi_overbought"),
            "require 0 < rsi_oversold < rsi_overbought < 100",
        ));
    }
    if !(flt.macd_min_histogram.is_finite() && flt.macd_min_histogram >= 0.0) {
        return Err(ConfigError::invalid(f("filters.macd_min_histogram"), "must be >= 0"));
    }
    if !(flt.macd_saturation.is_finite() && flt.macd_saturation >= 1.0) {
        return Err(ConfigError::invalid(f("filters.macd_saturation"), "must be >= 1"));
    }
    if !(flt.adx_min >= 0.0 && flt.adx_full > flt.adx_min && flt.adx_full <= 100.0) {
        return Err(ConfigError::invalid(
            f("filters.adx_full"),
            "require 0 <= adx_min < adx_full <= 100",
        ));
    }
    positive(&f("filters.volume_full_ratio"), flt.volume_full_ratio)?;
    for h in flt.dead_hours.iter().chain(flt.golden_hours.iter()) {
        if *h > 23 {
            return Err(ConfigError::invalid(f("filters.hours"), format!("hour {} out of range", h)));
        }
    }
    if let Some(h) = flt.dead_hours.iter().find(|h| flt.golden_hours.contains(h)) {
        return Err(ConfigError::invalid(
            f("filters.golden_hours"),
            format!("hour {} is both dead and golden", h),
        ));
    }
    unit_interval(&f("filters.golden_hour_bonus"), flt.golden_hour_bonus)?;
    unit_interval(&f("filters.micro_cross_score"), flt.micro_cross_score)?;
    unit_interval(&f("filters.min_confidence"), flt.min_confidence)?;

    let w = &flt.weights;
    for (name, v) in [
        ("trend", w.trend),
        ("rsi", w.rsi),
        ("macd", w.macd),
        ("adx", w.adx),
        ("volume", w.volume),
    ] {
        if !(v.is_finite() && v >= 0.0) {
            return Err(ConfigError::invalid(f(&format!("filters.weights.{}", name)), "must be >= 0"));
        }
    }
    if w.trend <= 0.0 {
        return Err(ConfigError::invalid(f("filters.weights.trend"), "must be > 0"));
    }
    Ok(())
}

fn validate_risk(r: &RiskConfig) -> Result<(), ConfigError> {
    if !(r.base_risk_percent.is_finite() && r.base_risk_percent > 0.0 && r.base_risk_percent <= 10.0) {
        return Err(ConfigError::invalid("risk.base_risk_percent", "must lie in (0, 10]"));
    }
    positive("risk.min_risk_multiplier", r.min_risk_multiplier)?;
    positive("risk.max_risk_multiplier", r.max_risk_multiplier)?;
    if r.min_risk_multiplier > r.max_risk_multiplier {
        return Err(ConfigError::invalid(
            "risk.min_risk_multiplier",
            "must not exceed max_risk_multiplier",
        ));
    }
    if !(r.confidence_floor.is_finite() && (0.0..1.0).contains(&r.confidence_floor)) {
        return Err(ConfigError::invalid("risk.confidence_floor", "must lie in [0, 1)"));
    }
    unit_interval("risk.drawdown_dampening", r.drawdown_dampening)?;
    if !(r.max_drawdown_percent > 0.0 && r.max_drawdown_percent < 100.0) {
        return Err(ConfigError::invalid("risk.max_drawdown_percent", "must lie in (0, 100)"));
    }
    if !(r.max_daily_loss_percent > 0.0 && r.max_daily_loss_percent < 100.0) {
        return Err(ConfigError::invalid("risk.max_daily_loss_percent", "must lie in (0, 100)"));
    }
    if r.max_daily_trades == 0 {
        return Err(ConfigError::invalid("risk.max_daily_trades", "must be > 0"));
    }
    if r.max_trades_per_symbol == 0 {
        return Err(ConfigError::invalid("risk.max_trades_per_symbol", "must be > 0"));
    }
    if r.max_positions_per_symbol == 0 {
        return Err(ConfigError::invalid("risk.max_positions_per_symbol", "must be > 0"));
    }
    Ok(())
}

fn validate_split(s: &SplitConfig) -> Result<(), ConfigError> {
    positive("split.mode.sl", s.mode.sl_units())?;
    if s.tp_levels.is_empty() {
        return Err(ConfigError::invalid("split.tp_levels", "at least one level is required"));
    }
    if s.tp_levels.len() != s.close_percents.len() {
        return Err(ConfigError::invalid(
            "split.close_percents",
            format!(
                "{} percentages for {} take-profit levels",
                s.close_percents.len(),
                s.tp_levels.len()
            ),
        ));
    }
    if s.tp_levels.windows(2).any(|w| !(w[1] > w[0])) {
        return Err(ConfigError::invalid("split.tp_levels", "must be strictly increasing"));
    }
    if let Some(first) = s.tp_levels.first() {
        if !(*first > s.mode.sl_units()) {
            return Err(ConfigError::invalid(
                "split.tp_levels",
                format!(
                    "first level {} must exceed the stop distance {}",
                    first,
                    s.mode.sl_units()
                ),
            ));
        }
    }
    if s.close_percents.iter().any(|p| !(p.is_finite() && *p > 0.0)) {
        return Err(ConfigError::invalid("split.close_percents", "each share must be > 0"));
    }
    let total: f64 = s.close_percents.iter().sum();
    if (total - 100.0).abs() > 1e-6 {
        return Err(ConfigError::invalid(
            "split.close_percents",
            format!("must sum to 100, got {}", total),
        ));
    }
    Ok(())
}

fn validate_lifecycle(l: &LifecycleConfig) -> Result<(), ConfigError> {
    positive("lifecycle.breakeven_trigger_atr", l.breakeven_trigger_atr)?;
    if !(l.breakeven_buffer_atr.is_finite() && l.breakeven_buffer_atr >= 0.0) {
        return Err(ConfigError::invalid("lifecycle.breakeven_buffer_atr", "must be >= 0"));
    }
    if l.breakeven_buffer_atr >= l.breakeven_trigger_atr {
        return Err(ConfigError::invalid(
            "lifecycle.breakeven_buffer_atr",
            "must be below breakeven_trigger_atr",
        ));
    }
    positive("lifecycle.trailing_activation_atr", l.trailing_activation_atr)?;
    positive("lifecycle.trailing_distance_atr", l.trailing_distance_atr)?;
    if !(l.trailing_step_atr.is_finite() && l.trailing_step_atr >= 0.0) {
        return Err(ConfigError::invalid("lifecycle.trailing_step_atr", "must be >= 0"));
    }
    if l.breakeven_enabled && l.trailing_enabled && l.trailing_activation_atr <= l.breakeven_trigger_atr
    {
        return Err(ConfigError::invalid(
            "lifecycle.trailing_activation_atr",
            "must exceed breakeven_trigger_atr",
        ));
    }
    match l.max_hold_minutes {
        Some(0) => {
            return Err(ConfigError::invalid("lifecycle.max_hold_minutes", "must be > 0 when set"));
        }
        Some(m) if m > MAX_HOLD_MINUTES_LIMIT => {
            return Err(ConfigError::invalid(
                "lifecycle.max_hold_minutes",
                format!("must be <= {}", MAX_HOLD_MINUTES_LIMIT),
            ));
        }
        _ => {}
    }
    Ok(())
}

/// Owned by the polling loop. Replacement configs arrive through a
/// [`ConfigHandle`] and take effect only when [`ConfigStore::apply_pending`]
/// runs at the top of a cycle.
pub struct ConfigStore {
    active: Arc<Config>,
    shared: SharedConfig,
    tx: mpsc::UnboundedSender<Config>,
    rx: mpsc::UnboundedReceiver<Config>,
}

#[derive(Debug, Default)]
pub struct ApplyOutcome {
    pub applied: bool,
    pub rejected: Vec<ConfigError>,
}

impl ConfigStore {
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let active = Arc::new(config);
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Self {
            shared: Arc::new(RwLock::new(active.clone())),
            active,
            tx,
            rx,
        })
    }

    pub fn active(&self) -> Arc<Config> {
        self.active.clone()
    }

    pub fn handle(&self) -> ConfigHandle {
        ConfigHandle {
            tx: self.tx.clone(),
            shared: self.shared.clone(),
        }
    }

    /// Drain queued submissions in order. Each is validated on its own; the
    /// last valid one becomes active and invalid ones leave the prior snapshot
    /// in place.
    pub async fn apply_pending(&mut self) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();
        while let Ok(candidate) = self.rx.try_recv() {
            match candidate.validate() {
                Ok(()) => {
                    self.active = Arc::new(candidate);
                    outcome.applied = true;
                }
                Err(e) => {
                    debug!("Rejected config update: {}", e);
                    outcome.rejected.push(e);
                }
            }
        }
        if outcome.applied {
            *self.shared.write().await = self.active.clone();
            debug!("Config update applied");
        }
        outcome
    }
}

#[derive(Clone)]
pub struct ConfigHandle {
    tx: mpsc::UnboundedSender<Config>,
    shared: SharedConfig,
}

impl ConfigHandle {
    pub async fn snapshot(&self) -> Arc<Config> {
        self.shared.read().await.clone()
    }

    pub fn submit(&self, config: Config) -> Result<(), ConfigError> {
        self.tx.send(config).map_err(|_| ConfigError::StoreClosed)
    }
}
