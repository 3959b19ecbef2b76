use chrono::{DateTime, Duration, Utc};

use crate::core::snapshot::{IndicatorSnapshot, Reading};
use crate::models::{Candle, CandleSeries};

fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Create candles from (open, high, low, close) tuples with auto-incrementing 1m timestamps.
pub fn make_candles(data: &[(f64, f64, f64, f64)]) -> CandleSeries {
    let base = base_time();

    let candles: Vec<Candle> = data
        .iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| Candle {
            timestamp: base + Duration::minutes(i as i64),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 100.0,
        })
        .collect();

    CandleSeries::new(candles)
}

/// Create n rising (bullish) candles starting from `start` price.
pub fn make_bullish_trend(n: usize, start: f64) -> CandleSeries {
    let base = base_time();

    let candles: Vec<Candle> = (0..n)
        .map(|i| {
            let open = start + i as f64 * 10.0;
            let close = open + 8.0;
            Candle {
                timestamp: base + Duration::minutes(i as i64),
                open,
                high: close + 2.0,
                low: open - 1.0,
                close,
                volume: 100.0,
            }
        })
        .collect();

    CandleSeries::new(candles)
}

/// Create n falling (bearish) candles starting from `start` price.
pub fn make_bearish_trend(n: usize, start: f64) -> CandleSeries {
    let base = base_time();

    let candles: Vec<Candle> = (0..n)
        .map(|i| {
            let open = start - i as f64 * 10.0;
            let close = open - 8.0;
            Candle {
                timestamp: base + Duration::minutes(i as i64),
                open,
                high: open + 1.0,
                low: close - 2.0,
                close,
                volume: 100.0,
            }
        })
        .collect();

    CandleSeries::new(candles)
}

/// Steady decline that turns into a steeper rally 15 bars from the end, so
/// the 9/21 EMAs cross upward exactly once in the last 15 bars.
pub fn make_cross_up_series(n: usize) -> CandleSeries {
    let base = base_time();
    let turn = n.saturating_sub(15);
    let close_at = |i: usize| {
        if i <= turn {
            200.0 - i as f64
        } else {
            200.0 - turn as f64 + 3.0 * (i - turn) as f64
        }
    };

    let candles: Vec<Candle> = (0..n)
        .map(|i| {
            let close = close_at(i);
            let open = if i == 0 { close + 1.0 } else { close_at(i - 1) };
            Candle {
                timestamp: base + Duration::minutes(i as i64),
                open,
                high: open.max(close) + 0.5,
                low: open.min(close) - 0.5,
                close,
                volume: 100.0,
            }
        })
        .collect();

    CandleSeries::new(candles)
}

/// Snapshot pair for a fresh bullish crossover: RSI 55, MACD histogram
/// 0.0006, ADX unavailable, volume at 1.2x its average (score 0.8 against
/// the default 1.5 full ratio) with OBV rising.
pub fn bullish_cross_pair() -> (IndicatorSnapshot, IndicatorSnapshot) {
    let current = IndicatorSnapshot {
        timestamp: base_time(),
        close: 1.1005,
        fast_ma: 1.1003,
        slow_ma: 1.1001,
        rsi: 55.0,
        macd_line: 0.0016,
        macd_signal: 0.0010,
        macd_histogram: 0.0006,
        atr: 0.0010,
        momentum: 0.001,
        micro_fast: 1.1004,
        micro_slow: 1.1002,
        adx: Reading::Unavailable,
        plus_di: Reading::Unavailable,
        minus_di: Reading::Unavailable,
        volume: Reading::Value(1200.0),
        volume_ma: Reading::Value(1000.0),
        obv: Reading::Value(5000.0),
        obv_slope: Reading::Value(300.0),
        ma_last_side: None,
        micro_last_side: None,
    };
    let prior = IndicatorSnapshot {
        timestamp: base_time() - Duration::minutes(15),
        close: 1.0996,
        fast_ma: 1.0995,
        slow_ma: 1.1000,
        ..current.clone()
    };
    (prior, current)
}

/// Mirror image of [`bullish_cross_pair`] for the sell side, RSI 45.
pub fn bearish_cross_pair() -> (IndicatorSnapshot, IndicatorSnapshot) {
    let current = IndicatorSnapshot {
        timestamp: base_time(),
        close: 1.0995,
        fast_ma: 1.0997,
        slow_ma: 1.0999,
        rsi: 45.0,
        macd_line: -0.0016,
        macd_signal: -0.0010,
        macd_histogram: -0.0006,
        atr: 0.0010,
        momentum: -0.001,
        micro_fast: 1.0996,
        micro_slow: 1.0998,
        adx: Reading::Unavailable,
        plus_di: Reading::Unavailable,
        minus_di: Reading::Unavailable,
        volume: Reading::Value(1200.0),
        volume_ma: Reading::Value(1000.0),
        obv: Reading::Value(-5000.0),
        obv_slope: Reading::Value(-300.0),
        ma_last_side: None,
        micro_last_side: None,
    };
    let prior = IndicatorSnapshot {
        timestamp: base_time() - Duration::minutes(15),
        close: 1.1004,
        fast_ma: 1.1005,
        slow_ma: 1.1000,
        ..current.clone()
    };
    (prior, current)
}
