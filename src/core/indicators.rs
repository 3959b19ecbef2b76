//! Indicator formulas over bar series.
//!
//! Every function returns a vector aligned with its input; `None` marks the
//! warmup region (or an undefined point) rather than a zero placeholder.
//! RSI, ATR and ADX use Wilder smoothing.

use crate::models::Candle;

pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let mut sum: f64 = values[..period].iter().sum();
    out[period - 1] = Some(sum / period as f64);
    for i in period..values.len() {
        sum += values[i] - values[i - period];
        out[i] = Some(sum / period as f64);
    }
    out
}

/// EMA seeded with the SMA of the first `period` values.
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut prev = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(prev);
    for i in period..values.len() {
        prev = values[i] * k + prev * (1.0 - k);
        out[i] = Some(prev);
    }
    out
}

/// EMA over a series whose head is undefined (e.g. the MACD line).
fn ema_defined(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let start = match values.iter().position(Option::is_some) {
        Some(s) => s,
        None => return vec![None; values.len()],
    };
    let tail: Vec<f64> = values[start..].iter().map(|v| v.unwrap_or(f64::NAN)).collect();
    let mut out = vec![None; start];
    out.extend(ema(&tail, period));
    out
}

pub fn rsi(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() <= period {
        return out;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = closes[i] - closes[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss -= change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    out[period] = Some(rsi_value(avg_gain, avg_loss));

    for i in (period + 1)..closes.len() {
        let change = closes[i] - closes[i - 1];
        let (gain, loss) = if change > 0.0 { (change, 0.0) } else { (0.0, -change) };
        avg_gain = (avg_gain * (period - 1) as f64 + gain) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + loss) / period as f64;
        out[i] = Some(rsi_value(avg_gain, avg_loss));
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            50.0
        } else {
            100.0
        }
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

#[derive(Debug, Clone)]
pub struct MacdSeries {
    pub line: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
    pub histogram: Vec<Option<f64>>,
}

pub fn macd(closes: &[f64], fast: usize, slow: usize, signal_period: usize) -> MacdSeries {
    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);
    let line: Vec<Option<f64>> = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| match (f, s) {
            (Some(f), Some(s)) => Some(f - s),
            _ => None,
        })
        .collect();
    let signal = ema_defined(&line, signal_period);
    let histogram = line
        .iter()
        .zip(&signal)
        .map(|(l, s)| match (l, s) {
            (Some(l), Some(s)) => Some(l - s),
            _ => None,
        })
        .collect();
    MacdSeries {
        line,
        signal,
        histogram,
    }
}

pub fn true_ranges(candles: &[Candle]) -> Vec<f64> {
    candles
        .iter()
        .enumerate()
        .map(|(i, c)| c.true_range(i.checked_sub(1).map(|p| candles[p].close)))
        .collect()
}

pub fn atr(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; candles.len()];
    if period == 0 || candles.len() < period {
        return out;
    }
    let trs = true_ranges(candles);
    let mut prev = trs[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(prev);
    for i in period..trs.len() {
        prev = (prev * (period - 1) as f64 + trs[i]) / period as f64;
        out[i] = Some(prev);
    }
    out
}

#[derive(Debug, Clone)]
pub struct AdxSeries {
    pub adx: Vec<Option<f64>>,
    pub plus_di: Vec<Option<f64>>,
    pub minus_di: Vec<Option<f64>>,
}

/// Wilder's ADX with ±DI. The first DI value needs `period + 1` bars and the
/// first ADX `2 * period`. Points with no directional movement at all are
/// undefined and restart the ADX average.
pub fn adx(candles: &[Candle], period: usize) -> AdxSeries {
    let n = candles.len();
    let mut series = AdxSeries {
        adx: vec![None; n],
        plus_di: vec![None; n],
        minus_di: vec![None; n],
    };
    if period == 0 || n <= period {
        return series;
    }

    let trs = true_ranges(candles);
    let mut plus_dm = vec![0.0; n];
    let mut minus_dm = vec![0.0; n];
    for i in 1..n {
        let up = candles[i].high - candles[i - 1].high;
        let down = candles[i - 1].low - candles[i].low;
        if up > down && up > 0.0 {
            plus_dm[i] = up;
        }
        if down > up && down > 0.0 {
            minus_dm[i] = down;
        }
    }

    let p = period as f64;
    let mut s_tr: f64 = trs[1..=period].iter().sum();
    let mut s_plus: f64 = plus_dm[1..=period].iter().sum();
    let mut s_minus: f64 = minus_dm[1..=period].iter().sum();

    let mut seed: Vec<f64> = Vec::with_capacity(period);
    let mut adx_prev: Option<f64> = None;

    for i in period..n {
        if i > period {
            s_tr = s_tr - s_tr / p + trs[i];
            s_plus = s_plus - s_plus / p + plus_dm[i];
            s_minus = s_minus - s_minus / p + minus_dm[i];
        }
        if s_tr <= 0.0 {
            seed.clear();
            adx_prev = None;
            continue;
        }
        let pdi = 100.0 * s_plus / s_tr;
        let mdi = 100.0 * s_minus / s_tr;
        series.plus_di[i] = Some(pdi);
        series.minus_di[i] = Some(mdi);

        let di_sum = pdi + mdi;
        if di_sum <= 0.0 {
            seed.clear();
            adx_prev = None;
            continue;
        }
        let dx = 100.0 * (pdi - mdi).abs() / di_sum;

        match adx_prev {
            Some(prev) => {
                let next = (prev * (p - 1.0) + dx) / p;
                adx_prev = Some(next);
                series.adx[i] = Some(next);
            }
            None => {
                seed.push(dx);
                if seed.len() == period {
                    let first = seed.iter().sum::<f64>() / p;
                    adx_prev = Some(first);
                    series.adx[i] = Some(first);
                }
            }
        }
    }
    series
}

pub fn obv(candles: &[Candle]) -> Vec<f64> {
    let mut out = Vec::with_capacity(candles.len());
    let mut running = 0.0;
    for (i, c) in candles.iter().enumerate() {
        if i == 0 {
            running = c.volume;
        } else {
            let prev = candles[i - 1].close;
            if c.close > prev {
                running += c.volume;
            } else if c.close < prev {
                running -= c.volume;
            }
        }
        out.push(running);
    }
    out
}

/// Fractional change over `period` bars: `v[i] / v[i - period] - 1`.
pub fn rate_of_change(values: &[f64], period: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            let base = values[i.checked_sub(period)?];
            if period == 0 || base == 0.0 {
                None
            } else {
                Some(values[i] / base - 1.0)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{make_bullish_trend, make_candles};

    fn approx(a: Option<f64>, b: f64) -> bool {
        a.map_or(false, |a| (a - b).abs() < 1e-9)
    }

    #[test]
    fn sma_known_values() {
        let out = sma(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert_eq!(out[0], None);
        assert_eq!(out[1], None);
        assert!(approx(out[2], 2.0));
        assert!(approx(out[4], 4.0));
    }

    #[test]
    fn ema_of_constant_is_constant() {
        let out = ema(&[5.0; 20], 6);
        assert_eq!(out[4], None);
        assert!(out[5..].iter().all(|v| approx(*v, 5.0)));
    }

    #[test]
    fn ema_tracks_faster_than_sma() {
        let mut values = vec![10.0; 10];
        values.extend(vec![20.0; 3]);
        let e = ema(&values, 5);
        let s = sma(&values, 5);
        assert!(e[12].unwrap() > s[12].unwrap() - 1e-9);
    }

    #[test]
    fn rsi_extremes_and_midpoint() {
        let rising: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        assert!(approx(rsi(&rising, 14)[29], 100.0));

        let alternating: Vec<f64> = (0..31).map(|i| if i % 2 == 0 { 100.0 } else { 101.0 }).collect();
        let r = rsi(&alternating, 14)[14].unwrap();
        assert!((r - 50.0).abs() < 1e-9);

        let flat = vec![100.0; 20];
        assert!(approx(rsi(&flat, 14)[19], 50.0));
    }

    #[test]
    fn macd_histogram_positive_in_acceleration() {
        let mut closes: Vec<f64> = vec![1.0; 40];
        closes.extend((1..=20).map(|i| 1.0 + i as f64 * 0.001));
        let m = macd(&closes, 12, 26, 9);
        let last = closes.len() - 1;
        assert!(m.line[last].unwrap() > 0.0);
        assert!(m.histogram[last].unwrap() > 0.0);
        // signal needs slow + signal - 1 bars before it is defined
        assert_eq!(m.signal[26 + 9 - 3], None);
        assert!(m.signal[26 + 9 - 2].is_some());
    }

    #[test]
    fn atr_of_uniform_bars_equals_their_range() {
        let candles = make_candles(&vec![(100.0, 101.0, 99.0, 100.0); 20]);
        let out = atr(candles.as_slice(), 14);
        assert_eq!(out[12], None);
        assert!(approx(out[13], 2.0));
        assert!(approx(out[19], 2.0));
    }

    #[test]
    fn adx_reads_strong_uptrend() {
        let candles = make_bullish_trend(60, 100.0);
        let series = adx(candles.as_slice(), 14);
        assert_eq!(series.adx[26], None);
        let last = candles.len() - 1;
        assert!(series.adx[last].unwrap() > 25.0);
        assert!(series.plus_di[last].unwrap() > series.minus_di[last].unwrap());
    }

    #[test]
    fn adx_undefined_without_range() {
        let candles = make_candles(&vec![(100.0, 100.0, 100.0, 100.0); 40]);
        let series = adx(candles.as_slice(), 14);
        assert!(series.adx.iter().all(Option::is_none));
    }

    #[test]
    fn obv_accumulates_by_close_direction() {
        let candles = make_candles(&[
            (10.0, 11.0, 9.0, 10.0),
            (10.0, 12.0, 9.0, 11.0),
            (11.0, 12.0, 9.0, 10.5),
            (10.5, 11.0, 10.0, 10.5),
        ]);
        // make_candles uses volume 100 per bar
        assert_eq!(obv(candles.as_slice()), vec![100.0, 200.0, 100.0, 100.0]);
    }

    #[test]
    fn rate_of_change_guards_zero_base() {
        let out = rate_of_change(&[0.0, 1.0, 2.0, 4.0], 2);
        assert_eq!(out[1], None);
        assert_eq!(out[2], None);
        assert!(approx(out[3], 3.0));
    }
}
