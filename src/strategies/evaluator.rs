use tracing::debug;

use crate::config::{FilterConfig, SymbolConfig};
use crate::core::sessions::{classify_hour, HourClass};
use crate::core::snapshot::{detect_crossover, IndicatorSnapshot, Reading};
use crate::models::{Direction, SignalDirection};
use crate::strategies::signals::{FilterRejection, ScoreBreakdown, Signal};

/// Ordered filter pipeline over the latest two snapshots.
///
/// Stages run in a fixed order and the first rejection short-circuits:
///
/// 1. trend edge (MA crossover, or micro crossover when enabled)
/// 2. RSI band
/// 3. MACD histogram sign and magnitude
/// 4. ADX strength (bypassed when unavailable)
/// 5. volume confirmation (score only)
/// 6. hour of day
///
/// The surviving scores are combined into a weighted confidence and checked
/// against `min_confidence` last. Evaluation never fails; every outcome is a
/// [`Signal`].
pub struct SignalEvaluator;

impl SignalEvaluator {
    pub fn evaluate(
        current: &IndicatorSnapshot,
        prior: &IndicatorSnapshot,
        symbol: &SymbolConfig,
        hour: u32,
    ) -> Signal {
        let filters = &symbol.filters;
        let mut scores = ScoreBreakdown::default();

        // 1. Trend edge
        let (direction, trend_score) = match trend_edge(current, prior, filters) {
            Some(edge) => edge,
            None => return Signal::rejected(FilterRejection::NoCrossover),
        };
        scores.trend = Some(trend_score);

        let reject = |reason: FilterRejection, scores: ScoreBreakdown| {
            debug!("{} {} rejected at {}", symbol.symbol, direction, reason);
            Signal {
                candidate: Some(direction),
                scores,
                ..Signal::rejected(reason)
            }
        };

        // 2. RSI band
        if filters.rsi_enabled {
            match rsi_stage(current.rsi, direction, filters) {
                Ok(score) => scores.rsi = Some(score),
                Err(reason) => return reject(reason, scores),
            }
        }

        // 3. MACD histogram
        if filters.macd_enabled {
            match macd_stage(current.macd_histogram, direction, filters) {
                Ok(score) => scores.macd = Some(score),
                Err(reason) => return reject(reason, scores),
            }
        }

        // 4. ADX strength
        if filters.adx_filter_enabled {
            if let Reading::Value(adx) = current.adx {
                if adx < filters.adx_min {
                    return reject(FilterRejection::AdxTooWeak, scores);
                }
                scores.adx = Some(unit((adx - filters.adx_min) / (filters.adx_full - filters.adx_min)));
            }
        }

        // 5. Volume confirmation
        if filters.volume_enabled {
            scores.volume = volume_score(current, direction, filters);
        }

        // 6. Hour of day
        let hour_class = classify_hour(filters, hour);
        match hour_class {
            HourClass::Dead => return reject(FilterRejection::DeadHour, scores),
            HourClass::Golden => scores.hour_bonus = filters.golden_hour_bonus,
            HourClass::Neutral => {}
        }

        let confidence = match weighted_confidence(&scores, filters) {
            Some(c) => c,
            None => return reject(FilterRejection::InvalidScore, scores),
        };

        let signal = Signal {
            direction: SignalDirection::from(direction),
            confidence,
            rejection: None,
            candidate: Some(direction),
            hour_class,
            scores,
        };

        if confidence < filters.min_confidence {
            debug!(
                "{} {} confidence {:.3} below {:.3}",
                symbol.symbol, direction, confidence, filters.min_confidence
            );
            return Signal {
                direction: SignalDirection::None,
                rejection: Some(FilterRejection::LowConfidence),
                ..signal
            };
        }
        signal
    }
}

fn unit(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

fn trend_edge(
    current: &IndicatorSnapshot,
    prior: &IndicatorSnapshot,
    filters: &FilterConfig,
) -> Option<(Direction, f64)> {
    if let Some(cross) = detect_crossover(prior.ma_side(), current.fast_ma, current.slow_ma) {
        return Some((cross.direction(), 1.0));
    }
    if filters.micro_cross_enabled {
        let micro = detect_crossover(prior.micro_side(), current.micro_fast, current.micro_slow)?;
        // A micro edge only counts when momentum agrees with it.
        let dir = micro.direction();
        if current.momentum * dir.sign() > 0.0 {
            return Some((dir, filters.micro_cross_score));
        }
    }
    None
}

/// The boundary value itself passes.
fn rsi_stage(rsi: f64, direction: Direction, filters: &FilterConfig) -> Result<f64, FilterRejection> {
    match direction {
        Direction::Long => {
            if rsi > filters.rsi_overbought {
                return Err(FilterRejection::RsiOverbought);
            }
            Ok(unit((filters.rsi_overbought - rsi) / (filters.rsi_overbought - 50.0)))
        }
        Direction::Short => {
            if rsi < filters.rsi_oversold {
                return Err(FilterRejection::RsiOversold);
            }
            Ok(unit((rsi - filters.rsi_oversold) / (50.0 - filters.rsi_oversold)))
        }
    }
}

fn macd_stage(histogram: f64, direction: Direction, filters: &FilterConfig) -> Result<f64, FilterRejection> {
    if histogram * direction.sign() <= 0.0 {
        return Err(FilterRejection::MacdSignMismatch);
    }
    let magnitude = histogram.abs();
    if magnitude < filters.macd_min_histogram {
        return Err(FilterRejection::MacdTooWeak);
    }
    let full = filters.macd_min_histogram * filters.macd_saturation;
    if full <= 0.0 {
        return Ok(1.0);
    }
    Ok(unit(magnitude / full))
}

fn volume_score(current: &IndicatorSnapshot, direction: Direction, filters: &FilterConfig) -> Option<f64> {
    let volume = current.volume.value()?;
    let average = current.volume_ma.value()?;
    if average <= 0.0 {
        return None;
    }
    let mut score = unit(volume / average / filters.volume_full_ratio);
    if let Reading::Value(slope) = current.obv_slope {
        if slope * direction.sign() < 0.0 {
            score *= 0.5;
        }
    }
    Some(score)
}

/// Weighted mean over the stages that produced a score, plus the hour bonus,
/// clipped to [0, 1]. `None` if the result is not a finite number.
fn weighted_confidence(scores: &ScoreBreakdown, filters: &FilterConfig) -> Option<f64> {
    let w = &filters.weights;
    let parts = [
        (scores.trend, w.trend),
        (scores.rsi, w.rsi),
        (scores.macd, w.macd),
        (scores.adx, w.adx),
        (scores.volume, w.volume),
    ];
    let (sum, weight) = parts
        .iter()
        .filter_map(|(score, weight)| score.map(|s| (s * weight, *weight)))
        .fold((0.0, 0.0), |(s, w), (ds, dw)| (s + ds, w + dw));
    if !(weight > 0.0) {
        return None;
    }
    let raw = sum / weight + scores.hour_bonus;
    raw.is_finite().then(|| unit(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{bullish_cross_pair, bearish_cross_pair};

    fn symbol() -> SymbolConfig {
        let mut s = SymbolConfig::new("EURUSD");
        s.filters.dead_hours = vec![0, 1, 2];
        s.filters.golden_hours = vec![11];
        s
    }

    #[test]
    fn reference_buy_scenario_passes() {
        let (prior, current) = bullish_cross_pair();
        let signal = SignalEvaluator::evaluate(&current, &prior, &symbol(), 11);

        assert_eq!(signal.direction, SignalDirection::Buy);
        assert_eq!(signal.rejection, None);
        assert_eq!(signal.hour_class, HourClass::Golden);
        assert_eq!(signal.scores.adx, None);
        assert!((signal.scores.volume.unwrap() - 0.8).abs() < 1e-9);
        // (0.30 + 0.75*0.15 + 0.6*0.25 + 0.8*0.15) / 0.85 + 0.1
        let expected = 0.6825 / 0.85 + 0.1;
        assert!((signal.confidence - expected).abs() < 1e-9);
        assert!(signal.confidence >= symbol().filters.min_confidence);
    }

    #[test]
    fn no_edge_yields_none() {
        let (_, current) = bullish_cross_pair();
        // Already above on both bars: a level, not an edge.
        let signal = SignalEvaluator::evaluate(&current, &current, &symbol(), 11);
        assert_eq!(signal.direction, SignalDirection::None);
        assert_eq!(signal.rejection, Some(FilterRejection::NoCrossover));
        assert_eq!(signal.confidence, 0.0);
    }

    #[test]
    fn dead_hour_rejects_regardless_of_indicators() {
        let (prior, current) = bullish_cross_pair();
        let signal = SignalEvaluator::evaluate(&current, &prior, &symbol(), 1);
        assert_eq!(signal.direction, SignalDirection::None);
        assert_eq!(signal.rejection, Some(FilterRejection::DeadHour));
        assert_eq!(signal.confidence, 0.0);
    }

    #[test]
    fn rsi_boundary_is_not_rejecting() {
        let (prior, mut current) = bullish_cross_pair();
        current.rsi = 70.0;
        let signal = SignalEvaluator::evaluate(&current, &prior, &symbol(), 11);
        assert_ne!(signal.rejection, Some(FilterRejection::RsiOverbought));
        assert_eq!(signal.scores.rsi, Some(0.0));

        current.rsi = 70.01;
        let signal = SignalEvaluator::evaluate(&current, &prior, &symbol(), 11);
        assert_eq!(signal.rejection, Some(FilterRejection::RsiOverbought));
    }

    #[test]
    fn sell_side_checks_oversold() {
        let (prior, mut current) = bearish_cross_pair();
        current.rsi = 29.0;
        let signal = SignalEvaluator::evaluate(&current, &prior, &symbol(), 9);
        assert_eq!(signal.rejection, Some(FilterRejection::RsiOversold));
        assert_eq!(signal.candidate, Some(Direction::Short));

        current.rsi = 45.0;
        let signal = SignalEvaluator::evaluate(&current, &prior, &symbol(), 9);
        assert_eq!(signal.direction, SignalDirection::Sell);
    }

    #[test]
    fn macd_sign_and_magnitude_gate() {
        let (prior, mut current) = bullish_cross_pair();
        current.macd_histogram = -0.0006;
        let signal = SignalEvaluator::evaluate(&current, &prior, &symbol(), 11);
        assert_eq!(signal.rejection, Some(FilterRejection::MacdSignMismatch));

        current.macd_histogram = 0.0004;
        let signal = SignalEvaluator::evaluate(&current, &prior, &symbol(), 11);
        assert_eq!(signal.rejection, Some(FilterRejection::MacdTooWeak));
    }

    #[test]
    fn adx_gate_only_when_available() {
        let (prior, mut current) = bullish_cross_pair();
        current.adx = Reading::Value(15.0);
        let signal = SignalEvaluator::evaluate(&current, &prior, &symbol(), 11);
        assert_eq!(signal.rejection, Some(FilterRejection::AdxTooWeak));

        current.adx = Reading::Value(30.0);
        let signal = SignalEvaluator::evaluate(&current, &prior, &symbol(), 11);
        assert_eq!(signal.scores.adx, Some(0.5));
        assert_eq!(signal.direction, SignalDirection::Buy);
    }

    #[test]
    fn opposing_obv_halves_volume_score() {
        let (prior, mut current) = bullish_cross_pair();
        current.obv_slope = Reading::Value(-500.0);
        let signal = SignalEvaluator::evaluate(&current, &prior, &symbol(), 11);
        assert!((signal.scores.volume.unwrap() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn missing_volume_drops_component() {
        let (prior, mut current) = bullish_cross_pair();
        current.volume = Reading::Unavailable;
        let signal = SignalEvaluator::evaluate(&current, &prior, &symbol(), 9);
        assert_eq!(signal.scores.volume, None);
        // (0.30 + 0.1125 + 0.15) / 0.70
        assert!((signal.confidence - 0.5625 / 0.70).abs() < 1e-9);
    }

    #[test]
    fn low_confidence_is_last_gate() {
        let (prior, current) = bullish_cross_pair();
        let mut s = symbol();
        s.filters.min_confidence = 0.95;
        let signal = SignalEvaluator::evaluate(&current, &prior, &s, 11);
        assert_eq!(signal.direction, SignalDirection::None);
        assert_eq!(signal.rejection, Some(FilterRejection::LowConfidence));
        assert!(signal.confidence > 0.0);
    }

    #[test]
    fn micro_cross_fallback_uses_reduced_trend_score() {
        let (prior, mut current) = bullish_cross_pair();
        // Main MAs stay below: no main edge.
        current.fast_ma = current.slow_ma - 0.001;
        let mut p = prior.clone();
        p.micro_fast = p.micro_slow - 0.0001;
        current.micro_fast = current.micro_slow + 0.0001;
        current.momentum = 0.002;

        let mut s = symbol();
        let signal = SignalEvaluator::evaluate(&current, &p, &s, 11);
        assert_eq!(signal.rejection, Some(FilterRejection::NoCrossover));

        s.filters.micro_cross_enabled = true;
        let signal = SignalEvaluator::evaluate(&current, &p, &s, 11);
        assert_eq!(signal.scores.trend, Some(s.filters.micro_cross_score));
        assert_eq!(signal.candidate, Some(Direction::Long));
    }

    #[test]
    fn disabled_stages_do_not_reject() {
        let (prior, mut current) = bullish_cross_pair();
        current.rsi = 90.0;
        current.macd_histogram = -1.0;
        let mut s = symbol();
        s.filters.rsi_enabled = false;
        s.filters.macd_enabled = false;
        let signal = SignalEvaluator::evaluate(&current, &prior, &s, 11);
        assert_eq!(signal.direction, SignalDirection::Buy);
        assert_eq!(signal.scores.rsi, None);
        assert_eq!(signal.scores.macd, None);
    }
}
