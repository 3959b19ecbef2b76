use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Candle {
    pub fn total_range(&self) -> f64 {
        self.high - self.low
    }

    /// Wilder true range against the previous close.
    pub fn true_range(&self, prev_close: Option<f64>) -> f64 {
        match prev_close {
            Some(pc) => {
                let hc = (self.high - pc).abs();
                let lc = (self.low - pc).abs();
                self.total_range().max(hc).max(lc)
            }
            None => self.total_range(),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite()
            && self.volume.is_finite()
    }
}

/// Ordered OHLCV bars, most recent last. Owned for a single poll cycle.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CandleSeries {
    candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn new(candles: Vec<Candle>) -> Self {
        Self { candles }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Candle> {
        self.candles.get(index)
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn first(&self) -> Option<&Candle> {
        self.candles.first()
    }

    pub fn tail(&self, n: usize) -> CandleSeries {
        let start = self.candles.len().saturating_sub(n);
        CandleSeries::new(self.candles[start..].to_vec())
    }

    pub fn head(&self, n: usize) -> CandleSeries {
        let end = n.min(self.candles.len());
        CandleSeries::new(self.candles[..end].to_vec())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candle> {
        self.candles.iter()
    }

    pub fn as_slice(&self) -> &[Candle] {
        &self.candles
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.volume).collect()
    }

    /// Index of the first bar carrying a non-finite field, if any.
    pub fn first_malformed(&self) -> Option<usize> {
        self.candles.iter().position(|c| !c.is_finite())
    }

    /// True when the feed supplies no volume at all (every bar is zero).
    pub fn has_volume(&self) -> bool {
        self.candles.iter().any(|c| c.volume > 0.0)
    }

    pub fn push(&mut self, candle: Candle) {
        self.candles.push(candle);
    }
}

impl std::ops::Index<usize> for CandleSeries {
    type Output = Candle;
    fn index(&self, index: usize) -> &Self::Output {
        &self.candles[index]
    }
}

impl IntoIterator for CandleSeries {
    type Item = Candle;
    type IntoIter = std::vec::IntoIter<Candle>;
    fn into_iter(self) -> Self::IntoIter {
        self.candles.into_iter()
    }
}

impl<'a> IntoIterator for &'a CandleSeries {
    type Item = &'a Candle;
    type IntoIter = std::slice::Iter<'a, Candle>;
    fn into_iter(self) -> Self::IntoIter {
        self.candles.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::make_candles;

    #[test]
    fn true_range_uses_gap_from_previous_close() {
        let c = Candle {
            timestamp: Utc::now(),
            open: 105.0,
            high: 108.0,
            low: 104.0,
            close: 107.0,
            volume: 10.0,
        };
        assert!((c.true_range(None) - 4.0).abs() < 1e-9);
        // gap up from 100: high - prev close dominates
        assert!((c.true_range(Some(100.0)) - 8.0).abs() < 1e-9);
    }

    #[test]
    fn series_tail_and_head() {
        let s = make_candles(&[
            (100.0, 105.0, 95.0, 102.0),
            (102.0, 108.0, 100.0, 106.0),
            (106.0, 112.0, 104.0, 110.0),
        ]);
        assert_eq!(s.len(), 3);
        let tail = s.tail(2);
        assert_eq!(tail.len(), 2);
        assert!((tail[0].open - 102.0).abs() < 1e-9);
        let head = s.head(1);
        assert!((head[0].open - 100.0).abs() < 1e-9);
        assert_eq!(s.tail(10).len(), 3);
    }

    #[test]
    fn malformed_bar_is_located() {
        let mut s = make_candles(&[(1.0, 2.0, 0.5, 1.5), (1.5, 2.5, 1.0, 2.0)]);
        assert_eq!(s.first_malformed(), None);
        s.push(Candle {
            timestamp: Utc::now(),
            open: 2.0,
            high: f64::NAN,
            low: 1.0,
            close: 2.0,
            volume: 1.0,
        });
        assert_eq!(s.first_malformed(), Some(2));
    }

    #[test]
    fn volume_presence() {
        let s = make_candles(&[(1.0, 2.0, 0.5, 1.5)]);
        assert!(s.has_volume());
        let mut bars: Vec<Candle> = s.into_iter().collect();
        bars[0].volume = 0.0;
        assert!(!CandleSeries::new(bars).has_volume());
    }
}
