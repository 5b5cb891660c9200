use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::normalizer::ValueNormalizer;
use crate::error::EngineError;
use crate::models::{Candle, CandleSeries, Direction, SwingType, Timeframe, Trend};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwingPoint {
    pub swing_type: SwingType,
    pub price: f64,
    pub index: usize,
    pub timestamp: DateTime<Utc>,
}

/// A coarse-timeframe close beyond the prior structural extreme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureBreak {
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    /// The swing extreme that was broken. Everything downstream anchors here.
    pub level: f64,
    /// How far the breaking close went past the level.
    pub magnitude_pips: f64,
}

pub struct StructureScanner {
    pub swing_lookback: usize,
}

impl StructureScanner {
    pub fn new() -> Self {
        Self::with_lookback(2)
    }

    pub fn with_lookback(swing_lookback: usize) -> Self {
        Self {
            swing_lookback: swing_lookback.max(1),
        }
    }

    /// Candles needed for two swings of each kind plus the breaking candle.
    pub fn min_history(&self) -> usize {
        self.swing_lookback * 4 + 3
    }

    /// Look for a structure break on the latest closed candle.
    ///
    /// An upward break needs a prior downtrend (lower highs and lower lows)
    /// and a close above the latest swing high that nothing has closed above
    /// since. Downward is the mirror image.
    pub fn scan(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &CandleSeries,
        normalizer: &ValueNormalizer,
    ) -> Result<Option<StructureBreak>, EngineError> {
        if candles.len() < self.min_history() {
            return Err(EngineError::InsufficientHistory {
                symbol: symbol.to_string(),
                timeframe,
                needed: self.min_history(),
                have: candles.len(),
            });
        }
        let Some((last, history)) = candles.as_slice().split_last() else {
            return Ok(None);
        };

        let (highs, lows) = self.find_swings(history);
        let trend = prior_trend(&highs, &lows);

        let found = match trend {
            Trend::Bearish => highs.last().and_then(|sh| {
                let unbroken = history[sh.index + 1..].iter().all(|c| c.close <= sh.price);
                (unbroken && last.close > sh.price).then(|| StructureBreak {
                    timestamp: last.timestamp,
                    direction: Direction::Long,
                    level: sh.price,
                    magnitude_pips: normalizer.to_pips(last.close - sh.price),
                })
            }),
            Trend::Bullish => lows.last().and_then(|sl| {
                let unbroken = history[sl.index + 1..].iter().all(|c| c.close >= sl.price);
                (unbroken && last.close < sl.price).then(|| StructureBreak {
                    timestamp: last.timestamp,
                    direction: Direction::Short,
                    level: sl.price,
                    magnitude_pips: normalizer.to_pips(sl.price - last.close),
                })
            }),
            Trend::Neutral => None,
        };

        Ok(found)
    }

    /// Swing highs/lows: the extreme of a symmetric `swing_lookback` window.
    pub fn find_swings(&self, candles: &[Candle]) -> (Vec<SwingPoint>, Vec<SwingPoint>) {
        let lb = self.swing_lookback;
        let len = candles.len();
        let mut highs = Vec::new();
        let mut lows = Vec::new();
        if len <= lb * 2 {
            return (highs, lows);
        }

        for i in lb..(len - lb) {
            let window = &candles[i - lb..=i + lb];

            let current_high = candles[i].high;
            if window.iter().all(|c| c.high <= current_high) {
                highs.push(SwingPoint {
                    swing_type: SwingType::High,
                    price: current_high,
                    index: i,
                    timestamp: candles[i].timestamp,
                });
            }

            let current_low = candles[i].low;
            if window.iter().all(|c| c.low >= current_low) {
                lows.push(SwingPoint {
                    swing_type: SwingType::Low,
                    price: current_low,
                    index: i,
                    timestamp: candles[i].timestamp,
                });
            }
        }

        (highs, lows)
    }
}

impl Default for StructureScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Trend from the last two swings of each kind.
pub fn prior_trend(highs: &[SwingPoint], lows: &[SwingPoint]) -> Trend {
    let (Some([h1, h2]), Some([l1, l2])) = (last_two(highs), last_two(lows)) else {
        return Trend::Neutral;
    };
    if h2.price < h1.price && l2.price < l1.price {
        Trend::Bearish
    } else if h2.price > h1.price && l2.price > l1.price {
        Trend::Bullish
    } else {
        Trend::Neutral
    }
}

fn last_two(points: &[SwingPoint]) -> Option<&[SwingPoint; 2]> {
    points.len().checked_sub(2).and_then(|s| points[s..].try_into().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::instrument::classify;
    use crate::test_helpers::{coarse_downtrend_then_break, make_hl_candles, mirror};
    use std::sync::Arc;

    fn usdjpy() -> ValueNormalizer {
        ValueNormalizer::new(Arc::new(classify("USDJPY").unwrap()))
    }

    #[test]
    fn upward_break_after_downtrend() {
        let candles = coarse_downtrend_then_break(147.05);
        let scanner = StructureScanner::with_lookback(2);
        let brk = scanner.scan("USDJPY", Timeframe::H1, &candles, &usdjpy()).unwrap().unwrap();
        assert_eq!(brk.direction, Direction::Long);
        assert!((brk.level - 146.98).abs() < 1e-9);
        assert!((brk.magnitude_pips - 7.0).abs() < 1e-6);
    }

    #[test]
    fn no_break_when_close_stays_below_level() {
        let candles = coarse_downtrend_then_break(146.95);
        let scanner = StructureScanner::with_lookback(2);
        assert!(scanner.scan("USDJPY", Timeframe::H1, &candles, &usdjpy()).unwrap().is_none());
    }

    #[test]
    fn downward_break_is_the_mirror_image() {
        let candles = mirror(&coarse_downtrend_then_break(147.05), 147.0);
        let scanner = StructureScanner::with_lookback(2);
        let brk = scanner.scan("USDJPY", Timeframe::H1, &candles, &usdjpy()).unwrap().unwrap();
        assert_eq!(brk.direction, Direction::Short);
        assert!((brk.level - 147.02).abs() < 1e-9);
        assert!((brk.magnitude_pips - 7.0).abs() < 1e-6);
    }

    #[test]
    fn short_history_is_a_data_error() {
        let candles = make_hl_candles(&[(147.0, 146.9), (147.1, 147.0)]);
        let scanner = StructureScanner::with_lookback(2);
        let err = scanner.scan("USDJPY", Timeframe::H1, &candles, &usdjpy()).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientHistory { .. }));
    }

    #[test]
    fn find_swings_locates_expected_pivots() {
        let candles = coarse_downtrend_then_break(147.05);
        let scanner = StructureScanner::with_lookback(2);
        let hist = &candles.as_slice()[..candles.len() - 1];
        let (highs, lows) = scanner.find_swings(hist);
        let hi: Vec<usize> = highs.iter().map(|s| s.index).collect();
        let lo: Vec<usize> = lows.iter().map(|s| s.index).collect();
        assert_eq!(hi, vec![2, 8]);
        assert_eq!(lo, vec![5, 10]);
        assert_eq!(prior_trend(&highs, &lows), Trend::Bearish);
    }
}
