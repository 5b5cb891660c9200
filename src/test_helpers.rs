use chrono::{DateTime, Duration, Utc};

use crate::config::Config;
use crate::models::{Candle, CandleSeries};
use crate::strategies::phase_machine::PhaseMachine;

pub fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// `base_time()` plus `minutes`.
pub fn ts(minutes: i64) -> DateTime<Utc> {
    base_time() + Duration::minutes(minutes)
}

/// Create candles from (open, high, low, close) tuples with auto-incrementing 1m timestamps.
pub fn make_candles(data: &[(f64, f64, f64, f64)]) -> CandleSeries {
    let candles: Vec<Candle> = data
        .iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| Candle {
            timestamp: ts(i as i64),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 100.0,
        })
        .collect();

    CandleSeries::new(candles)
}

/// Hourly candles from (high, low) pairs; open and close sit at the midpoint.
pub fn make_hl_candles(data: &[(f64, f64)]) -> CandleSeries {
    let candles: Vec<Candle> = data
        .iter()
        .enumerate()
        .map(|(i, &(h, l))| {
            let mid = (h + l) / 2.0;
            Candle {
                timestamp: base_time() + Duration::hours(i as i64),
                open: mid,
                high: h,
                low: l,
                close: mid,
                volume: 100.0,
            }
        })
        .collect();

    CandleSeries::new(candles)
}

/// USDJPY-scaled hourly series: lower highs and lower lows, then a final
/// candle closing at `last_close`. The last unbroken swing high is 146.98.
pub fn coarse_downtrend_then_break(last_close: f64) -> CandleSeries {
    let mut series = make_hl_candles(&[
        (147.30, 147.10),
        (147.40, 147.20),
        (147.60, 147.35),
        (147.45, 147.15),
        (147.30, 146.90),
        (147.00, 146.70),
        (146.90, 146.80),
        (146.95, 146.85),
        (146.98, 146.88),
        (146.90, 146.60),
        (146.70, 146.50),
        (146.80, 146.55),
        (146.90, 146.62),
    ]);
    let timestamp = base_time() + Duration::hours(series.len() as i64);
    series.push(Candle {
        timestamp,
        open: 146.88,
        high: last_close.max(147.10),
        low: 146.85,
        close: last_close,
        volume: 100.0,
    });
    series
}

/// Reflect every price around `axis`, turning an upward setup into a downward one.
pub fn mirror(series: &CandleSeries, axis: f64) -> CandleSeries {
    let flip = |p: f64| 2.0 * axis - p;
    let candles = series
        .iter()
        .map(|c| Candle {
            timestamp: c.timestamp,
            open: flip(c.open),
            high: flip(c.low),
            low: flip(c.high),
            close: flip(c.close),
            volume: c.volume,
        })
        .collect();
    CandleSeries::new(candles)
}

pub fn fine_candle(timestamp: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64) -> Candle {
    Candle {
        timestamp,
        open,
        high,
        low,
        close,
        volume: 100.0,
    }
}

/// Flat candles with a constant range, for ATR warm-up.
pub fn flat_candles(n: usize, mid: f64, range: f64) -> Vec<Candle> {
    (0..n)
        .map(|i| fine_candle(ts(i as i64 * 5), mid, mid + range / 2.0, mid - range / 2.0, mid))
        .collect()
}

/// Built-in defaults; the environment is never read.
pub fn default_test_config() -> Config {
    Config {
        handoff_dir: "target/test-handoff".to_string(),
        ..Config::default()
    }
}

pub fn test_machine() -> PhaseMachine {
    PhaseMachine::from_config(&default_test_config())
}
