#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use bos_retest_engine::config::Config;
use bos_retest_engine::engine::{EngineEvent, SignalEngine};
use bos_retest_engine::models::{Candle, Timeframe};

pub fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub fn candle(timestamp: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64) -> Candle {
    Candle {
        timestamp,
        open,
        high,
        low,
        close,
        volume: 100.0,
    }
}

/// One step of a scripted market.
#[derive(Debug, Clone)]
pub struct Bar {
    pub timeframe: Timeframe,
    pub candle: Candle,
}

impl Bar {
    fn coarse(candle: Candle) -> Self {
        Self {
            timeframe: Timeframe::H1,
            candle,
        }
    }

    fn fine(candle: Candle) -> Self {
        Self {
            timeframe: Timeframe::M5,
            candle,
        }
    }

    /// Close time, which is when the engine acts on the bar.
    pub fn close_time(&self) -> DateTime<Utc> {
        self.candle.timestamp + self.timeframe.span(1)
    }
}

/// Fine warm-up, then a USDJPY hourly downtrend broken upward at 146.98.
/// Ends with the break candle.
pub fn upward_setup() -> Vec<Bar> {
    let mut bars = Vec::new();
    let pairs = [
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
    ];
    for (i, &(h, l)) in pairs.iter().enumerate() {
        let mid = (h + l) / 2.0;
        bars.push(Bar::coarse(candle(base_time() + Duration::hours(i as i64), mid, h, l, mid)));
    }

    // Quiet 5m history inside the last hour for the ATR.
    let warmup_start = base_time() + Duration::hours(13) - Duration::minutes(40);
    for k in 0..20 {
        let t = warmup_start + Duration::minutes(5 * k);
        bars.push(Bar::fine(candle(t, 146.90, 146.92, 146.88, 146.90)));
    }

    let breaking = candle(base_time() + Duration::hours(13), 146.88, 147.10, 146.85, 147.05);
    bars.push(Bar::coarse(breaking));
    bars
}

fn after_break(minutes: i64) -> DateTime<Utc> {
    base_time() + Duration::hours(14) + Duration::minutes(minutes)
}

/// Break confirmation and a pullback that holds the level.
pub fn upward_retest() -> Vec<Bar> {
    vec![
        Bar::fine(candle(after_break(0), 146.96, 147.03, 146.95, 147.01)),
        Bar::fine(candle(after_break(5), 147.01, 147.02, 146.97, 147.00)),
    ]
}

/// A candle whose high trades through the 147.04 trigger.
pub fn upward_trigger() -> Bar {
    Bar::fine(candle(after_break(10), 147.00, 147.05, 146.99, 147.04))
}

pub fn fine_at(minutes_after_break: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
    Bar::fine(candle(after_break(minutes_after_break), open, high, low, close))
}

/// Reflect a script around `axis`, turning the upward setup into a downward one.
pub fn mirror(bars: &[Bar], axis: f64) -> Vec<Bar> {
    let flip = |p: f64| 2.0 * axis - p;
    bars.iter()
        .map(|b| Bar {
            timeframe: b.timeframe,
            candle: candle(
                b.candle.timestamp,
                flip(b.candle.open),
                flip(b.candle.low),
                flip(b.candle.high),
                flip(b.candle.close),
            ),
        })
        .collect()
}

/// Move a script later in time and shift every price by `delta`.
pub fn shift(bars: &[Bar], later: Duration, delta: f64) -> Vec<Bar> {
    bars.iter()
        .map(|b| Bar {
            timeframe: b.timeframe,
            candle: candle(
                b.candle.timestamp + later,
                b.candle.open + delta,
                b.candle.high + delta,
                b.candle.low + delta,
                b.candle.close + delta,
            ),
        })
        .collect()
}

pub fn test_config() -> Config {
    Config {
        handoff_dir: "target/test-handoff".to_string(),
        ..Config::default()
    }
}

pub fn engine_with(config: Config) -> SignalEngine {
    SignalEngine::new(Arc::new(config)).unwrap()
}

pub fn feed(engine: &mut SignalEngine, symbol: &str, bars: &[Bar]) -> Vec<EngineEvent> {
    bars.iter()
        .flat_map(|b| engine.on_candle(symbol, b.timeframe, b.candle.clone()))
        .collect()
}

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}
