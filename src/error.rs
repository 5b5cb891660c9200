use thiserror::Error;

use crate::models::Timeframe;

/// Data errors. Any of these halts progress for the affected instrument
/// until the underlying data is available; nothing is defaulted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("no instrument profile for '{0}'")]
    ProfileUnavailable(String),

    #[error("{symbol} {timeframe}: need {needed} candles, have {have}")]
    InsufficientHistory {
        symbol: String,
        timeframe: Timeframe,
        needed: usize,
        have: usize,
    },

    #[error("no {currency}->USD conversion rate configured for {symbol}")]
    QuoteRateMissing { symbol: String, currency: String },

    #[error("invalid price {0}")]
    InvalidPrice(f64),
}

/// Fatal startup errors. The engine refuses to run with any of these.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{key}: cannot parse '{value}'")]
    Unparseable { key: String, value: String },

    #[error("{0}")]
    Contradictory(String),

    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),
}
