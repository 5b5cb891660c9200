pub mod replay;

pub use replay::ReplayFeed;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Candle, Timeframe};

/// One closed candle for one instrument and timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleEvent {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub candle: Candle,
}

impl CandleEvent {
    /// Candles are stamped at their open and become actionable at close.
    pub fn close_time(&self) -> DateTime<Utc> {
        self.candle.timestamp + self.timeframe.span(1)
    }
}

#[async_trait]
pub trait CandleFeed: Send + Sync {
    /// Next closed candle, or `None` when the feed is exhausted.
    async fn next_candle(&mut self) -> Result<Option<CandleEvent>>;
}
