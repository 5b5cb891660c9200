use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Candle, Direction};

/// High/low of the fine-timeframe candle that confirmed the break.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakExtremes {
    pub high: f64,
    pub low: f64,
    pub timestamp: DateTime<Utc>,
}

impl BreakExtremes {
    pub fn of(candle: &Candle) -> Self {
        Self {
            high: candle.high,
            low: candle.low,
            timestamp: candle.timestamp,
        }
    }
}

/// Fine-timeframe return to the broken level, rejected in the trade direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetestConfirmation {
    pub direction: Direction,
    /// Always the structural level recorded at break time.
    pub level: f64,
    /// Deepest print of the rejecting candle into the level (low for longs,
    /// high for shorts). The stop goes beyond this.
    pub touch: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryTrigger {
    pub direction: Direction,
    pub price: f64,
    pub level: f64,
    pub offset_pips: f64,
    pub armed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl EntryTrigger {
    /// Has `price` reached the trigger in the trade direction?
    pub fn is_crossed_by(&self, price: f64) -> bool {
        match self.direction {
            Direction::Long => price >= self.price,
            Direction::Short => price <= self.price,
        }
    }
}

/// A fully priced and sized entry, ready for compliance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySignal {
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_price: f64,
    pub target_price: f64,
    pub size: f64,
    pub stop_pips: f64,
    pub reward_ratio: f64,
    /// Account-currency value of one pip at one unit of size.
    pub pip_value: f64,
    /// Loss in account currency if the stop is hit at full size.
    pub potential_loss: f64,
}
