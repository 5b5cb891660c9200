pub mod candle;
pub mod direction;
pub mod reason;
pub mod timeframe;

pub use candle::{Candle, CandleSeries};
pub use direction::*;
pub use reason::ResetReason;
pub use timeframe::Timeframe;
