use crate::models::Candle;

/// Average true range over the last `period` candles.
///
/// Returns `None` until `period + 1` candles exist, so every range in the
/// average has a previous close to gap against.
pub fn average_true_range(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let window = &candles[candles.len() - period - 1..];
    let sum: f64 = window
        .windows(2)
        .map(|pair| pair[1].true_range(Some(pair[0].close)))
        .sum();
    Some(sum / period as f64)
}
