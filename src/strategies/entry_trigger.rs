use chrono::{DateTime, Duration, Utc};

use crate::core::normalizer::ValueNormalizer;
use crate::models::Direction;
use crate::strategies::signals::{EntryTrigger, RetestConfirmation};

/// Places the entry a fixed pip offset beyond the retest level.
///
/// The anchor is the structural level recorded when the break happened, never
/// the extreme of whichever candle happened to do the breaking. Gapping
/// markets put those two apart and only the level is stable.
pub struct EntryTriggerCalculator {
    offset_pips: f64,
    max_signal_age: Duration,
}

impl EntryTriggerCalculator {
    pub fn new(offset_pips: f64, max_signal_age: Duration) -> Self {
        Self {
            offset_pips,
            max_signal_age,
        }
    }

    pub fn trigger_price(
        &self,
        level: f64,
        direction: Direction,
        normalizer: &ValueNormalizer,
    ) -> f64 {
        let offset = normalizer.from_pips(self.offset_pips);
        normalizer.round_to_tick(level + offset * direction.sign())
    }

    pub fn arm(
        &self,
        retest: &RetestConfirmation,
        normalizer: &ValueNormalizer,
        now: DateTime<Utc>,
    ) -> EntryTrigger {
        EntryTrigger {
            direction: retest.direction,
            price: self.trigger_price(retest.level, retest.direction, normalizer),
            level: retest.level,
            offset_pips: self.offset_pips,
            armed_at: now,
            expires_at: now + self.max_signal_age,
        }
    }
}
