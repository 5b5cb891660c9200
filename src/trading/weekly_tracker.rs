use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
struct WeekEntry {
    week_start: DateTime<Utc>,
    realized: f64,
    /// Balance when the week's first result came in; the fraction's denominator.
    base_balance: f64,
    /// Set once realized profit reaches the threshold; cleared only by a new week.
    enhanced: bool,
}

impl WeekEntry {
    fn fresh(week_start: DateTime<Utc>, base_balance: f64) -> Self {
        Self {
            week_start,
            realized: 0.0,
            base_balance,
            enhanced: false,
        }
    }
}

/// Realized profit per instrument for the current trading week.
///
/// Weeks start Monday 00:00 in the configured timezone. Nothing runs on a
/// timer; an entry whose stored week start is behind the current one reads
/// as zero and is replaced on the next write.
pub struct WeeklyTracker {
    tz: Tz,
    threshold: f64,
    entries: HashMap<String, WeekEntry>,
}

impl WeeklyTracker {
    pub fn new(tz: Tz, threshold: f64) -> Self {
        Self {
            tz,
            threshold,
            entries: HashMap::new(),
        }
    }

    pub fn week_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        week_start_in(self.tz, now)
    }

    /// Profit fraction for `symbol` this week. Unknown or stale entries read 0.
    pub fn fraction(&self, symbol: &str, now: DateTime<Utc>) -> f64 {
        let start = self.week_start(now);
        match self.entries.get(symbol) {
            Some(e) if e.week_start == start && e.base_balance > 0.0 => e.realized / e.base_balance,
            _ => 0.0,
        }
    }

    /// Whether `symbol` has reached the profit threshold at any point this week.
    pub fn enhanced(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        let start = self.week_start(now);
        self.entries
            .get(symbol)
            .is_some_and(|e| e.week_start == start && e.enhanced)
    }

    pub fn record(&mut self, symbol: &str, pnl: f64, balance_before: f64, now: DateTime<Utc>) {
        let start = self.week_start(now);
        let entry = self
            .entries
            .entry(symbol.to_string())
            .or_insert_with(|| WeekEntry::fresh(start, balance_before));
        if entry.week_start != start {
            *entry = WeekEntry::fresh(start, balance_before);
        }
        entry.realized += pnl;

        if !entry.enhanced
            && entry.base_balance > 0.0
            && entry.realized / entry.base_balance >= self.threshold
        {
            entry.enhanced = true;
            info!(
                "{}: weekly profit {:.2}% reached the threshold, enhanced target until week end",
                symbol,
                entry.realized / entry.base_balance * 100.0
            );
        }
    }

    /// Drop entries from earlier weeks so the next write starts from a fresh
    /// base balance. Returns how many went; a second call in the same week
    /// finds nothing.
    pub fn roll(&mut self, now: DateTime<Utc>) -> usize {
        let start = self.week_start(now);
        let before = self.entries.len();
        self.entries.retain(|_, e| e.week_start == start);
        before - self.entries.len()
    }
}

/// Monday 00:00 local time of the week containing `now`, as UTC.
pub fn week_start_in(tz: Tz, now: DateTime<Utc>) -> DateTime<Utc> {
    let local = now.with_timezone(&tz);
    let monday = local.date_naive() - Duration::days(local.weekday().num_days_from_monday() as i64);
    local_midnight(tz, monday.and_time(NaiveTime::MIN))
}

/// Resolve a local wall-clock time, taking the earlier instant on DST overlap
/// and UTC on a gap.
pub(crate) fn local_midnight(tz: Tz, naive: chrono::NaiveDateTime) -> DateTime<Utc> {
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::New_York;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn week_starts_monday_midnight_local() {
        // Wednesday 2024-01-17 in New York; Monday 00:00 EST is 05:00 UTC.
        let start = week_start_in(New_York, utc("2024-01-17T15:00:00Z"));
        assert_eq!(start, utc("2024-01-15T05:00:00Z"));
        // Sunday 23:00 New York is still the previous week.
        let start = week_start_in(New_York, utc("2024-01-22T03:00:00Z"));
        assert_eq!(start, utc("2024-01-15T05:00:00Z"));
    }

    #[test]
    fn fraction_accumulates_within_week() {
        let mut t = WeeklyTracker::new(New_York, 0.02);
        let now = utc("2024-01-16T15:00:00Z");
        t.record("EURUSD", 1_000.0, 100_000.0, now);
        t.record("EURUSD", 1_000.0, 101_000.0, now + Duration::hours(2));
        assert!((t.fraction("EURUSD", now) - 0.02).abs() < 1e-12);
        assert_eq!(t.fraction("USDJPY", now), 0.0);
    }

    #[test]
    fn new_week_reads_zero_then_resets_on_write() {
        let mut t = WeeklyTracker::new(New_York, 0.02);
        let now = utc("2024-01-19T15:00:00Z");
        t.record("EURUSD", 3_000.0, 100_000.0, now);
        let next = utc("2024-01-23T15:00:00Z");
        assert_eq!(t.fraction("EURUSD", next), 0.0);
        t.record("EURUSD", 500.0, 103_000.0, next);
        assert!((t.fraction("EURUSD", next) - 500.0 / 103_000.0).abs() < 1e-12);
    }

    #[test]
    fn roll_is_idempotent() {
        let mut t = WeeklyTracker::new(New_York, 0.02);
        t.record("EURUSD", 3_000.0, 100_000.0, utc("2024-01-19T15:00:00Z"));
        let next = utc("2024-01-23T15:00:00Z");
        assert_eq!(t.roll(next), 1);
        assert_eq!(t.roll(next), 0);
        assert_eq!(t.fraction("EURUSD", next), 0.0);
        assert!(!t.enhanced("EURUSD", next));
    }

    #[test]
    fn rolled_week_takes_the_new_base_balance() {
        let mut eager = WeeklyTracker::new(New_York, 0.02);
        let mut lazy = WeeklyTracker::new(New_York, 0.02);
        let first = utc("2024-01-17T15:00:00Z");
        let second = utc("2024-01-24T15:00:00Z");
        for t in [&mut eager, &mut lazy] {
            t.record("EURUSD", 1_000.0, 100_000.0, first);
        }

        eager.roll(second);
        eager.record("EURUSD", 1_000.0, 50_000.0, second);
        lazy.record("EURUSD", 1_000.0, 50_000.0, second);
        assert!((eager.fraction("EURUSD", second) - 0.02).abs() < 1e-12);
        assert_eq!(eager.fraction("EURUSD", second), lazy.fraction("EURUSD", second));
    }

    #[test]
    fn threshold_latches_for_the_rest_of_the_week() {
        let mut t = WeeklyTracker::new(New_York, 0.02);
        let monday = utc("2024-01-15T15:00:00Z");
        t.record("EURUSD", 1_500.0, 100_000.0, monday);
        assert!(!t.enhanced("EURUSD", monday));

        t.record("EURUSD", 1_000.0, 101_500.0, monday + Duration::hours(3));
        assert!(t.enhanced("EURUSD", monday + Duration::hours(3)));

        // A loss pulls the fraction back under 2% but the unlock stays.
        let tuesday = monday + Duration::days(1);
        t.record("EURUSD", -1_000.0, 102_500.0, tuesday);
        assert!(t.fraction("EURUSD", tuesday) < 0.02);
        assert!(t.enhanced("EURUSD", tuesday));
        assert!(!t.enhanced("USDJPY", tuesday));

        assert!(!t.enhanced("EURUSD", monday + Duration::days(7)));
    }
}
