use chrono::{DateTime, Duration, NaiveTime, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

use crate::config::Config;
use crate::models::ResetReason;
use crate::trading::weekly_tracker::local_midnight;

#[derive(Debug, Clone)]
pub struct ComplianceLimits {
    pub max_risk_per_trade: f64,
    pub daily_loss_limit: f64,
    pub max_drawdown: f64,
    pub daily_reset_hour: u32,
}

/// Account-wide guard. The only state shared across instruments, so it has a
/// single owner and every approval checks and reserves in one `&mut` call.
pub struct ComplianceGuard {
    limits: ComplianceLimits,
    tz: Tz,
    balance: f64,
    high_water_mark: f64,
    day_start: Option<DateTime<Utc>>,
    day_start_balance: f64,
    daily_pnl: f64,
    reservations: HashMap<Uuid, f64>,
}

impl ComplianceGuard {
    pub fn new(limits: ComplianceLimits, tz: Tz, balance: f64) -> Self {
        Self {
            limits,
            tz,
            balance,
            high_water_mark: balance,
            day_start: None,
            day_start_balance: balance,
            daily_pnl: 0.0,
            reservations: HashMap::new(),
        }
    }

    pub fn from_config(cfg: &Config, tz: Tz) -> Self {
        Self::new(
            ComplianceLimits {
                max_risk_per_trade: cfg.max_risk_per_trade,
                daily_loss_limit: cfg.daily_loss_limit,
                max_drawdown: cfg.max_drawdown,
                daily_reset_hour: cfg.daily_reset_hour,
            },
            tz,
            cfg.initial_balance,
        )
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn high_water_mark(&self) -> f64 {
        self.high_water_mark
    }

    pub fn reserved(&self) -> f64 {
        self.reservations.values().sum()
    }

    pub fn reservation(&self, request_id: &Uuid) -> Option<f64> {
        self.reservations.get(request_id).copied()
    }

    pub fn daily_realized_loss(&self) -> f64 {
        (-self.daily_pnl).max(0.0)
    }

    /// Start of the trading day containing `now`.
    pub fn day_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local = now.with_timezone(&self.tz);
        let reset = NaiveTime::from_hms_opt(self.limits.daily_reset_hour, 0, 0)
            .unwrap_or(NaiveTime::MIN);
        let mut date = local.date_naive();
        if local.time() < reset {
            date -= Duration::days(1);
        }
        local_midnight(self.tz, date.and_time(reset))
    }

    fn roll_day(&mut self, now: DateTime<Utc>) {
        let start = self.day_start(now);
        if self.day_start != Some(start) {
            self.day_start = Some(start);
            self.day_start_balance = self.balance;
            self.daily_pnl = 0.0;
        }
    }

    /// Check every account limit for a new position and, if it passes,
    /// reserve `potential_loss` under `request_id` before returning.
    pub fn check_and_reserve(
        &mut self,
        request_id: Uuid,
        potential_loss: f64,
        now: DateTime<Utc>,
    ) -> Result<(), ResetReason> {
        self.roll_day(now);
        if let Err(reason) = self.evaluate(potential_loss) {
            warn!(
                "Compliance rejected {}: potential loss {:.2}, balance {:.2}, reserved {:.2}",
                reason,
                potential_loss,
                self.balance,
                self.reserved()
            );
            return Err(reason);
        }
        self.reservations.insert(request_id, potential_loss);
        Ok(())
    }

    fn evaluate(&self, potential_loss: f64) -> Result<(), ResetReason> {
        if self.balance <= 0.0 || potential_loss / self.balance > self.limits.max_risk_per_trade {
            return Err(ResetReason::PerTradeRisk);
        }

        let daily_exposure = self.daily_realized_loss() + self.reserved() + potential_loss;
        if daily_exposure > self.limits.daily_loss_limit * self.day_start_balance {
            return Err(ResetReason::DailyLossLimit);
        }

        let worst_equity = self.balance - self.reserved() - potential_loss;
        let drawdown = (self.high_water_mark - worst_equity) / self.high_water_mark;
        if drawdown > self.limits.max_drawdown {
            return Err(ResetReason::MaxDrawdown);
        }

        Ok(())
    }

    /// Drop the reservation for a request. Returns what was held.
    pub fn release(&mut self, request_id: &Uuid) -> f64 {
        self.reservations.remove(request_id).unwrap_or(0.0)
    }

    /// Book a realized result and free the position's reservation.
    pub fn record_close(&mut self, request_id: &Uuid, pnl: f64, now: DateTime<Utc>) {
        self.roll_day(now);
        self.release(request_id);
        self.balance += pnl;
        self.daily_pnl += pnl;
        if self.balance > self.high_water_mark {
            self.high_water_mark = self.balance;
        }
    }
}
