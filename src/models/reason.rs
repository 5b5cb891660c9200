use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a symbol context left its current attempt and went back to idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetReason {
    PhaseTimeout,
    Invalidated,
    Superseded,
    SignalExpired,
    StopOutsideBand,
    StopBelowVolatilityFloor,
    PerTradeRisk,
    DailyLossLimit,
    MaxDrawdown,
    DataUnavailable,
    ExecutionFailed,
    InstructionStale,
    PositionClosed,
}

impl ResetReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResetReason::PhaseTimeout => "phase_timeout",
            ResetReason::Invalidated => "invalidated",
            ResetReason::Superseded => "superseded",
            ResetReason::SignalExpired => "signal_expired",
            ResetReason::StopOutsideBand => "stop_outside_band",
            ResetReason::StopBelowVolatilityFloor => "stop_below_volatility_floor",
            ResetReason::PerTradeRisk => "per_trade_risk",
            ResetReason::DailyLossLimit => "daily_loss_limit",
            ResetReason::MaxDrawdown => "max_drawdown",
            ResetReason::DataUnavailable => "data_unavailable",
            ResetReason::ExecutionFailed => "execution_failed",
            ResetReason::InstructionStale => "instruction_stale",
            ResetReason::PositionClosed => "position_closed",
        }
    }
}

impl fmt::Display for ResetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
