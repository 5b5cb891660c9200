use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::config::Config;
use crate::core::normalizer::ValueNormalizer;
use crate::core::structure::{StructureBreak, StructureScanner};
use crate::error::EngineError;
use crate::models::{Candle, CandleSeries, Direction, ExitPhase, ResetReason, Timeframe};
use crate::strategies::entry_trigger::EntryTriggerCalculator;
use crate::strategies::signals::{BreakExtremes, EntryTrigger, RetestConfirmation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Idle,
    StructureBroken,
    BreakConfirmed,
    RetestValidated,
    EntryArmed,
    Executed,
    /// Reported when an armed trigger ages out. The context itself rests at `Idle`.
    Expired,
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PhaseKind::Idle => "IDLE",
            PhaseKind::StructureBroken => "STRUCTURE_BROKEN",
            PhaseKind::BreakConfirmed => "BREAK_CONFIRMED",
            PhaseKind::RetestValidated => "RETEST_VALIDATED",
            PhaseKind::EntryArmed => "ENTRY_ARMED",
            PhaseKind::Executed => "EXECUTED",
            PhaseKind::Expired => "EXPIRED",
        };
        write!(f, "{s}")
    }
}

/// The live phase, carrying exactly the data recorded so far for this attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Idle,
    StructureBroken {
        brk: StructureBreak,
    },
    BreakConfirmed {
        brk: StructureBreak,
        extremes: BreakExtremes,
    },
    RetestValidated {
        brk: StructureBreak,
        retest: RetestConfirmation,
    },
    EntryArmed {
        brk: StructureBreak,
        retest: RetestConfirmation,
        trigger: EntryTrigger,
    },
    Executed {
        direction: Direction,
        request_id: Uuid,
        filled: bool,
    },
}

impl Phase {
    pub fn kind(&self) -> PhaseKind {
        match self {
            Phase::Idle => PhaseKind::Idle,
            Phase::StructureBroken { .. } => PhaseKind::StructureBroken,
            Phase::BreakConfirmed { .. } => PhaseKind::BreakConfirmed,
            Phase::RetestValidated { .. } => PhaseKind::RetestValidated,
            Phase::EntryArmed { .. } => PhaseKind::EntryArmed,
            Phase::Executed { .. } => PhaseKind::Executed,
        }
    }

    pub fn active_break(&self) -> Option<&StructureBreak> {
        match self {
            Phase::StructureBroken { brk }
            | Phase::BreakConfirmed { brk, .. }
            | Phase::RetestValidated { brk, .. }
            | Phase::EntryArmed { brk, .. } => Some(brk),
            Phase::Idle | Phase::Executed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub symbol: String,
    pub from: PhaseKind,
    pub to: PhaseKind,
    pub at: DateTime<Utc>,
    pub reason: Option<ResetReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandleRole {
    Coarse,
    Fine,
}

/// Per-instrument state. Never shared across instruments.
#[derive(Debug, Clone)]
pub struct SymbolContext {
    pub symbol: String,
    pub enabled: bool,
    phase: Phase,
    deadline: Option<DateTime<Utc>>,
    last_coarse: Option<DateTime<Utc>>,
    last_fine: Option<DateTime<Utc>>,
    /// Exit phase of the most recent position on this instrument.
    pub last_exit: Option<ExitPhase>,
}

impl SymbolContext {
    pub fn new(symbol: &str, enabled: bool) -> Self {
        Self {
            symbol: symbol.to_string(),
            enabled,
            phase: Phase::Idle,
            deadline: None,
            last_coarse: None,
            last_fine: None,
            last_exit: None,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn kind(&self) -> PhaseKind {
        self.phase.kind()
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    pub fn armed_trigger(&self) -> Option<(&RetestConfirmation, &EntryTrigger)> {
        match &self.phase {
            Phase::EntryArmed { retest, trigger, .. } => Some((retest, trigger)),
            _ => None,
        }
    }

    pub fn pending_request(&self) -> Option<Uuid> {
        match self.phase {
            Phase::Executed { request_id, .. } => Some(request_id),
            _ => None,
        }
    }

    /// Accept a candle only if it is newer than the last one processed for
    /// its role. Replayed or out-of-order candles are refused.
    pub fn accept_candle(&mut self, role: CandleRole, timestamp: DateTime<Utc>) -> bool {
        let last = match role {
            CandleRole::Coarse => &mut self.last_coarse,
            CandleRole::Fine => &mut self.last_fine,
        };
        if last.is_some_and(|seen| timestamp <= seen) {
            return false;
        }
        *last = Some(timestamp);
        true
    }

    fn advance(
        &mut self,
        next: Phase,
        deadline: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    ) -> Transition {
        let from = self.phase.kind();
        let to = next.kind();
        debug_assert!((from as u8) + 1 == to as u8, "phase skip {from} -> {to}");
        self.phase = next;
        self.deadline = deadline;
        Transition {
            symbol: self.symbol.clone(),
            from,
            to,
            at,
            reason: None,
        }
    }

    /// Drop everything recorded for the current attempt.
    pub fn reset(&mut self, reason: ResetReason, at: DateTime<Utc>) -> Transition {
        let from = self.phase.kind();
        let to = if reason == ResetReason::SignalExpired {
            PhaseKind::Expired
        } else {
            PhaseKind::Idle
        };
        self.phase = Phase::Idle;
        self.deadline = None;
        Transition {
            symbol: self.symbol.clone(),
            from,
            to,
            at,
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PhaseParams {
    pub coarse_tf: Timeframe,
    pub fine_tf: Timeframe,
    pub break_confirm_candles: usize,
    pub retest_window_candles: usize,
    pub retest_tolerance_pips: f64,
}

/// One state machine for every asset class; the instrument's normalizer
/// supplies all class-specific scaling.
pub struct PhaseMachine {
    params: PhaseParams,
    scanner: StructureScanner,
    triggers: EntryTriggerCalculator,
}

impl PhaseMachine {
    pub fn new(
        params: PhaseParams,
        scanner: StructureScanner,
        triggers: EntryTriggerCalculator,
    ) -> Self {
        Self {
            params,
            scanner,
            triggers,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            PhaseParams {
                coarse_tf: cfg.coarse_tf,
                fine_tf: cfg.fine_tf,
                break_confirm_candles: cfg.break_confirm_candles,
                retest_window_candles: cfg.retest_window_candles,
                retest_tolerance_pips: cfg.retest_tolerance_pips,
            },
            StructureScanner::with_lookback(cfg.swing_lookback),
            EntryTriggerCalculator::new(cfg.entry_offset_pips, cfg.max_signal_age()),
        )
    }

    pub fn params(&self) -> &PhaseParams {
        &self.params
    }

    /// Reset the context if its current phase has outlived its deadline.
    /// `Executed` is governed by the instruction ledger, not by this clock.
    pub fn check_deadline(
        &self,
        ctx: &mut SymbolContext,
        now: DateTime<Utc>,
    ) -> Option<Transition> {
        let deadline = ctx.deadline?;
        if now <= deadline {
            return None;
        }
        match ctx.kind() {
            PhaseKind::Idle | PhaseKind::Executed | PhaseKind::Expired => None,
            PhaseKind::EntryArmed => Some(ctx.reset(ResetReason::SignalExpired, now)),
            _ => Some(ctx.reset(ResetReason::PhaseTimeout, now)),
        }
    }

    /// Step on a newly closed coarse candle. `coarse` already contains it.
    pub fn on_coarse_candle(
        &self,
        ctx: &mut SymbolContext,
        coarse: &CandleSeries,
        normalizer: &ValueNormalizer,
        now: DateTime<Utc>,
    ) -> Result<Vec<Transition>, EngineError> {
        let mut out = Vec::new();
        if let Some(t) = self.check_deadline(ctx, now) {
            out.push(t);
        }

        let scanned = self
            .scanner
            .scan(&ctx.symbol, self.params.coarse_tf, coarse, normalizer);
        let found = match scanned {
            Ok(found) => found,
            // Only an idle context depends on the scan to make progress.
            Err(e) if ctx.kind() == PhaseKind::Idle && out.is_empty() => return Err(e),
            Err(_) => None,
        };
        let Some(brk) = found else {
            return Ok(out);
        };

        match ctx.kind() {
            PhaseKind::Idle => out.push(self.enter_broken(ctx, brk, now)),
            PhaseKind::StructureBroken | PhaseKind::BreakConfirmed => {
                let newer = ctx
                    .phase
                    .active_break()
                    .is_some_and(|current| current.timestamp != brk.timestamp);
                if newer {
                    out.push(ctx.reset(ResetReason::Superseded, now));
                    out.push(self.enter_broken(ctx, brk, now));
                }
            }
            PhaseKind::RetestValidated | PhaseKind::EntryArmed => {
                let reversed = ctx
                    .phase
                    .active_break()
                    .is_some_and(|current| current.direction != brk.direction);
                if reversed {
                    out.push(ctx.reset(ResetReason::Invalidated, now));
                    out.push(self.enter_broken(ctx, brk, now));
                }
            }
            PhaseKind::Executed | PhaseKind::Expired => {}
        }

        Ok(out)
    }

    /// Step on a newly closed fine candle.
    pub fn on_fine_candle(
        &self,
        ctx: &mut SymbolContext,
        candle: &Candle,
        normalizer: &ValueNormalizer,
        now: DateTime<Utc>,
    ) -> Vec<Transition> {
        let mut out = Vec::new();
        if let Some(t) = self.check_deadline(ctx, now) {
            out.push(t);
        }

        // A fine candle that closed inside the break candle predates the break.
        let predates = ctx
            .phase
            .active_break()
            .is_some_and(|brk| now <= brk.timestamp + self.params.coarse_tf.span(1));
        if predates {
            return out;
        }

        match ctx.phase.clone() {
            Phase::StructureBroken { brk } => {
                // Reference is the coarse level, not this candle's extremes.
                if brk.direction.favorable_move(brk.level, candle.close) > 0.0 {
                    let window = self.params.fine_tf.span(self.params.retest_window_candles);
                    let deadline = now + window;
                    out.push(ctx.advance(
                        Phase::BreakConfirmed {
                            brk,
                            extremes: BreakExtremes::of(candle),
                        },
                        Some(deadline),
                        now,
                    ));
                }
            }
            Phase::BreakConfirmed { brk, .. } => {
                let dir = brk.direction;
                let tolerance = normalizer.from_pips(self.params.retest_tolerance_pips);
                let close_side = dir.favorable_move(brk.level, candle.close);

                if close_side < -tolerance {
                    out.push(ctx.reset(ResetReason::Invalidated, now));
                    return out;
                }

                let touch = match dir {
                    Direction::Long => candle.low,
                    Direction::Short => candle.high,
                };
                let reached = dir.favorable_move(brk.level, touch) <= tolerance;
                if reached && close_side > 0.0 {
                    let retest = RetestConfirmation {
                        direction: dir,
                        level: brk.level,
                        touch,
                        timestamp: candle.timestamp,
                    };
                    out.push(ctx.advance(
                        Phase::RetestValidated {
                            brk: brk.clone(),
                            retest: retest.clone(),
                        },
                        None,
                        now,
                    ));
                    let trigger = self.triggers.arm(&retest, normalizer, now);
                    let expires = trigger.expires_at;
                    let armed = Phase::EntryArmed {
                        brk,
                        retest,
                        trigger,
                    };
                    out.push(ctx.advance(armed, Some(expires), now));
                }
            }
            _ => {}
        }

        out
    }

    /// `EntryArmed -> Executed` once the entry has been approved and handed off.
    pub fn mark_executed(
        &self,
        ctx: &mut SymbolContext,
        request_id: Uuid,
        now: DateTime<Utc>,
    ) -> Option<Transition> {
        let direction = match &ctx.phase {
            Phase::EntryArmed { trigger, .. } => trigger.direction,
            _ => return None,
        };
        Some(ctx.advance(
            Phase::Executed {
                direction,
                request_id,
                filled: false,
            },
            None,
            now,
        ))
    }

    pub fn mark_filled(&self, ctx: &mut SymbolContext, request_id: Uuid) -> bool {
        match &mut ctx.phase {
            Phase::Executed {
                request_id: id,
                filled,
                ..
            } if *id == request_id => {
                *filled = true;
                ctx.last_exit = Some(ExitPhase::PreBreakeven);
                true
            }
            _ => false,
        }
    }

    fn enter_broken(
        &self,
        ctx: &mut SymbolContext,
        brk: StructureBreak,
        now: DateTime<Utc>,
    ) -> Transition {
        let deadline = now + self.params.fine_tf.span(self.params.break_confirm_candles);
        ctx.advance(Phase::StructureBroken { brk }, Some(deadline), now)
    }
}
