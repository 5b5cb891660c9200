use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SharedConfig;
use crate::core::instrument::{canonical_symbol, ProfileResolver};
use crate::core::normalizer::ValueNormalizer;
use crate::error::{ConfigError, EngineError};
use crate::execution::{AckOutcome, ExecutionAck, ExecutionInstruction, InstructionLedger};
use crate::models::{Candle, CandleSeries, Direction, ExitPhase, ResetReason, Timeframe};
use crate::strategies::phase_machine::{
    CandleRole, PhaseKind, PhaseMachine, SymbolContext, Transition,
};
use crate::strategies::signals::EntrySignal;
use crate::trading::compliance::ComplianceGuard;
use crate::trading::exit_manager::{ExitEvent, ExitManager, PositionRecord};
use crate::trading::risk::{RiskDecision, RiskEngine, SizingInput};
use crate::trading::weekly_tracker::WeeklyTracker;

/// Everything observable that a step produced, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Transition(Transition),
    InstructionIssued(ExecutionInstruction),
    PositionOpened(PositionRecord),
    Exit(ExitEvent),
    DataError { symbol: String, error: EngineError },
}

#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub transitions: u64,
    /// Resets per (instrument, reason).
    pub resets: HashMap<(String, ResetReason), u64>,
    pub compliance_violations: u64,
    pub instructions_issued: u64,
    pub stale_instructions: u64,
    pub duplicate_acks: u64,
    pub duplicate_instructions: u64,
    /// Instructions the handoff refused or reaped for age.
    pub stale_handoffs: u64,
    pub dropped_acks: u64,
    pub stale_candles: u64,
    pub data_errors: u64,
    pub positions_opened: u64,
    pub positions_closed: u64,
}

impl EngineStats {
    pub fn resets_for(&self, symbol: &str, reason: ResetReason) -> u64 {
        self.resets.get(&(symbol.to_string(), reason)).copied().unwrap_or(0)
    }
}

/// The per-instrument pattern engine plus the account-wide guard.
///
/// Every step takes `&mut self` and does no I/O. Approved instructions pile
/// up in an outbox for the runner to drain with [`SignalEngine::take_instructions`].
pub struct SignalEngine {
    config: SharedConfig,
    resolver: ProfileResolver,
    machine: PhaseMachine,
    risk: RiskEngine,
    guard: ComplianceGuard,
    exits: ExitManager,
    weekly: WeeklyTracker,
    ledger: InstructionLedger,
    contexts: HashMap<String, SymbolContext>,
    coarse: HashMap<String, CandleSeries>,
    fine: HashMap<String, CandleSeries>,
    approved: HashMap<Uuid, EntrySignal>,
    outbox: Vec<ExecutionInstruction>,
    stats: EngineStats,
}

impl SignalEngine {
    pub fn new(config: SharedConfig) -> Result<Self, ConfigError> {
        let tz = config.tz()?;

        info!("{}", "=".repeat(60));
        info!("BOS retest engine starting up");
        info!(
            "Structure {} / entry {} | offset {} pips | band {}-{} pips",
            config.coarse_tf,
            config.fine_tf,
            config.entry_offset_pips,
            config.min_stop_pips,
            config.max_stop_pips
        );
        info!(
            "Risk {:.2}% per trade | daily limit {:.1}% | max drawdown {:.1}%",
            config.risk_fraction * 100.0,
            config.daily_loss_limit * 100.0,
            config.max_drawdown * 100.0
        );

        let mut contexts = HashMap::new();
        for raw in &config.instruments {
            let symbol = canonical_symbol(raw);
            let enabled = config.is_enabled(&symbol);
            info!("  {}: {}", symbol, if enabled { "enabled" } else { "disabled" });
            contexts.insert(symbol.clone(), SymbolContext::new(&symbol, enabled));
        }
        info!("{}", "=".repeat(60));

        Ok(Self {
            resolver: ProfileResolver::new(),
            machine: PhaseMachine::from_config(&config),
            risk: RiskEngine::from_config(&config),
            guard: ComplianceGuard::from_config(&config, tz),
            exits: ExitManager::new(),
            weekly: WeeklyTracker::new(tz, config.weekly_profit_threshold),
            ledger: InstructionLedger::new(),
            contexts,
            coarse: HashMap::new(),
            fine: HashMap::new(),
            approved: HashMap::new(),
            outbox: Vec::new(),
            stats: EngineStats::default(),
            config,
        })
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn context(&self, symbol: &str) -> Option<&SymbolContext> {
        self.contexts.get(&canonical_symbol(symbol))
    }

    pub fn guard(&self) -> &ComplianceGuard {
        &self.guard
    }

    pub fn weekly(&self) -> &WeeklyTracker {
        &self.weekly
    }

    pub fn exits(&self) -> &ExitManager {
        &self.exits
    }

    pub fn ledger(&self) -> &InstructionLedger {
        &self.ledger
    }

    /// Drain instructions approved since the last call.
    pub fn take_instructions(&mut self) -> Vec<ExecutionInstruction> {
        std::mem::take(&mut self.outbox)
    }

    fn context_mut(&mut self, symbol: &str) -> &mut SymbolContext {
        let enabled = self.config.is_enabled(symbol);
        self.contexts
            .entry(symbol.to_string())
            .or_insert_with(|| SymbolContext::new(symbol, enabled))
    }

    fn normalizer(&mut self, symbol: &str) -> Result<ValueNormalizer, EngineError> {
        self.resolver.resolve(symbol).map(ValueNormalizer::new)
    }

    /// Feed one closed candle. Timeframes other than the configured coarse
    /// and fine ones are ignored.
    pub fn on_candle(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        candle: Candle,
    ) -> Vec<EngineEvent> {
        let symbol = canonical_symbol(symbol);
        let role = if timeframe == self.config.coarse_tf {
            CandleRole::Coarse
        } else if timeframe == self.config.fine_tf {
            CandleRole::Fine
        } else {
            debug!("{}: ignoring {} candle", symbol, timeframe);
            return Vec::new();
        };

        let ctx = self.context_mut(&symbol);
        if !ctx.enabled {
            return Vec::new();
        }
        if !candle.is_well_formed() || !ctx.accept_candle(role, candle.timestamp) {
            self.stats.stale_candles += 1;
            debug!(
                "{}: dropped stale or malformed {} candle at {}",
                symbol, timeframe, candle.timestamp
            );
            return Vec::new();
        }

        let normalizer = match self.normalizer(&symbol) {
            Ok(n) => n,
            Err(error) => return vec![self.data_error(&symbol, error)],
        };

        let limit = self.config.history_limit;
        // Candles are stamped at their open; they are acted on at close.
        let now = candle.timestamp + timeframe.span(1);
        match role {
            CandleRole::Coarse => {
                let series = self.coarse.entry(symbol.clone()).or_default();
                series.push(candle);
                series.truncate_front(limit);
                self.step_coarse(&symbol, &normalizer, now)
            }
            CandleRole::Fine => {
                let series = self.fine.entry(symbol.clone()).or_default();
                series.push(candle.clone());
                series.truncate_front(limit);
                self.step_fine(&symbol, &candle, &normalizer, now)
            }
        }
    }

    fn step_coarse(
        &mut self,
        symbol: &str,
        normalizer: &ValueNormalizer,
        now: DateTime<Utc>,
    ) -> Vec<EngineEvent> {
        let ctx = self.contexts.get_mut(symbol);
        let (Some(ctx), Some(series)) = (ctx, self.coarse.get(symbol)) else {
            return Vec::new();
        };
        match self.machine.on_coarse_candle(ctx, series, normalizer, now) {
            Ok(transitions) => self.record_transitions(transitions),
            Err(error) => vec![self.data_error(symbol, error)],
        }
    }

    fn step_fine(
        &mut self,
        symbol: &str,
        candle: &Candle,
        normalizer: &ValueNormalizer,
        now: DateTime<Utc>,
    ) -> Vec<EngineEvent> {
        let mut events = self.check_deadline(symbol, now);

        // Adverse extreme first so a candle that spans both stop and target
        // books the stop.
        let direction = self.exits.open_for(symbol).map(|p| p.direction);
        for price in price_path(candle, direction) {
            events.extend(self.apply_exits(symbol, price, now));
        }

        let crossing = self
            .contexts
            .get(symbol)
            .and_then(|ctx| ctx.armed_trigger())
            .map(|(_, trigger)| match trigger.direction {
                Direction::Long => candle.high,
                Direction::Short => candle.low,
            });
        if let Some(extreme) = crossing {
            events.extend(self.try_trigger(symbol, extreme, normalizer, now));
            return events;
        }

        if let Some(ctx) = self.contexts.get_mut(symbol) {
            let transitions = self.machine.on_fine_candle(ctx, candle, normalizer, now);
            events.extend(self.record_transitions(transitions));
        }
        events
    }

    /// Feed a live price between candles. Drives exits and trigger crossing.
    pub fn on_price(&mut self, symbol: &str, price: f64, now: DateTime<Utc>) -> Vec<EngineEvent> {
        let symbol = canonical_symbol(symbol);
        if !self.contexts.get(&symbol).is_some_and(|c| c.enabled) {
            return Vec::new();
        }
        let mut events = self.check_deadline(&symbol, now);
        events.extend(self.apply_exits(&symbol, price, now));

        let armed = self.contexts.get(&symbol).is_some_and(|c| c.armed_trigger().is_some());
        if armed {
            match self.normalizer(&symbol) {
                Ok(n) => events.extend(self.try_trigger(&symbol, price, &n, now)),
                Err(error) => events.push(self.data_error(&symbol, error)),
            }
        }
        events
    }

    fn check_deadline(&mut self, symbol: &str, now: DateTime<Utc>) -> Vec<EngineEvent> {
        let Some(ctx) = self.contexts.get_mut(symbol) else {
            return Vec::new();
        };
        let transition = self.machine.check_deadline(ctx, now);
        self.record_transitions(transition.into_iter().collect())
    }

    /// An armed trigger saw `price`. If it crossed, size, check compliance
    /// and hand off, or reset with the reason it was rejected. Missing data
    /// leaves the trigger armed.
    fn try_trigger(
        &mut self,
        symbol: &str,
        price: f64,
        normalizer: &ValueNormalizer,
        now: DateTime<Utc>,
    ) -> Vec<EngineEvent> {
        let Some((retest, trigger)) = self
            .contexts
            .get(symbol)
            .and_then(|c| c.armed_trigger())
            .map(|(r, t)| (r.clone(), t.clone()))
        else {
            return Vec::new();
        };
        if !trigger.is_crossed_by(price) {
            return Vec::new();
        }

        let empty = CandleSeries::default();
        let fine = self.fine.get(symbol).unwrap_or(&empty);
        let input = SizingInput {
            symbol,
            retest: &retest,
            trigger: &trigger,
            fine,
            fine_tf: self.config.fine_tf,
            balance: self.guard.balance(),
            weekly_enhanced: self.weekly.enhanced(symbol, now),
            quote_rates: &self.config.quote_rates,
        };

        let signal = match self.risk.evaluate(&input, normalizer) {
            Ok(RiskDecision::Accepted(signal)) => signal,
            Ok(RiskDecision::Rejected { reason, stop_pips }) => {
                warn!("{}: entry rejected, {} ({:.1} pips)", symbol, reason, stop_pips);
                return self.reset(symbol, reason, now);
            }
            // Held in EntryArmed: the next crossing retries, the deadline still applies.
            Err(error) => return vec![self.data_error(symbol, error)],
        };

        let instruction = ExecutionInstruction::from_signal(&signal, now);
        let request_id = instruction.request_id;
        if let Err(reason) = self.guard.check_and_reserve(request_id, signal.potential_loss, now) {
            self.stats.compliance_violations += 1;
            return self.reset(symbol, reason, now);
        }

        self.ledger.register(instruction.clone());
        let mut events = Vec::new();
        if let Some(ctx) = self.contexts.get_mut(symbol) {
            let transition = self.machine.mark_executed(ctx, request_id, now);
            events.extend(self.record_transitions(transition.into_iter().collect()));
        }

        info!("{}", "=".repeat(60));
        info!("ENTRY: {} {}", symbol, signal.direction);
        info!(
            "  Entry: {} | Stop: {} ({:.1} pips)",
            signal.entry_price, signal.stop_price, signal.stop_pips
        );
        info!("  Target: {} ({:.1}R)", signal.target_price, signal.reward_ratio);
        info!("  Size: {} | At risk: {:.2}", signal.size, signal.potential_loss);
        info!("  Request: {}", request_id);
        info!("{}", "=".repeat(60));

        self.stats.instructions_issued += 1;
        self.approved.insert(request_id, signal);
        self.outbox.push(instruction.clone());
        events.push(EngineEvent::InstructionIssued(instruction));
        events
    }

    pub fn on_ack(&mut self, ack: ExecutionAck, now: DateTime<Utc>) -> Vec<EngineEvent> {
        match self.ledger.on_ack(ack) {
            AckOutcome::Filled { instruction, fill_price } => {
                let id = instruction.request_id;
                let symbol = instruction.symbol;
                let Some(signal) = self.approved.remove(&id) else {
                    return Vec::new();
                };
                if let Some(ctx) = self.contexts.get_mut(&symbol) {
                    self.machine.mark_filled(ctx, id);
                }
                let pip_size = match self.normalizer(&symbol) {
                    Ok(n) => n.pip_size(),
                    Err(error) => {
                        self.guard.release(&id);
                        let mut events = vec![self.data_error(&symbol, error)];
                        let reason = ResetReason::DataUnavailable;
                        events.extend(self.reset_if_pending(&symbol, id, reason, now));
                        return events;
                    }
                };
                let position = PositionRecord::open(&signal, id, fill_price, pip_size, now);
                info!("{}: filled {} @ {}", symbol, id, fill_price);
                self.exits.add(position.clone());
                self.stats.positions_opened += 1;
                vec![EngineEvent::PositionOpened(position)]
            }
            AckOutcome::Rejected { instruction, reason } => {
                let id = instruction.request_id;
                warn!("{}: execution rejected {}: {}", instruction.symbol, id, reason);
                self.guard.release(&id);
                self.approved.remove(&id);
                self.reset_if_pending(&instruction.symbol, id, ResetReason::ExecutionFailed, now)
            }
            AckOutcome::Duplicate => {
                self.stats.duplicate_acks += 1;
                debug!("Duplicate ack ignored");
                Vec::new()
            }
            AckOutcome::Unknown => {
                self.stats.dropped_acks += 1;
                warn!("Ack for unknown request dropped");
                Vec::new()
            }
        }
    }

    /// Fold in what the handoff skipped: malformed acks, repeated ids and
    /// instructions too old to write.
    pub fn note_handoff(&mut self, dropped: usize, duplicates: usize, stale: usize) {
        self.stats.dropped_acks += dropped as u64;
        self.stats.duplicate_instructions += duplicates as u64;
        self.stats.stale_handoffs += stale as u64;
        if duplicates + stale > 0 {
            warn!("Handoff skipped {} duplicate and {} stale instructions", duplicates, stale);
        }
    }

    /// Give up on instructions that were never acknowledged in time and
    /// drop weekly profit from finished weeks.
    pub fn expire_pending(&mut self, now: DateTime<Utc>) -> Vec<EngineEvent> {
        let rolled = self.weekly.roll(now);
        if rolled > 0 {
            info!("New trading week, cleared {} weekly profit entries", rolled);
        }
        let mut events = Vec::new();
        for instruction in self.ledger.expire(now, self.config.instruction_max_age()) {
            let id = instruction.request_id;
            warn!("{}: instruction {} went stale", instruction.symbol, id);
            self.stats.stale_instructions += 1;
            self.guard.release(&id);
            self.approved.remove(&id);
            let reason = ResetReason::InstructionStale;
            events.extend(self.reset_if_pending(&instruction.symbol, id, reason, now));
        }
        events
    }

    /// Close a position on an outside report.
    pub fn close_position(
        &mut self,
        request_id: Uuid,
        price: f64,
        now: DateTime<Utc>,
    ) -> Vec<EngineEvent> {
        match self.exits.close(&request_id, price) {
            Some(event) => self.handle_exit(event, now),
            None => Vec::new(),
        }
    }

    fn apply_exits(&mut self, symbol: &str, price: f64, now: DateTime<Utc>) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        for exit in self.exits.on_price(symbol, price) {
            events.extend(self.handle_exit(exit, now));
        }
        events
    }

    fn handle_exit(&mut self, exit: ExitEvent, now: DateTime<Utc>) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        match &exit {
            ExitEvent::BreakevenArmed { request_id, symbol } => {
                let freed = self.guard.release(request_id);
                info!("{}: stop to breakeven on {}, released {:.2}", symbol, request_id, freed);
                if let Some(ctx) = self.contexts.get_mut(symbol) {
                    ctx.last_exit = Some(ExitPhase::BreakevenArmed);
                }
                events.push(EngineEvent::Exit(exit.clone()));
            }
            ExitEvent::Closed {
                request_id,
                symbol,
                kind,
                exit_price,
                pnl,
            } => {
                let balance_before = self.guard.balance();
                self.guard.record_close(request_id, *pnl, now);
                self.weekly.record(symbol, *pnl, balance_before, now);
                self.stats.positions_closed += 1;
                info!(
                    "{}: closed {} by {} @ {} | P&L {:+.2} | balance {:.2}",
                    symbol,
                    request_id,
                    kind,
                    exit_price,
                    pnl,
                    self.guard.balance()
                );
                let (id, symbol) = (*request_id, symbol.clone());
                events.push(EngineEvent::Exit(exit.clone()));
                events.extend(self.reset_if_pending(&symbol, id, ResetReason::PositionClosed, now));
                if let Some(ctx) = self.contexts.get_mut(&symbol) {
                    ctx.last_exit = Some(ExitPhase::Closed);
                }
            }
        }
        events
    }

    fn reset_if_pending(
        &mut self,
        symbol: &str,
        request_id: Uuid,
        reason: ResetReason,
        now: DateTime<Utc>,
    ) -> Vec<EngineEvent> {
        let pending = self
            .contexts
            .get(symbol)
            .is_some_and(|c| c.pending_request() == Some(request_id));
        if pending {
            self.reset(symbol, reason, now)
        } else {
            Vec::new()
        }
    }

    fn reset(&mut self, symbol: &str, reason: ResetReason, now: DateTime<Utc>) -> Vec<EngineEvent> {
        let Some(ctx) = self.contexts.get_mut(symbol) else {
            return Vec::new();
        };
        let transition = ctx.reset(reason, now);
        self.record_transitions(vec![transition])
    }

    fn record_transitions(&mut self, transitions: Vec<Transition>) -> Vec<EngineEvent> {
        transitions
            .into_iter()
            .map(|t| {
                self.stats.transitions += 1;
                match t.reason {
                    Some(reason) => {
                        *self.stats.resets.entry((t.symbol.clone(), reason)).or_insert(0) += 1;
                        if t.to == PhaseKind::Expired {
                            info!("{}: {} -> {} ({})", t.symbol, t.from, t.to, reason);
                        } else {
                            warn!("{}: {} -> {} ({})", t.symbol, t.from, t.to, reason);
                        }
                    }
                    None => info!("{}: {} -> {}", t.symbol, t.from, t.to),
                }
                EngineEvent::Transition(t)
            })
            .collect()
    }

    fn data_error(&mut self, symbol: &str, error: EngineError) -> EngineEvent {
        self.stats.data_errors += 1;
        match &error {
            EngineError::InsufficientHistory { .. } => debug!("{}: {}", symbol, error),
            _ => warn!("{}: {}", symbol, error),
        }
        EngineEvent::DataError {
            symbol: symbol.to_string(),
            error,
        }
    }

    pub fn log_status(&self) {
        info!("{}", "=".repeat(60));
        info!("Balance: {:.2} | HWM: {:.2}", self.guard.balance(), self.guard.high_water_mark());
        info!("Reserved risk: {:.2}", self.guard.reserved());
        info!(
            "Open positions: {} | Pending instructions: {}",
            self.exits.open_count(),
            self.ledger.pending_count()
        );
        let mut symbols: Vec<&String> = self.contexts.keys().collect();
        symbols.sort();
        for symbol in symbols {
            if let Some(ctx) = self.contexts.get(symbol) {
                info!("  {}: {}", symbol, ctx.kind());
            }
        }
        info!(
            "Issued: {} | Violations: {} | Stale candles: {} | Dropped acks: {}",
            self.stats.instructions_issued,
            self.stats.compliance_violations,
            self.stats.stale_candles,
            self.stats.dropped_acks
        );
        info!(
            "Stale instructions: {} | Stale handoffs: {} | Duplicate instructions: {}",
            self.stats.stale_instructions,
            self.stats.stale_handoffs,
            self.stats.duplicate_instructions
        );
        info!("{}", "=".repeat(60));
    }
}

/// Order in which a candle's prices are assumed to have traded for an open
/// position: adverse extreme, favorable extreme, close.
fn price_path(candle: &Candle, direction: Option<Direction>) -> Vec<f64> {
    match direction {
        Some(Direction::Long) => vec![candle.low, candle.high, candle.close],
        Some(Direction::Short) => vec![candle.high, candle.low, candle.close],
        None => Vec::new(),
    }
}
