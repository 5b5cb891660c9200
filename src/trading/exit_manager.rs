use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::models::{Direction, ExitPhase};
use crate::strategies::signals::EntrySignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseKind {
    Stop,
    Breakeven,
    Target,
    External,
}

impl fmt::Display for CloseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseKind::Stop => write!(f, "stop"),
            CloseKind::Breakeven => write!(f, "breakeven"),
            CloseKind::Target => write!(f, "target"),
            CloseKind::External => write!(f, "external"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub request_id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_price: f64,
    pub target_price: f64,
    pub size: f64,
    /// Entry-to-initial-stop distance in price units.
    pub initial_risk: f64,
    pub pip_size: f64,
    pub pip_value: f64,
    pub opened_at: DateTime<Utc>,
    pub phase: ExitPhase,
    #[serde(default)]
    pub exit_price: Option<f64>,
    #[serde(default)]
    pub pnl: f64,
}

impl PositionRecord {
    pub fn open(
        signal: &EntrySignal,
        request_id: Uuid,
        fill_price: f64,
        pip_size: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            request_id,
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            entry_price: fill_price,
            stop_price: signal.stop_price,
            target_price: signal.target_price,
            size: signal.size,
            initial_risk: (fill_price - signal.stop_price).abs(),
            pip_size,
            pip_value: signal.pip_value,
            opened_at: now,
            phase: ExitPhase::PreBreakeven,
            exit_price: None,
            pnl: 0.0,
        }
    }

    /// Account-currency result of closing at `price`.
    pub fn pnl_at(&self, price: f64) -> f64 {
        let pips = self.direction.favorable_move(self.entry_price, price) / self.pip_size;
        round2(pips * self.size * self.pip_value)
    }

    fn stop_hit(&self, price: f64) -> bool {
        self.direction.favorable_move(self.stop_price, price) <= 0.0
    }

    fn target_hit(&self, price: f64) -> bool {
        self.direction.favorable_move(self.target_price, price) >= 0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExitEvent {
    BreakevenArmed {
        request_id: Uuid,
        symbol: String,
    },
    Closed {
        request_id: Uuid,
        symbol: String,
        kind: CloseKind,
        exit_price: f64,
        pnl: f64,
    },
}

/// Open positions and their two exit phases: initial stop, then stop at entry
/// once the trade has run one initial risk in its favor.
pub struct ExitManager {
    positions: HashMap<Uuid, PositionRecord>,
}

impl ExitManager {
    pub fn new() -> Self {
        Self {
            positions: HashMap::new(),
        }
    }

    pub fn add(&mut self, position: PositionRecord) {
        self.positions.insert(position.request_id, position);
    }

    pub fn get(&self, request_id: &Uuid) -> Option<&PositionRecord> {
        self.positions.get(request_id)
    }

    pub fn open_for(&self, symbol: &str) -> Option<&PositionRecord> {
        self.positions.values().find(|p| p.symbol == symbol)
    }

    pub fn open_count(&self) -> usize {
        self.positions.len()
    }

    /// Walk every open position on `symbol` against a new price.
    pub fn on_price(&mut self, symbol: &str, price: f64) -> Vec<ExitEvent> {
        let mut events = Vec::new();
        let ids: Vec<Uuid> = self
            .positions
            .values()
            .filter(|p| p.symbol == symbol)
            .map(|p| p.request_id)
            .collect();

        for id in ids {
            let Some(pos) = self.positions.get_mut(&id) else {
                continue;
            };

            if pos.stop_hit(price) {
                let kind = match pos.phase {
                    ExitPhase::BreakevenArmed => CloseKind::Breakeven,
                    _ => CloseKind::Stop,
                };
                let exit = pos.stop_price;
                events.extend(self.finish(&id, exit, kind));
                continue;
            }

            if pos.target_hit(price) {
                let exit = pos.target_price;
                events.extend(self.finish(&id, exit, CloseKind::Target));
                continue;
            }

            let excursion = pos.direction.favorable_move(pos.entry_price, price);
            let one_r = pos.initial_risk - pos.pip_size * 1e-6;
            if pos.phase == ExitPhase::PreBreakeven && excursion >= one_r {
                pos.stop_price = pos.entry_price;
                pos.phase = ExitPhase::BreakevenArmed;
                events.push(ExitEvent::BreakevenArmed {
                    request_id: id,
                    symbol: pos.symbol.clone(),
                });
            }
        }

        events
    }

    /// Close on an outside report (manual close, venue liquidation).
    pub fn close(&mut self, request_id: &Uuid, price: f64) -> Option<ExitEvent> {
        self.finish(request_id, price, CloseKind::External)
    }

    fn finish(&mut self, request_id: &Uuid, exit_price: f64, kind: CloseKind) -> Option<ExitEvent> {
        let mut pos = self.positions.remove(request_id)?;
        pos.phase = ExitPhase::Closed;
        pos.exit_price = Some(exit_price);
        pos.pnl = pos.pnl_at(exit_price);
        Some(ExitEvent::Closed {
            request_id: pos.request_id,
            symbol: pos.symbol,
            kind,
            exit_price,
            pnl: pos.pnl,
        })
    }
}

impl Default for ExitManager {
    fn default() -> Self {
        Self::new()
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
