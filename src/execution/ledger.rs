use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::execution::instruction::{AckStatus, ExecutionAck, ExecutionInstruction};

#[derive(Debug, Clone, PartialEq)]
pub enum AckOutcome {
    Filled {
        instruction: ExecutionInstruction,
        fill_price: f64,
    },
    Rejected {
        instruction: ExecutionInstruction,
        reason: String,
    },
    /// Already settled; no effect.
    Duplicate,
    /// Never issued here, or already expired.
    Unknown,
}

/// Instructions awaiting acknowledgment, keyed by request id.
///
/// Each id settles at most once: the first ack wins, later acks and
/// re-registrations are no-ops. Settled ids are remembered, by creation
/// time, for twice the instruction max age.
pub struct InstructionLedger {
    pending: HashMap<Uuid, ExecutionInstruction>,
    settled: HashMap<Uuid, DateTime<Utc>>,
}

impl InstructionLedger {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            settled: HashMap::new(),
        }
    }

    /// Returns false if the id was already seen.
    pub fn register(&mut self, instruction: ExecutionInstruction) -> bool {
        let id = instruction.request_id;
        if self.settled.contains_key(&id) || self.pending.contains_key(&id) {
            return false;
        }
        self.pending.insert(id, instruction);
        true
    }

    pub fn pending(&self, request_id: &Uuid) -> Option<&ExecutionInstruction> {
        self.pending.get(request_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn on_ack(&mut self, ack: ExecutionAck) -> AckOutcome {
        let Some(instruction) = self.pending.remove(&ack.request_id) else {
            return if self.settled.contains_key(&ack.request_id) {
                AckOutcome::Duplicate
            } else {
                AckOutcome::Unknown
            };
        };
        self.settled.insert(ack.request_id, instruction.created_at);
        debug!("Ack for {} ({})", ack.request_id, instruction.symbol);
        match ack.status {
            AckStatus::Filled { fill_price } => AckOutcome::Filled {
                instruction,
                fill_price,
            },
            AckStatus::Rejected { reason } => AckOutcome::Rejected { instruction, reason },
        }
    }

    /// Remove and return every pending instruction older than `max_age`.
    /// They count as settled so a late ack is ignored. Settled ids past
    /// twice `max_age` are forgotten.
    pub fn expire(&mut self, now: DateTime<Utc>, max_age: Duration) -> Vec<ExecutionInstruction> {
        let retention = max_age * 2;
        self.settled.retain(|_, created| now - *created <= retention);

        let stale: Vec<Uuid> = self
            .pending
            .values()
            .filter(|i| i.is_stale(now, max_age))
            .map(|i| i.request_id)
            .collect();
        stale
            .into_iter()
            .filter_map(|id| {
                let instruction = self.pending.remove(&id)?;
                self.settled.insert(id, instruction.created_at);
                Some(instruction)
            })
            .collect()
    }
}

impl Default for InstructionLedger {
    fn default() -> Self {
        Self::new()
    }
}
