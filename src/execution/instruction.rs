use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Direction;
use crate::strategies::signals::EntrySignal;

/// What the executor receives. `request_id` is the idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionInstruction {
    pub request_id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_price: f64,
    pub target_price: f64,
    pub size: f64,
    pub created_at: DateTime<Utc>,
}

impl ExecutionInstruction {
    pub fn from_signal(signal: &EntrySignal, now: DateTime<Utc>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            entry_price: signal.entry_price,
            stop_price: signal.stop_price,
            target_price: signal.target_price,
            size: signal.size,
            created_at: now,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age(now) > max_age
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AckStatus {
    Filled { fill_price: f64 },
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionAck {
    pub request_id: Uuid,
    #[serde(flatten)]
    pub status: AckStatus,
}

impl ExecutionAck {
    /// Parse an ack document. Anything malformed is `None`; acks are never
    /// retried, so there is nothing useful to report back.
    pub fn parse(raw: &str) -> Option<Self> {
        let ack: ExecutionAck = serde_json::from_str(raw).ok()?;
        match &ack.status {
            AckStatus::Filled { fill_price } if !fill_price.is_finite() || *fill_price <= 0.0 => {
                None
            }
            _ => Some(ack),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_wire_format() {
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"request_id":"{id}","status":"filled","fill_price":147.04}}"#);
        let ack = ExecutionAck::parse(&raw).unwrap();
        assert_eq!(ack.request_id, id);
        assert_eq!(ack.status, AckStatus::Filled { fill_price: 147.04 });

        let raw =
            format!(r#"{{"request_id":"{id}","status":"rejected","reason":"market closed"}}"#);
        let ack = ExecutionAck::parse(&raw).unwrap();
        assert!(matches!(ack.status, AckStatus::Rejected { .. }));
    }

    #[test]
    fn malformed_acks_are_dropped() {
        assert!(ExecutionAck::parse("not json").is_none());
        let bad_id = r#"{"request_id":"nope","status":"filled","fill_price":1.0}"#;
        assert!(ExecutionAck::parse(bad_id).is_none());
        let id = Uuid::new_v4();
        let partial = format!(r#"{{"request_id":"{id}","status":"partial"}}"#);
        assert!(ExecutionAck::parse(&partial).is_none());
        let negative = format!(r#"{{"request_id":"{id}","status":"filled","fill_price":-1}}"#);
        assert!(ExecutionAck::parse(&negative).is_none());
    }

    #[test]
    fn staleness_uses_creation_time() {
        let now = Utc::now();
        let instr = ExecutionInstruction {
            request_id: Uuid::new_v4(),
            symbol: "EURUSD".into(),
            direction: Direction::Long,
            entry_price: 1.085,
            stop_price: 1.084,
            target_price: 1.086,
            size: 0.5,
            created_at: now,
        };
        assert!(!instr.is_stale(now + Duration::seconds(180), Duration::seconds(180)));
        assert!(instr.is_stale(now + Duration::seconds(181), Duration::seconds(180)));
    }
}
