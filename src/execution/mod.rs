pub mod dispatcher;
pub mod file_handoff;
pub mod instruction;
pub mod ledger;

pub use dispatcher::{spawn_dispatcher, Dispatch};
pub use file_handoff::{AckBatch, ExecutionSink, FileHandoff, SubmitOutcome};
pub use instruction::{AckStatus, ExecutionAck, ExecutionInstruction};
pub use ledger::{AckOutcome, InstructionLedger};
