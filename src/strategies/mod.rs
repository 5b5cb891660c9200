pub mod entry_trigger;
pub mod phase_machine;
pub mod signals;
