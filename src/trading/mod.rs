pub mod compliance;
pub mod exit_manager;
pub mod risk;
pub mod weekly_tracker;
