pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod execution;
pub mod feed;
pub mod models;
pub mod strategies;
#[cfg(test)]
pub mod test_helpers;
pub mod trading;
