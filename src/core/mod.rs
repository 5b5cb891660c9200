pub mod instrument;
pub mod normalizer;
pub mod structure;
pub mod volatility;
