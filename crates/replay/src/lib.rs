//! Historical replay for the leak-detection core.

pub mod simulator;

pub use simulator::{CancelToken, ReplaySimulator};
