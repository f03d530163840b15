pub mod config;
pub mod host;
pub mod sim;
pub mod simulator;
pub mod utils;

pub use simulator::{RunSummary, Simulator};
pub use utils::log;
