pub mod arch;
pub mod simulator;

pub use arch::gemm::create_simulation;
pub use simulator::sim::mode::{SimConfig, StepMode};
pub use simulator::utils::log;
