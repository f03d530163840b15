pub mod inject;
pub mod mode;
pub mod model;
pub mod shell;

pub use mode::StepMode;
pub use model::model_step;
