use env_logger::{Builder, Env};

/// Initialise `env_logger`. `RUST_LOG` wins over the default filter, which is
/// `info` or `warn` in quiet mode. Calling it twice is harmless.
pub fn init_log(quiet: bool) {
  let default = if quiet { "warn" } else { "info" };
  let _ = Builder::from_env(Env::default().default_filter_or(default))
    .format_timestamp(None)
    .format_target(false)
    .try_init();
}

/// Macro to push a ModelRecord with common fields
///
/// Usage:
/// ```ignore
/// model_record!(self, services, "action_name", "subject string");
/// model_record!(self, services, "action_name", format!("formatted {}", value));
/// ```
#[macro_export]
macro_rules! model_record {
  ($self:expr, $services:expr, $action:expr, $subject:expr) => {
    $self.records.push(sim::models::ModelRecord {
      time: $services.global_time(),
      action: $action.to_string(),
      subject: $subject.to_string(),
    });
  };
}
