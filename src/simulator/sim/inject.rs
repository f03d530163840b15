use sim::simulator::{Message, Simulation};

use crate::arch::gemm::accel::REG_REQ_PORT;
use crate::arch::gemm::main::{GEMM_MODEL, HOST_MODEL};
use crate::arch::gemm::regfile::RegAccess;

/// Inject message to specified Model
///
/// # Parameters
/// - `simulation`: Simulation instance
/// - `target_model`: Target model name
/// - `source_id`: Optional message source ID, defaults to "host"
/// - `source_port`: Optional source port, defaults to "default"
/// - `target_port`: Optional target port, defaults to "default"
///
/// The message is stamped with the current global time.
pub fn inject_message(
  simulation: &mut Simulation,
  target_model: &str,
  source_id: Option<&str>,
  source_port: Option<&str>,
  target_port: Option<&str>,
  content: &str,
) {
  let msg = Message::new(
    source_id.unwrap_or(HOST_MODEL).to_string(),
    source_port.unwrap_or("default").to_string(),
    target_model.to_string(),
    target_port.unwrap_or("default").to_string(),
    simulation.get_global_time(),
    content.to_string(),
  );
  simulation.inject_input(msg);
}

/// Queue a register access from the host to the accelerator.
pub fn inject_reg_access(simulation: &mut Simulation, access: RegAccess) -> serde_json::Result<()> {
  let content = serde_json::to_string(&access)?;
  inject_message(
    simulation,
    GEMM_MODEL,
    Some(HOST_MODEL),
    Some("reg_req"),
    Some(REG_REQ_PORT),
    &content,
  );
  Ok(())
}
