use log::LevelFilter;
use sim::models::model_trait::DevsModel;
use sim::simulator::Simulation;
use std::fs::File;
use std::io::{self, BufWriter, Result, Write};

/// Whether anything is left for the simulation to do.
pub fn has_pending_work(simulation: &mut Simulation) -> bool {
  if !simulation.get_messages().is_empty() {
    return true;
  }
  let until_next_event = simulation
    .models()
    .iter()
    .fold(f64::INFINITY, |min, model| f64::min(min, model.until_next_event()));
  until_next_event != f64::INFINITY
}

/// Deliver pending messages and run the next batch of internal events.
/// Returns `false` once the simulation is quiescent.
pub fn model_step(simulation: &mut Simulation, trace_writer: &mut Option<BufWriter<File>>) -> Result<bool> {
  if !has_pending_work(simulation) {
    return Ok(false);
  }

  let messages = simulation.get_messages();
  if log::max_level() >= LevelFilter::Debug {
    for msg in messages.iter() {
      println!(
        "[MSG] t={:.1} {}:{} -> {}:{} | {}",
        msg.time(),
        msg.source_id(),
        msg.source_port(),
        msg.target_id(),
        msg.target_port(),
        msg.content()
      );
    }
  }

  if let Some(writer) = trace_writer {
    for msg in messages.iter() {
      let trace_entry = serde_json::json!({
        "time": msg.time(),
        "source": msg.source_id(),
        "source_port": msg.source_port(),
        "target": msg.target_id(),
        "target_port": msg.target_port(),
        "content": msg.content()
      });
      writeln!(writer, "{}", trace_entry)?;
    }
    writer.flush()?;
  }

  let now = simulation.get_global_time();
  simulation.step().map_err(|e| {
    log::error!("simulation step failed at t={}: {:?}", now, e);
    io::Error::new(io::ErrorKind::Other, format!("Simulation error: {:?}", e))
  })?;
  Ok(true)
}
