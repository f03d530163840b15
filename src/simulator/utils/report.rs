use sim::models::{Model, Reportable};
use sim::simulator::Simulation;

use crate::arch::gemm::scheduler::JobReport;
use crate::arch::gemm::streamer::StreamStats;

pub fn print_simulation_records(simulation: &mut Simulation) {
  println!("\n--- Simulation Records ---");

  for model in simulation.models().iter() {
    print_model_records(model, 0);
  }

  println!("--- End Records ---\n");
}

fn print_model_records(model: &Model, indent: usize) {
  let records = model.records();
  let indent_str = "  ".repeat(indent);

  if !records.is_empty() {
    println!("\n{}[{}] {}", indent_str, model.id(), model.status());
    for record in records {
      println!("{}  Time {:.1}: {}", indent_str, record.time, record.action);
    }
  }
}

pub fn print_job_report(report: &JobReport) {
  println!("--- Job Report ---");
  println!("cycles:       {}", report.cycles);
  println!("tiles:        {}", report.tiles);
  println!("hypercycles:  {}", report.hypercycles);
  println!("store phases: {}", report.store_phases);
  for (name, stats) in [("x", &report.x), ("w", &report.w), ("y", &report.y), ("z", &report.z)] {
    print_stream(name, stats);
  }
}

fn print_stream(name: &str, stats: &StreamStats) {
  println!(
    "  {}: {} beats, {} bytes, {} bubbles, {} cycles",
    name, stats.transactions, stats.bytes, stats.bubbles, stats.latency
  );
}
