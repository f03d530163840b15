use log::debug;
use sim::models::model_trait::{DevsModel, Reportable, ReportableModel, SerializableModel};
use sim::models::{ModelMessage, ModelRecord};
use sim::simulator::Services;
use sim::utils::errors::SimulationError;
use std::f64::INFINITY;

use crate::arch::gemm::regfile::RegAccess;
use crate::arch::gemm::scheduler::JobReport;
use crate::model_record;

pub const IRQ_IN_PORT: &str = "irq_in";
pub const REG_RESP_IN_PORT: &str = "reg_resp_in";

/// Stand-in for the driving core: records interrupts and register read
/// responses coming back from the accelerator.
#[derive(Debug, Clone)]
pub struct Host {
  irq_port: String,
  reg_resp_port: String,
  reports: Vec<JobReport>,
  reg_reads: Vec<RegAccess>,
  records: Vec<ModelRecord>,
}

impl Host {
  pub fn new() -> Self {
    Self {
      irq_port: IRQ_IN_PORT.to_string(),
      reg_resp_port: REG_RESP_IN_PORT.to_string(),
      reports: Vec::new(),
      reg_reads: Vec::new(),
      records: Vec::new(),
    }
  }
}

impl Default for Host {
  fn default() -> Self {
    Self::new()
  }
}

impl DevsModel for Host {
  fn events_ext(&mut self, incoming_message: &ModelMessage, services: &mut Services) -> Result<(), SimulationError> {
    if incoming_message.port_name == self.irq_port {
      let report: JobReport =
        serde_json::from_str(&incoming_message.content).map_err(|_| SimulationError::InvalidModelState)?;
      debug!("host: irq after {} cycles", report.cycles);
      self.reports.push(report);
      model_record!(self, services, "irq", incoming_message.content);
    } else if incoming_message.port_name == self.reg_resp_port {
      let access: RegAccess =
        serde_json::from_str(&incoming_message.content).map_err(|_| SimulationError::InvalidModelState)?;
      self.reg_reads.push(access);
      model_record!(self, services, "reg_resp", incoming_message.content);
    }
    Ok(())
  }

  fn events_int(&mut self, _services: &mut Services) -> Result<Vec<ModelMessage>, SimulationError> {
    Ok(Vec::new())
  }

  fn time_advance(&mut self, _time_delta: f64) {}

  fn until_next_event(&self) -> f64 {
    INFINITY
  }
}

impl Reportable for Host {
  fn status(&self) -> String {
    format!("irqs={} reg_reads={}", self.reports.len(), self.reg_reads.len())
  }

  fn records(&self) -> &Vec<ModelRecord> {
    &self.records
  }
}

impl ReportableModel for Host {}

impl SerializableModel for Host {
  fn get_type(&self) -> &'static str {
    "Host"
  }
}
