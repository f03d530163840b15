use log::{error, info, warn};
use sim::models::model_trait::{DevsModel, Reportable, ReportableModel, SerializableModel};
use sim::models::{ModelMessage, ModelRecord};
use sim::simulator::Services;
use sim::utils::errors::SimulationError;
use std::f64::INFINITY;

use super::error::AccelError;
use super::mem_port::SharedPort;
use super::params::ArrayGeometry;
use super::regfile::{RegAccess, RegEffect, RegisterFile, STATUS_BUSY, STATUS_IRQ, STATUS_REJECTED};
use super::scheduler::AcceleratorScheduler;
use crate::model_record;

pub const REG_REQ_PORT: &str = "reg_req";
pub const REG_RESP_PORT: &str = "reg_resp";
pub const IRQ_PORT: &str = "irq";

/// Memory-mapped GEMM engine as a DEVS model.
///
/// Register accesses arrive as JSON `RegAccess` on `reg_req`. The scheduler's
/// pending continuation becomes the model's time advance; when a job
/// completes its report is sent on `irq`.
#[derive(Clone)]
pub struct GemmAccel {
  reg_req_port: String,
  reg_resp_port: String,
  irq_port: String,

  regs: RegisterFile,
  scheduler: AcceleratorScheduler,

  until_continuation: f64,
  outbox: Vec<ModelMessage>,
  records: Vec<ModelRecord>,
}

impl GemmAccel {
  pub fn new(geometry: ArrayGeometry, port: SharedPort) -> Self {
    Self {
      reg_req_port: REG_REQ_PORT.to_string(),
      reg_resp_port: REG_RESP_PORT.to_string(),
      irq_port: IRQ_PORT.to_string(),
      regs: RegisterFile::new(),
      scheduler: AcceleratorScheduler::new(geometry, port),
      until_continuation: INFINITY,
      outbox: Vec::new(),
      records: Vec::new(),
    }
  }

  fn sync_continuation(&mut self) {
    self.until_continuation = match self.scheduler.pending() {
      Some((_, latency)) => latency as f64,
      None => INFINITY,
    };
  }

  fn trigger(&mut self, services: &mut Services) -> Result<(), SimulationError> {
    if self.scheduler.is_busy() {
      warn!("trigger while busy at t={}, rejected", services.global_time());
      self.regs.set_status(STATUS_REJECTED, true);
      model_record!(self, services, "trigger_rejected", "busy");
      return Ok(());
    }

    match self.scheduler.start(&self.regs.job()) {
      Ok(()) => {
        self.regs.set_status(STATUS_REJECTED, false);
        self.regs.set_status(STATUS_IRQ, false);
        self.regs.set_status(STATUS_BUSY, true);
        self.sync_continuation();
        model_record!(self, services, "trigger", format!("{:?}", self.regs.job()));
        Ok(())
      },
      Err(e @ (AccelError::Job(_) | AccelError::Geometry(_))) => {
        let reason = e.to_string();
        warn!("job rejected: {}", reason);
        self.regs.set_status(STATUS_REJECTED, true);
        model_record!(self, services, "job_rejected", reason);
        Ok(())
      },
      Err(e) => {
        error!("gemm start failed: {}", e);
        Err(SimulationError::InvalidModelState)
      },
    }
  }

  fn write_register(&mut self, offset: u32, value: u32, services: &mut Services) -> Result<(), SimulationError> {
    match self.regs.write(offset, value) {
      RegEffect::None => Ok(()),
      RegEffect::Trigger => self.trigger(services),
      RegEffect::IrqClear => {
        self.scheduler.clear_irq();
        self.regs.set_status(STATUS_IRQ, false);
        Ok(())
      },
      RegEffect::SoftClear => {
        if self.scheduler.is_busy() {
          warn!("soft clear ignored while a job is running");
        } else {
          self.regs.clear_job();
          self.scheduler.clear_irq();
          self.regs.set_status(STATUS_IRQ | STATUS_REJECTED, false);
          model_record!(self, services, "soft_clear", "");
        }
        Ok(())
      },
    }
  }
}

impl DevsModel for GemmAccel {
  fn events_ext(&mut self, incoming_message: &ModelMessage, services: &mut Services) -> Result<(), SimulationError> {
    if incoming_message.port_name != self.reg_req_port {
      warn!("gemm: message on unknown port {}", incoming_message.port_name);
      return Ok(());
    }

    let access: RegAccess = match serde_json::from_str(&incoming_message.content) {
      Ok(access) => access,
      Err(e) => {
        warn!("gemm: malformed register request {:?}: {}", incoming_message.content, e);
        return Ok(());
      },
    };

    if access.write {
      self.write_register(access.offset, access.value, services)
    } else {
      let response = RegAccess {
        value: self.regs.read(access.offset),
        ..access
      };
      self.outbox.push(ModelMessage {
        content: serde_json::to_string(&response).map_err(|_| SimulationError::InvalidModelState)?,
        port_name: self.reg_resp_port.clone(),
      });
      Ok(())
    }
  }

  fn events_int(&mut self, services: &mut Services) -> Result<Vec<ModelMessage>, SimulationError> {
    let mut messages = std::mem::take(&mut self.outbox);
    if self.until_continuation > 0.0 {
      return Ok(messages);
    }

    let Some((event, _)) = self.scheduler.pending() else {
      self.until_continuation = INFINITY;
      return Ok(messages);
    };

    match self.scheduler.on_event(event) {
      Ok(Some(report)) => {
        self.regs.job_finished();
        self.regs.set_status(STATUS_BUSY, false);
        self.regs.set_status(STATUS_IRQ, self.scheduler.irq());
        info!("gemm irq at t={} after {} cycles", services.global_time(), report.cycles);

        let content = serde_json::to_string(&report).map_err(|_| SimulationError::InvalidModelState)?;
        model_record!(self, services, "irq", content);
        messages.push(ModelMessage {
          content,
          port_name: self.irq_port.clone(),
        });
      },
      Ok(None) => {},
      Err(e) => {
        error!("gemm fault at t={}: {}", services.global_time(), e);
        model_record!(self, services, "fault", e);
        return Err(SimulationError::InvalidModelState);
      },
    }

    self.sync_continuation();
    Ok(messages)
  }

  fn time_advance(&mut self, time_delta: f64) {
    self.until_continuation -= time_delta;
  }

  fn until_next_event(&self) -> f64 {
    if !self.outbox.is_empty() {
      return 0.0;
    }
    self.until_continuation
  }
}

impl Reportable for GemmAccel {
  fn status(&self) -> String {
    format!(
      "phase={} cycles={} status={:#x}",
      self.scheduler.phase().name(),
      self.scheduler.cycles(),
      self.regs.status()
    )
  }

  fn records(&self) -> &Vec<ModelRecord> {
    &self.records
  }
}

impl ReportableModel for GemmAccel {}

impl SerializableModel for GemmAccel {
  fn get_type(&self) -> &'static str {
    "GemmAccel"
  }
}
