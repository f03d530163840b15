use log::{info, warn};
use sim::models::Reportable;
use sim::simulator::Simulation;
use std::fs::File;
use std::io::{self, BufWriter, Result};
use std::sync::{Arc, Mutex};

use super::config::AppConfig;
use super::sim::inject::inject_reg_access;
use super::sim::mode::{SimConfig, StepMode};
use super::sim::model::model_step;
use super::sim::shell::{Command, Shell};
use super::utils::report::{print_job_report, print_simulation_records};
use crate::arch::gemm::create_simulation;
use crate::arch::gemm::golden::{check_result, Operands};
use crate::arch::gemm::job::{BufferLayout, GemmShape, JobConfig};
use crate::arch::gemm::main::HOST_MODEL;
use crate::arch::gemm::mem_port::{FlatMemory, SharedPort};
use crate::arch::gemm::params::ArrayGeometry;
use crate::arch::gemm::regfile::{RegAccess, REG_TRIGGER};
use crate::arch::gemm::scheduler::JobReport;

/// Outcome of a simulator run.
#[derive(Debug, Clone)]
pub struct RunSummary {
  /// `None` when the run was stopped before the interrupt
  pub report: Option<JobReport>,
  /// Largest absolute deviation from the reference GEMM
  pub max_error: Option<f64>,
  pub steps: u64,
  pub sim_time: f64,
}

fn other(msg: String) -> io::Error {
  io::Error::new(io::ErrorKind::Other, msg)
}

pub struct Simulator {
  config: SimConfig,
  geometry: ArrayGeometry,
  shape: GemmShape,
  layout: BufferLayout,
  operands: Operands,
  memory: Arc<Mutex<FlatMemory>>,
  simulation: Simulation,
  trace_writer: Option<BufWriter<File>>,
  steps: u64,
}

impl Simulator {
  /// Fill memory with seeded operands, build the simulation and queue the
  /// register writes plus trigger that start the job.
  pub fn new(app: AppConfig) -> Result<Self> {
    let geometry = app.geometry()?;
    let shape = app.shape();
    let layout = app.layout()?;
    let format = geometry.format;

    let operands = Operands::random(shape, format, app.job.seed);
    let mut memory = FlatMemory::new(app.memory.base as u64, app.memory.size as usize, app.memory.latency);
    let placed = memory
      .write_matrix(layout.x_addr as u64, &operands.x, shape.n, layout.x_pitch as usize, format)
      .and_then(|_| memory.write_matrix(layout.w_addr as u64, &operands.w, shape.k, layout.w_pitch as usize, format))
      .and_then(|_| memory.write_matrix(layout.y_addr as u64, &operands.y, shape.k, layout.yz_pitch as usize, format));
    if placed.is_none() {
      return Err(other(format!("operands do not fit memory with layout {:?}", layout)));
    }

    let memory = memory.shared();
    let port: SharedPort = memory.clone();
    let mut simulation = create_simulation(geometry, port);

    let job = JobConfig::for_gemm(shape, &geometry, &layout);
    for (offset, value) in job.register_writes() {
      inject_reg_access(&mut simulation, RegAccess::write(offset, value))?;
    }
    inject_reg_access(&mut simulation, RegAccess::write(REG_TRIGGER, 0))?;

    let config = app.sim_config();
    let trace_writer = match &config.trace_file {
      Some(path) => Some(BufWriter::new(File::create(path)?)),
      None => None,
    };

    info!(
      "gemm {}x{}x{} {} on a {}x{} array (L={})",
      shape.m,
      shape.n,
      shape.k,
      format,
      geometry.array_height,
      geometry.pipe_regs,
      geometry.array_width()
    );

    Ok(Self {
      config,
      geometry,
      shape,
      layout,
      operands,
      memory,
      simulation,
      trace_writer,
      steps: 0,
    })
  }

  pub fn memory(&self) -> Arc<Mutex<FlatMemory>> {
    Arc::clone(&self.memory)
  }

  pub fn run(&mut self) -> Result<RunSummary> {
    let finished = match self.config.step_mode {
      StepMode::Continuous => self.run_continuous()?,
      StepMode::Step => self.run_step_mode()?,
    };

    if !self.config.quiet {
      print_simulation_records(&mut self.simulation);
    }

    let sim_time = self.simulation.get_global_time();
    if !finished {
      warn!("stopped at t={} before the job completed", sim_time);
      return Ok(RunSummary {
        report: None,
        max_error: None,
        steps: self.steps,
        sim_time,
      });
    }

    let report = self
      .irq_report()?
      .ok_or_else(|| other("simulation went idle without raising the interrupt".to_string()))?;
    let max_error = self.verify()?;
    if !self.config.quiet {
      print_job_report(&report);
    }
    info!("result verified, max error {:e}", max_error);

    Ok(RunSummary {
      report: Some(report),
      max_error: Some(max_error),
      steps: self.steps,
      sim_time,
    })
  }

  /// Returns `Ok(false)` if the simulation ran dry without an interrupt.
  fn step_once(&mut self) -> Result<bool> {
    if self.steps >= self.config.max_steps {
      return Err(other(format!("no interrupt after {} steps", self.steps)));
    }
    let progressed = model_step(&mut self.simulation, &mut self.trace_writer)?;
    if progressed {
      self.steps += 1;
    }
    Ok(progressed)
  }

  fn run_continuous(&mut self) -> Result<bool> {
    loop {
      if self.irq_report()?.is_some() {
        return Ok(true);
      }
      if !self.step_once()? {
        return Ok(false);
      }
    }
  }

  fn run_step_mode(&mut self) -> Result<bool> {
    println!("Step mode - Enter to step, 'si N' to step N times, 'c' to continue, 'q' to quit");
    let mut shell = Shell::new()?;
    loop {
      if self.irq_report()?.is_some() {
        println!("job finished at t={}", self.simulation.get_global_time());
        return Ok(true);
      }
      match shell.read_command()? {
        Command::Step(n) => {
          for _ in 0..n {
            if !self.step_once()? || self.irq_report()?.is_some() {
              break;
            }
          }
          println!("t={} steps={}", self.simulation.get_global_time(), self.steps);
        },
        Command::Continue => return self.run_continuous(),
        Command::Quit => return Ok(false),
      }
    }
  }

  /// Report carried by the first interrupt the host has seen.
  fn irq_report(&mut self) -> Result<Option<JobReport>> {
    let host = self.simulation.models().into_iter().find(|model| model.id() == HOST_MODEL);
    let Some(host) = host else {
      return Err(other(format!("model '{}' missing from the simulation", HOST_MODEL)));
    };
    match host.records().iter().find(|record| record.action == "irq") {
      Some(record) => serde_json::from_str(&record.subject)
        .map(Some)
        .map_err(|e| other(format!("malformed job report: {}", e))),
      None => Ok(None),
    }
  }

  /// Compare Z in memory against the reference GEMM.
  fn verify(&self) -> Result<f64> {
    let format = self.geometry.format;
    let z = {
      let memory = self.memory.lock().map_err(|_| other("memory lock poisoned".to_string()))?;
      memory
        .read_matrix(
          self.layout.z_addr as u64,
          self.shape.m,
          self.shape.k,
          self.layout.yz_pitch as usize,
          format,
        )
        .ok_or_else(|| other("Z matrix lies outside memory".to_string()))?
    };
    check_result(self.shape, &self.operands, &z, format).map_err(|m| other(format!("result mismatch: {}", m)))
  }
}
