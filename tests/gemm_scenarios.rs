use gemm_accel::arch::gemm::create_simulation;
use gemm_accel::arch::gemm::format::ElemFormat;
use gemm_accel::arch::gemm::golden::{check_result, reference_gemm, Operands};
use gemm_accel::arch::gemm::job::{BufferLayout, GemmShape, JobConfig};
use gemm_accel::arch::gemm::main::{GEMM_MODEL, HOST_MODEL};
use gemm_accel::arch::gemm::mem_port::{FlatMemory, SharedPort};
use gemm_accel::arch::gemm::params::ArrayGeometry;
use gemm_accel::arch::gemm::regfile::*;
use gemm_accel::arch::gemm::scheduler::JobReport;
use gemm_accel::simulator::config::config::AppConfig;
use gemm_accel::simulator::sim::inject::inject_reg_access;
use gemm_accel::simulator::sim::model::model_step;
use gemm_accel::simulator::utils::log::init_log;
use gemm_accel::simulator::Simulator;
use sim::models::{ModelRecord, Reportable};
use sim::simulator::Simulation;
use std::sync::{Arc, Mutex};

const BASE: u64 = 0x1000;
const MEM_SIZE: usize = 0x10000;
const SENTINEL: u8 = 0xEE;

struct Harness {
  geometry: ArrayGeometry,
  shape: GemmShape,
  layout: BufferLayout,
  operands: Operands,
  memory: Arc<Mutex<FlatMemory>>,
  simulation: Simulation,
}

impl Harness {
  /// Place seeded operands, paint Z (guards included) and the bytes after it
  /// with a sentinel, then queue the job's register writes and the trigger.
  fn new(geometry: ArrayGeometry, shape: GemmShape, guard: u32, latency: u64) -> Self {
    init_log(true);
    let format = geometry.format;
    let layout = BufferLayout::packed(BASE as u32, shape, format.bytes(), guard).unwrap();
    let operands = Operands::random(shape, format, 2024);

    let mut memory = FlatMemory::new(BASE, MEM_SIZE, latency);
    let z_len = (layout.end(shape) - layout.z_addr as u64) as usize + 256;
    memory.write_bytes(layout.z_addr as u64, &vec![SENTINEL; z_len]).unwrap();
    memory
      .write_matrix(layout.x_addr as u64, &operands.x, shape.n, layout.x_pitch as usize, format)
      .unwrap();
    memory
      .write_matrix(layout.w_addr as u64, &operands.w, shape.k, layout.w_pitch as usize, format)
      .unwrap();
    memory
      .write_matrix(layout.y_addr as u64, &operands.y, shape.k, layout.yz_pitch as usize, format)
      .unwrap();

    let memory = memory.shared();
    let port: SharedPort = memory.clone();
    let mut simulation = create_simulation(geometry, port);
    let job = JobConfig::for_gemm(shape, &geometry, &layout);
    for (offset, value) in job.register_writes() {
      inject_reg_access(&mut simulation, RegAccess::write(offset, value)).unwrap();
    }
    inject_reg_access(&mut simulation, RegAccess::write(REG_TRIGGER, 0)).unwrap();

    Self {
      geometry,
      shape,
      layout,
      operands,
      memory,
      simulation,
    }
  }

  fn records(&mut self, model_id: &str) -> Vec<ModelRecord> {
    self
      .simulation
      .models()
      .into_iter()
      .find(|model| model.id() == model_id)
      .map(|model| model.records().clone())
      .unwrap_or_default()
  }

  fn irq(&mut self) -> Option<(f64, JobReport)> {
    self
      .records(HOST_MODEL)
      .into_iter()
      .find(|r| r.action == "irq")
      .map(|r| (r.time, serde_json::from_str(&r.subject).unwrap()))
  }

  fn step(&mut self) -> bool {
    model_step(&mut self.simulation, &mut None).unwrap()
  }

  fn run_until_time(&mut self, time: f64) {
    while self.simulation.get_global_time() < time {
      assert!(self.step(), "simulation went idle at t={}", self.simulation.get_global_time());
    }
  }

  fn run_to_irq(&mut self) -> (f64, JobReport) {
    for _ in 0..100_000 {
      if let Some(irq) = self.irq() {
        return irq;
      }
      if !self.step() {
        break;
      }
    }
    panic!("no interrupt at t={}", self.simulation.get_global_time());
  }

  fn z(&self) -> Vec<f32> {
    let mem = self.memory.lock().unwrap();
    mem
      .read_matrix(
        self.layout.z_addr as u64,
        self.shape.m,
        self.shape.k,
        self.layout.yz_pitch as usize,
        self.geometry.format,
      )
      .unwrap()
  }

  fn assert_exact(&self) {
    let (expected, _) = reference_gemm(self.shape, &self.operands);
    for (idx, (got, want)) in self.z().iter().zip(expected.iter()).enumerate() {
      assert_eq!(*got as f64, *want, "z[{}][{}]", idx / self.shape.k, idx % self.shape.k);
    }
  }

  /// Bytes past the valid part of every Z row, and past Z, are untouched.
  fn assert_guards_intact(&self) {
    let mem = self.memory.lock().unwrap();
    let row_bytes = self.shape.k * self.geometry.format.bytes();
    let guard = self.layout.yz_pitch as usize - row_bytes;
    for row in 0..self.shape.m {
      let addr = self.layout.z_addr as u64 + (row * self.layout.yz_pitch as usize + row_bytes) as u64;
      let bytes = mem.read_bytes(addr, guard).unwrap();
      assert!(bytes.iter().all(|&b| b == SENTINEL), "guard after Z row {} overwritten", row);
    }
    let tail = mem.read_bytes(self.layout.end(self.shape), 256).unwrap();
    assert!(tail.iter().all(|&b| b == SENTINEL), "bytes after Z overwritten");
  }
}

fn scenario_geometry() -> ArrayGeometry {
  ArrayGeometry::new(4, 3, ElemFormat::Fp16).unwrap()
}

fn shape(m: usize, n: usize, k: usize) -> GemmShape {
  GemmShape { m, n, k }
}

#[test]
fn test_single_tile_fp16_takes_100_cycles() {
  let mut h = Harness::new(scenario_geometry(), shape(12, 12, 12), 0, 0);
  let (time, report) = h.run_to_irq();

  assert_eq!(report.cycles, 100);
  assert_eq!(time, 100.0);
  assert_eq!(report.tiles, 1);
  assert_eq!(report.hypercycles, 1);
  assert_eq!(report.store_phases, 1);
  h.assert_exact();
  h.assert_guards_intact();

  let gemm = h.records(GEMM_MODEL);
  assert!(gemm.iter().any(|r| r.action == "trigger"));
  assert!(gemm.iter().any(|r| r.action == "irq"));
}

macro_rules! partial_column_case {
  ($name:ident, $k:expr, $cycles:expr, $strobe_bytes:expr) => {
    #[test]
    fn $name() {
      let mut h = Harness::new(scenario_geometry(), shape(12, 12, $k), 8, 0);
      let (_, report) = h.run_to_irq();
      assert_eq!(report.cycles, $cycles);
      h.assert_exact();
      h.assert_guards_intact();
      // every Z beat of the final column tile carries exactly the valid bytes
      let full_tiles = ($k / 12) as u64;
      assert_eq!(report.z.bytes, 12 * (full_tiles * 24 + $strobe_bytes));
    }
  };
}

// 36 + 2 * 48 + (32 + 16)
partial_column_case!(test_k14_final_column_tile_is_strobed, 14, 180, 4);
partial_column_case!(test_k10_single_partial_tile, 10, 100, 20);

#[test]
fn test_leftovers_on_every_axis() {
  // L = 4, fp32: m = 6, n = 7, k = 5 gives 2 x 2 tiles and 2 chunks
  let geometry = ArrayGeometry::new(2, 2, ElemFormat::Fp32).unwrap();
  let mut h = Harness::new(geometry, shape(6, 7, 5), 4, 0);
  let (_, report) = h.run_to_irq();

  // 12 + 4 * 2 * 4 * 3 + (12 + 24 + 12 + 6)
  assert_eq!(report.cycles, 162);
  assert_eq!(report.tiles, 4);
  assert_eq!(report.hypercycles, 8);
  assert_eq!(report.w.transactions, 7 * 2 * 2);
  h.assert_exact();
  h.assert_guards_intact();
}

#[test]
fn test_memory_latency_is_paid_per_transaction() {
  let mut h = Harness::new(scenario_geometry(), shape(12, 12, 12), 0, 2);
  let (time, report) = h.run_to_irq();
  let transactions = report.x.transactions + report.w.transactions + report.y.transactions + report.z.transactions;
  assert_eq!(transactions, 48);
  assert_eq!(report.cycles, 100 + 2 * 48);
  assert_eq!(time, report.cycles as f64);
  h.assert_exact();
}

#[test]
fn test_retrigger_while_busy_is_rejected() {
  let mut h = Harness::new(scenario_geometry(), shape(12, 12, 12), 0, 0);
  h.run_until_time(10.0);

  inject_reg_access(&mut h.simulation, RegAccess::write(REG_TRIGGER, 0)).unwrap();
  inject_reg_access(&mut h.simulation, RegAccess::read(REG_STATUS)).unwrap();
  let (time, report) = h.run_to_irq();
  assert_eq!(report.cycles, 100);
  assert_eq!(time, 100.0);
  h.assert_exact();

  assert!(h.records(GEMM_MODEL).iter().any(|r| r.action == "trigger_rejected"));
  let status: RegAccess = h
    .records(HOST_MODEL)
    .iter()
    .find(|r| r.action == "reg_resp")
    .map(|r| serde_json::from_str(&r.subject).unwrap())
    .unwrap();
  assert_eq!(status.value & (STATUS_BUSY | STATUS_REJECTED), STATUS_BUSY | STATUS_REJECTED);
}

#[test]
fn test_status_after_completion_and_irq_clear() {
  let mut h = Harness::new(scenario_geometry(), shape(12, 12, 12), 0, 0);
  h.run_to_irq();

  inject_reg_access(&mut h.simulation, RegAccess::read(REG_FINISHED_JOBS)).unwrap();
  inject_reg_access(&mut h.simulation, RegAccess::read(REG_STATUS)).unwrap();
  inject_reg_access(&mut h.simulation, RegAccess::write(REG_IRQ_CLEAR, 0)).unwrap();
  inject_reg_access(&mut h.simulation, RegAccess::read(REG_STATUS)).unwrap();
  while h.step() {}

  let reads: Vec<RegAccess> = h
    .records(HOST_MODEL)
    .iter()
    .filter(|r| r.action == "reg_resp")
    .map(|r| serde_json::from_str(&r.subject).unwrap())
    .collect();
  assert_eq!(reads.len(), 3);
  assert_eq!(reads[0].value, 1);
  assert_eq!(reads[1].value, STATUS_IRQ);
  assert_eq!(reads[2].value, 0);
}

#[test]
fn test_invalid_job_is_rejected_without_fault() {
  let mut h = Harness::new(scenario_geometry(), shape(12, 12, 12), 0, 0);
  h.run_to_irq();
  // second job with an X length that does not match the tiling
  inject_reg_access(&mut h.simulation, RegAccess::write(REG_X_TOT_LEN, 5)).unwrap();
  inject_reg_access(&mut h.simulation, RegAccess::write(REG_TRIGGER, 0)).unwrap();
  inject_reg_access(&mut h.simulation, RegAccess::read(REG_STATUS)).unwrap();
  while h.step() {}

  assert!(h.records(GEMM_MODEL).iter().any(|r| r.action == "job_rejected"));
  let status: RegAccess = h
    .records(HOST_MODEL)
    .iter()
    .find(|r| r.action == "reg_resp")
    .map(|r| serde_json::from_str(&r.subject).unwrap())
    .unwrap();
  assert_eq!(status.value & STATUS_REJECTED, STATUS_REJECTED);
  assert_eq!(status.value & STATUS_BUSY, 0);
}

#[test]
fn test_simulator_end_to_end_fp8() {
  let mut config = AppConfig::embedded().unwrap();
  config.accelerator.format = ElemFormat::Fp8;
  config.job.m = 12;
  config.job.n = 12;
  config.job.k = 12;
  config.simulation.quiet = true;

  let mut simulator = Simulator::new(config).unwrap();
  let summary = simulator.run().unwrap();
  let report = summary.report.unwrap();
  assert_eq!(report.cycles, 100);
  assert!(summary.max_error.is_some());
}

#[test]
fn test_simulator_default_job_matches_reference() {
  let mut config = AppConfig::embedded().unwrap();
  config.simulation.quiet = true;
  let shape = GemmShape {
    m: config.job.m,
    n: config.job.n,
    k: config.job.k,
  };
  let format = config.accelerator.format;
  let layout = config.layout().unwrap();
  let operands = Operands::random(shape, format, config.job.seed);

  let mut simulator = Simulator::new(config).unwrap();
  let summary = simulator.run().unwrap();
  let report = summary.report.unwrap();

  let memory = simulator.memory();
  let mem = memory.lock().unwrap();
  // every beat the streamers issued reached the port
  assert_eq!(mem.reads(), report.x.transactions + report.w.transactions + report.y.transactions);
  assert_eq!(mem.writes(), report.z.transactions);
  let z = mem
    .read_matrix(layout.z_addr as u64, shape.m, shape.k, layout.yz_pitch as usize, format)
    .unwrap();
  check_result(shape, &operands, &z, format).unwrap();
}
