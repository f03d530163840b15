use log::warn;
use serde::{Deserialize, Serialize};

use super::job::{JobConfig, Leftovers, TileIters};

// Control
pub const REG_TRIGGER: u32 = 0x00;
pub const REG_FINISHED_JOBS: u32 = 0x08;
pub const REG_STATUS: u32 = 0x0C;
pub const REG_IRQ_CLEAR: u32 = 0x10;
pub const REG_SOFT_CLEAR: u32 = 0x14;

// Job
pub const REG_X_ADDR: u32 = 0x40;
pub const REG_W_ADDR: u32 = 0x44;
pub const REG_Y_ADDR: u32 = 0x48;
pub const REG_Z_ADDR: u32 = 0x4C;
pub const REG_X_TOT_LEN: u32 = 0x50;
pub const REG_W_TOT_LEN: u32 = 0x54;
pub const REG_Y_TOT_LEN: u32 = 0x58;
pub const REG_Z_TOT_LEN: u32 = 0x5C;
pub const REG_W_ITERS: u32 = 0x60; // rows [31:16], cols [15:0]
pub const REG_X_ITERS: u32 = 0x64; // rows [31:16], cols [15:0]
pub const REG_LEFTOVERS: u32 = 0x68; // x_row [31:24], x_col [23:16], w_row [15:8], w_col [7:0]
pub const REG_X_STRIDE: u32 = 0x6C;
pub const REG_W_STRIDE: u32 = 0x70;
pub const REG_YZ_STRIDE: u32 = 0x74;

pub const STATUS_BUSY: u32 = 1 << 0;
pub const STATUS_IRQ: u32 = 1 << 1;
pub const STATUS_REJECTED: u32 = 1 << 2;

/// Register request carried on the `reg_req` port. Reads are answered on
/// `reg_resp` with the same structure and `value` filled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegAccess {
  pub offset: u32,
  #[serde(default)]
  pub write: bool,
  #[serde(default)]
  pub value: u32,
}

impl RegAccess {
  pub fn read(offset: u32) -> Self {
    Self {
      offset,
      write: false,
      value: 0,
    }
  }

  pub fn write(offset: u32, value: u32) -> Self {
    Self {
      offset,
      write: true,
      value,
    }
  }
}

/// Side effect of a register write the accelerator has to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegEffect {
  None,
  Trigger,
  IrqClear,
  SoftClear,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterFile {
  job: JobConfig,
  finished_jobs: u32,
  status: u32,
}

impl RegisterFile {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn write(&mut self, offset: u32, value: u32) -> RegEffect {
    let job = &mut self.job;
    match offset {
      REG_TRIGGER => return RegEffect::Trigger,
      REG_IRQ_CLEAR => return RegEffect::IrqClear,
      REG_SOFT_CLEAR => return RegEffect::SoftClear,
      REG_FINISHED_JOBS | REG_STATUS => {}, /* read-only */
      REG_X_ADDR => job.x_addr = value,
      REG_W_ADDR => job.w_addr = value,
      REG_Y_ADDR => job.y_addr = value,
      REG_Z_ADDR => job.z_addr = value,
      REG_X_TOT_LEN => job.x_tot_len = value,
      REG_W_TOT_LEN => job.w_tot_len = value,
      REG_Y_TOT_LEN => job.y_tot_len = value,
      REG_Z_TOT_LEN => job.z_tot_len = value,
      REG_W_ITERS => job.w_iters = TileIters::unpack(value),
      REG_X_ITERS => job.x_iters = TileIters::unpack(value),
      REG_LEFTOVERS => job.leftovers = Leftovers::unpack(value),
      REG_X_STRIDE => job.x_stride = value,
      REG_W_STRIDE => job.w_stride = value,
      REG_YZ_STRIDE => job.yz_stride = value,
      _ => warn!("write to unmapped register {:#x} ignored", offset),
    }
    RegEffect::None
  }

  pub fn read(&self, offset: u32) -> u32 {
    let job = &self.job;
    match offset {
      REG_FINISHED_JOBS => self.finished_jobs,
      REG_STATUS => self.status,
      REG_X_ADDR => job.x_addr,
      REG_W_ADDR => job.w_addr,
      REG_Y_ADDR => job.y_addr,
      REG_Z_ADDR => job.z_addr,
      REG_X_TOT_LEN => job.x_tot_len,
      REG_W_TOT_LEN => job.w_tot_len,
      REG_Y_TOT_LEN => job.y_tot_len,
      REG_Z_TOT_LEN => job.z_tot_len,
      REG_W_ITERS => job.w_iters.pack(),
      REG_X_ITERS => job.x_iters.pack(),
      REG_LEFTOVERS => job.leftovers.pack(),
      REG_X_STRIDE => job.x_stride,
      REG_W_STRIDE => job.w_stride,
      REG_YZ_STRIDE => job.yz_stride,
      _ => 0,
    }
  }

  pub fn job(&self) -> JobConfig {
    self.job
  }

  pub fn clear_job(&mut self) {
    self.job = JobConfig::default();
  }

  pub fn job_finished(&mut self) {
    self.finished_jobs = self.finished_jobs.wrapping_add(1);
  }

  pub fn set_status(&mut self, bit: u32, on: bool) {
    if on {
      self.status |= bit;
    } else {
      self.status &= !bit;
    }
  }

  pub fn status(&self) -> u32 {
    self.status
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::gemm::job::{BufferLayout, GemmShape};
  use crate::arch::gemm::params::ArrayGeometry;

  #[test]
  fn test_register_writes_rebuild_job() {
    let geometry = ArrayGeometry::default();
    let shape = GemmShape { m: 20, n: 13, k: 30 };
    let job = JobConfig::for_gemm(shape, &geometry, &BufferLayout::packed(0x8000, shape, 2, 4).unwrap());

    let mut regs = RegisterFile::new();
    for (offset, value) in job.register_writes() {
      assert_eq!(regs.write(offset, value), RegEffect::None);
      assert_eq!(regs.read(offset), value);
    }
    assert_eq!(regs.job(), job);

    regs.clear_job();
    assert_eq!(regs.job(), JobConfig::default());
  }

  #[test]
  fn test_control_registers() {
    let mut regs = RegisterFile::new();
    assert_eq!(regs.write(REG_TRIGGER, 0), RegEffect::Trigger);
    assert_eq!(regs.write(REG_IRQ_CLEAR, 0), RegEffect::IrqClear);
    assert_eq!(regs.write(REG_SOFT_CLEAR, 0), RegEffect::SoftClear);

    regs.set_status(STATUS_BUSY | STATUS_IRQ, true);
    regs.write(REG_STATUS, 0);
    assert_eq!(regs.read(REG_STATUS), 0b011);
    regs.set_status(STATUS_BUSY, false);
    assert_eq!(regs.read(REG_STATUS), STATUS_IRQ);

    regs.job_finished();
    assert_eq!(regs.read(REG_FINISHED_JOBS), 1);
    assert_eq!(regs.read(0x1FC), 0);
  }

  #[test]
  fn test_reg_access_json() {
    let access: RegAccess = serde_json::from_str(r#"{"offset":12}"#).unwrap();
    assert_eq!(access, RegAccess::read(REG_STATUS));
  }
}
