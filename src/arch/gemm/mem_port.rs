//! Synchronous memory access primitive used by the streamers.

use log::trace;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use super::format::ElemFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemStatus {
  Ok,
  Pending,
  Denied,
  Invalid,
}

/// One beat-wide transaction. `data` is the source for writes and the
/// destination for reads; bit `i` of `strobe` enables byte `i`.
#[derive(Debug)]
pub struct MemRequest<'a> {
  pub addr: u64,
  pub data: &'a mut [u8],
  pub is_write: bool,
  pub strobe: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemResponse {
  pub status: MemStatus,
  pub latency: u64,
}

pub trait MemoryPort {
  fn access(&mut self, req: &mut MemRequest<'_>) -> MemResponse;
}

pub type SharedPort = Arc<Mutex<dyn MemoryPort + Send>>;

fn byte_enabled(strobe: u64, byte: usize) -> bool {
  byte < 64 && (strobe >> byte) & 1 == 1
}

/// Flat byte-addressed memory with a fixed per-transaction latency.
#[derive(Debug, Clone)]
pub struct FlatMemory {
  base: u64,
  data: Vec<u8>,
  latency: u64,
  reads: u64,
  writes: u64,
}

impl FlatMemory {
  pub fn new(base: u64, size: usize, latency: u64) -> Self {
    Self {
      base,
      data: vec![0; size],
      latency,
      reads: 0,
      writes: 0,
    }
  }

  pub fn shared(self) -> Arc<Mutex<FlatMemory>> {
    Arc::new(Mutex::new(self))
  }

  pub fn reads(&self) -> u64 {
    self.reads
  }

  pub fn writes(&self) -> u64 {
    self.writes
  }

  fn offset(&self, addr: u64, len: usize) -> Option<usize> {
    let offset = addr.checked_sub(self.base)? as usize;
    let end = offset.checked_add(len)?;
    (end <= self.data.len()).then_some(offset)
  }

  pub fn write_bytes(&mut self, addr: u64, bytes: &[u8]) -> Option<()> {
    let offset = self.offset(addr, bytes.len())?;
    self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    Some(())
  }

  pub fn read_bytes(&self, addr: u64, len: usize) -> Option<&[u8]> {
    let offset = self.offset(addr, len)?;
    Some(&self.data[offset..offset + len])
  }

  /// Store a row-major `rows x cols` matrix with a row pitch of `pitch` bytes.
  pub fn write_matrix(
    &mut self,
    addr: u64,
    values: &[f32],
    cols: usize,
    pitch: usize,
    format: ElemFormat,
  ) -> Option<()> {
    let elem = format.bytes();
    let mut raw = [0u8; 4];
    for (idx, &value) in values.iter().enumerate() {
      let (row, col) = (idx / cols, idx % cols);
      format.encode(value, &mut raw);
      let elem_addr = addr + (row * pitch + col * elem) as u64;
      self.write_bytes(elem_addr, &raw[..elem])?;
    }
    Some(())
  }

  pub fn read_matrix(
    &self,
    addr: u64,
    rows: usize,
    cols: usize,
    pitch: usize,
    format: ElemFormat,
  ) -> Option<Vec<f32>> {
    let elem = format.bytes();
    let mut out = Vec::with_capacity(rows * cols);
    for row in 0..rows {
      for col in 0..cols {
        let elem_addr = addr + (row * pitch + col * elem) as u64;
        out.push(format.decode(self.read_bytes(elem_addr, elem)?));
      }
    }
    Some(out)
  }
}

impl MemoryPort for FlatMemory {
  fn access(&mut self, req: &mut MemRequest<'_>) -> MemResponse {
    let len = req.data.len();
    let enabled: Vec<usize> = (0..len).filter(|&b| byte_enabled(req.strobe, b)).collect();

    // Fully masked beats still occupy the port but touch nothing
    if let (Some(&first), Some(&last)) = (enabled.first(), enabled.last()) {
      let Some(offset) = self.offset(req.addr + first as u64, last - first + 1) else {
        return MemResponse {
          status: MemStatus::Invalid,
          latency: 0,
        };
      };
      for b in 0..len {
        if !byte_enabled(req.strobe, b) {
          if !req.is_write {
            req.data[b] = 0;
          }
          continue;
        }
        let idx = offset + (b - first);
        if req.is_write {
          self.data[idx] = req.data[b];
        } else {
          req.data[b] = self.data[idx];
        }
      }
    } else if !req.is_write {
      req.data.fill(0);
    }

    if req.is_write {
      self.writes += 1;
    } else {
      self.reads += 1;
    }
    trace!(
      "mem {} addr={:#x} len={} strobe={:#x}",
      if req.is_write { "write" } else { "read" },
      req.addr,
      len,
      req.strobe
    );

    MemResponse {
      status: MemStatus::Ok,
      latency: self.latency,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_strobed_write_only_touches_enabled_bytes() {
    let mut mem = FlatMemory::new(0x1000, 16, 0);
    mem.write_bytes(0x1000, &[0xAA; 8]).unwrap();

    let mut beat = [1u8, 2, 3, 4, 5, 6, 7, 8];
    let resp = mem.access(&mut MemRequest {
      addr: 0x1000,
      data: &mut beat,
      is_write: true,
      strobe: 0x0F,
    });
    assert_eq!(resp.status, MemStatus::Ok);
    assert_eq!(mem.read_bytes(0x1000, 8).unwrap(), &[1, 2, 3, 4, 0xAA, 0xAA, 0xAA, 0xAA]);
  }

  #[test]
  fn test_strobed_read_zeroes_disabled_bytes() {
    let mut mem = FlatMemory::new(0, 8, 3);
    mem.write_bytes(0, &[9; 8]).unwrap();

    let mut beat = [0xFFu8; 4];
    let resp = mem.access(&mut MemRequest {
      addr: 0,
      data: &mut beat,
      is_write: false,
      strobe: 0b0011,
    });
    assert_eq!(resp.latency, 3);
    assert_eq!(beat, [9, 9, 0, 0]);
  }

  #[test]
  fn test_out_of_range_is_invalid_unless_masked() {
    let mut mem = FlatMemory::new(0, 8, 0);
    let mut beat = [0u8; 4];
    let resp = mem.access(&mut MemRequest {
      addr: 6,
      data: &mut beat,
      is_write: false,
      strobe: u64::MAX,
    });
    assert_eq!(resp.status, MemStatus::Invalid);

    // only the first two bytes are enabled and they are in range
    let resp = mem.access(&mut MemRequest {
      addr: 6,
      data: &mut beat,
      is_write: false,
      strobe: 0b0011,
    });
    assert_eq!(resp.status, MemStatus::Ok);

    let resp = mem.access(&mut MemRequest {
      addr: 100,
      data: &mut beat,
      is_write: true,
      strobe: 0,
    });
    assert_eq!(resp.status, MemStatus::Ok);
  }

  #[test]
  fn test_matrix_helpers() {
    let mut mem = FlatMemory::new(0, 64, 0);
    let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    mem.write_matrix(0, &values, 3, 8, ElemFormat::Fp16).unwrap();
    let back = mem.read_matrix(0, 2, 3, 8, ElemFormat::Fp16).unwrap();
    assert_eq!(back, values);
    // pitch gap stays untouched
    assert_eq!(mem.read_bytes(6, 2).unwrap(), &[0, 0]);
  }
}
