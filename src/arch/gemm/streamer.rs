//! Strided address generators ("streamers").
//!
//! A streamer walks a nested loop of up to four dimensions, innermost first,
//! and moves one beat per `iterate` call:
//!
//! ```text
//! addr = base + d0_pos + d1_pos + d2_pos + d3_pos
//! ```
//!
//! `d0..d2` carry a length and a byte stride; `d3` is stride-only and advances
//! each time `d2` wraps. A counter that reaches its length wraps to zero and
//! carries into the next-outer dimension.

use log::trace;
use serde::{Deserialize, Serialize};

use super::error::{AccelError, AccelResult};
use super::mem_port::{MemRequest, MemStatus, SharedPort};

/// One counted loop level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDim {
  /// Iterations; 0 behaves like 1
  pub len: u32,
  /// Byte stride applied per iteration
  pub stride: u64,
}

impl StreamDim {
  pub fn new(len: u32, stride: u64) -> Self {
    Self { len, stride }
  }

  fn effective_len(&self) -> u32 {
    self.len.max(1)
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
  pub base: u64,
  pub tot_len: u64,
  pub dims: [StreamDim; 3],
  pub d3_stride: u64,
}

impl StreamDescriptor {
  /// Iterations before the nested loop repeats.
  pub fn pattern_len(&self) -> u64 {
    self.dims.iter().map(|d| d.effective_len() as u64).product()
  }
}

/// Position counters of a streamer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamPosition {
  pub counters: [u32; 3],
  pub offsets: [u64; 4],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStats {
  pub transactions: u64,
  pub bubbles: u64,
  pub bytes: u64,
  pub latency: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
  Read,
  Write,
}

/// Converts a descriptor into a sequence of beat transactions.
#[derive(Clone)]
pub struct StrideGenerator {
  name: &'static str,
  direction: Direction,
  beat_bytes: usize,
  port: SharedPort,
  desc: StreamDescriptor,
  pos: StreamPosition,
  done: u64,
  stats: StreamStats,
}

impl StrideGenerator {
  pub fn new(name: &'static str, direction: Direction, beat_bytes: usize, port: SharedPort) -> Self {
    Self {
      name,
      direction,
      beat_bytes,
      port,
      desc: StreamDescriptor::default(),
      pos: StreamPosition::default(),
      done: 0,
      stats: StreamStats::default(),
    }
  }

  pub fn configure(&mut self, desc: StreamDescriptor) {
    self.desc = desc;
    self.pos = StreamPosition::default();
    self.done = 0;
    self.stats = StreamStats::default();
  }

  pub fn name(&self) -> &'static str {
    self.name
  }

  pub fn descriptor(&self) -> &StreamDescriptor {
    &self.desc
  }

  pub fn position(&self) -> StreamPosition {
    self.pos
  }

  pub fn stats(&self) -> StreamStats {
    self.stats
  }

  pub fn done_count(&self) -> u64 {
    self.done
  }

  pub fn is_done(&self) -> bool {
    self.done == self.desc.tot_len
  }

  /// Address the next transaction will use.
  pub fn current_addr(&self) -> u64 {
    self.desc.base + self.pos.offsets.iter().sum::<u64>()
  }

  /// Issue one beat, or a bubble when `slot` is `None`. Returns the latency
  /// the step costs.
  pub fn iterate(&mut self, slot: Option<&mut [u8]>, strobe: u64) -> AccelResult<u64> {
    let Some(data) = slot else {
      self.stats.bubbles += 1;
      self.stats.latency += 1;
      return Ok(1);
    };
    if data.len() != self.beat_bytes {
      return Err(AccelError::SlotWidth {
        stream: self.name,
        expected: self.beat_bytes,
        got: data.len(),
      });
    }

    // A finished pattern restarts from its configured origin
    if self.is_done() {
      self.done = 0;
    }

    let addr = self.current_addr();
    let response = {
      let mut port = self.port.lock().map_err(|_| AccelError::PortPoisoned)?;
      port.access(&mut MemRequest {
        addr,
        data,
        is_write: self.direction == Direction::Write,
        strobe,
      })
    };
    if response.status != MemStatus::Ok {
      return Err(AccelError::Transaction {
        stream: self.name,
        addr,
        status: response.status,
      });
    }
    trace!(
      "{} beat #{} addr={:#x} strobe={:#x} latency={}",
      self.name,
      self.done,
      addr,
      strobe,
      response.latency
    );

    self.advance();
    let latency = response.latency + 1;
    self.stats.transactions += 1;
    self.stats.bytes += (0..self.beat_bytes.min(64)).filter(|b| (strobe >> b) & 1 == 1).count() as u64;
    self.stats.latency += latency;
    Ok(latency)
  }

  fn advance(&mut self) {
    self.done += 1;
    if self.done == self.desc.tot_len {
      self.pos = StreamPosition::default();
      return;
    }

    for level in 0..3 {
      let dim = self.desc.dims[level];
      self.pos.counters[level] += 1;
      self.pos.offsets[level] += dim.stride;
      if self.pos.counters[level] < dim.effective_len() {
        return;
      }
      self.pos.counters[level] = 0;
      self.pos.offsets[level] = 0;
    }
    self.pos.offsets[3] += self.desc.d3_stride;
  }
}
