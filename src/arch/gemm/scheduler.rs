//! Cycle-counting control FSM of the GEMM engine.
//!
//! A job walks its output tiles `(r, c)` row-major. Each tile is one
//! `Computing` phase of `col_tiles` hypercycles followed by one `Storing`
//! phase. A hypercycle is `L` cycles, a cycle is `pipe_regs + 1` subcycles and
//! every subcycle is one streamer step: either a beat transaction or a bubble.
//!
//! ```text
//! Idle -> Starting (3L steps) -> Computing <-> Storing -> Finished -> Idle
//! ```

use log::{debug, info, trace};
use serde::{Deserialize, Serialize};

use super::error::{AccelError, AccelResult};
use super::job::{JobConfig, JobPlan};
use super::mem_port::SharedPort;
use super::params::ArrayGeometry;
use super::streamer::{Direction, StreamStats, StrideGenerator};
use super::strobe::{edge_strobe, EMPTY_STROBE, FULL_STROBE};
use super::tile_store::TileStore;

/// Continuations the FSM can schedule on itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccelEvent {
  MainLoop,
  Completion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilePos {
  pub row: usize,
  pub col: usize,
}

/// One payload slot of a store phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
  StoreZ { row: usize },
  LoadY { row: usize, tile: TilePos },
  LoadX { row: usize, chunk: usize, row_tile: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
  Idle,
  Starting {
    step: usize,
  },
  Computing {
    hyper: usize,
    cycle: usize,
    sub: usize,
  },
  Storing {
    cycle: usize,
    sub: usize,
    queue: Vec<Transfer>,
  },
  Finished,
}

impl Phase {
  pub fn name(&self) -> &'static str {
    match self {
      Phase::Idle => "idle",
      Phase::Starting { .. } => "starting",
      Phase::Computing { .. } => "computing",
      Phase::Storing { .. } => "storing",
      Phase::Finished => "finished",
    }
  }
}

/// Summary of a completed job, carried by the interrupt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
  pub cycles: u64,
  pub tiles: u64,
  pub hypercycles: u64,
  pub store_phases: u64,
  pub x: StreamStats,
  pub w: StreamStats,
  pub y: StreamStats,
  pub z: StreamStats,
}

#[derive(Clone)]
pub struct AcceleratorScheduler {
  geometry: ArrayGeometry,
  phase: Phase,
  plan: Option<JobPlan>,
  store: TileStore,

  x: StrideGenerator,
  w: StrideGenerator,
  y: StrideGenerator,
  z: StrideGenerator,

  x_rows_iters: usize,
  w_cols_iters: usize,

  pending: Option<(AccelEvent, u64)>,
  irq: bool,
  report: JobReport,
}

impl AcceleratorScheduler {
  pub fn new(geometry: ArrayGeometry, port: SharedPort) -> Self {
    let beat = geometry.beat_bytes();
    Self {
      geometry,
      phase: Phase::Idle,
      plan: None,
      store: TileStore::new(geometry),
      x: StrideGenerator::new("x", Direction::Read, beat, port.clone()),
      w: StrideGenerator::new("w", Direction::Read, beat, port.clone()),
      y: StrideGenerator::new("y", Direction::Read, beat, port.clone()),
      z: StrideGenerator::new("z", Direction::Write, beat, port),
      x_rows_iters: 0,
      w_cols_iters: 0,
      pending: None,
      irq: false,
      report: JobReport::default(),
    }
  }

  pub fn geometry(&self) -> &ArrayGeometry {
    &self.geometry
  }

  pub fn phase(&self) -> &Phase {
    &self.phase
  }

  pub fn is_busy(&self) -> bool {
    self.phase != Phase::Idle || self.pending.is_some()
  }

  pub fn irq(&self) -> bool {
    self.irq
  }

  pub fn clear_irq(&mut self) {
    self.irq = false;
  }

  /// Continuation waiting to run and its delay in cycles.
  pub fn pending(&self) -> Option<(AccelEvent, u64)> {
    self.pending
  }

  /// Cycles spent by the current or last job.
  pub fn cycles(&self) -> u64 {
    self.report.cycles
  }

  pub fn store(&self) -> &TileStore {
    &self.store
  }

  pub fn start(&mut self, job: &JobConfig) -> AccelResult<()> {
    if self.is_busy() {
      return Err(AccelError::Busy);
    }
    self.geometry.validate()?;
    let plan = job.validate(&self.geometry)?;

    self.x.configure(plan.x);
    self.w.configure(plan.w);
    self.y.configure(plan.y);
    self.z.configure(plan.z);
    self.store.alloc_buffers(plan.n, &plan.leftovers);

    info!(
      "gemm job start: {} row tiles x {} col tiles, contraction {} in {} chunks",
      plan.x_row_tiles, plan.w_col_tiles, plan.n, plan.col_tiles
    );

    self.plan = Some(plan);
    self.x_rows_iters = 0;
    self.w_cols_iters = 0;
    self.irq = false;
    self.report = JobReport::default();
    self.enter(Phase::Starting { step: 0 });
    self.arm(AccelEvent::MainLoop, 0)
  }

  /// Run a delivered continuation. Returns the job report once the
  /// completion event fires.
  pub fn on_event(&mut self, event: AccelEvent) -> AccelResult<Option<JobReport>> {
    match self.pending {
      Some((pending, _)) if pending == event => self.pending = None,
      pending => {
        return Err(AccelError::UnexpectedEvent {
          event,
          pending: pending.map(|(e, _)| e),
        })
      },
    }

    match event {
      AccelEvent::MainLoop => {
        self.main_loop()?;
        Ok(None)
      },
      AccelEvent::Completion => {
        info!("gemm job done in {} cycles", self.report.cycles);
        Ok(Some(self.report.clone()))
      },
    }
  }

  fn arm(&mut self, event: AccelEvent, latency: u64) -> AccelResult<()> {
    if let Some((pending, _)) = self.pending {
      return Err(AccelError::ContinuationPending { event, pending });
    }
    self.pending = Some((event, latency));
    Ok(())
  }

  fn main_loop(&mut self) -> AccelResult<()> {
    loop {
      if self.phase == Phase::Idle {
        return self.arm(AccelEvent::Completion, 0);
      }
      let latency = self.step()?;
      self.report.cycles += latency;
      if self.phase == Phase::Idle {
        return self.arm(AccelEvent::Completion, 0);
      }
      if latency > 0 {
        return self.arm(AccelEvent::MainLoop, latency);
      }
    }
  }

  fn enter(&mut self, phase: Phase) {
    debug!(
      "phase {} -> {} at tile ({}, {})",
      self.phase.name(),
      phase.name(),
      self.x_rows_iters,
      self.w_cols_iters
    );
    self.phase = phase;
  }

  fn plan(&self) -> AccelResult<&JobPlan> {
    self
      .plan
      .as_ref()
      .ok_or_else(|| AccelError::Job("no job configured".to_string()))
  }

  /// One subcycle. Returns its latency.
  fn step(&mut self) -> AccelResult<u64> {
    let l = self.geometry.array_width();
    let depth = self.geometry.depth();
    let pipe_regs = self.geometry.pipe_regs;
    let (col_tiles, w_col_tiles, x_row_tiles) = {
      let plan = self.plan()?;
      (plan.col_tiles, plan.w_col_tiles, plan.x_row_tiles)
    };
    let tile = TilePos {
      row: self.x_rows_iters,
      col: self.w_cols_iters,
    };

    match self.phase.clone() {
      Phase::Idle => Ok(0),

      Phase::Starting { step } => {
        let latency = if step < l {
          self.load_y(step, tile)?
        } else {
          let idx = step - l;
          let (chunk, row) = (idx / l, idx % l);
          if chunk < col_tiles {
            self.load_x(row, chunk, 0)?
          } else {
            self.x.iterate(None, FULL_STROBE)?
          }
        };
        self.phase = if step + 1 == 3 * l {
          debug!("phase starting -> computing at tile (0, 0)");
          Phase::Computing {
            hyper: 0,
            cycle: 0,
            sub: 0,
          }
        } else {
          Phase::Starting { step: step + 1 }
        };
        Ok(latency)
      },

      Phase::Computing { hyper, cycle, sub } => {
        let latency = if sub == 0 {
          self.load_w(hyper * l + cycle, tile)?
        } else {
          let slot = cycle * pipe_regs + sub - 1;
          let chunk = hyper + 2;
          if tile.col == 0 && slot < l && chunk < col_tiles {
            self.load_x(slot, chunk, tile.row)?
          } else {
            self.x.iterate(None, FULL_STROBE)?
          }
        };

        let (mut hyper, mut cycle, mut sub) = (hyper, cycle, sub + 1);
        if sub == depth {
          sub = 0;
          cycle += 1;
        }
        if cycle == l {
          cycle = 0;
          hyper += 1;
          self.report.hypercycles += 1;
          trace!("hypercycle {} of tile ({}, {}) retired", hyper - 1, tile.row, tile.col);
        }

        if hyper == col_tiles {
          self.store.compute_z(tile.col + 1 == w_col_tiles);
          let queue = self.store_queue(tile);
          self.enter(Phase::Storing {
            cycle: 0,
            sub: 0,
            queue,
          });
        } else {
          self.phase = Phase::Computing { hyper, cycle, sub };
        }
        Ok(latency)
      },

      Phase::Storing { cycle, sub, queue } => {
        // subcycle 0 carries no payload
        let transfer = match sub {
          0 => None,
          _ => queue.get(cycle * pipe_regs + sub - 1).copied(),
        };
        let latency = match transfer {
          Some(Transfer::StoreZ { row }) => self.store_z(row, tile)?,
          Some(Transfer::LoadY { row, tile: next }) => self.load_y(row, next)?,
          Some(Transfer::LoadX { row, chunk, row_tile }) => self.load_x(row, chunk, row_tile)?,
          None => self.z.iterate(None, FULL_STROBE)?,
        };

        let store_cycles = (queue.len() + pipe_regs - 1) / pipe_regs;
        let (mut cycle, mut sub) = (cycle, sub + 1);
        if sub == depth {
          sub = 0;
          cycle += 1;
        }

        if cycle < store_cycles {
          self.phase = Phase::Storing { cycle, sub, queue };
          return Ok(latency);
        }

        self.report.store_phases += 1;
        self.report.tiles += 1;
        self.w_cols_iters += 1;
        if self.w_cols_iters == w_col_tiles {
          self.w_cols_iters = 0;
          self.x_rows_iters += 1;
        }
        if self.x_rows_iters == x_row_tiles {
          self.enter(Phase::Finished);
        } else {
          self.enter(Phase::Computing {
            hyper: 0,
            cycle: 0,
            sub: 0,
          });
        }
        Ok(latency)
      },

      Phase::Finished => {
        for stream in [&self.x, &self.w, &self.y, &self.z] {
          if !stream.is_done() {
            return Err(AccelError::StreamIncomplete {
              stream: stream.name(),
              done: stream.done_count(),
              tot_len: stream.descriptor().tot_len,
            });
          }
        }
        self.store.free_buffers();
        self.report.x = self.x.stats();
        self.report.w = self.w.stats();
        self.report.y = self.y.stats();
        self.report.z = self.z.stats();
        self.irq = true;
        self.plan = None;
        self.enter(Phase::Idle);
        Ok(0)
      },
    }
  }

  /// Payload of the store phase that follows tile `tile`.
  fn store_queue(&self, tile: TilePos) -> Vec<Transfer> {
    let l = self.geometry.array_width();
    let Some(plan) = self.plan.as_ref() else {
      return Vec::new();
    };

    let mut queue: Vec<Transfer> = (0..l).map(|row| Transfer::StoreZ { row }).collect();

    let next = if tile.col + 1 < plan.w_col_tiles {
      Some(TilePos {
        row: tile.row,
        col: tile.col + 1,
      })
    } else if tile.row + 1 < plan.x_row_tiles {
      Some(TilePos {
        row: tile.row + 1,
        col: 0,
      })
    } else {
      None
    };

    if let Some(next) = next {
      queue.extend((0..l).map(|row| Transfer::LoadY { row, tile: next }));
      if next.col == 0 {
        for chunk in 0..plan.col_tiles.min(2) {
          queue.extend((0..l).map(|row| Transfer::LoadX {
            row,
            chunk,
            row_tile: next.row,
          }));
        }
      }
    }
    queue
  }

  /// Row part of a strobe: rows past the valid region of the final row tile
  /// transfer nothing.
  fn row_valid(&self, row_tile: usize, row: usize) -> AccelResult<bool> {
    let plan = self.plan()?;
    let x_row = plan.leftovers.x_row;
    Ok(!(row_tile + 1 == plan.x_row_tiles && x_row > 0 && row >= x_row))
  }

  fn load_x(&mut self, row: usize, chunk: usize, row_tile: usize) -> AccelResult<u64> {
    debug_assert_eq!(self.store.peek_x(), (row, chunk));
    let strobe = if self.row_valid(row_tile, row)? {
      let plan = self.plan()?;
      edge_strobe(chunk + 1 == plan.col_tiles, plan.leftovers.x_col, self.geometry.format)
    } else {
      EMPTY_STROBE
    };
    self.x.iterate(Some(self.store.next_x()), strobe)
  }

  fn load_w(&mut self, k: usize, tile: TilePos) -> AccelResult<u64> {
    let plan = self.plan()?;
    if k >= plan.n {
      self.store.skip_w();
      return self.w.iterate(None, FULL_STROBE);
    }
    let strobe = edge_strobe(tile.col + 1 == plan.w_col_tiles, plan.leftovers.w_col, self.geometry.format);
    self.w.iterate(Some(self.store.next_w()), strobe)
  }

  fn yz_strobe(&self, row: usize, tile: TilePos) -> AccelResult<u64> {
    if !self.row_valid(tile.row, row)? {
      return Ok(EMPTY_STROBE);
    }
    let plan = self.plan()?;
    Ok(edge_strobe(tile.col + 1 == plan.w_col_tiles, plan.leftovers.w_col, self.geometry.format))
  }

  fn load_y(&mut self, row: usize, tile: TilePos) -> AccelResult<u64> {
    let strobe = self.yz_strobe(row, tile)?;
    self.y.iterate(Some(self.store.next_y()), strobe)
  }

  fn store_z(&mut self, row: usize, tile: TilePos) -> AccelResult<u64> {
    let strobe = self.yz_strobe(row, tile)?;
    self.z.iterate(Some(self.store.next_z()), strobe)
  }
}
