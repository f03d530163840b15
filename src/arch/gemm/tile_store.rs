//! On-chip operand buffers and the FMA kernel.
//!
//! Every buffer row holds raw element bit patterns, one beat wide except for
//! X which keeps several chunks side by side so the next X row tile can be
//! preloaded while the current one is still being consumed.

use log::{debug, warn};

use super::job::Leftovers;
use super::params::ArrayGeometry;
use super::ring::RingCursor;

/// Load position of the X buffer: rows fastest, then chunks, then column base.
#[derive(Debug, Clone, Default)]
struct XLoadCursor {
  row: RingCursor,
  chunk: RingCursor,
  col_base: usize,
}

#[derive(Debug, Clone)]
pub struct TileStore {
  geometry: ArrayGeometry,
  allocated: bool,

  n: usize,
  x_pad: usize,
  w_pad: usize,
  x_cols: usize,

  w: Vec<u8>,
  x: Vec<u8>,
  y: Vec<u8>,
  z: Vec<u8>,

  w_cursor: RingCursor,
  x_cursor: XLoadCursor,
  y_cursor: RingCursor,
  z_cursor: RingCursor,

  x_offs: usize,
  y_offs: usize,
}

impl TileStore {
  pub fn new(geometry: ArrayGeometry) -> Self {
    let l = geometry.array_width();
    let beat = geometry.beat_bytes();
    Self {
      geometry,
      allocated: false,
      n: 0,
      x_pad: 0,
      w_pad: 0,
      x_cols: 0,
      w: Vec::new(),
      x: Vec::new(),
      y: vec![0; 2 * l * beat],
      z: vec![0; l * beat],
      w_cursor: RingCursor::default(),
      x_cursor: XLoadCursor::default(),
      y_cursor: RingCursor::new(2 * l),
      z_cursor: RingCursor::new(l),
      x_offs: 0,
      y_offs: 0,
    }
  }

  /// Size W and X for a contraction length of `n` and clear everything else.
  pub fn alloc_buffers(&mut self, n: usize, leftovers: &Leftovers) {
    let l = self.geometry.array_width();
    let elem = self.geometry.elem_bytes();
    let beat = self.geometry.beat_bytes();

    self.n = n;
    self.x_pad = (l - leftovers.x_col) % l;
    self.w_pad = (l - leftovers.w_row) % l;
    self.x_cols = n + self.x_pad + 2 * l;

    let w_rows = n + self.w_pad;
    self.w = vec![0; w_rows * beat];
    self.x = vec![0; l * self.x_cols * elem];
    self.y.fill(0);
    self.z.fill(0);

    self.w_cursor = RingCursor::new(w_rows);
    self.x_cursor = XLoadCursor {
      row: RingCursor::new(l),
      chunk: RingCursor::new((n + self.x_pad) / l),
      col_base: 0,
    };
    self.y_cursor.reset();
    self.z_cursor.reset();
    self.x_offs = 0;
    self.y_offs = 0;
    self.allocated = true;

    debug!(
      "tile store: n={} w_rows={} x_cols={} x_pad={} w_pad={}",
      n, w_rows, self.x_cols, self.x_pad, self.w_pad
    );
  }

  pub fn free_buffers(&mut self) {
    if !self.allocated {
      warn!("tile store freed twice, ignoring");
      return;
    }
    self.w = Vec::new();
    self.x = Vec::new();
    self.y.fill(0);
    self.z.fill(0);
    self.w_cursor = RingCursor::default();
    self.x_cursor = XLoadCursor::default();
    self.y_cursor.reset();
    self.z_cursor.reset();
    self.x_offs = 0;
    self.y_offs = 0;
    self.allocated = false;
  }

  pub fn is_allocated(&self) -> bool {
    self.allocated
  }

  pub fn x_offs(&self) -> usize {
    self.x_offs
  }

  pub fn y_offs(&self) -> usize {
    self.y_offs
  }

  pub fn x_cols(&self) -> usize {
    self.x_cols
  }

  pub fn next_w(&mut self) -> &mut [u8] {
    let beat = self.geometry.beat_bytes();
    let row = self.w_cursor.advance();
    &mut self.w[row * beat..(row + 1) * beat]
  }

  /// Step over a padding row of W without a transfer.
  pub fn skip_w(&mut self) {
    self.w_cursor.skip(1);
  }

  /// `(row, chunk)` the next X slot belongs to.
  pub fn peek_x(&self) -> (usize, usize) {
    (self.x_cursor.row.pos(), self.x_cursor.chunk.pos())
  }

  pub fn next_x(&mut self) -> &mut [u8] {
    let l = self.geometry.array_width();
    let elem = self.geometry.elem_bytes();
    let beat = self.geometry.beat_bytes();

    let cursor = &mut self.x_cursor;
    let row = cursor.row.advance();
    let chunk = cursor.chunk.pos();
    let col = (cursor.col_base + chunk * l) % self.x_cols;
    if cursor.row.pos() == 0 {
      cursor.chunk.advance();
      if cursor.chunk.pos() == 0 {
        cursor.col_base = (cursor.col_base + self.n + self.x_pad) % self.x_cols;
      }
    }

    let start = (row * self.x_cols + col) * elem;
    &mut self.x[start..start + beat]
  }

  pub fn next_y(&mut self) -> &mut [u8] {
    let beat = self.geometry.beat_bytes();
    let row = self.y_cursor.advance();
    &mut self.y[row * beat..(row + 1) * beat]
  }

  pub fn next_z(&mut self) -> &mut [u8] {
    let beat = self.geometry.beat_bytes();
    let row = self.z_cursor.advance();
    &mut self.z[row * beat..(row + 1) * beat]
  }

  /// `z = y + x · w` over the resident tile, then flip the Y half. With
  /// `retire_x` set the X column base moves on to the next row tile.
  pub fn compute_z(&mut self, retire_x: bool) {
    let l = self.geometry.array_width();
    let elem = self.geometry.elem_bytes();
    let format = self.geometry.format;

    for i in 0..l {
      for j in 0..l {
        let y_at = ((i + self.y_offs) * l + j) * elem;
        let mut acc = format.decode(&self.y[y_at..]);
        for k in 0..self.n {
          let col = (self.x_offs + k) % self.x_cols;
          let x = format.decode(&self.x[(i * self.x_cols + col) * elem..]);
          let w = format.decode(&self.w[(k * l + j) * elem..]);
          acc = format.fma(acc, x, w);
        }
        let z_at = (i * l + j) * elem;
        format.encode(acc, &mut self.z[z_at..z_at + elem]);
      }
    }

    self.y_offs = (self.y_offs + l) % (2 * l);
    if retire_x {
      self.x_offs = (self.x_offs + self.n + self.x_pad) % self.x_cols;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::gemm::format::ElemFormat;

  // L = 4, fp32
  fn store() -> TileStore {
    TileStore::new(ArrayGeometry::new(2, 2, ElemFormat::Fp32).unwrap())
  }

  fn fill(slot: &mut [u8], values: &[f32]) {
    for (e, v) in values.iter().enumerate() {
      ElemFormat::Fp32.encode(*v, &mut slot[e * 4..e * 4 + 4]);
    }
  }

  fn leftovers_n6() -> Leftovers {
    Leftovers {
      x_row: 0,
      x_col: 2,
      w_row: 2,
      w_col: 0,
    }
  }

  #[test]
  fn test_compute_matches_reference() {
    let mut ts = store();
    let n = 6;
    ts.alloc_buffers(n, &leftovers_n6());
    assert_eq!(ts.x_cols(), 6 + 2 + 8);

    let x = |i: usize, k: usize| ((i * 7 + k * 3) % 5) as f32 - 2.0;
    let w = |k: usize, j: usize| ((k * 2 + j * 5) % 7) as f32 - 3.0;
    let y = |i: usize, j: usize| (i + j) as f32;

    for chunk in 0..2 {
      for row in 0..4 {
        assert_eq!(ts.peek_x(), (row, chunk));
        let values: Vec<f32> = (0..4)
          .map(|e| {
            let k = chunk * 4 + e;
            if k < n {
              x(row, k)
            } else {
              0.0
            }
          })
          .collect();
        fill(ts.next_x(), &values);
      }
    }
    for k in 0..8 {
      if k < n {
        let values: Vec<f32> = (0..4).map(|j| w(k, j)).collect();
        fill(ts.next_w(), &values);
      } else {
        ts.skip_w();
      }
    }
    for i in 0..4 {
      let values: Vec<f32> = (0..4).map(|j| y(i, j)).collect();
      fill(ts.next_y(), &values);
    }

    ts.compute_z(true);

    for i in 0..4 {
      let slot = ts.next_z().to_vec();
      for j in 0..4 {
        let expected = (0..n).fold(y(i, j), |acc, k| x(i, k).mul_add(w(k, j), acc));
        assert_eq!(ElemFormat::Fp32.decode(&slot[j * 4..]), expected, "z[{}][{}]", i, j);
      }
    }
  }

  #[test]
  fn test_offsets_advance() {
    let mut ts = store();
    ts.alloc_buffers(6, &leftovers_n6());
    ts.compute_z(false);
    assert_eq!((ts.x_offs(), ts.y_offs()), (0, 4));
    ts.compute_z(true);
    assert_eq!((ts.x_offs(), ts.y_offs()), (8, 0));
    ts.compute_z(true);
    assert_eq!(ts.x_offs(), 0);
  }

  #[test]
  fn test_x_cursor_moves_to_next_column_base() {
    let mut ts = store();
    ts.alloc_buffers(6, &leftovers_n6());
    // one full row tile: 2 chunks x 4 rows
    for _ in 0..8 {
      ts.next_x().fill(0xAB);
    }
    assert_eq!(ts.peek_x(), (0, 0));
    ts.next_x().fill(0xCD);
    // next row tile lands 8 columns further
    assert_eq!(ts.x[8 * 4], 0xCD);
    assert_eq!(ts.x[7 * 4], 0xAB);
  }

  #[test]
  fn test_free_then_alloc_leaves_no_residue() {
    let mut ts = store();
    ts.alloc_buffers(6, &leftovers_n6());
    ts.next_y().fill(0x11);
    ts.compute_z(true);
    ts.free_buffers();
    assert!(!ts.is_allocated());
    // second free is a no-op
    ts.free_buffers();

    ts.alloc_buffers(4, &Leftovers::default());
    assert_eq!((ts.x_offs(), ts.y_offs()), (0, 0));
    assert!(ts.y.iter().all(|&b| b == 0));
    assert!(ts.z.iter().all(|&b| b == 0));
    assert_eq!(ts.w.len(), 4 * 16);
  }
}
