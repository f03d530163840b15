//! Job description as programmed through the register file, plus the
//! tiling plan derived from it.

use serde::{Deserialize, Serialize};

use super::error::{AccelError, AccelResult};
use super::params::ArrayGeometry;
use super::regfile::*;
use super::streamer::{StreamDescriptor, StreamDim};

/// Valid elements in the final tile along each axis; 0 means aligned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leftovers {
  pub x_row: usize,
  pub x_col: usize,
  pub w_row: usize,
  pub w_col: usize,
}

impl Leftovers {
  pub fn pack(&self) -> u32 {
    ((self.x_row as u32 & 0xFF) << 24)
      | ((self.x_col as u32 & 0xFF) << 16)
      | ((self.w_row as u32 & 0xFF) << 8)
      | (self.w_col as u32 & 0xFF)
  }

  pub fn unpack(word: u32) -> Self {
    Self {
      x_row: ((word >> 24) & 0xFF) as usize,
      x_col: ((word >> 16) & 0xFF) as usize,
      w_row: ((word >> 8) & 0xFF) as usize,
      w_col: (word & 0xFF) as usize,
    }
  }
}

/// Tile counts along rows and columns of one operand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileIters {
  pub rows: u32,
  pub cols: u32,
}

impl TileIters {
  pub fn pack(&self) -> u32 {
    ((self.rows & 0xFFFF) << 16) | (self.cols & 0xFFFF)
  }

  pub fn unpack(word: u32) -> Self {
    Self {
      rows: word >> 16,
      cols: word & 0xFFFF,
    }
  }
}

/// Problem size of `Z = Y + X·W` with X of `m x n` and W of `n x k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GemmShape {
  pub m: usize,
  pub n: usize,
  pub k: usize,
}

/// Where the four matrices live and their row pitches in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferLayout {
  pub x_addr: u32,
  pub w_addr: u32,
  pub y_addr: u32,
  pub z_addr: u32,
  pub x_pitch: u32,
  pub w_pitch: u32,
  pub yz_pitch: u32,
}

impl BufferLayout {
  /// Lay the matrices out back to back from `base` with tight pitches,
  /// `guard` spare bytes after every Y/Z row and 64-byte aligned bases.
  /// `None` if the layout does not fit a 32-bit address space.
  pub fn packed(base: u32, shape: GemmShape, elem_bytes: usize, guard: u32) -> Option<Self> {
    let align = |addr: u64| addr.checked_add(63).map(|a| a & !63);
    let bytes = |elems: usize| (elems as u64).checked_mul(elem_bytes as u64);
    let region = |addr: u64, pitch: u64, rows: usize| {
      pitch
        .checked_mul(rows as u64)
        .and_then(|len| addr.checked_add(len))
        .and_then(align)
    };

    let x_pitch = bytes(shape.n)?;
    let w_pitch = bytes(shape.k)?;
    let yz_pitch = w_pitch.checked_add(guard as u64)?;

    let x_addr = align(base as u64)?;
    let w_addr = region(x_addr, x_pitch, shape.m)?;
    let y_addr = region(w_addr, w_pitch, shape.n)?;
    let z_addr = region(y_addr, yz_pitch, shape.m)?;
    let layout = Self {
      x_addr: u32::try_from(x_addr).ok()?,
      w_addr: u32::try_from(w_addr).ok()?,
      y_addr: u32::try_from(y_addr).ok()?,
      z_addr: u32::try_from(z_addr).ok()?,
      x_pitch: u32::try_from(x_pitch).ok()?,
      w_pitch: u32::try_from(w_pitch).ok()?,
      yz_pitch: u32::try_from(yz_pitch).ok()?,
    };
    (layout.end(shape) <= u32::MAX as u64 + 1).then_some(layout)
  }

  /// First byte past the Z matrix.
  pub fn end(&self, shape: GemmShape) -> u64 {
    self.z_addr as u64 + self.yz_pitch as u64 * shape.m as u64
  }
}

/// Register image of one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
  pub x_addr: u32,
  pub w_addr: u32,
  pub y_addr: u32,
  pub z_addr: u32,
  pub x_tot_len: u32,
  pub w_tot_len: u32,
  pub y_tot_len: u32,
  pub z_tot_len: u32,
  pub w_iters: TileIters,
  pub x_iters: TileIters,
  pub leftovers: Leftovers,
  pub x_stride: u32,
  pub w_stride: u32,
  pub yz_stride: u32,
}

fn ceil_div(a: usize, b: usize) -> usize {
  (a + b - 1) / b
}

impl JobConfig {
  /// Program every field the way a driver would for the given problem.
  pub fn for_gemm(shape: GemmShape, geometry: &ArrayGeometry, layout: &BufferLayout) -> Self {
    let l = geometry.array_width();
    let x_row_tiles = ceil_div(shape.m, l) as u32;
    let col_tiles = ceil_div(shape.n, l) as u32;
    let w_col_tiles = ceil_div(shape.k, l) as u32;

    let leftovers = Leftovers {
      x_row: shape.m % l,
      x_col: shape.n % l,
      w_row: shape.n % l,
      w_col: shape.k % l,
    };

    let l32 = l as u32;
    let yz_len = l32 * w_col_tiles * x_row_tiles;
    Self {
      x_addr: layout.x_addr,
      w_addr: layout.w_addr,
      y_addr: layout.y_addr,
      z_addr: layout.z_addr,
      x_tot_len: l32 * col_tiles * x_row_tiles,
      w_tot_len: shape.n as u32 * w_col_tiles * x_row_tiles,
      y_tot_len: yz_len,
      z_tot_len: yz_len,
      w_iters: TileIters {
        rows: col_tiles,
        cols: w_col_tiles,
      },
      x_iters: TileIters {
        rows: x_row_tiles,
        cols: col_tiles,
      },
      leftovers,
      x_stride: layout.x_pitch,
      w_stride: layout.w_pitch,
      yz_stride: layout.yz_pitch,
    }
  }

  /// `(offset, value)` register writes that program this job. The trigger
  /// write is not included.
  pub fn register_writes(&self) -> Vec<(u32, u32)> {
    vec![
      (REG_X_ADDR, self.x_addr),
      (REG_W_ADDR, self.w_addr),
      (REG_Y_ADDR, self.y_addr),
      (REG_Z_ADDR, self.z_addr),
      (REG_X_TOT_LEN, self.x_tot_len),
      (REG_W_TOT_LEN, self.w_tot_len),
      (REG_Y_TOT_LEN, self.y_tot_len),
      (REG_Z_TOT_LEN, self.z_tot_len),
      (REG_W_ITERS, self.w_iters.pack()),
      (REG_X_ITERS, self.x_iters.pack()),
      (REG_LEFTOVERS, self.leftovers.pack()),
      (REG_X_STRIDE, self.x_stride),
      (REG_W_STRIDE, self.w_stride),
      (REG_YZ_STRIDE, self.yz_stride),
    ]
  }

  /// Check the register image against the geometry and derive the plan.
  pub fn validate(&self, geometry: &ArrayGeometry) -> AccelResult<JobPlan> {
    let l = geometry.array_width();
    let elem = geometry.elem_bytes();
    let reject = |msg: String| Err(AccelError::Job(msg));

    let x_row_tiles = self.x_iters.rows as usize;
    let col_tiles = self.x_iters.cols as usize;
    let w_col_tiles = self.w_iters.cols as usize;
    if x_row_tiles == 0 || col_tiles == 0 || w_col_tiles == 0 {
      return reject(format!(
        "tile counts must be non-zero (x_iters={:?}, w_iters={:?})",
        self.x_iters, self.w_iters
      ));
    }
    if self.w_iters.rows as usize != col_tiles {
      return reject(format!(
        "W row tiles ({}) differ from X column tiles ({})",
        self.w_iters.rows, col_tiles
      ));
    }

    let lo = self.leftovers;
    if lo.x_col != lo.w_row {
      return reject(format!("X column leftover {} differs from W row leftover {}", lo.x_col, lo.w_row));
    }
    if [lo.x_row, lo.x_col, lo.w_row, lo.w_col].iter().any(|&v| v >= l) {
      return reject(format!("leftovers {:?} must be below the array width {}", lo, l));
    }

    let valid = |leftover: usize| if leftover == 0 { l } else { leftover };
    let n = (col_tiles - 1) * l + valid(lo.x_col);
    let k = (w_col_tiles - 1) * l + valid(lo.w_col);

    let expected = [
      ("X", self.x_tot_len, l * col_tiles * x_row_tiles),
      ("W", self.w_tot_len, n * w_col_tiles * x_row_tiles),
      ("Y", self.y_tot_len, l * w_col_tiles * x_row_tiles),
      ("Z", self.z_tot_len, l * w_col_tiles * x_row_tiles),
    ];
    for (name, got, want) in expected {
      if got as usize != want {
        return reject(format!("{} total length is {}, tiling implies {}", name, got, want));
      }
    }

    for (name, pitch, row_bytes) in [
      ("X", self.x_stride, n * elem),
      ("W", self.w_stride, k * elem),
      ("Y/Z", self.yz_stride, k * elem),
    ] {
      if (pitch as usize) < row_bytes {
        return reject(format!("{} row pitch {} is shorter than a row of {} bytes", name, pitch, row_bytes));
      }
    }

    let step = (l * elem) as u64;
    let x_pitch = self.x_stride as u64;
    let w_pitch = self.w_stride as u64;
    let yz_pitch = self.yz_stride as u64;
    let yz = |base: u32, tot_len: u32| StreamDescriptor {
      base: base as u64,
      tot_len: tot_len as u64,
      dims: [
        StreamDim::new(l as u32, yz_pitch),
        StreamDim::new(w_col_tiles as u32, step),
        StreamDim::new(x_row_tiles as u32, l as u64 * yz_pitch),
      ],
      d3_stride: 0,
    };

    Ok(JobPlan {
      n,
      k,
      col_tiles,
      w_col_tiles,
      x_row_tiles,
      leftovers: lo,
      x: StreamDescriptor {
        base: self.x_addr as u64,
        tot_len: self.x_tot_len as u64,
        dims: [
          StreamDim::new(l as u32, x_pitch),
          StreamDim::new(col_tiles as u32, step),
          StreamDim::new(x_row_tiles as u32, l as u64 * x_pitch),
        ],
        d3_stride: 0,
      },
      w: StreamDescriptor {
        base: self.w_addr as u64,
        tot_len: self.w_tot_len as u64,
        dims: [
          StreamDim::new(n as u32, w_pitch),
          StreamDim::new(w_col_tiles as u32, step),
          StreamDim::new(x_row_tiles as u32, 0),
        ],
        d3_stride: 0,
      },
      y: yz(self.y_addr, self.y_tot_len),
      z: yz(self.z_addr, self.z_tot_len),
    })
  }
}

/// Validated tiling of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPlan {
  /// Contraction length
  pub n: usize,
  /// Output columns
  pub k: usize,
  pub col_tiles: usize,
  pub w_col_tiles: usize,
  pub x_row_tiles: usize,
  pub leftovers: Leftovers,
  pub x: StreamDescriptor,
  pub w: StreamDescriptor,
  pub y: StreamDescriptor,
  pub z: StreamDescriptor,
}

impl JobPlan {
  pub fn tiles(&self) -> usize {
    self.x_row_tiles * self.w_col_tiles
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::gemm::format::ElemFormat;

  fn shape(m: usize, n: usize, k: usize) -> GemmShape {
    GemmShape { m, n, k }
  }

  #[test]
  fn test_pack_unpack() {
    let lo = Leftovers {
      x_row: 5,
      x_col: 3,
      w_row: 3,
      w_col: 11,
    };
    assert_eq!(lo.pack(), 0x0503_030B);
    assert_eq!(Leftovers::unpack(lo.pack()), lo);
    assert_eq!(TileIters::unpack(0x0002_0007), TileIters { rows: 2, cols: 7 });
  }

  #[test]
  fn test_for_gemm_aligned() {
    let geometry = ArrayGeometry::default();
    let layout = BufferLayout::packed(0, shape(12, 12, 12), 2, 0).unwrap();
    let job = JobConfig::for_gemm(shape(12, 12, 12), &geometry, &layout);
    assert_eq!(job.x_tot_len, 12);
    assert_eq!(job.w_tot_len, 12);
    assert_eq!(job.leftovers, Leftovers::default());

    let plan = job.validate(&geometry).unwrap();
    assert_eq!((plan.n, plan.k, plan.tiles()), (12, 12, 1));
    assert_eq!(plan.x.dims[0], StreamDim::new(12, 24));
    assert_eq!(plan.w.dims[2], StreamDim::new(1, 0));
  }

  #[test]
  fn test_for_gemm_with_leftovers() {
    let geometry = ArrayGeometry::default();
    let s = shape(14, 13, 26);
    let layout = BufferLayout::packed(0x1000, s, 2, 8).unwrap();
    let job = JobConfig::for_gemm(s, &geometry, &layout);
    assert_eq!(
      job.leftovers,
      Leftovers {
        x_row: 2,
        x_col: 1,
        w_row: 1,
        w_col: 2
      }
    );
    assert_eq!(job.x_iters, TileIters { rows: 2, cols: 2 });
    assert_eq!(job.w_iters, TileIters { rows: 2, cols: 3 });
    assert_eq!(job.w_tot_len, 13 * 3 * 2);

    let plan = job.validate(&geometry).unwrap();
    assert_eq!(plan.n, 13);
    assert_eq!(plan.k, 26);
    assert_eq!(plan.y.dims[2].stride, 12 * (26 * 2 + 8));
  }

  #[test]
  fn test_validate_rejects() {
    let geometry = ArrayGeometry::new(4, 3, ElemFormat::Fp16).unwrap();
    let s = shape(12, 24, 12);
    let good = JobConfig::for_gemm(s, &geometry, &BufferLayout::packed(0, s, 2, 0).unwrap());
    assert!(good.validate(&geometry).is_ok());

    let mut job = good;
    job.x_iters.cols = 0;
    assert!(matches!(job.validate(&geometry), Err(AccelError::Job(_))));

    let mut job = good;
    job.w_iters.rows = 1;
    assert!(job.validate(&geometry).is_err());

    let mut job = good;
    job.leftovers.w_row = 3;
    assert!(job.validate(&geometry).is_err());

    let mut job = good;
    job.leftovers = Leftovers::unpack(0x0C00_0000);
    assert!(job.validate(&geometry).is_err());

    let mut job = good;
    job.w_tot_len += 1;
    assert!(job.validate(&geometry).is_err());

    let mut job = good;
    job.x_stride = 2;
    assert!(job.validate(&geometry).is_err());
  }

  #[test]
  fn test_packed_layout_bounds() {
    let s = shape(3, 5, 7);
    let layout = BufferLayout::packed(0x1001, s, 2, 2).unwrap();
    assert_eq!(layout.x_addr, 0x1040);
    assert_eq!(layout.w_addr, 0x1040 + 64);
    assert_eq!(layout.yz_pitch, 16);
    assert_eq!(layout.end(s), layout.z_addr as u64 + 48);

    assert_eq!(BufferLayout::packed(0, shape(100_000, 100_000, 12), 2, 0), None);
    assert_eq!(BufferLayout::packed(0xFFFF_FF00, shape(4, 4, 8), 4, 0), None);
  }
}
