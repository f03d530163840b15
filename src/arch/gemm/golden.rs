//! Host-side operand generation and the reference GEMM used to check results.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;

use super::format::ElemFormat;
use super::job::GemmShape;

/// Row-major operands of `Z = Y + X·W`.
#[derive(Debug, Clone, PartialEq)]
pub struct Operands {
  pub x: Vec<f32>,
  pub w: Vec<f32>,
  pub y: Vec<f32>,
}

impl Operands {
  /// Quarter-step values in `[-2, 2]`, quantized to `format` so memory holds
  /// them exactly.
  pub fn random(shape: GemmShape, format: ElemFormat, seed: u64) -> Self {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut draw = |len: usize| -> Vec<f32> {
      (0..len)
        .map(|_| format.quantize(rng.gen_range(-8i32..=8) as f32 * 0.25))
        .collect()
    };
    let x = draw(shape.m * shape.n);
    let w = draw(shape.n * shape.k);
    let y = draw(shape.m * shape.k);
    Self { x, w, y }
  }
}

/// `Y + X·W` in f64 together with the magnitude `|Y| + Σ|X·W|` of every
/// output, used to scale the tolerance.
pub fn reference_gemm(shape: GemmShape, ops: &Operands) -> (Vec<f64>, Vec<f64>) {
  let GemmShape { m, n, k } = shape;
  let mut z = vec![0.0; m * k];
  let mut mag = vec![0.0; m * k];
  for i in 0..m {
    for j in 0..k {
      let mut acc = ops.y[i * k + j] as f64;
      let mut abs = acc.abs();
      for p in 0..n {
        let prod = ops.x[i * n + p] as f64 * ops.w[p * k + j] as f64;
        acc += prod;
        abs += prod.abs();
      }
      z[i * k + j] = acc;
      mag[i * k + j] = abs;
    }
  }
  (z, mag)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mismatch {
  pub row: usize,
  pub col: usize,
  pub got: f32,
  pub expected: f64,
  pub tolerance: f64,
}

impl fmt::Display for Mismatch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "z[{}][{}] = {} but reference is {} (tolerance {})",
      self.row, self.col, self.got, self.expected, self.tolerance
    )
  }
}

/// Compare `z` against the reference. Returns the largest absolute error.
pub fn check_result(shape: GemmShape, ops: &Operands, z: &[f32], format: ElemFormat) -> Result<f64, Mismatch> {
  let (expected, mag) = reference_gemm(shape, ops);
  let mut max_err: f64 = 0.0;
  for (idx, (&got, &want)) in z.iter().zip(expected.iter()).enumerate() {
    let err = (got as f64 - want).abs();
    let tolerance = format.tolerance(shape.n, mag[idx]);
    if err > tolerance || got.is_nan() {
      return Err(Mismatch {
        row: idx / shape.k,
        col: idx % shape.k,
        got,
        expected: want,
        tolerance,
      });
    }
    max_err = max_err.max(err);
  }
  Ok(max_err)
}
