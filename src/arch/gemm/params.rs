use serde::{Deserialize, Serialize};

use super::error::{AccelError, AccelResult};
use super::format::ElemFormat;

/// Widest beat the 64-bit byte strobe can cover.
pub const MAX_BEAT_BYTES: usize = 64;

/// Systolic array shape and datapath format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayGeometry {
  pub array_height: usize,
  pub pipe_regs: usize,
  pub format: ElemFormat,
}

impl Default for ArrayGeometry {
  fn default() -> Self {
    Self {
      array_height: 4,
      pipe_regs: 3,
      format: ElemFormat::Fp16,
    }
  }
}

impl ArrayGeometry {
  pub fn new(array_height: usize, pipe_regs: usize, format: ElemFormat) -> AccelResult<Self> {
    let geometry = Self {
      array_height,
      pipe_regs,
      format,
    };
    geometry.validate()?;
    Ok(geometry)
  }

  pub fn validate(&self) -> AccelResult<()> {
    if self.array_height == 0 || self.pipe_regs == 0 {
      return Err(AccelError::Geometry(format!(
        "array_height ({}) and pipe_regs ({}) must be non-zero",
        self.array_height, self.pipe_regs
      )));
    }
    if self.beat_bytes() > MAX_BEAT_BYTES {
      return Err(AccelError::Geometry(format!(
        "beat of {} x {} bytes exceeds the {}-byte strobe",
        self.array_width(),
        self.format.bytes(),
        MAX_BEAT_BYTES
      )));
    }
    Ok(())
  }

  /// Elements per beat and output tile edge.
  pub fn array_width(&self) -> usize {
    self.array_height * self.pipe_regs
  }

  /// Subcycles per cycle.
  pub fn depth(&self) -> usize {
    self.pipe_regs + 1
  }

  pub fn elem_bytes(&self) -> usize {
    self.format.bytes()
  }

  pub fn beat_bytes(&self) -> usize {
    self.array_width() * self.format.bytes()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_geometry() {
    let g = ArrayGeometry::default();
    assert_eq!(g.array_width(), 12);
    assert_eq!(g.depth(), 4);
    assert_eq!(g.beat_bytes(), 24);
  }

  #[test]
  fn test_rejects_wide_beat() {
    assert!(ArrayGeometry::new(4, 3, ElemFormat::Fp32).is_ok());
    assert!(ArrayGeometry::new(8, 3, ElemFormat::Fp32).is_err());
    assert!(ArrayGeometry::new(0, 3, ElemFormat::Fp16).is_err());
  }
}
