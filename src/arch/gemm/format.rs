//! Element formats supported by the datapath.
//!
//! Operands live in memory and in the tile buffers as raw little-endian bit
//! patterns. The FMA chain runs on `f32` values that are always exactly
//! representable in the element format, so encoding a result never rounds.

use half::f16;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElemFormat {
  /// E5M2, the upper byte of an IEEE binary16
  Fp8,
  Fp16,
  Fp32,
}

impl ElemFormat {
  pub const fn bytes(self) -> usize {
    match self {
      ElemFormat::Fp8 => 1,
      ElemFormat::Fp16 => 2,
      ElemFormat::Fp32 => 4,
    }
  }

  /// Write-strobe pattern covering one element.
  pub const fn base_strobe(self) -> u64 {
    match self {
      ElemFormat::Fp8 => 0x1,
      ElemFormat::Fp16 => 0x3,
      ElemFormat::Fp32 => 0xF,
    }
  }

  /// Decode one element from `raw` (at least `bytes()` long).
  pub fn decode(self, raw: &[u8]) -> f32 {
    match self {
      ElemFormat::Fp8 => fp8_expand(raw[0]).to_f32(),
      ElemFormat::Fp16 => f16::from_le_bytes([raw[0], raw[1]]).to_f32(),
      ElemFormat::Fp32 => f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
    }
  }

  /// Encode `value` into `out`. Narrow formats round through binary16; fp8
  /// then truncates the low byte away.
  pub fn encode(self, value: f32, out: &mut [u8]) {
    match self {
      ElemFormat::Fp8 => out[0] = fp8_truncate(f16::from_f32(value)),
      ElemFormat::Fp16 => out[..2].copy_from_slice(&f16::from_f32(value).to_le_bytes()),
      ElemFormat::Fp32 => out[..4].copy_from_slice(&value.to_le_bytes()),
    }
  }

  /// Closest value the format can hold, using the same rounding as `encode`.
  pub fn quantize(self, value: f32) -> f32 {
    let mut raw = [0u8; 4];
    self.encode(value, &mut raw);
    self.decode(&raw)
  }

  /// One accumulation step `acc + x * w`.
  ///
  /// fp8 accumulates in binary16 and goes through the fp8 bit pattern after
  /// every step, matching the datapath instead of keeping a wide accumulator.
  pub fn fma(self, acc: f32, x: f32, w: f32) -> f32 {
    match self {
      ElemFormat::Fp8 => {
        let wide = f16::from_f32(x.mul_add(w, acc));
        fp8_expand(fp8_truncate(wide)).to_f32()
      },
      ElemFormat::Fp16 => f16::from_f32(x.mul_add(w, acc)).to_f32(),
      ElemFormat::Fp32 => x.mul_add(w, acc),
    }
  }

  /// Absolute tolerance for comparing a length-`n` dot product of magnitude
  /// `scale` against an f64 reference.
  pub fn tolerance(self, n: usize, scale: f64) -> f64 {
    let eps = match self {
      ElemFormat::Fp8 => 0.25,
      ElemFormat::Fp16 => 1.0 / 1024.0,
      ElemFormat::Fp32 => 1.0 / 8_388_608.0,
    };
    eps * scale.max(1.0) * (n.max(1) as f64)
  }
}

fn fp8_truncate(value: f16) -> u8 {
  (value.to_bits() >> 8) as u8
}

fn fp8_expand(bits: u8) -> f16 {
  f16::from_bits((bits as u16) << 8)
}

impl fmt::Display for ElemFormat {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ElemFormat::Fp8 => "fp8",
      ElemFormat::Fp16 => "fp16",
      ElemFormat::Fp32 => "fp32",
    };
    f.write_str(name)
  }
}

impl FromStr for ElemFormat {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "fp8" => Ok(ElemFormat::Fp8),
      "fp16" => Ok(ElemFormat::Fp16),
      "fp32" => Ok(ElemFormat::Fp32),
      other => Err(format!("unknown element format: {}", other)),
    }
  }
}
