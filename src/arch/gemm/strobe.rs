//! Per-byte write strobes for partial beats at non-tile-aligned edges.

use super::format::ElemFormat;

/// Every byte of the beat enabled (the `-1` register convention).
pub const FULL_STROBE: u64 = u64::MAX;

/// No byte enabled: the beat is timed but moves no data.
pub const EMPTY_STROBE: u64 = 0;

/// Strobe enabling the first `valid` elements of a beat.
pub fn leftover_strobe(valid: usize, format: ElemFormat) -> u64 {
  let width = format.bytes();
  (0..valid).fold(EMPTY_STROBE, |strobe, i| {
    let shift = i * width;
    if shift >= 64 {
      strobe
    } else {
      strobe | (format.base_strobe() << shift)
    }
  })
}

/// Column strobe for an axis whose final tile holds `leftover` valid
/// elements (0 means the axis is tile-aligned).
pub fn edge_strobe(is_final_tile: bool, leftover: usize, format: ElemFormat) -> u64 {
  if is_final_tile && leftover > 0 {
    leftover_strobe(leftover, format)
  } else {
    FULL_STROBE
  }
}
