/// Bounded cursor over `capacity` slots with checked wraparound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RingCursor {
  pos: usize,
  capacity: usize,
}

impl RingCursor {
  pub fn new(capacity: usize) -> Self {
    Self { pos: 0, capacity }
  }

  pub fn pos(&self) -> usize {
    self.pos
  }

  /// Return the current slot and step past it. Panics on an empty ring, which
  /// means a buffer was addressed before allocation.
  pub fn advance(&mut self) -> usize {
    assert!(self.capacity > 0, "ring cursor used with zero capacity");
    let current = self.pos;
    self.pos = (self.pos + 1) % self.capacity;
    current
  }

  /// Offset `pos` by `delta` slots modulo the capacity.
  pub fn offset(&self, delta: usize) -> usize {
    assert!(self.capacity > 0, "ring cursor used with zero capacity");
    (self.pos + delta) % self.capacity
  }

  /// Move forward by `delta` slots.
  pub fn skip(&mut self, delta: usize) {
    self.pos = self.offset(delta);
  }

  pub fn reset(&mut self) {
    self.pos = 0;
  }
}
