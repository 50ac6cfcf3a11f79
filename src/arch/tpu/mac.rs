// ===========================================
// MAC Unit
// ===========================================

use super::fp16::{approx_add, approx_mul, ApproxConfig, FP16_ZERO};

/// Inputs presented to a MAC unit for one clock edge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MacInput {
  /// Activation operand, from the row feed or the left neighbor
  pub a: u16,
  /// Weight operand, from the column feed or the upper neighbor
  pub w: u16,
  /// Overwrite the accumulator instead of adding to it
  pub clear: bool,
  pub enabled: bool,
}

/// Multiply-accumulate unit: one FP16 accumulator plus the two forward
/// registers that pass operands on to the right and lower neighbors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacUnit {
  acc: u16,
  a_fwd: u16,
  w_fwd: u16,
}

impl MacUnit {
  pub fn new() -> Self {
    Self {
      acc: FP16_ZERO,
      a_fwd: FP16_ZERO,
      w_fwd: FP16_ZERO,
    }
  }

  /// State after the next clock edge.
  ///
  /// Pure so the array can compute every cell from the same pre-edge snapshot.
  pub fn next(&self, input: &MacInput, config: &ApproxConfig) -> Self {
    if !input.enabled {
      return *self;
    }
    let product = approx_mul(input.a, input.w, config);
    let acc = if input.clear {
      product
    } else {
      approx_add(self.acc, product, config)
    };
    Self {
      acc,
      a_fwd: input.a,
      w_fwd: input.w,
    }
  }

  /// Advance one clock edge in place
  pub fn step(&mut self, input: &MacInput, config: &ApproxConfig) {
    *self = self.next(input, config);
  }

  /// Accumulator as of the last edge
  pub fn result(&self) -> u16 {
    self.acc
  }

  /// Activation value the right neighbor sees on the next edge
  pub fn forward_a(&self) -> u16 {
    self.a_fwd
  }

  /// Weight value the lower neighbor sees on the next edge
  pub fn forward_w(&self) -> u16 {
    self.w_fwd
  }

  /// Drop forwarded operands, keep the accumulator
  pub fn flush(&mut self) {
    self.a_fwd = FP16_ZERO;
    self.w_fwd = FP16_ZERO;
  }

  pub fn reset(&mut self) {
    *self = Self::new();
  }
}

impl Default for MacUnit {
  fn default() -> Self {
    Self::new()
  }
}
