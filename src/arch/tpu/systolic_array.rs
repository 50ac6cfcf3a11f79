// Systolic Array for 8x8 matrix multiplication
// Activations flow left to right, weights top to bottom, one hop per edge.

use std::collections::VecDeque;

use super::fp16::{ApproxConfig, FP16_ZERO};
use super::mac::{MacInput, MacUnit};
use super::matrix::{Matrix, DIM};
use crate::builtin::Wire;

/// Edges spent presenting the eight k-slices
pub const FEED_STEPS: usize = DIM;
/// Edges after the last slice until the far corner has seen it:
/// DIM-1 of edge skew plus DIM-1 hops across the grid
pub const DRAIN_STEPS: usize = 2 * (DIM - 1);
pub const PASS_STEPS: usize = FEED_STEPS + DRAIN_STEPS;

/// Values presented at the array edges on one clock edge:
/// `act[r]` enters row r, `weight[c]` enters column c
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdgeFeed {
  pub act: [u16; DIM],
  pub weight: [u16; DIM],
  pub clear: bool,
}

impl EdgeFeed {
  /// Slice `t` of `a * w`: column t of A, row t of W, clear on the first slice.
  /// Past the last slice the edges carry zeros.
  pub fn for_step(a: &Matrix, w: &Matrix, t: usize) -> Self {
    if t < FEED_STEPS {
      Self {
        act: a.column(t),
        weight: w.row(t),
        clear: t == 0,
      }
    } else {
      Self::default()
    }
  }
}

// ===========================================
// Skew stage
// ===========================================

/// Delay line bank: lane i leaves i edges after it entered.
#[derive(Debug, Clone, Default)]
pub struct SkewBuffer {
  history: VecDeque<[u16; DIM]>,
}

impl SkewBuffer {
  pub fn new() -> Self {
    Self {
      history: VecDeque::with_capacity(DIM),
    }
  }

  pub fn push(&mut self, lanes: [u16; DIM]) -> [u16; DIM] {
    self.history.push_front(lanes);
    self.history.truncate(DIM);
    let mut out = [FP16_ZERO; DIM];
    for (lane, v) in out.iter_mut().enumerate() {
      *v = self.history.get(lane).map_or(FP16_ZERO, |past| past[lane]);
    }
    out
  }

  pub fn flush(&mut self) {
    self.history.clear();
  }
}

// ===========================================
// Systolic Array Main Module
// ===========================================

/// Grid of 64 MAC units. Unit (r, c) accumulates Result[r][c].
#[derive(Debug, Clone)]
pub struct SystolicArray {
  cells: [[MacUnit; DIM]; DIM],
  act_skew: SkewBuffer,
  weight_skew: SkewBuffer,
  config: ApproxConfig,
  cycle_count: usize,
}

impl SystolicArray {
  pub fn new(config: ApproxConfig) -> Self {
    Self {
      cells: [[MacUnit::new(); DIM]; DIM],
      act_skew: SkewBuffer::new(),
      weight_skew: SkewBuffer::new(),
      config,
      cycle_count: 0,
    }
  }

  /// Drive the edges directly, without skew. An invalid wire disables every unit.
  ///
  /// All units read the pre-edge snapshot, so no unit sees a neighbor's
  /// post-edge forward registers within the same edge.
  pub fn tick(&mut self, edge: &Wire<EdgeFeed>) {
    let snapshot = self.cells;
    for row in 0..DIM {
      for col in 0..DIM {
        let a = if col == 0 {
          edge.value.act[row]
        } else {
          snapshot[row][col - 1].forward_a()
        };
        let w = if row == 0 {
          edge.value.weight[col]
        } else {
          snapshot[row - 1][col].forward_w()
        };
        let input = MacInput {
          a,
          w,
          clear: edge.value.clear,
          enabled: edge.valid,
        };
        self.cells[row][col] = snapshot[row][col].next(&input, &self.config);
      }
    }
    if edge.valid {
      self.cycle_count += 1;
    }
  }

  /// Drive the edges through the skew stage: row r and column c are
  /// delayed r and c edges so matching k-indices meet in every unit.
  pub fn feed(&mut self, edge: &Wire<EdgeFeed>) {
    if !edge.valid {
      self.tick(edge);
      return;
    }
    let skewed = EdgeFeed {
      act: self.act_skew.push(edge.value.act),
      weight: self.weight_skew.push(edge.value.weight),
      clear: edge.value.clear,
    };
    self.tick(&Wire {
      value: skewed,
      valid: true,
    });
  }

  /// Empty the skew stage and every forward register ahead of a new pass
  pub fn flush(&mut self) {
    self.act_skew.flush();
    self.weight_skew.flush();
    for cell in self.cells.iter_mut().flatten() {
      cell.flush();
    }
    self.cycle_count = 0;
  }

  /// Run a complete pass and return the accumulators
  pub fn multiply(&mut self, a: &Matrix, w: &Matrix) -> Matrix {
    self.flush();
    for t in 0..PASS_STEPS {
      let mut edge = Wire::default();
      edge.set(EdgeFeed::for_step(a, w, t));
      self.feed(&edge);
    }
    self.results()
  }

  pub fn result(&self, row: usize, col: usize) -> u16 {
    self.cells[row][col].result()
  }

  pub fn results(&self) -> Matrix {
    Matrix::from_fn(|row, col| self.result(row, col))
  }

  pub fn config(&self) -> &ApproxConfig {
    &self.config
  }

  /// Enabled edges since the last flush
  pub fn cycle_count(&self) -> usize {
    self.cycle_count
  }

  pub fn reset(&mut self) {
    for cell in self.cells.iter_mut().flatten() {
      cell.reset();
    }
    self.act_skew.flush();
    self.weight_skew.flush();
    self.cycle_count = 0;
  }
}
