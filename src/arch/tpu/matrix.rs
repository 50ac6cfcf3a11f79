//! 8x8 row-major FP16 matrix buffer

use half::f16;

use super::fp16::{fp16_value, FP16_ONE, FP16_ZERO};

/// Edge length of every matrix the accelerator handles
pub const DIM: usize = 8;
/// Elements per matrix
pub const ELEMENTS: usize = DIM * DIM;
/// Bytes in the wire image of a matrix (two per element)
pub const MATRIX_BYTES: usize = ELEMENTS * 2;

/// Matrix of raw FP16 patterns, element (row, col) at index `row * 8 + col`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Matrix {
  data: [u16; ELEMENTS],
}

impl Matrix {
  pub fn zeros() -> Self {
    Self::filled(FP16_ZERO)
  }

  pub fn filled(bits: u16) -> Self {
    Self { data: [bits; ELEMENTS] }
  }

  /// Ones on the diagonal, zeros elsewhere
  pub fn identity() -> Self {
    let mut m = Self::zeros();
    for i in 0..DIM {
      m.set(i, i, FP16_ONE);
    }
    m
  }

  pub fn from_fn(mut f: impl FnMut(usize, usize) -> u16) -> Self {
    let mut m = Self::zeros();
    for row in 0..DIM {
      for col in 0..DIM {
        m.set(row, col, f(row, col));
      }
    }
    m
  }

  /// Round each value to the nearest FP16
  pub fn from_f32(values: &[[f32; DIM]; DIM]) -> Self {
    Self::from_fn(|row, col| f16::from_f32(values[row][col]).to_bits())
  }

  pub fn to_f32(&self) -> [[f32; DIM]; DIM] {
    let mut out = [[0.0; DIM]; DIM];
    for (row, line) in out.iter_mut().enumerate() {
      for (col, v) in line.iter_mut().enumerate() {
        *v = fp16_value(self.get(row, col)) as f32;
      }
    }
    out
  }

  pub fn get(&self, row: usize, col: usize) -> u16 {
    self.data[row * DIM + col]
  }

  pub fn set(&mut self, row: usize, col: usize, bits: u16) {
    self.data[row * DIM + col] = bits;
  }

  /// Element by linear address 0..64
  pub fn element(&self, addr: usize) -> u16 {
    self.data[addr]
  }

  pub fn set_element(&mut self, addr: usize, bits: u16) {
    self.data[addr] = bits;
  }

  /// Column `col` as a vector indexed by row
  pub fn column(&self, col: usize) -> [u16; DIM] {
    let mut out = [0; DIM];
    for (row, v) in out.iter_mut().enumerate() {
      *v = self.get(row, col);
    }
    out
  }

  /// Row `row` as a vector indexed by column
  pub fn row(&self, row: usize) -> [u16; DIM] {
    let mut out = [0; DIM];
    out.copy_from_slice(&self.data[row * DIM..(row + 1) * DIM]);
    out
  }

  /// Wire image: 64 little-endian elements in row-major order
  pub fn to_le_bytes(&self) -> [u8; MATRIX_BYTES] {
    let mut out = [0u8; MATRIX_BYTES];
    for (chunk, bits) in out.chunks_exact_mut(2).zip(self.data.iter()) {
      chunk.copy_from_slice(&bits.to_le_bytes());
    }
    out
  }

  pub fn from_le_bytes(bytes: &[u8; MATRIX_BYTES]) -> Self {
    let mut m = Self::zeros();
    for (addr, chunk) in bytes.chunks_exact(2).enumerate() {
      m.data[addr] = u16::from_le_bytes([chunk[0], chunk[1]]);
    }
    m
  }

  /// Exact product of the decoded values, for judging approximation error
  pub fn reference_product(a: &Matrix, w: &Matrix) -> [[f64; DIM]; DIM] {
    let mut out = [[0.0; DIM]; DIM];
    for (row, line) in out.iter_mut().enumerate() {
      for (col, v) in line.iter_mut().enumerate() {
        *v = (0..DIM)
          .map(|k| fp16_value(a.get(row, k)) * fp16_value(w.get(k, col)))
          .sum();
      }
    }
    out
  }
}

impl Default for Matrix {
  fn default() -> Self {
    Self::zeros()
  }
}
