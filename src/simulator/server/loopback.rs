use std::io::{self, Read, Write};

use crate::arch::tpu::top::Top;
use crate::builtin::Module;

/// In-memory host link: every byte written clocks the accelerator once.
///
/// Reads return whatever the core has queued and `Ok(0)` when nothing is
/// pending, the same as a peer that has gone quiet.
pub struct LoopbackLink {
  top: Top,
  /// Extra clock edges after each host byte, modelling a slower host
  idle_cycles: usize,
}

impl LoopbackLink {
  pub fn new(top: Top) -> Self {
    Self { top, idle_cycles: 0 }
  }

  pub fn with_idle_cycles(mut self, idle_cycles: usize) -> Self {
    self.idle_cycles = idle_cycles;
    self
  }

  pub fn top(&self) -> &Top {
    &self.top
  }
}

impl Write for LoopbackLink {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    for &byte in buf {
      self.top.push_byte(byte);
      for _ in 0..self.idle_cycles {
        self.top.tick();
      }
    }
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

impl Read for LoopbackLink {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    let mut n = 0;
    while n < buf.len() {
      match self.top.pop_output() {
        Some(byte) => {
          buf[n] = byte;
          n += 1;
        }
        None => break,
      }
    }
    Ok(n)
  }
}
