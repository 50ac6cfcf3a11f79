/// Controller - sequences a pass through the systolic array and owns the three buffers
use log::{debug, info};
use serde::Serialize;

use super::fp16::ApproxConfig;
use super::matrix::{Matrix, DIM};
use super::systolic_array::{EdgeFeed, SystolicArray, DRAIN_STEPS, FEED_STEPS};
use crate::builtin::{Module, Wire};
use crate::error::{Result, TpuError};

/// Multiply-accumulates in one 8x8x8 pass
pub const MACS_PER_PASS: u64 = (DIM * DIM * DIM) as u64;

const STATUS_BUSY: u8 = 0x01;
const STATUS_DONE: u8 = 0x02;
const STATUS_ERROR: u8 = 0x04;
/// The cycle field of the status payload is 24 bits wide
const CYCLE_FIELD_MAX: u32 = 0x00FF_FFFF;
/// Oldest records are dropped past this many
pub const MAX_RECORDS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
  Idle,
  Computing,
  Draining,
  Done,
}

/// Snapshot reported by the Get-status command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Status {
  pub busy: bool,
  pub done: bool,
  pub error: bool,
  /// Edges spent by the current or last pass
  pub cycles: u32,
}

impl Status {
  pub const SIZE: usize = 4;

  /// `{flags, cycles[7:0], cycles[15:8], cycles[23:16]}`
  pub fn to_bytes(&self) -> [u8; Self::SIZE] {
    let mut flags = 0;
    if self.busy {
      flags |= STATUS_BUSY;
    }
    if self.done {
      flags |= STATUS_DONE;
    }
    if self.error {
      flags |= STATUS_ERROR;
    }
    let cycles = self.cycles.min(CYCLE_FIELD_MAX).to_le_bytes();
    [flags, cycles[0], cycles[1], cycles[2]]
  }

  pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
    Self {
      busy: bytes[0] & STATUS_BUSY != 0,
      done: bytes[0] & STATUS_DONE != 0,
      error: bytes[0] & STATUS_ERROR != 0,
      cycles: u32::from_le_bytes([bytes[1], bytes[2], bytes[3], 0]),
    }
  }
}

/// One entry of the controller's activity log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassRecord {
  pub cycle: u64,
  pub action: String,
  pub subject: String,
}

/// Controller
///
/// `Idle -> Computing -> Draining -> Done`, `Idle | Done -> Computing` on start,
/// any phase `-> Idle` on reset. Buffers accept writes only in Idle or Done.
pub struct Controller {
  name: String,
  phase: Phase,
  step: usize,
  done: bool,
  error: bool,

  activation: Matrix,
  weight: Matrix,
  result: Matrix,

  array: SystolicArray,
  // edge signals driven into the array this cycle
  edge: Wire<EdgeFeed>,

  cycle: u64,
  pass_cycles: u32,
  passes: u64,
  records: Vec<PassRecord>,
}

impl Controller {
  pub fn new(name: impl Into<String>, config: ApproxConfig) -> Self {
    Self {
      name: name.into(),
      phase: Phase::Idle,
      step: 0,
      done: false,
      error: false,
      activation: Matrix::zeros(),
      weight: Matrix::zeros(),
      result: Matrix::zeros(),
      array: SystolicArray::new(config),
      edge: Wire::default(),
      cycle: 0,
      pass_cycles: 0,
      passes: 0,
      records: Vec::new(),
    }
  }

  fn record(&mut self, action: &str, subject: impl Into<String>) {
    if self.records.len() >= MAX_RECORDS {
      let excess = self.records.len() + 1 - MAX_RECORDS;
      self.records.drain(..excess);
    }
    self.records.push(PassRecord {
      cycle: self.cycle,
      action: action.to_string(),
      subject: subject.into(),
    });
  }

  /// Begin a pass over the current Activation and Weight buffers
  pub fn start(&mut self) -> Result<()> {
    match self.phase {
      Phase::Computing | Phase::Draining => {
        let phase = self.phase;
        self.record("start_rejected", format!("{:?} step {}", phase, self.step));
        Err(TpuError::Busy { phase })
      }
      Phase::Idle | Phase::Done => {
        self.array.flush();
        self.phase = Phase::Computing;
        self.step = 0;
        self.done = false;
        self.pass_cycles = 0;
        self.record("start", format!("pass {}", self.passes + 1));
        debug!("[{}] pass {} started at cycle {}", self.name, self.passes + 1, self.cycle);
        Ok(())
      }
    }
  }

  /// Clock until the in-flight pass settles; returns the edges spent
  pub fn run_to_completion(&mut self) -> usize {
    let mut edges = 0;
    while self.is_busy() {
      self.tick();
      edges += 1;
    }
    edges
  }

  pub fn phase(&self) -> Phase {
    self.phase
  }

  pub fn is_busy(&self) -> bool {
    matches!(self.phase, Phase::Computing | Phase::Draining)
  }

  /// Buffers may only change while no pass is reading them
  pub fn buffers_writable(&self) -> bool {
    !self.is_busy()
  }

  fn check_writable(&self) -> Result<()> {
    if self.buffers_writable() {
      Ok(())
    } else {
      Err(TpuError::Busy { phase: self.phase })
    }
  }

  pub fn write_activation(&mut self, addr: usize, bits: u16) -> Result<()> {
    self.check_writable()?;
    self.activation.set_element(addr, bits);
    Ok(())
  }

  pub fn write_weight(&mut self, addr: usize, bits: u16) -> Result<()> {
    self.check_writable()?;
    self.weight.set_element(addr, bits);
    Ok(())
  }

  pub fn load_activation(&mut self, matrix: &Matrix) -> Result<()> {
    self.check_writable()?;
    self.activation = *matrix;
    Ok(())
  }

  pub fn load_weight(&mut self, matrix: &Matrix) -> Result<()> {
    self.check_writable()?;
    self.weight = *matrix;
    Ok(())
  }

  pub fn activation(&self) -> &Matrix {
    &self.activation
  }

  pub fn weight(&self) -> &Matrix {
    &self.weight
  }

  /// Result of the last completed pass
  pub fn result(&self) -> &Matrix {
    &self.result
  }

  /// Latch the sticky error flag reported in status
  pub fn flag_error(&mut self) {
    self.error = true;
  }

  pub fn status(&self) -> Status {
    Status {
      busy: self.is_busy(),
      done: self.done,
      error: self.error,
      cycles: self.pass_cycles,
    }
  }

  pub fn cycle(&self) -> u64 {
    self.cycle
  }

  pub fn passes(&self) -> u64 {
    self.passes
  }

  pub fn mac_operations(&self) -> u64 {
    self.passes * MACS_PER_PASS
  }

  pub fn records(&self) -> &[PassRecord] {
    &self.records
  }

  pub fn config(&self) -> &ApproxConfig {
    self.array.config()
  }
}

impl Module for Controller {
  fn tick(&mut self) {
    self.cycle += 1;

    match self.phase {
      Phase::Idle | Phase::Done => {
        self.edge.clear();
        return;
      }
      Phase::Computing => {
        self.edge.set(EdgeFeed::for_step(&self.activation, &self.weight, self.step));
      }
      Phase::Draining => {
        self.edge.set(EdgeFeed::default());
      }
    }

    self.array.feed(&self.edge);
    self.step += 1;
    self.pass_cycles += 1;

    if self.phase == Phase::Computing && self.step == FEED_STEPS {
      self.phase = Phase::Draining;
      self.step = 0;
      self.record("drain", format!("{} slices fed", FEED_STEPS));
    } else if self.phase == Phase::Draining && self.step == DRAIN_STEPS {
      self.result = self.array.results();
      self.phase = Phase::Done;
      self.step = 0;
      self.done = true;
      self.passes += 1;
      self.record("done", format!("pass {} in {} cycles", self.passes, self.pass_cycles));
      info!("[{}] pass {} done in {} cycles", self.name, self.passes, self.pass_cycles);
    }
  }

  fn reset(&mut self) {
    self.phase = Phase::Idle;
    self.step = 0;
    self.done = false;
    self.error = false;
    self.pass_cycles = 0;
    self.edge.clear();
    self.array.reset();
    self.record("reset", "controller idle");
    debug!("[{}] reset at cycle {}", self.name, self.cycle);
  }

  fn name(&self) -> &str {
    &self.name
  }
}
