use log::info;

use super::controller::Controller;
use super::fp16::ApproxConfig;
use super::protocol::{ProtocolHandler, Transaction};
use crate::builtin::{Module, Wire};

/// Accelerator top level: host link -> protocol handler -> controller -> array
pub struct Top {
  name: String,
  handler: ProtocolHandler,
  controller: Controller,
  /// Byte arriving from the host this cycle
  rx: Wire<u8>,
}

impl Top {
  pub fn new(name: impl Into<String>, config: ApproxConfig, sync_start: bool) -> Self {
    let name = name.into();
    info!("[{}] approx mul_bits={} add_shift={}", name, config.mul_bits, config.add_shift);
    Self {
      controller: Controller::new(format!("{}.controller", name), config),
      handler: ProtocolHandler::new(sync_start),
      rx: Wire::default(),
      name,
    }
  }

  /// Present one host byte; it is consumed on the next tick
  pub fn send(&mut self, byte: u8) {
    self.rx.set(byte);
  }

  /// Present a byte and clock once
  pub fn push_byte(&mut self, byte: u8) {
    self.send(byte);
    self.tick();
  }

  pub fn pop_output(&mut self) -> Option<u8> {
    self.handler.pop_output()
  }

  pub fn take_output(&mut self) -> Vec<u8> {
    self.handler.drain_output()
  }

  pub fn has_output(&self) -> bool {
    self.handler.has_output()
  }

  pub fn is_busy(&self) -> bool {
    self.controller.is_busy()
  }

  pub fn controller(&self) -> &Controller {
    &self.controller
  }

  pub fn handler(&self) -> &ProtocolHandler {
    &self.handler
  }

  pub fn take_transactions(&mut self) -> Vec<Transaction> {
    self.handler.take_transactions()
  }

  pub fn cycle(&self) -> u64 {
    self.controller.cycle()
  }
}

impl Module for Top {
  /// Controller and array advance first, then the handler sees the new state
  fn tick(&mut self) {
    self.controller.tick();
    if self.rx.valid {
      let byte = self.rx.value;
      self.rx.clear();
      self.handler.on_byte(byte, &mut self.controller);
    }
  }

  fn reset(&mut self) {
    self.rx.clear();
    self.handler.reset();
    self.controller.reset();
  }

  fn name(&self) -> &str {
    &self.name
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::tpu::fp16::FP16_ONE;
  use crate::arch::tpu::matrix::Matrix;
  use crate::arch::tpu::protocol::*;
  use crate::arch::tpu::systolic_array::PASS_STEPS;

  fn exchange(top: &mut Top, bytes: &[u8]) -> Vec<u8> {
    for &b in bytes {
      top.push_byte(b);
    }
    top.take_output()
  }

  #[test]
  fn test_end_to_end_ones() {
    let mut top = Top::new("tpu", ApproxConfig::default(), false);
    let ones = Matrix::filled(FP16_ONE);
    assert_eq!(exchange(&mut top, &write_request(CMD_WRITE_ACTIVATION, &ones)), [RESP_ACK]);
    assert_eq!(exchange(&mut top, &write_request(CMD_WRITE_WEIGHT, &ones)), [RESP_ACK]);
    assert_eq!(exchange(&mut top, &[CMD_START]), [RESP_ACK]);

    let mut polls = 0;
    loop {
      let reply = exchange(&mut top, &[CMD_GET_STATUS]);
      polls += 1;
      if reply[1] & 0x02 != 0 {
        break;
      }
      assert!(polls <= PASS_STEPS, "pass did not finish");
    }

    let reply = exchange(&mut top, &[CMD_READ_RESULT]);
    assert_eq!(reply[0], RESP_ACK);
    let result = Matrix::from_le_bytes(reply[1..].try_into().unwrap());
    assert_eq!(result, Matrix::filled(0x4800));
  }

  #[test]
  fn test_idle_ticks_between_bytes() {
    let mut top = Top::new("tpu", ApproxConfig::default(), false);
    top.send(CMD_GET_STATUS);
    assert!(!top.has_output());
    top.tick();
    top.tick();
    assert_eq!(top.take_output(), [RESP_ACK, 0, 0, 0, 0]);
    assert_eq!(top.cycle(), 2);
  }

  #[test]
  fn test_reset_module() {
    let mut top = Top::new("tpu", ApproxConfig::default(), false);
    exchange(&mut top, &[CMD_START]);
    assert!(top.is_busy());
    top.reset();
    assert!(!top.is_busy());
    assert!(!top.has_output());
    assert_eq!(top.name(), "tpu");
  }

  #[test]
  fn test_reset_abandons_partial_write() {
    let mut top = Top::new("tpu", ApproxConfig::default(), false);
    assert_eq!(exchange(&mut top, &[CMD_WRITE_ACTIVATION, 0x12]), [RESP_ACK]);
    assert!(!top.handler().awaiting_command());

    top.reset();
    assert!(top.handler().awaiting_command());
    assert!(top.take_transactions().is_empty());

    // the next byte is decoded as a command, not swallowed as payload
    assert_eq!(exchange(&mut top, &[CMD_GET_STATUS]), [RESP_ACK, 0, 0, 0, 0]);
    assert_eq!(top.controller().activation().element(0), 0);
  }
}
