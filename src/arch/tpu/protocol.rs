/// Protocol Handler - byte-level command decoder facing the host link
use std::collections::VecDeque;

use log::{debug, warn};
use serde::Serialize;

use super::controller::{Controller, Status};
use super::matrix::{Matrix, ELEMENTS, MATRIX_BYTES};
use crate::builtin::Module;

// Command bytes
pub const CMD_WRITE_ACTIVATION: u8 = 0x01;
pub const CMD_WRITE_WEIGHT: u8 = 0x02;
pub const CMD_READ_RESULT: u8 = 0x03;
pub const CMD_START: u8 = 0x04;
pub const CMD_GET_STATUS: u8 = 0x05;
pub const CMD_RESET: u8 = 0x06;
pub const CMD_READ_ACTIVATION: u8 = 0x07;
pub const CMD_READ_WEIGHT: u8 = 0x08;

// Response bytes
pub const RESP_ACK: u8 = 0xAA;
pub const RESP_NACK: u8 = 0x55;
pub const RESP_BUSY: u8 = 0xBB;
pub const RESP_DONE: u8 = 0xDD;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Command {
  WriteActivation,
  WriteWeight,
  ReadResult,
  Start,
  GetStatus,
  Reset,
  ReadActivation,
  ReadWeight,
}

impl Command {
  pub fn from_byte(byte: u8) -> Option<Self> {
    match byte {
      CMD_WRITE_ACTIVATION => Some(Self::WriteActivation),
      CMD_WRITE_WEIGHT => Some(Self::WriteWeight),
      CMD_READ_RESULT => Some(Self::ReadResult),
      CMD_START => Some(Self::Start),
      CMD_GET_STATUS => Some(Self::GetStatus),
      CMD_RESET => Some(Self::Reset),
      CMD_READ_ACTIVATION => Some(Self::ReadActivation),
      CMD_READ_WEIGHT => Some(Self::ReadWeight),
      _ => None,
    }
  }

  pub fn code(self) -> u8 {
    match self {
      Self::WriteActivation => CMD_WRITE_ACTIVATION,
      Self::WriteWeight => CMD_WRITE_WEIGHT,
      Self::ReadResult => CMD_READ_RESULT,
      Self::Start => CMD_START,
      Self::GetStatus => CMD_GET_STATUS,
      Self::Reset => CMD_RESET,
      Self::ReadActivation => CMD_READ_ACTIVATION,
      Self::ReadWeight => CMD_READ_WEIGHT,
    }
  }

  /// Bytes following an ACK, in either direction
  pub fn payload_len(self) -> usize {
    match self {
      Self::WriteActivation | Self::WriteWeight => MATRIX_BYTES,
      Self::ReadResult | Self::ReadActivation | Self::ReadWeight => MATRIX_BYTES,
      Self::GetStatus => Status::SIZE,
      Self::Start | Self::Reset => 0,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Response {
  Ack,
  Nack,
  Busy,
  Done,
}

impl Response {
  pub fn byte(self) -> u8 {
    match self {
      Self::Ack => RESP_ACK,
      Self::Nack => RESP_NACK,
      Self::Busy => RESP_BUSY,
      Self::Done => RESP_DONE,
    }
  }

  pub fn from_byte(byte: u8) -> Option<Self> {
    match byte {
      RESP_ACK => Some(Self::Ack),
      RESP_NACK => Some(Self::Nack),
      RESP_BUSY => Some(Self::Busy),
      RESP_DONE => Some(Self::Done),
      _ => None,
    }
  }
}

/// Buffer a write payload lands in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteTarget {
  Activation,
  Weight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Session {
  AwaitCommand,
  /// Streaming a write payload; `low` holds the first byte of a half-received element
  Receiving {
    target: WriteTarget,
    addr: usize,
    low: Option<u8>,
  },
}

/// One finished host command, as written to the trace file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transaction {
  pub cycle: u64,
  /// Raw command byte, including unrecognized ones
  pub command: u8,
  pub response: u8,
  pub payload_len: usize,
}

/// Decodes one host byte per call and queues the reply bytes.
///
/// Write payloads are committed element by element: an element reaches its
/// buffer only once its high byte has arrived, so a host that stops half way
/// leaves every other address untouched.
pub struct ProtocolHandler {
  session: Session,
  tx: VecDeque<u8>,
  sync_start: bool,
  transactions: Vec<Transaction>,
}

impl ProtocolHandler {
  pub fn new(sync_start: bool) -> Self {
    Self {
      session: Session::AwaitCommand,
      tx: VecDeque::new(),
      sync_start,
      transactions: Vec::new(),
    }
  }

  pub fn on_byte(&mut self, byte: u8, ctrl: &mut Controller) {
    match self.session {
      Session::AwaitCommand => self.on_command(byte, ctrl),
      Session::Receiving { target, addr, low: None } => {
        self.session = Session::Receiving {
          target,
          addr,
          low: Some(byte),
        };
      }
      Session::Receiving {
        target,
        addr,
        low: Some(low),
      } => self.on_element(target, addr, u16::from_le_bytes([low, byte]), ctrl),
    }
  }

  fn on_element(&mut self, target: WriteTarget, addr: usize, bits: u16, ctrl: &mut Controller) {
    // the write was admitted in Idle/Done and no start can interleave with a payload
    let committed = match target {
      WriteTarget::Activation => ctrl.write_activation(addr, bits),
      WriteTarget::Weight => ctrl.write_weight(addr, bits),
    };
    if let Err(e) = committed {
      warn!("element {} of {:?} dropped: {}", addr, target, e);
    }

    if addr + 1 == ELEMENTS {
      self.session = Session::AwaitCommand;
      let command = match target {
        WriteTarget::Activation => CMD_WRITE_ACTIVATION,
        WriteTarget::Weight => CMD_WRITE_WEIGHT,
      };
      self.log_transaction(ctrl, command, RESP_ACK, MATRIX_BYTES);
    } else {
      self.session = Session::Receiving {
        target,
        addr: addr + 1,
        low: None,
      };
    }
  }

  fn on_command(&mut self, byte: u8, ctrl: &mut Controller) {
    let Some(command) = Command::from_byte(byte) else {
      debug!("unknown command byte {:#04x}", byte);
      ctrl.flag_error();
      self.reply(ctrl, byte, Response::Nack, &[]);
      return;
    };
    debug!("command {:?} in phase {:?}", command, ctrl.phase());

    match command {
      Command::WriteActivation | Command::WriteWeight => {
        if !ctrl.buffers_writable() {
          self.reply(ctrl, byte, Response::Busy, &[]);
          return;
        }
        self.tx.push_back(RESP_ACK);
        let target = if command == Command::WriteActivation {
          WriteTarget::Activation
        } else {
          WriteTarget::Weight
        };
        self.session = Session::Receiving {
          target,
          addr: 0,
          low: None,
        };
      }
      Command::ReadResult => {
        if ctrl.is_busy() {
          self.reply(ctrl, byte, Response::Busy, &[]);
        } else {
          let payload = ctrl.result().to_le_bytes();
          self.reply(ctrl, byte, Response::Ack, &payload);
        }
      }
      Command::ReadActivation => {
        let payload = ctrl.activation().to_le_bytes();
        self.reply(ctrl, byte, Response::Ack, &payload);
      }
      Command::ReadWeight => {
        let payload = ctrl.weight().to_le_bytes();
        self.reply(ctrl, byte, Response::Ack, &payload);
      }
      Command::Start => match ctrl.start() {
        Err(_) => self.reply(ctrl, byte, Response::Busy, &[]),
        Ok(()) if self.sync_start => {
          ctrl.run_to_completion();
          self.reply(ctrl, byte, Response::Done, &[]);
        }
        Ok(()) => self.reply(ctrl, byte, Response::Ack, &[]),
      }
      Command::GetStatus => {
        let payload = ctrl.status().to_bytes();
        self.reply(ctrl, byte, Response::Ack, &payload);
      }
      Command::Reset => {
        ctrl.reset();
        self.reply(ctrl, byte, Response::Ack, &[]);
      }
    }
  }

  fn reply(&mut self, ctrl: &Controller, command: u8, response: Response, payload: &[u8]) {
    self.tx.push_back(response.byte());
    self.tx.extend(payload.iter().copied());
    self.log_transaction(ctrl, command, response.byte(), payload.len());
  }

  fn log_transaction(&mut self, ctrl: &Controller, command: u8, response: u8, payload_len: usize) {
    self.transactions.push(Transaction {
      cycle: ctrl.cycle(),
      command,
      response,
      payload_len,
    });
  }

  /// Next byte bound for the host, if any
  pub fn pop_output(&mut self) -> Option<u8> {
    self.tx.pop_front()
  }

  pub fn drain_output(&mut self) -> Vec<u8> {
    self.tx.drain(..).collect()
  }

  pub fn has_output(&self) -> bool {
    !self.tx.is_empty()
  }

  /// True between commands; false while a write payload is still arriving
  pub fn awaiting_command(&self) -> bool {
    self.session == Session::AwaitCommand
  }

  /// Completed transactions not yet collected
  pub fn take_transactions(&mut self) -> Vec<Transaction> {
    std::mem::take(&mut self.transactions)
  }

  /// Back to awaiting a command; a half-received payload is abandoned
  pub fn reset(&mut self) {
    self.session = Session::AwaitCommand;
    self.tx.clear();
    self.transactions.clear();
  }
}

impl Default for ProtocolHandler {
  fn default() -> Self {
    Self::new(false)
  }
}

/// Bytes a host sends to load `matrix` with `command`
pub fn write_request(command: u8, matrix: &Matrix) -> Vec<u8> {
  let mut bytes = Vec::with_capacity(1 + MATRIX_BYTES);
  bytes.push(command);
  bytes.extend_from_slice(&matrix.to_le_bytes());
  bytes
}
