//! Host side of the command/response protocol.
//!
//! One command at a time: the driver sends a command byte, waits for the
//! response byte, and only then moves any payload.

use log::debug;
use std::io::{Read, Write};

use crate::arch::tpu::controller::Status;
use crate::arch::tpu::matrix::{Matrix, MATRIX_BYTES};
use crate::arch::tpu::protocol::*;
use crate::error::{Result, TpuError};

/// Status polls `matmul` allows before giving up
pub const DEFAULT_MAX_POLLS: usize = 10_000;

pub struct TpuDriver<L: Read + Write> {
  link: L,
}

impl<L: Read + Write> TpuDriver<L> {
  pub fn new(link: L) -> Self {
    Self { link }
  }

  pub fn link(&self) -> &L {
    &self.link
  }

  pub fn link_mut(&mut self) -> &mut L {
    &mut self.link
  }

  /// Send any byte and return the raw response byte
  pub fn send_raw(&mut self, byte: u8) -> Result<u8> {
    self.link.write_all(&[byte])?;
    self.link.flush()?;
    let mut resp = [0u8; 1];
    self.read_bytes(&mut resp)?;
    debug!("sent {:#04x}, got {:#04x}", byte, resp[0]);
    Ok(resp[0])
  }

  fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
    let mut got = 0;
    while got < buf.len() {
      match self.link.read(&mut buf[got..]) {
        Ok(0) => {
          return Err(TpuError::ShortRead {
            expected: buf.len(),
            got,
          })
        }
        Ok(n) => got += n,
        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
        Err(e) => return Err(e.into()),
      }
    }
    Ok(())
  }

  fn command(&mut self, command: u8, accept: &[Response]) -> Result<Response> {
    let byte = self.send_raw(command)?;
    match Response::from_byte(byte) {
      Some(resp) if accept.contains(&resp) => Ok(resp),
      _ => Err(TpuError::UnexpectedResponse { command, response: byte }),
    }
  }

  fn write_matrix(&mut self, command: u8, matrix: &Matrix) -> Result<()> {
    self.command(command, &[Response::Ack])?;
    self.link.write_all(&matrix.to_le_bytes())?;
    self.link.flush()?;
    Ok(())
  }

  fn read_matrix(&mut self, command: u8) -> Result<Matrix> {
    self.command(command, &[Response::Ack])?;
    let mut bytes = [0u8; MATRIX_BYTES];
    self.read_bytes(&mut bytes)?;
    Ok(Matrix::from_le_bytes(&bytes))
  }

  pub fn write_activation(&mut self, matrix: &Matrix) -> Result<()> {
    self.write_matrix(CMD_WRITE_ACTIVATION, matrix)
  }

  pub fn write_weight(&mut self, matrix: &Matrix) -> Result<()> {
    self.write_matrix(CMD_WRITE_WEIGHT, matrix)
  }

  pub fn read_activation(&mut self) -> Result<Matrix> {
    self.read_matrix(CMD_READ_ACTIVATION)
  }

  pub fn read_weight(&mut self) -> Result<Matrix> {
    self.read_matrix(CMD_READ_WEIGHT)
  }

  pub fn read_result(&mut self) -> Result<Matrix> {
    self.read_matrix(CMD_READ_RESULT)
  }

  /// `Ack` when the pass was launched, `Done` when the core ran it synchronously
  pub fn start(&mut self) -> Result<Response> {
    self.command(CMD_START, &[Response::Ack, Response::Done])
  }

  pub fn status(&mut self) -> Result<Status> {
    self.command(CMD_GET_STATUS, &[Response::Ack])?;
    let mut bytes = [0u8; Status::SIZE];
    self.read_bytes(&mut bytes)?;
    Ok(Status::from_bytes(&bytes))
  }

  pub fn reset(&mut self) -> Result<()> {
    self.command(CMD_RESET, &[Response::Ack])?;
    Ok(())
  }

  /// Poll status until the done bit is set
  pub fn wait_for_completion(&mut self, max_polls: usize) -> Result<Status> {
    for _ in 0..max_polls {
      let status = self.status()?;
      if status.done {
        return Ok(status);
      }
    }
    Err(TpuError::Timeout { polls: max_polls })
  }

  /// Load both operands, run one pass and fetch the result
  pub fn matmul(&mut self, activation: &Matrix, weight: &Matrix) -> Result<Matrix> {
    self.write_activation(activation)?;
    self.write_weight(weight)?;
    if self.start()? == Response::Ack {
      let status = self.wait_for_completion(DEFAULT_MAX_POLLS)?;
      debug!("pass finished in {} cycles", status.cycles);
    }
    self.read_result()
  }
}
