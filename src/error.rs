//! Error types for the accelerator model, its configuration and the host link

use thiserror::Error;

use crate::arch::tpu::controller::Phase;

/// Result type alias for accelerator operations
pub type Result<T> = std::result::Result<T, TpuError>;

/// Errors surfaced by the controller, the configuration layer and the host driver.
///
/// Arithmetic never fails; approximation error is not an error condition.
#[derive(Debug, Error)]
pub enum TpuError {
  /// A pass is in flight and the request needs Idle or Done
  #[error("accelerator busy ({phase:?})")]
  Busy {
    /// Phase the controller was in when the request arrived
    phase: Phase,
  },

  /// Configuration value out of range
  #[error("invalid configuration: {reason}")]
  InvalidConfig {
    /// What was wrong
    reason: String,
  },

  /// Layered configuration could not be built or deserialized
  #[error("configuration error: {0}")]
  Config(#[from] config::ConfigError),

  /// Transport failure
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  /// The core answered a command with something other than what the host expected
  #[error("command 0x{command:02X} answered with 0x{response:02X}")]
  UnexpectedResponse {
    /// Command byte sent
    command: u8,
    /// Response byte received
    response: u8,
  },

  /// Polling for completion gave up
  #[error("pass did not complete after {polls} status polls")]
  Timeout {
    /// Number of status polls issued
    polls: usize,
  },

  /// Link closed in the middle of a payload
  #[error("short read: expected {expected} bytes, got {got}")]
  ShortRead {
    /// Bytes expected
    expected: usize,
    /// Bytes received before the link closed
    got: usize,
  },
}

impl TpuError {
  pub fn invalid_config(reason: impl Into<String>) -> Self {
    Self::InvalidConfig { reason: reason.into() }
  }
}
