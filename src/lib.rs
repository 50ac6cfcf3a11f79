pub mod arch;
pub mod builtin;
pub mod error;
pub mod simulator;

pub use arch::tpu::{ApproxConfig, Matrix, Top};
pub use error::{Result, TpuError};
pub use simulator::sim::mode::{SimConfig, StepMode};
