pub mod controller;
pub mod fp16;
pub mod mac;
pub mod matrix;
pub mod protocol;
pub mod systolic_array;
pub mod top;

pub use controller::{Controller, Phase, Status};
pub use fp16::{approx_add, approx_mul, ApproxConfig};
pub use matrix::{Matrix, DIM};
pub use protocol::{Command, ProtocolHandler, Response};
pub use systolic_array::SystolicArray;
pub use top::Top;
