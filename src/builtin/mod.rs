pub mod port;

pub use port::{Module, Wire};
