pub mod driver;

pub use driver::TpuDriver;
