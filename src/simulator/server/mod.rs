pub mod loopback;
pub mod socket;

pub use loopback::LoopbackLink;
pub use socket::SocketServer;
