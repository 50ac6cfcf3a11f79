pub mod server;

pub use server::SocketServer;
