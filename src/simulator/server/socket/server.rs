use log::info;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use crate::error::Result;

/// Back-off while a non-blocking write cannot make progress
const WRITE_RETRY: Duration = Duration::from_micros(200);

/// TCP listener for host connections, one at a time
pub struct SocketServer {
  listener: TcpListener,
}

impl SocketServer {
  pub fn bind(addr: &str) -> Result<Self> {
    let listener = TcpListener::bind(addr)?;
    info!("Socket server listening on {}", listener.local_addr()?);
    Ok(Self { listener })
  }

  pub fn local_addr(&self) -> Result<SocketAddr> {
    Ok(self.listener.local_addr()?)
  }

  /// Block until a host connects
  pub fn accept(&self) -> Result<Connection> {
    let (stream, peer) = self.listener.accept()?;
    info!("Connected: {}", peer);
    Connection::new(stream, peer)
  }
}

/// Non-blocking byte pipe to one host, so the clock can run between host bytes
pub struct Connection {
  stream: TcpStream,
  peer: SocketAddr,
}

impl Connection {
  fn new(stream: TcpStream, peer: SocketAddr) -> Result<Self> {
    stream.set_nonblocking(true)?;
    stream.set_nodelay(true)?;
    Ok(Self { stream, peer })
  }

  pub fn peer(&self) -> SocketAddr {
    self.peer
  }

  /// `Ok(None)` when nothing has arrived yet, `Ok(Some(0))` once the host hung up
  pub fn poll_read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
    match self.stream.read(buf) {
      Ok(n) => Ok(Some(n)),
      Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
      Err(e) if e.kind() == ErrorKind::Interrupted => Ok(None),
      Err(e) if e.kind() == ErrorKind::ConnectionReset => Ok(Some(0)),
      Err(e) => Err(e.into()),
    }
  }

  pub fn send(&mut self, mut bytes: &[u8]) -> Result<()> {
    while !bytes.is_empty() {
      match self.stream.write(bytes) {
        Ok(0) => return Err(std::io::Error::from(ErrorKind::WriteZero).into()),
        Ok(n) => bytes = &bytes[n..],
        Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
          thread::sleep(WRITE_RETRY);
        }
        Err(e) => return Err(e.into()),
      }
    }
    Ok(())
  }
}
