use std::io;
use std::net::{SocketAddr, UdpSocket};

use super::{DatagramSink, DatagramSource};

/// Non-blocking UDP socket bound to a local port, sending to one target.
pub struct UdpTransport {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpTransport {
    /// Bind `local` and send everything to `target`.
    pub fn bind(local: SocketAddr, target: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(local)?;
        socket.set_nonblocking(true)?;
        info!("udp: listening on {}, sending to {}", socket.local_addr()?, target);
        Ok(Self { socket, target })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn set_target(&mut self, target: SocketAddr) {
        self.target = target;
    }

    /// Allow a broadcast address as the target.
    pub fn enable_broadcast(&self) -> io::Result<()> {
        self.socket.set_broadcast(true)
    }
}

impl DatagramSink for UdpTransport {
    type Error = io::Error;

    fn send(&mut self, datagram: &[u8]) -> Result<(), Self::Error> {
        match self.socket.send_to(datagram, self.target) {
            Ok(_) => Ok(()),
            // a full socket buffer drops this tick's packet
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl DatagramSource for UdpTransport {
    type Error = io::Error;

    fn try_recv(&mut self, buf: &mut [u8]) -> Result<Option<usize>, Self::Error> {
        match self.socket.recv_from(buf) {
            Ok((n, _from)) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}
