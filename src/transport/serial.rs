use embedded_io::{Read, ReadReady, Write};

use super::TransportError;

/// Byte-stream link (UART) over any `embedded_io` port.
///
/// Reads never block: [`drain`](Self::drain) only takes what the port
/// already has buffered. Writes go out whole or fail.
pub struct ByteStream<S> {
    port: S,
    bytes_in: u32,
    bytes_out: u32,
}

impl<S> ByteStream<S> {
    pub fn new(port: S) -> Self {
        Self {
            port,
            bytes_in: 0,
            bytes_out: 0,
        }
    }

    /// Total bytes received, wrapping.
    pub fn bytes_in(&self) -> u32 {
        self.bytes_in
    }

    /// Total bytes sent, wrapping.
    pub fn bytes_out(&self) -> u32 {
        self.bytes_out
    }

    pub fn port_mut(&mut self) -> &mut S {
        &mut self.port
    }

    pub fn into_inner(self) -> S {
        self.port
    }
}

impl<S: Write> ByteStream<S> {
    /// Write a complete frame or line.
    pub fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError<S::Error>> {
        self.port.write_all(bytes).map_err(TransportError::Io)?;
        self.bytes_out = self.bytes_out.wrapping_add(bytes.len() as u32);
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), TransportError<S::Error>> {
        self.port.flush().map_err(TransportError::Io)
    }
}

impl<S: Read + ReadReady> ByteStream<S> {
    /// Copy the bytes the port has already received into `buf`.
    ///
    /// Stops when the port has nothing more buffered or `buf` is full.
    pub fn drain(&mut self, buf: &mut [u8]) -> Result<usize, TransportError<S::Error>> {
        let mut filled = 0;
        while filled < buf.len() && self.port.read_ready().map_err(TransportError::Io)? {
            let n = self.port.read(&mut buf[filled..]).map_err(TransportError::Io)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        self.bytes_in = self.bytes_in.wrapping_add(filled as u32);
        Ok(filled)
    }
}
