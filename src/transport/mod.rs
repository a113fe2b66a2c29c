//! Physical link adapters. They move bytes only; framing lives in
//! [`crate::protocol`].

pub mod serial;
#[cfg(feature = "std")]
pub mod udp;

pub use serial::ByteStream;
#[cfg(feature = "std")]
pub use udp::UdpTransport;

use crate::protocol::CodecError;

/// Fire-and-forget packet output.
pub trait DatagramSink {
    type Error;

    /// Send one datagram. No acknowledgement and no retry.
    fn send(&mut self, datagram: &[u8]) -> Result<(), Self::Error>;
}

/// Non-blocking packet input.
pub trait DatagramSource {
    type Error;

    /// Receive one pending datagram into `buf`; `Ok(None)` when nothing is waiting.
    fn try_recv(&mut self, buf: &mut [u8]) -> Result<Option<usize>, Self::Error>;
}

/// Failure while sending or receiving.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError<E> {
    /// The adapter's own I/O error.
    Io(E),
    /// The outgoing message could not be encoded.
    Codec(CodecError),
}

impl<E> From<CodecError> for TransportError<E> {
    fn from(e: CodecError) -> Self {
        TransportError::Codec(e)
    }
}

impl<E: core::fmt::Debug> core::fmt::Display for TransportError<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TransportError::Io(e) => write!(f, "transport I/O error: {:?}", e),
            TransportError::Codec(e) => write!(f, "encode failed: {}", e),
        }
    }
}
