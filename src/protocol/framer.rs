//! Byte-at-a-time receiver for binary frames on a serial stream.
//!
//! Hunts for `AA 55`, reads the header to learn the frame length, then hands
//! the complete frame (ETX included) to [`decode_frame`]. Any rejected frame
//! drops the framer back to sync hunting; [`FramerStats`] counts the losses.

use heapless::Vec;

use super::frame::{
    CRC_LEN, Frame, FrameError, HEADER_LEN, MAX_FRAME_LEN, SYNC0, SYNC1, decode_frame,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum State {
    WaitSync0,
    WaitSync1,
    /// Header and body; `expected` is known once the header is complete.
    Accumulating { expected: Option<usize> },
}

/// Per-receiver counters. Frame errors are absorbed, so this is the only
/// trace they leave.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FramerStats {
    /// Frames that passed every check.
    pub frames: u32,
    pub crc_errors: u32,
    pub terminator_errors: u32,
    /// Frames whose LEN would not fit the buffer.
    pub overflows: u32,
    /// Any other rejection (version, unexpected structure).
    pub other_errors: u32,
}

impl FramerStats {
    fn record(&mut self, result: &Result<Frame, FrameError>) {
        let counter = match result {
            Ok(_) => &mut self.frames,
            Err(FrameError::CrcMismatch) => &mut self.crc_errors,
            Err(FrameError::BadTerminator) => &mut self.terminator_errors,
            Err(FrameError::BufferOverflow) => &mut self.overflows,
            Err(_) => &mut self.other_errors,
        };
        *counter = counter.wrapping_add(1);
    }

    pub fn errors(&self) -> u32 {
        self.crc_errors
            .wrapping_add(self.terminator_errors)
            .wrapping_add(self.overflows)
            .wrapping_add(self.other_errors)
    }
}

/// Byte-stream receiver for terminated binary frames.
///
/// Feed bytes one at a time with [`push`](Self::push). The state returns to
/// `WaitSync0` after every frame boundary, valid or not, so one corrupted
/// frame costs one resynchronisation.
///
/// A byte that fails the `0x55` check is dropped rather than re-examined as a
/// possible `0xAA`, so `AA AA 55 ...` does not sync on the second `AA`.
pub struct Framer {
    state: State,
    buf: Vec<u8, MAX_FRAME_LEN>,
    stats: FramerStats,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framer {
    pub const fn new() -> Self {
        Self {
            state: State::WaitSync0,
            buf: Vec::new(),
            stats: FramerStats {
                frames: 0,
                crc_errors: 0,
                terminator_errors: 0,
                overflows: 0,
                other_errors: 0,
            },
        }
    }

    /// Consume one byte.
    ///
    /// # Returns
    /// - `None`: frame still incomplete (or no sync yet)
    /// - `Some(Ok(frame))`: a valid frame
    /// - `Some(Err(e))`: a frame was dropped; the framer already resynchronises
    pub fn push(&mut self, byte: u8) -> Option<Result<Frame, FrameError>> {
        match self.state {
            State::WaitSync0 => {
                if byte == SYNC0 {
                    self.buf.clear();
                    let _ = self.buf.push(byte);
                    self.state = State::WaitSync1;
                }
                None
            }
            State::WaitSync1 => {
                if byte == SYNC1 {
                    let _ = self.buf.push(byte);
                    self.state = State::Accumulating { expected: None };
                } else {
                    self.reset();
                }
                None
            }
            State::Accumulating { expected } => {
                if self.buf.push(byte).is_err() {
                    return Some(self.finish(Err(FrameError::BufferOverflow)));
                }

                let expected = match expected {
                    Some(n) => n,
                    None if self.buf.len() == HEADER_LEN => {
                        let len = usize::from(u16::from_le_bytes([self.buf[6], self.buf[7]]));
                        let total = HEADER_LEN + len + CRC_LEN + 1;
                        if total > MAX_FRAME_LEN {
                            return Some(self.finish(Err(FrameError::BufferOverflow)));
                        }
                        self.state = State::Accumulating {
                            expected: Some(total),
                        };
                        total
                    }
                    None => return None,
                };

                if self.buf.len() < expected {
                    return None;
                }
                let result = decode_frame(&self.buf, true);
                Some(self.finish(result))
            }
        }
    }

    /// Feed a slice and hand every completed frame, or frame error, to
    /// `on_frame`. Returns the number of valid frames.
    pub fn push_all<F>(&mut self, bytes: &[u8], mut on_frame: F) -> usize
    where
        F: FnMut(Result<Frame, FrameError>),
    {
        let mut frames = 0;
        for &byte in bytes {
            if let Some(result) = self.push(byte) {
                if result.is_ok() {
                    frames += 1;
                }
                on_frame(result);
            }
        }
        frames
    }

    /// Drop any partial frame.
    pub fn reset(&mut self) {
        self.state = State::WaitSync0;
        self.buf.clear();
    }

    pub fn stats(&self) -> &FramerStats {
        &self.stats
    }

    /// True while between frames.
    pub fn is_idle(&self) -> bool {
        self.state == State::WaitSync0
    }

    fn finish(&mut self, result: Result<Frame, FrameError>) -> Result<Frame, FrameError> {
        self.stats.record(&result);
        if let Err(e) = &result {
            warn!("framer: dropped frame: {}", e);
        }
        self.reset();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::command::Command;
    use crate::protocol::frame::{FrameKind, Telemetry, build_command, build_control, build_pong};
    use crate::protocol::servo::ServoVector;

    fn ping_frame(seq: u16) -> ([u8; MAX_FRAME_LEN], usize) {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let n = build_command(&mut buf, &Command::Ping, seq, true).unwrap();
        (buf, n)
    }

    fn collect(framer: &mut Framer, bytes: &[u8]) -> std::vec::Vec<Result<Frame, FrameError>> {
        let mut out = std::vec::Vec::new();
        framer.push_all(bytes, |r| out.push(r));
        out
    }

    #[test]
    fn single_frame() {
        let (buf, n) = ping_frame(42);
        let mut framer = Framer::new();
        let results = collect(&mut framer, &buf[..n]);
        assert_eq!(results.len(), 1);
        let frame = results[0].as_ref().unwrap();
        assert_eq!(frame.seq, 42);
        assert_eq!(frame.command(), Some(Ok(Command::Ping)));
        assert!(framer.is_idle());
    }

    #[test]
    fn garbage_between_frames() {
        let (first, n1) = ping_frame(1);
        let mut second = [0u8; MAX_FRAME_LEN];
        let n2 = build_command(&mut second, &Command::SetServo { id: 2, value: 33 }, 2, true).unwrap();

        let mut stream = std::vec::Vec::new();
        stream.extend_from_slice(&[0x00, 0x13, 0x7E, 0x55, 0xFF]);
        stream.extend_from_slice(&first[..n1]);
        stream.extend_from_slice(&[0x01, 0x02, 0x55, 0x7E]);
        stream.extend_from_slice(&second[..n2]);
        stream.extend_from_slice(&[0x99]);

        let mut framer = Framer::new();
        let frames: std::vec::Vec<Frame> = collect(&mut framer, &stream)
            .into_iter()
            .filter_map(Result::ok)
            .collect();
        assert_eq!(frames.len(), 2);
        assert_eq!((frames[0].seq, frames[0].command()), (1, Some(Ok(Command::Ping))));
        assert_eq!(
            (frames[1].seq, frames[1].command()),
            (2, Some(Ok(Command::SetServo { id: 2, value: 33 })))
        );
        assert_eq!(framer.stats().frames, 2);
    }

    #[test]
    fn full_control_frame_fits() {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let n = build_control(&mut buf, &Telemetry::default(), 5, true).unwrap();
        let mut framer = Framer::new();
        let results = collect(&mut framer, &buf[..n]);
        assert_eq!(results.len(), 1);
        let frame = results[0].as_ref().unwrap();
        assert_eq!(frame.kind, FrameKind::Control);
        assert_eq!(
            frame.telemetry().unwrap().unwrap().servo,
            ServoVector::neutral()
        );
    }

    #[test]
    fn crc_failure_resyncs_for_next_frame() {
        let (good, n) = ping_frame(7);
        let mut bad = good;
        bad[HEADER_LEN] ^= 0x01;

        let mut framer = Framer::new();
        let results = collect(&mut framer, &bad[..n]);
        assert_eq!(results, [Err(FrameError::CrcMismatch)]);
        assert!(framer.is_idle());

        let results = collect(&mut framer, &good[..n]);
        assert!(results[0].is_ok());
        assert_eq!(framer.stats().crc_errors, 1);
        assert_eq!(framer.stats().frames, 1);
    }

    #[test]
    fn bad_terminator_is_counted() {
        let mut buf = [0u8; 16];
        let n = build_pong(&mut buf, 3).unwrap();
        buf[n - 1] = 0x00;
        let mut framer = Framer::new();
        assert_eq!(collect(&mut framer, &buf[..n]), [Err(FrameError::BadTerminator)]);
        assert_eq!(framer.stats().terminator_errors, 1);
    }

    #[test]
    fn oversized_length_resets_immediately() {
        // LEN = 0x0100 announces a frame far beyond the buffer
        let header = [0xAA, 0x55, 0x01, 0x02, 0x00, 0x00, 0x00, 0x01];
        let mut framer = Framer::new();
        assert_eq!(collect(&mut framer, &header), [Err(FrameError::BufferOverflow)]);
        assert!(framer.is_idle());
        assert_eq!(framer.stats().overflows, 1);

        // the framer is usable straight away
        let (good, n) = ping_frame(9);
        assert!(collect(&mut framer, &good[..n])[0].is_ok());
    }

    #[test]
    fn sync1_failure_drops_the_failing_byte() {
        // `AA AA 55 ...`: the second AA fails the 0x55 check and is discarded,
        // so the 55 that follows is not taken as SYNC1 and the frame is lost.
        let (good, n) = ping_frame(11);
        let mut stream = std::vec::Vec::new();
        stream.push(0xAA);
        stream.extend_from_slice(&good[..n]);

        let mut framer = Framer::new();
        let results = collect(&mut framer, &stream);
        assert!(results.iter().all(|r| r.is_err()));
        assert_eq!(framer.stats().frames, 0);

        // the next clean frame is still received
        let results = collect(&mut framer, &good[..n]);
        assert_eq!(results.last().map(|r| r.is_ok()), Some(true));
    }

    #[test]
    fn byte_at_a_time_across_calls() {
        let (good, n) = ping_frame(12);
        let mut framer = Framer::new();
        for &b in &good[..n - 1] {
            assert_eq!(framer.push(b), None);
        }
        assert!(!framer.is_idle());
        assert!(matches!(framer.push(good[n - 1]), Some(Ok(_))));
    }
}
