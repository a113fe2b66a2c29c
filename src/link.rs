//! One control-link session: outbound telemetry at a fixed rate, inbound
//! commands applied to the servo vector, replies to pings.
//!
//! Once per loop iteration the caller asks [`LinkSession::tick`] whether
//! telemetry is due; the returned sequence number feeds every transport
//! that sends on that tick.
//!
//! A session speaks exactly one encoding on its byte stream, chosen by
//! [`LinkConfig::encoding`]. The datagram path always uses binary frames
//! without the terminator.

use embedded_io::{Read, ReadReady, Write};

use crate::config::{LinkConfig, LinkEncoding};
use crate::hardware::ImuSample;
use crate::protocol::frame::{DATAGRAM_BUFFER_LEN, FrameKind, MAX_FRAME_LEN, build_control, build_pong};
use crate::protocol::text::{
    HELP_TEXT, LineFramer, MAX_LINE_LEN, QUICK_PING_REPLY, TextRequest, encode_pong_line,
    encode_telemetry_line, parse_line,
};
use crate::protocol::{
    ATTITUDE_PACKET_LEN, AttitudeReport, CodecError, Command, Frame, FrameError, Framer, FramerStats, ServoVector, Telemetry,
    decode_servo_datagram,
};
use crate::transport::{ByteStream, DatagramSink, DatagramSource, TransportError};

/// Bytes pulled from the stream per drain pass.
const RX_CHUNK: usize = 64;

/// Longest outbound message: a telemetry line with every field at full width.
const TX_BUF_LEN: usize = 320;

/// Fixed-interval gate on wrapping millisecond timestamps.
///
/// A late caller gets one `true` and the schedule restarts from that moment;
/// missed slots are skipped, never queued.
#[derive(Clone, Copy, Debug)]
pub struct RateLimiter {
    interval_ms: Option<u32>,
    last_ms: Option<u32>,
}

impl RateLimiter {
    /// `None` never fires.
    pub const fn new(interval_ms: Option<u32>) -> Self {
        Self {
            interval_ms,
            last_ms: None,
        }
    }

    pub fn from_hz(hz: u16) -> Self {
        if hz == 0 {
            Self::new(None)
        } else {
            Self::new(Some((1000 / u32::from(hz)).max(1)))
        }
    }

    /// True when at least one interval has passed since the last `true`.
    pub fn ready(&mut self, now_ms: u32) -> bool {
        let Some(interval) = self.interval_ms else {
            return false;
        };
        let due = match self.last_ms {
            None => true,
            Some(last) => now_ms.wrapping_sub(last) >= interval,
        };
        if due {
            self.last_ms = Some(now_ms);
        }
        due
    }

    pub fn interval_ms(&self) -> Option<u32> {
        self.interval_ms
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkStats {
    /// Control telemetry messages, counted per transport.
    pub telemetry_sent: u32,
    pub attitude_sent: u32,
    /// Servo commands applied from either encoding.
    pub commands_applied: u32,
    pub pings_answered: u32,
    /// Binary commands that failed to decode, or text lines that were not requests.
    pub rejected: u32,
    /// Replies that could not be written.
    pub reply_errors: u32,
}

/// Per-link state. Owns the servo vector the host writes to.
pub struct LinkSession {
    config: LinkConfig,
    servo: ServoVector,
    seq: u16,
    limiter: RateLimiter,
    framer: Framer,
    lines: LineFramer<MAX_LINE_LEN>,
    outputs_enabled: bool,
    stats: LinkStats,
}

impl LinkSession {
    pub fn new(config: LinkConfig) -> Self {
        Self {
            limiter: RateLimiter::new(config.send_interval_ms()),
            config,
            servo: ServoVector::neutral(),
            seq: 0,
            framer: Framer::new(),
            lines: LineFramer::new(),
            outputs_enabled: true,
            stats: LinkStats::default(),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn servo(&self) -> &ServoVector {
        &self.servo
    }

    /// Local control logic writes targets here.
    pub fn servo_mut(&mut self) -> &mut ServoVector {
        &mut self.servo
    }

    /// False while the actuators must hold still (calibration).
    pub fn outputs_enabled(&self) -> bool {
        self.outputs_enabled
    }

    pub fn hold_outputs(&mut self) {
        self.outputs_enabled = false;
    }

    pub fn release_outputs(&mut self) {
        self.outputs_enabled = true;
    }

    /// Sequence number the next due tick will carry.
    pub fn seq(&self) -> u16 {
        self.seq
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    pub fn framer_stats(&self) -> &FramerStats {
        self.framer.stats()
    }

    /// Advance the telemetry schedule.
    ///
    /// Returns the sequence number for this tick when a send is due, `None`
    /// otherwise. Every transport sending on the tick uses the same number,
    /// so one call per tick drives the stream and the datagram paths alike.
    /// The counter only advances while telemetry is enabled.
    pub fn tick(&mut self, now_ms: u32) -> Option<u16> {
        if !self.limiter.ready(now_ms) {
            return None;
        }
        let seq = self.seq;
        if self.config.telemetry_enabled {
            self.seq = self.seq.wrapping_add(1);
        }
        Some(seq)
    }

    fn telemetry(&self, sample: &ImuSample) -> Telemetry {
        Telemetry::new(
            sample.accel,
            sample.gyro,
            sample.temperature,
            self.servo,
            self.config.include_imu,
        )
    }

    /// Encode one telemetry message for the byte stream in the session's
    /// encoding.
    pub fn encode_telemetry(&self, sample: &ImuSample, seq: u16, out: &mut [u8]) -> Result<usize, CodecError> {
        let telemetry = self.telemetry(sample);
        match self.config.encoding {
            LinkEncoding::Binary => build_control(out, &telemetry, seq, true),
            LinkEncoding::Text => encode_telemetry_line(out, &telemetry, seq, self.config.include_imu),
        }
    }

    /// Send the telemetry for tick `seq` on the byte stream.
    ///
    /// `sample.gyro` should already have the bias removed.
    ///
    /// # Returns
    /// - `Ok(true)`: a message was written
    /// - `Ok(false)`: telemetry disabled
    pub fn send_stream_telemetry<S: Write>(
        &mut self,
        stream: &mut ByteStream<S>,
        seq: u16,
        sample: &ImuSample,
    ) -> Result<bool, TransportError<S::Error>> {
        if !self.config.telemetry_enabled {
            return Ok(false);
        }
        let mut buf = [0u8; TX_BUF_LEN];
        let n = self.encode_telemetry(sample, seq, &mut buf)?;
        stream.send(&buf[..n])?;
        self.stats.telemetry_sent = self.stats.telemetry_sent.wrapping_add(1);
        Ok(true)
    }

    /// Send the telemetry for tick `seq` as one binary control frame without
    /// the terminator.
    pub fn send_datagram_telemetry<D: DatagramSink>(
        &mut self,
        sink: &mut D,
        seq: u16,
        sample: &ImuSample,
    ) -> Result<bool, TransportError<D::Error>> {
        if !self.config.telemetry_enabled {
            return Ok(false);
        }
        let mut buf = [0u8; DATAGRAM_BUFFER_LEN];
        let n = build_control(&mut buf, &self.telemetry(sample), seq, false)?;
        sink.send(&buf[..n]).map_err(TransportError::Io)?;
        self.stats.telemetry_sent = self.stats.telemetry_sent.wrapping_add(1);
        Ok(true)
    }

    /// Broadcast the attitude datagram. Sent on every due tick, whether or
    /// not control telemetry is enabled.
    pub fn send_attitude<D: DatagramSink>(
        &mut self,
        sink: &mut D,
        report: &AttitudeReport,
    ) -> Result<(), TransportError<D::Error>> {
        let mut buf = [0u8; ATTITUDE_PACKET_LEN];
        let n = report.encode(&mut buf)?;
        sink.send(&buf[..n]).map_err(TransportError::Io)?;
        self.stats.attitude_sent = self.stats.attitude_sent.wrapping_add(1);
        Ok(())
    }

    /// Drain everything the stream has buffered through the session's framer.
    ///
    /// # Returns
    /// `Ok(true)` when at least one command changed the servo targets.
    pub fn poll_stream<S: Read + ReadReady + Write>(
        &mut self,
        stream: &mut ByteStream<S>,
        now_ms: u32,
    ) -> Result<bool, TransportError<S::Error>> {
        let mut chunk = [0u8; RX_CHUNK];
        let mut updated = false;
        loop {
            let n = stream.drain(&mut chunk)?;
            if n == 0 {
                break;
            }
            updated |= self.receive(&chunk[..n], stream, now_ms);
        }
        Ok(updated)
    }

    /// Feed received stream bytes; replies go to `replies`.
    ///
    /// Bad frames and lines are counted and skipped. Returns true when the
    /// servo targets were written.
    pub fn receive<W: Write>(&mut self, bytes: &[u8], replies: &mut ByteStream<W>, now_ms: u32) -> bool {
        let mut updated = false;
        for &byte in bytes {
            updated |= match self.config.encoding {
                LinkEncoding::Binary => match self.framer.push(byte) {
                    Some(result) => self.handle_frame(result, replies),
                    None => false,
                },
                LinkEncoding::Text => {
                    let request = match self.lines.push(byte) {
                        Some(Ok(line)) => Some(parse_line(line)),
                        Some(Err(_)) | None => None,
                    };
                    match request {
                        Some(Some(request)) => self.handle_text(request, replies, now_ms),
                        Some(None) => {
                            self.stats.rejected = self.stats.rejected.wrapping_add(1);
                            false
                        }
                        None => false,
                    }
                }
            };
        }
        updated
    }

    /// Apply a legacy servo datagram (`AA 55` + 8 × u16). Returns true if it
    /// was accepted.
    pub fn receive_datagram(&mut self, datagram: &[u8]) -> bool {
        match decode_servo_datagram(datagram) {
            Some(angles) => {
                self.servo.positions = angles;
                self.stats.commands_applied = self.stats.commands_applied.wrapping_add(1);
                trace!("udp: servo positions updated");
                true
            }
            None => {
                self.stats.rejected = self.stats.rejected.wrapping_add(1);
                false
            }
        }
    }

    /// Handle every pending datagram.
    pub fn poll_datagrams<D: DatagramSource>(&mut self, source: &mut D) -> Result<bool, TransportError<D::Error>> {
        let mut buf = [0u8; DATAGRAM_BUFFER_LEN];
        let mut updated = false;
        while let Some(n) = source.try_recv(&mut buf).map_err(TransportError::Io)? {
            updated |= self.receive_datagram(&buf[..n]);
        }
        Ok(updated)
    }

    fn handle_frame<W: Write>(&mut self, result: Result<Frame, FrameError>, replies: &mut ByteStream<W>) -> bool {
        let frame = match result {
            Ok(frame) => frame,
            // already logged and counted by the framer
            Err(_) => return false,
        };
        if frame.kind != FrameKind::Command {
            debug!("link: ignoring frame type {}", u8::from(frame.kind));
            return false;
        }

        match Command::decode(&frame.payload) {
            Ok(Command::Ping) => {
                let mut buf = [0u8; MAX_FRAME_LEN];
                let sent = build_pong(&mut buf, frame.seq)
                    .map_err(TransportError::Codec)
                    .and_then(|n| replies.send(&buf[..n]));
                self.reply_sent(sent.is_ok());
                false
            }
            Ok(command) => self.apply(&command),
            Err(e) => {
                warn!("link: bad command frame: {}", e);
                self.stats.rejected = self.stats.rejected.wrapping_add(1);
                false
            }
        }
    }

    fn handle_text<W: Write>(&mut self, request: TextRequest, replies: &mut ByteStream<W>, now_ms: u32) -> bool {
        match request {
            TextRequest::Command(Command::Ping) => {
                let mut buf = [0u8; 64];
                let sent = encode_pong_line(&mut buf, now_ms)
                    .map_err(TransportError::Codec)
                    .and_then(|n| replies.send(&buf[..n]));
                self.reply_sent(sent.is_ok());
                false
            }
            TextRequest::Command(command) => self.apply(&command),
            TextRequest::QuickPing => {
                let sent = replies.send(QUICK_PING_REPLY.as_bytes());
                self.reply_sent(sent.is_ok());
                false
            }
            TextRequest::Help => {
                let sent = replies.send(HELP_TEXT.as_bytes());
                self.reply_sent(sent.is_ok());
                false
            }
        }
    }

    fn apply(&mut self, command: &Command) -> bool {
        let applied = self.servo.apply(command);
        if applied {
            self.stats.commands_applied = self.stats.commands_applied.wrapping_add(1);
            debug!("link: applied {}", command_name(command));
        }
        applied
    }

    fn reply_sent(&mut self, ok: bool) {
        if ok {
            self.stats.pings_answered = self.stats.pings_answered.wrapping_add(1);
        } else {
            warn!("link: reply could not be sent");
            self.stats.reply_errors = self.stats.reply_errors.wrapping_add(1);
        }
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::SetServo { .. } => "set",
        Command::SetPositions(_) => "positions",
        Command::SetOffsets(_) => "offsets",
        Command::Reset => "reset",
        Command::Ping => "ping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{build_command, decode_frame};
    use embedded_io::{ErrorKind, ErrorType};
    use nalgebra::Vector3;

    #[derive(Default)]
    struct Sink {
        tx: std::vec::Vec<u8>,
    }

    impl ErrorType for Sink {
        type Error = ErrorKind;
    }

    impl Write for Sink {
        fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            self.tx.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    fn session(encoding: LinkEncoding) -> LinkSession {
        LinkSession::new(LinkConfig {
            encoding,
            ..LinkConfig::default()
        })
    }

    fn sample() -> ImuSample {
        ImuSample {
            accel: Vector3::new(0.0, 0.0, 1.0),
            gyro: Vector3::new(0.5, 0.0, -0.5),
            temperature: 30.2,
        }
    }

    #[test]
    fn rate_limiter_skips_instead_of_queueing() {
        let mut limiter = RateLimiter::from_hz(100);
        assert!(limiter.ready(0));
        assert!(!limiter.ready(9));
        assert!(limiter.ready(10));
        // 35 ms late: one send, schedule restarts at 45
        assert!(limiter.ready(45));
        assert!(!limiter.ready(50));
        assert!(limiter.ready(55));
    }

    #[test]
    fn rate_limiter_wraps() {
        let mut limiter = RateLimiter::from_hz(50);
        assert!(limiter.ready(u32::MAX - 5));
        assert!(!limiter.ready(u32::MAX));
        assert!(limiter.ready(14));
    }

    #[test]
    fn zero_rate_never_sends() {
        let mut limiter = RateLimiter::from_hz(0);
        assert!(!limiter.ready(0));
        assert!(!limiter.ready(1_000_000));
    }

    #[derive(Default)]
    struct Packets {
        sent: std::vec::Vec<std::vec::Vec<u8>>,
    }

    impl DatagramSink for Packets {
        type Error = ();

        fn send(&mut self, datagram: &[u8]) -> Result<(), Self::Error> {
            self.sent.push(datagram.to_vec());
            Ok(())
        }
    }

    /// One loop iteration the way the firmware runs it.
    fn run_tick(link: &mut LinkSession, out: &mut ByteStream<Sink>, now_ms: u32) -> bool {
        match link.tick(now_ms) {
            Some(seq) => link.send_stream_telemetry(out, seq, &sample()).unwrap(),
            None => false,
        }
    }

    #[test]
    fn binary_telemetry_is_rate_limited_and_sequenced() {
        let mut link = session(LinkEncoding::Binary);
        let mut out = ByteStream::new(Sink::default());
        assert!(run_tick(&mut link, &mut out, 0));
        assert!(!run_tick(&mut link, &mut out, 5));
        assert!(run_tick(&mut link, &mut out, 10));

        let tx = &out.port_mut().tx;
        assert_eq!(tx.len(), 2 * 68);
        let first = decode_frame(&tx[..68], true).unwrap();
        let second = decode_frame(&tx[68..], true).unwrap();
        assert_eq!((first.seq, second.seq), (0, 1));
        let t = first.telemetry().unwrap().unwrap();
        assert_eq!(t.temperature, 30);
        assert_eq!(t.gyro, Vector3::new(0.5, 0.0, -0.5));
        assert_eq!(link.stats().telemetry_sent, 2);
    }

    #[test]
    fn stream_and_datagram_share_one_tick() {
        let mut link = session(LinkEncoding::Binary);
        let mut out = ByteStream::new(Sink::default());
        let mut packets = Packets::default();

        for now_ms in [0, 10] {
            let seq = link.tick(now_ms).unwrap();
            assert!(link.send_stream_telemetry(&mut out, seq, &sample()).unwrap());
            assert!(link.send_datagram_telemetry(&mut packets, seq, &sample()).unwrap());
        }
        assert_eq!(link.tick(15), None);

        let tx = &out.port_mut().tx;
        let stream_seqs = [
            decode_frame(&tx[..68], true).unwrap().seq,
            decode_frame(&tx[68..], true).unwrap().seq,
        ];
        let datagram_seqs = [
            decode_frame(&packets.sent[0], false).unwrap().seq,
            decode_frame(&packets.sent[1], false).unwrap().seq,
        ];
        assert_eq!(stream_seqs, [0, 1]);
        assert_eq!(datagram_seqs, [0, 1]);
        assert_eq!(link.stats().telemetry_sent, 4);
        assert_eq!(link.seq(), 2);
    }

    #[test]
    fn disabled_telemetry_sends_nothing() {
        let mut link = LinkSession::new(LinkConfig {
            telemetry_enabled: false,
            ..LinkConfig::default()
        });
        let mut out = ByteStream::new(Sink::default());
        let seq = link.tick(0).unwrap();
        assert!(!link.send_stream_telemetry(&mut out, seq, &sample()).unwrap());
        assert!(out.port_mut().tx.is_empty());
        assert_eq!(link.seq(), 0);
    }

    #[test]
    fn attitude_goes_out_even_with_telemetry_disabled() {
        let mut link = LinkSession::new(LinkConfig {
            telemetry_enabled: false,
            ..LinkConfig::default()
        });
        let mut packets = Packets::default();
        let report = AttitudeReport::new(
            crate::hardware::EulerAngles {
                roll: 1.0,
                pitch: 2.0,
                yaw: 3.0,
            },
            Vector3::new(0.1, 0.2, 0.3),
            25.0,
        );

        assert!(link.tick(0).is_some());
        link.send_attitude(&mut packets, &report).unwrap();
        assert_eq!(packets.sent.len(), 1);
        assert_eq!(packets.sent[0].len(), ATTITUDE_PACKET_LEN);
        assert_eq!(AttitudeReport::decode(&packets.sent[0]), Some(report));
        assert_eq!(link.stats().attitude_sent, 1);
    }

    #[test]
    fn text_telemetry_omits_imu_when_disabled() {
        let mut link = LinkSession::new(LinkConfig {
            encoding: LinkEncoding::Text,
            include_imu: false,
            ..LinkConfig::default()
        });
        let mut out = ByteStream::new(Sink::default());
        assert!(run_tick(&mut link, &mut out, 0));
        let line = std::str::from_utf8(&out.port_mut().tx).unwrap().to_owned();
        assert!(line.starts_with("{\"seq\":0,\"pos\":"), "{}", line);
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn binary_ping_gets_pong_with_same_seq() {
        let mut link = session(LinkEncoding::Binary);
        let mut frame = [0u8; MAX_FRAME_LEN];
        let n = build_command(&mut frame, &Command::Ping, 0x0A0B, true).unwrap();
        let mut out = ByteStream::new(Sink::default());

        assert!(!link.receive(&frame[..n], &mut out, 0));
        let pong = decode_frame(&out.port_mut().tx, true).unwrap();
        assert_eq!(pong.seq, 0x0A0B);
        assert_eq!(pong.command(), Some(Ok(Command::Ping)));
        assert_eq!(link.stats().pings_answered, 1);
    }

    #[test]
    fn binary_set_servo_updates_targets() {
        let mut link = session(LinkEncoding::Binary);
        let mut frame = [0u8; MAX_FRAME_LEN];
        let n = build_command(&mut frame, &Command::SetServo { id: 0, value: 10 }, 1, true).unwrap();
        let mut out = ByteStream::new(Sink::default());
        assert!(link.receive(&frame[..n], &mut out, 0));
        assert_eq!(link.servo().positions[0], 10);
        assert!(out.port_mut().tx.is_empty());
    }

    #[test]
    fn binary_unknown_command_is_counted() {
        let mut link = session(LinkEncoding::Binary);
        let mut frame = [0u8; MAX_FRAME_LEN];
        let n = crate::protocol::frame::build_frame(&mut frame, FrameKind::Command, 1, &[0x42], true)
            .unwrap();
        let mut out = ByteStream::new(Sink::default());
        assert!(!link.receive(&frame[..n], &mut out, 0));
        assert_eq!(link.stats().rejected, 1);
        assert_eq!(*link.servo(), ServoVector::neutral());
    }

    #[test]
    fn text_requests_and_replies() {
        let mut link = session(LinkEncoding::Text);
        let mut out = ByteStream::new(Sink::default());

        assert!(link.receive(b"{\"cmd\":\"set\",\"id\":2,\"val\":0}\n", &mut out, 0));
        assert_eq!(link.servo().positions[2], 0);

        assert!(!link.receive(b"{\"cmd\":\"ping\"}\r\n", &mut out, 4321));
        assert!(!link.receive(b"p\n", &mut out, 0));
        assert!(!link.receive(b"garbage\n", &mut out, 0));

        let tx = std::str::from_utf8(&out.port_mut().tx).unwrap().to_owned();
        assert_eq!(tx, "{\"resp\":\"pong\",\"millis\":4321}\nping ok.\n");
        assert_eq!(link.stats().rejected, 1);
        assert_eq!(link.stats().pings_answered, 2);
    }

    #[test]
    fn help_text_is_sent() {
        let mut link = session(LinkEncoding::Text);
        let mut out = ByteStream::new(Sink::default());
        link.receive(b"?\n", &mut out, 0);
        assert_eq!(out.port_mut().tx, HELP_TEXT.as_bytes());
    }

    #[test]
    fn text_session_ignores_binary_frames() {
        let mut link = session(LinkEncoding::Text);
        let mut frame = [0u8; MAX_FRAME_LEN];
        let n = build_command(&mut frame, &Command::Reset, 1, true).unwrap();
        link.servo_mut().positions = [0; 8];
        let mut out = ByteStream::new(Sink::default());
        assert!(!link.receive(&frame[..n], &mut out, 0));
        assert_eq!(link.servo().positions, [0; 8]);
    }

    #[test]
    fn legacy_datagram_sets_positions() {
        let mut link = session(LinkEncoding::Binary);
        let mut packet = [0u8; 18];
        packet[0] = 0xAA;
        packet[1] = 0x55;
        packet[2] = 200;
        assert!(link.receive_datagram(&packet));
        assert_eq!(link.servo().positions, [180, 0, 0, 0, 0, 0, 0, 0]);
        assert!(!link.receive_datagram(&packet[..10]));
    }

    #[test]
    fn outputs_can_be_held() {
        let mut link = session(LinkEncoding::Binary);
        assert!(link.outputs_enabled());
        link.hold_outputs();
        assert!(!link.outputs_enabled());
        link.release_outputs();
        assert!(link.outputs_enabled());
    }
}
