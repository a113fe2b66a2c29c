//! Newline-delimited JSON encoding of the control link.
//!
//! Requests are one JSON object per line with a `"cmd"` field:
//!
//! ```text
//! {"cmd":"ping"}
//! {"cmd":"servo","pos":[90,90,90,90,90,90,90,90]}
//! {"cmd":"set_all","vals":[90,90,90,90,90,90,90,90]}
//! {"cmd":"offset","off":[0,0,0,0,0,0,0,0]}
//! {"cmd":"set","id":0,"val":90}
//! {"cmd":"reset"}
//! ```
//!
//! Arrays may be shorter than eight entries and then update a prefix; entries
//! past the eighth are read and ignored. Malformed JSON, an unknown `cmd` or
//! missing arguments produce no command. Unknown extra fields are ignored.
//!
//! Two debug shortcuts are accepted as whole lines: `p` (answered with
//! `ping ok.`) and `?` (command help).

use core::fmt;

use heapless::Vec;
use num_traits::Float;
use serde::de::{Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};

use super::CodecError;
use super::command::{ChannelValues, Command};
use super::frame::Telemetry;
use super::servo::SERVO_CHANNELS;

/// Longest accepted request line, terminator excluded.
pub const MAX_LINE_LEN: usize = 256;

/// Reply to the `p` shortcut.
pub const QUICK_PING_REPLY: &str = "ping ok.\n";

/// Reply to the `?` shortcut.
pub const HELP_TEXT: &str = "\
[commands]
p                                  : ping (link check)
{\"cmd\":\"ping\"}                     : ping, JSON reply with uptime
{\"cmd\":\"servo\",\"pos\":[90,...]}     : set positions (0-180, neutral 90)
{\"cmd\":\"set_all\",\"vals\":[90,...]}  : set positions (0-180, neutral 90)
{\"cmd\":\"offset\",\"off\":[0,...]}     : set trim offsets
{\"cmd\":\"set\",\"id\":0,\"val\":90}      : set one servo (id 0-7)
{\"cmd\":\"reset\"}                    : all servos to 90, offsets to 0
?                                  : this help
";

/// What a received line asks for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TextRequest {
    Command(Command),
    /// `p` shortcut.
    QuickPing,
    /// `?` shortcut.
    Help,
}

/// Channel array keeping only the first `SERVO_CHANNELS` entries.
struct FirstChannels(ChannelValues);

impl<'de> Deserialize<'de> for FirstChannels {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FirstChannelsVisitor;

        impl<'de> Visitor<'de> for FirstChannelsVisitor {
            type Value = FirstChannels;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an array of channel values")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<FirstChannels, A::Error> {
                let mut values = ChannelValues::new();
                // every element has to be consumed to reach the closing bracket
                while let Some(value) = seq.next_element::<u16>()? {
                    let _ = values.push(value);
                }
                Ok(FirstChannels(values))
            }
        }

        deserializer.deserialize_seq(FirstChannelsVisitor)
    }
}

#[derive(Deserialize)]
struct RawRequest<'a> {
    cmd: &'a str,
    pos: Option<FirstChannels>,
    vals: Option<FirstChannels>,
    off: Option<FirstChannels>,
    id: Option<i32>,
    val: Option<u16>,
}

/// Interpret one line (without its terminator).
///
/// Spaces and tabs are stripped first. Returns `None` for anything that is
/// not a recognised request.
pub fn parse_line(line: &[u8]) -> Option<TextRequest> {
    let mut clean: Vec<u8, MAX_LINE_LEN> = Vec::new();
    for &b in line.iter().filter(|&&b| b != b' ' && b != b'\t') {
        clean.push(b).ok()?;
    }

    match clean.as_slice() {
        b"" => return None,
        b"p" => return Some(TextRequest::QuickPing),
        b"?" => return Some(TextRequest::Help),
        _ => {}
    }

    let raw = match serde_json_core::from_slice::<RawRequest>(&clean) {
        Ok((raw, _)) => raw,
        Err(_) => {
            debug!("text: malformed request line");
            return None;
        }
    };

    let command = match raw.cmd {
        "ping" => Command::Ping,
        "reset" => Command::Reset,
        "servo" => Command::SetPositions(raw.pos?.0),
        "set_all" => Command::SetPositions(raw.vals?.0),
        "offset" => Command::SetOffsets(raw.off?.0),
        "set" => {
            let id = u8::try_from(raw.id?).ok()?;
            if usize::from(id) >= SERVO_CHANNELS {
                return None;
            }
            Command::SetServo { id, value: raw.val? }
        }
        _ => return None,
    };
    Some(TextRequest::Command(command))
}

#[derive(Serialize)]
struct ImuJson {
    ax: f32,
    ay: f32,
    az: f32,
    gx: f32,
    gy: f32,
    gz: f32,
    temp: u8,
}

#[derive(Serialize)]
struct TelemetryJson<'a> {
    seq: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    imu: Option<ImuJson>,
    pos: &'a [u16],
    off: &'a [u16],
}

#[derive(Serialize)]
struct PongJson {
    resp: &'static str,
    millis: u32,
}

fn round2(x: f32) -> f32 {
    Float::round(x * 100.0) / 100.0
}

/// Serialise `value` followed by `\n`.
fn write_line<T: Serialize>(out: &mut [u8], value: &T) -> Result<usize, CodecError> {
    let available = out.len();
    let too_small = || CodecError::BufferTooSmall {
        needed: available + 1,
        available,
    };
    let n = serde_json_core::to_slice(value, out).map_err(|_| too_small())?;
    let newline = out.get_mut(n).ok_or_else(too_small)?;
    *newline = b'\n';
    Ok(n + 1)
}

/// One telemetry line. IMU values are rounded to two decimals; the `imu`
/// object is omitted when `include_imu` is false.
///
/// `needed` in a `BufferTooSmall` error is a lower bound.
pub fn encode_telemetry_line(
    out: &mut [u8],
    telemetry: &Telemetry,
    seq: u16,
    include_imu: bool,
) -> Result<usize, CodecError> {
    let imu = include_imu.then(|| ImuJson {
        ax: round2(telemetry.accel.x),
        ay: round2(telemetry.accel.y),
        az: round2(telemetry.accel.z),
        gx: round2(telemetry.gyro.x),
        gy: round2(telemetry.gyro.y),
        gz: round2(telemetry.gyro.z),
        temp: telemetry.temperature,
    });
    let line = TelemetryJson {
        seq,
        imu,
        pos: &telemetry.servo.positions,
        off: &telemetry.servo.offsets,
    };
    write_line(out, &line)
}

/// Reply to `{"cmd":"ping"}`: `{"resp":"pong","millis":<uptime>}`.
pub fn encode_pong_line(out: &mut [u8], millis: u32) -> Result<usize, CodecError> {
    write_line(
        out,
        &PongJson {
            resp: "pong",
            millis,
        },
    )
}

/// Splits a byte stream into lines.
///
/// `\n` and `\r` both end a line and empty lines are skipped, so `\r\n` is
/// one terminator. A line longer than `N` bytes is discarded up to its
/// terminator and reported once.
pub struct LineFramer<const N: usize = MAX_LINE_LEN> {
    buf: Vec<u8, N>,
    /// Previous call returned the buffer; clear before the next byte.
    complete: bool,
    /// Inside an overlong line.
    discarding: bool,
    overflows: u32,
}

/// A line exceeded the buffer and was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LineTooLong;

impl<const N: usize> Default for LineFramer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> LineFramer<N> {
    pub const fn new() -> Self {
        Self {
            buf: Vec::new(),
            complete: false,
            discarding: false,
            overflows: 0,
        }
    }

    /// Consume one byte; returns the finished line, if this byte ended one.
    pub fn push(&mut self, byte: u8) -> Option<Result<&[u8], LineTooLong>> {
        if self.complete {
            self.buf.clear();
            self.complete = false;
        }

        if byte == b'\n' || byte == b'\r' {
            if self.discarding {
                self.discarding = false;
                return None;
            }
            if self.buf.is_empty() {
                return None;
            }
            self.complete = true;
            return Some(Ok(self.buf.as_slice()));
        }

        if self.discarding {
            return None;
        }
        if self.buf.push(byte).is_err() {
            self.buf.clear();
            self.discarding = true;
            self.overflows = self.overflows.wrapping_add(1);
            warn!("text: line longer than {} bytes dropped", N);
            return Some(Err(LineTooLong));
        }
        None
    }

    /// Lines dropped for length.
    pub fn overflows(&self) -> u32 {
        self.overflows
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.complete = false;
        self.discarding = false;
    }
}
