// Chunk-style wire format and JSON payload records for the push protocol.
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

pub const CRLF: &[u8] = b"\r\n";
/// Largest frame the decoder accepts unless the caller configures another cap.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

// Compact dialect type discriminators (`y` key).
pub const TYPE_HEARTBEAT: i32 = 0;
pub const TYPE_MESSAGE: i32 = 3;
pub const TYPE_CHANNEL_MESSAGE: i32 = 4;
pub const TYPE_ACK: i32 = 5;

// Verbose dialect type discriminators (`type` key).
pub const VERBOSE_MESSAGE: &str = "msg";
pub const VERBOSE_ACK: &str = "ack";
pub const VERBOSE_HEARTBEAT: &str = "noop";

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("frame length line is not CRLF terminated")]
    MissingCrlf,
    #[error("malformed frame length line {0:?}")]
    MalformedLength(String),
    #[error("frame too large: {length} bytes (cap {max})")]
    FrameTooLarge { length: usize, max: usize },
    #[error("frame trailer is not CRLF")]
    BadTrailer,
    #[error("incomplete frame")]
    Incomplete,
    #[error("failed to serialize payload")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to deserialize payload")]
    Deserialize(#[source] serde_json::Error),
}

impl Error {
    /// True when the error came from the payload record rather than the framing.
    pub fn is_payload(&self) -> bool {
        matches!(self, Error::Serialize(_) | Error::Deserialize(_))
    }
}

/// Encode `payload` as `<hex-len>\r\n<payload>\r\n`.
///
/// ```
/// let frame = cometload_wire::encode(b"{\"y\":0}");
/// assert_eq!(&frame[..], b"7\r\n{\"y\":0}\r\n");
/// ```
pub fn encode(payload: &[u8]) -> Bytes {
    let header = format!("{:x}", payload.len());
    let mut buf = BytesMut::with_capacity(header.len() + payload.len() + 2 * CRLF.len());
    buf.put_slice(header.as_bytes());
    buf.put_slice(CRLF);
    buf.put_slice(payload);
    buf.put_slice(CRLF);
    buf.freeze()
}

/// Parse a length line as read up to and including `\n`.
///
/// The line must end in CRLF and split on `\r` into exactly two parts; the
/// first part is the payload length in hex. An unparsable length is an error
/// rather than a zero-length read.
pub fn parse_length_line(line: &[u8], max_frame_bytes: usize) -> Result<usize> {
    if !line.ends_with(CRLF) {
        return Err(Error::MissingCrlf);
    }
    let parts: Vec<&[u8]> = line.split(|byte| *byte == b'\r').collect();
    if parts.len() != 2 {
        return Err(Error::MalformedLength(
            String::from_utf8_lossy(line).into_owned(),
        ));
    }
    let digits = std::str::from_utf8(parts[0])
        .map_err(|_| Error::MalformedLength(String::from_utf8_lossy(line).into_owned()))?;
    if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_hexdigit()) {
        return Err(Error::MalformedLength(digits.to_string()));
    }
    let length = u32::from_str_radix(digits, 16)
        .map_err(|_| Error::MalformedLength(digits.to_string()))? as usize;
    if length > max_frame_bytes {
        return Err(Error::FrameTooLarge {
            length,
            max: max_frame_bytes,
        });
    }
    Ok(length)
}

/// The line following a payload must be exactly CRLF.
pub fn check_trailer(line: &[u8]) -> Result<()> {
    if line == CRLF {
        Ok(())
    } else {
        Err(Error::BadTrailer)
    }
}

/// Decode one frame from the front of `input`.
///
/// Returns the payload and the number of bytes consumed, or
/// [`Error::Incomplete`] when `input` ends before the frame does.
pub fn decode(input: &[u8], max_frame_bytes: usize) -> Result<(Bytes, usize)> {
    let line_end = input
        .iter()
        .position(|byte| *byte == b'\n')
        .ok_or(Error::Incomplete)?;
    let length = parse_length_line(&input[..=line_end], max_frame_bytes)?;
    let payload_start = line_end + 1;
    let payload_end = payload_start + length;
    let frame_end = payload_end + CRLF.len();
    if input.len() < frame_end {
        return Err(Error::Incomplete);
    }
    check_trailer(&input[payload_end..frame_end])?;
    Ok((
        Bytes::copy_from_slice(&input[payload_start..payload_end]),
        frame_end,
    ))
}

/// JSON key set spoken by the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// Single-letter keys with numeric type codes.
    #[default]
    Compact,
    /// Spelled-out keys with string type names.
    Verbose,
}

impl Dialect {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "compact" => Some(Self::Compact),
            "verbose" => Some(Self::Verbose),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Verbose => "verbose",
        }
    }
}

/// Data message pushed by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundMessage {
    pub sequence: i64,
    pub recipient: String,
    pub body: String,
    pub sender: String,
}

/// Decoded payload of an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Data(InboundMessage),
    KeepAlive,
}

/// Acknowledgement for the message with `sequence`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundAck {
    pub sequence: i64,
    pub sender: String,
}

#[derive(Deserialize)]
struct CompactInbound {
    #[serde(default)]
    y: Option<i32>,
    #[serde(default)]
    t: String,
    #[serde(default)]
    b: String,
    #[serde(default)]
    s: i64,
    #[serde(default)]
    f: String,
}

#[derive(Deserialize)]
struct VerboseInbound {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    to: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    seq: i64,
    #[serde(default)]
    from: String,
}

#[derive(Serialize)]
struct CompactAck<'a> {
    y: i32,
    f: &'a str,
    s: i64,
}

#[derive(Serialize)]
struct CompactHeartbeat {
    y: i32,
}

#[derive(Serialize)]
struct VerboseAck<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    from: &'a str,
    seq: i64,
}

#[derive(Serialize)]
struct VerboseHeartbeat {
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Decode an inbound payload. Missing keys take their zero value.
pub fn decode_inbound(dialect: Dialect, payload: &[u8]) -> Result<Inbound> {
    match dialect {
        Dialect::Compact => {
            let record: CompactInbound =
                serde_json::from_slice(payload).map_err(Error::Deserialize)?;
            if record.y == Some(TYPE_HEARTBEAT) {
                return Ok(Inbound::KeepAlive);
            }
            Ok(Inbound::Data(InboundMessage {
                sequence: record.s,
                recipient: record.t,
                body: record.b,
                sender: record.f,
            }))
        }
        Dialect::Verbose => {
            let record: VerboseInbound =
                serde_json::from_slice(payload).map_err(Error::Deserialize)?;
            if record.kind.as_deref() == Some(VERBOSE_HEARTBEAT) {
                return Ok(Inbound::KeepAlive);
            }
            Ok(Inbound::Data(InboundMessage {
                sequence: record.seq,
                recipient: record.to,
                body: record.body,
                sender: record.from,
            }))
        }
    }
}

pub fn encode_ack(dialect: Dialect, ack: &OutboundAck) -> Result<Bytes> {
    let payload = match dialect {
        Dialect::Compact => serde_json::to_vec(&CompactAck {
            y: TYPE_ACK,
            f: &ack.sender,
            s: ack.sequence,
        }),
        Dialect::Verbose => serde_json::to_vec(&VerboseAck {
            kind: VERBOSE_ACK,
            from: &ack.sender,
            seq: ack.sequence,
        }),
    }
    .map_err(Error::Serialize)?;
    Ok(Bytes::from(payload))
}

pub fn encode_heartbeat(dialect: Dialect) -> Result<Bytes> {
    let payload = match dialect {
        Dialect::Compact => serde_json::to_vec(&CompactHeartbeat { y: TYPE_HEARTBEAT }),
        Dialect::Verbose => serde_json::to_vec(&VerboseHeartbeat {
            kind: VERBOSE_HEARTBEAT,
        }),
    }
    .map_err(Error::Serialize)?;
    Ok(Bytes::from(payload))
}
