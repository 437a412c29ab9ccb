// Error taxonomy for one simulated client session.
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum HandshakeError {
    #[error("login rejected, status line {status_line:?}")]
    Rejected { status_line: String },
    #[error("connection closed during login")]
    Closed,
    #[error("login response head exceeds {0} bytes")]
    HeadTooLarge(usize),
    #[error("login io error")]
    Io(#[source] io::Error),
    #[error("login timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("dial {addr} failed")]
    Dial {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    #[error("malformed frame")]
    Framing(#[source] cometload_wire::Error),
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("read failed")]
    Read(#[source] io::Error),
    #[error("write failed after {attempts} attempts")]
    Write {
        attempts: u32,
        #[source]
        source: io::Error,
    },
    #[error("malformed payload")]
    PayloadDecode(#[source] cometload_wire::Error),
    #[error("session is closed")]
    Closed,
    #[error("outbound sends need the queued ack mode")]
    SendUnsupported,
    #[error("session task aborted")]
    TaskAborted,
}

impl SessionError {
    /// Frame or payload could not be parsed; the stream may be desynchronised.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Framing(_) | Self::PayloadDecode(_))
    }

    /// Expected terminal conditions that are not counted as anomalies.
    pub fn is_expected_close(&self) -> bool {
        matches!(self, Self::ConnectionClosed | Self::Closed)
    }
}

impl From<cometload_wire::Error> for SessionError {
    fn from(err: cometload_wire::Error) -> Self {
        if err.is_payload() {
            Self::PayloadDecode(err)
        } else {
            Self::Framing(err)
        }
    }
}
