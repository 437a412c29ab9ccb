// Protocol client engine for simulating many push-notification clients.
//
// SESSION STRUCTURE
// -----------------
// Each simulated user owns one `ClientState` in a shared `Registry`. A session
// is one TCP connection for that user: dial, HTTP-shaped login, then framed
// traffic until either side closes.
//
// - The read half belongs to the receive duty and the write half to exactly
//   one writer: the receive duty itself in inline ack mode, or the send duty
//   in queued mode. No half is ever shared between tasks.
// - Shutdown goes through a single-use close guard: it cancels the session's
//   token, counts the disconnect once, and marks the client closed. Every duty
//   races the token in `select!`, so closing never waits on a blocked read.
// - Counters are relaxed atomics. Aggregate reports are best-effort scans.
//
// Reconnecting means calling `connect` again with the same `ClientState`;
// counters and the last sequence survive, the old session is closed first.
#[macro_use]
mod macros;

pub mod client;
pub mod config;
pub mod counters;
pub mod error;
pub mod handshake;
pub mod sequence;
pub mod session;
mod wire;

pub use client::registry::Registry;
pub use client::state::{ClientState, ClientStatus};
pub use cometload_wire::{Dialect, InboundMessage, OutboundAck};
pub use config::{AckMode, SessionConfig};
pub use counters::{AggregateSnapshot, ClientSnapshot, Counter, CountersSnapshot};
pub use error::{HandshakeError, SessionError};
pub use sequence::Classification;
pub use session::{SessionCloser, SessionHandle, SessionState, connect};
