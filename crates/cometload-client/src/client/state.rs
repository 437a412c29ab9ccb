// State of one simulated user, shared by that user's session tasks and the stats reader.
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicU64, Ordering};

use crate::counters::{ClientCounters, ClientSnapshot, Counter};
use crate::sequence::{self, Classification};
use crate::session::SessionCloser;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Connecting = 0,
    Active = 1,
    Closed = 2,
}

impl ClientStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Active,
            _ => Self::Closed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }
}

/// Created once per identity and kept for the life of the process; counters
/// accumulate across reconnects.
#[derive(Debug)]
pub struct ClientState {
    user_name: String,
    credential: String,
    status: AtomicU8,
    last_seq: AtomicI64,
    break_requested: AtomicBool,
    // Bumped by every connect; a closing session only touches status and the
    // break flag while it is still the current one.
    generation: AtomicU64,
    counters: ClientCounters,
    // Control handle of the attached session; replaced on reconnect.
    attached: Mutex<Option<SessionCloser>>,
}

impl ClientState {
    pub fn new(user_name: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            credential: credential.into(),
            status: AtomicU8::new(ClientStatus::Connecting as u8),
            last_seq: AtomicI64::new(0),
            break_requested: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            counters: ClientCounters::default(),
            attached: Mutex::new(None),
        }
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn credential(&self) -> &str {
        &self.credential
    }

    pub fn status(&self) -> ClientStatus {
        ClientStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn set_status(&self, status: ClientStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub fn last_seq(&self) -> i64 {
        self.last_seq.load(Ordering::Relaxed)
    }

    pub fn counters(&self) -> &ClientCounters {
        &self.counters
    }

    pub(crate) fn incr(&self, counter: Counter) {
        self.counters.incr(counter);
    }

    pub fn break_requested(&self) -> bool {
        self.break_requested.load(Ordering::Acquire)
    }

    pub(crate) fn request_break(&self) {
        self.break_requested.store(true, Ordering::Release);
    }

    /// Start a new connection attempt and return its session id.
    pub(crate) fn begin_session(&self) -> u64 {
        let id = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.break_requested.store(false, Ordering::Release);
        self.set_status(ClientStatus::Connecting);
        id
    }

    pub(crate) fn is_current(&self, session_id: u64) -> bool {
        self.generation.load(Ordering::Acquire) == session_id
    }

    /// Classify an incoming sequence and count it. Only the receive duty of
    /// the attached session calls this, so the load/store pair does not race.
    pub(crate) fn observe_sequence(&self, incoming: i64) -> Classification {
        let current = self.last_seq.load(Ordering::Relaxed);
        let (classification, next) = sequence::observe(current, incoming);
        self.last_seq.store(next, Ordering::Relaxed);
        self.incr(match classification {
            Classification::Accepted => Counter::MessagesAccepted,
            Classification::StaleOrDuplicate => Counter::MessagesStale,
            Classification::OutOfOrderWarning => Counter::MessagesOutOfOrder,
        });
        classification
    }

    /// Attach a new session, closing whatever session was attached before.
    pub(crate) fn attach(&self, closer: SessionCloser) {
        let previous = self.attached.lock().replace(closer);
        if let Some(previous) = previous {
            previous.close();
        }
    }

    /// Close the attached session, if any. Returns true when this call closed it.
    pub fn close_session(&self) -> bool {
        let closer = self.attached.lock().clone();
        closer.is_some_and(|closer| closer.close())
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        ClientSnapshot {
            user_name: self.user_name.clone(),
            credential: self.credential.clone(),
            status: self.status().as_str(),
            last_seq: self.last_seq(),
            counters: self.counters.snapshot(),
        }
    }
}
