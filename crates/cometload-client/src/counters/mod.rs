// Per-client event counters, their snapshots, and the text reports built from them.
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// One countable session event. Every event increments exactly one counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    MessagesAccepted,
    MessagesStale,
    MessagesOutOfOrder,
    AcksSent,
    HeartbeatsSent,
    HeartbeatsReceived,
    LoginSuccesses,
    LoginFailures,
    DialFailures,
    Disconnects,
    MalformedPayloads,
}

impl Counter {
    pub fn metric_name(self) -> &'static str {
        match self {
            Self::MessagesAccepted => "cometload_messages_accepted_total",
            Self::MessagesStale => "cometload_messages_stale_total",
            Self::MessagesOutOfOrder => "cometload_messages_out_of_order_total",
            Self::AcksSent => "cometload_acks_sent_total",
            Self::HeartbeatsSent => "cometload_heartbeats_sent_total",
            Self::HeartbeatsReceived => "cometload_heartbeats_received_total",
            Self::LoginSuccesses => "cometload_login_successes_total",
            Self::LoginFailures => "cometload_login_failures_total",
            Self::DialFailures => "cometload_dial_failures_total",
            Self::Disconnects => "cometload_disconnects_total",
            Self::MalformedPayloads => "cometload_malformed_payloads_total",
        }
    }
}

#[derive(Default, Debug)]
pub struct ClientCounters {
    messages_accepted: AtomicU64,
    messages_stale: AtomicU64,
    messages_out_of_order: AtomicU64,
    acks_sent: AtomicU64,
    heartbeats_sent: AtomicU64,
    heartbeats_received: AtomicU64,
    login_successes: AtomicU64,
    login_failures: AtomicU64,
    dial_failures: AtomicU64,
    disconnects: AtomicU64,
    malformed_payloads: AtomicU64,
}

impl ClientCounters {
    fn cell(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::MessagesAccepted => &self.messages_accepted,
            Counter::MessagesStale => &self.messages_stale,
            Counter::MessagesOutOfOrder => &self.messages_out_of_order,
            Counter::AcksSent => &self.acks_sent,
            Counter::HeartbeatsSent => &self.heartbeats_sent,
            Counter::HeartbeatsReceived => &self.heartbeats_received,
            Counter::LoginSuccesses => &self.login_successes,
            Counter::LoginFailures => &self.login_failures,
            Counter::DialFailures => &self.dial_failures,
            Counter::Disconnects => &self.disconnects,
            Counter::MalformedPayloads => &self.malformed_payloads,
        }
    }

    pub(crate) fn incr(&self, counter: Counter) {
        self.cell(counter).fetch_add(1, Ordering::Relaxed);
        t_counter!(counter.metric_name()).increment(1);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.cell(counter).load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            messages_accepted: self.get(Counter::MessagesAccepted),
            messages_stale: self.get(Counter::MessagesStale),
            messages_out_of_order: self.get(Counter::MessagesOutOfOrder),
            acks_sent: self.get(Counter::AcksSent),
            heartbeats_sent: self.get(Counter::HeartbeatsSent),
            heartbeats_received: self.get(Counter::HeartbeatsReceived),
            login_successes: self.get(Counter::LoginSuccesses),
            login_failures: self.get(Counter::LoginFailures),
            dial_failures: self.get(Counter::DialFailures),
            disconnects: self.get(Counter::Disconnects),
            malformed_payloads: self.get(Counter::MalformedPayloads),
        }
    }
}

/// Point-in-time copy of one client's counters. Fields are read one by one,
/// so a snapshot taken while the session runs is not linearizable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub messages_accepted: u64,
    pub messages_stale: u64,
    pub messages_out_of_order: u64,
    pub acks_sent: u64,
    pub heartbeats_sent: u64,
    pub heartbeats_received: u64,
    pub login_successes: u64,
    pub login_failures: u64,
    pub dial_failures: u64,
    pub disconnects: u64,
    pub malformed_payloads: u64,
}

impl CountersSnapshot {
    pub(crate) fn accumulate(&mut self, other: &CountersSnapshot) {
        self.messages_accepted += other.messages_accepted;
        self.messages_stale += other.messages_stale;
        self.messages_out_of_order += other.messages_out_of_order;
        self.acks_sent += other.acks_sent;
        self.heartbeats_sent += other.heartbeats_sent;
        self.heartbeats_received += other.heartbeats_received;
        self.login_successes += other.login_successes;
        self.login_failures += other.login_failures;
        self.dial_failures += other.dial_failures;
        self.disconnects += other.disconnects;
        self.malformed_payloads += other.malformed_payloads;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSnapshot {
    pub user_name: String,
    pub credential: String,
    pub status: &'static str,
    pub last_seq: i64,
    pub counters: CountersSnapshot,
}

impl fmt::Display for ClientSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counters;
        writeln!(f, "userName:{}", self.user_name)?;
        writeln!(f, "pass:{}", self.credential)?;
        writeln!(f, "err:{}", c.messages_stale)?;
        writeln!(f, "warn:{}", c.messages_out_of_order)?;
        writeln!(f, "succ:{}", c.messages_accepted)?;
        writeln!(f, "lastSeq:{}", self.last_seq)?;
        writeln!(f, "loginNum:{}", c.login_successes)?;
        writeln!(f, "loginErr:{}", c.login_failures)?;
        writeln!(f, "dialErr:{}", c.dial_failures)?;
        writeln!(f, "sendHeartBeatSucc:{}", c.heartbeats_sent)?;
        writeln!(f, "recvHeartBeat:{}", c.heartbeats_received)?;
        writeln!(f, "Unconnect:{}", c.disconnects)?;
        writeln!(f, "ackSucc:{}", c.acks_sent)?;
        writeln!(f, "status:{}", self.status)?;
        writeln!(f, "jsonErr:{}", c.malformed_payloads)
    }
}

/// Totals over every registered client. Closed clients are counted in
/// `closed` and left out of `totals`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateSnapshot {
    pub users: u64,
    pub closed: u64,
    pub totals: CountersSnapshot,
}

impl fmt::Display for AggregateSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.totals;
        writeln!(f, "userNums:{}", self.users)?;
        writeln!(f, "err:{}", c.messages_stale)?;
        writeln!(f, "warn:{}", c.messages_out_of_order)?;
        writeln!(f, "succ:{}", c.messages_accepted)?;
        writeln!(f, "closed:{}", self.closed)?;
        writeln!(f, "loginErr:{}", c.login_failures)?;
        writeln!(f, "dialErr:{}", c.dial_failures)?;
        writeln!(f, "jsonErr:{}", c.malformed_payloads)?;
        writeln!(f, "loginNum:{}", c.login_successes)?;
        writeln!(f, "sendHeartBeatSucc:{}", c.heartbeats_sent)?;
        writeln!(f, "recvHeartBeat:{}", c.heartbeats_received)?;
        writeln!(f, "Unconnect:{}", c.disconnects)?;
        writeln!(f, "ackSucc:{}", c.acks_sent)
    }
}
