// One TCP connection for one simulated client: dial, login, then the
// receive and send duties until the close guard fires.
use bytes::Bytes;
use cometload_wire::OutboundAck;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Instant;
use tokio::io::BufReader;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::client::state::{ClientState, ClientStatus};
use crate::config::{AckMode, SessionConfig};
use crate::counters::Counter;
use crate::error::{HandshakeError, SessionError};
use crate::handshake;

mod receive;
mod send;

use self::receive::AckSink;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting = 0,
    Authenticating = 1,
    Active = 2,
    Closing = 3,
    Closed = 4,
    Failed = 5,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Authenticating,
            2 => Self::Active,
            3 => Self::Closing,
            4 => Self::Closed,
            _ => Self::Failed,
        }
    }
}

#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: SessionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn store(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Work handed to the send duty.
#[derive(Debug)]
pub(crate) enum Outbound {
    Ack(OutboundAck),
    Heartbeat,
    Payload(Bytes),
}

#[derive(Debug)]
struct CloseGuard {
    closed: AtomicBool,
    session_id: u64,
    client: Arc<ClientState>,
    token: CancellationToken,
    state: Arc<StateCell>,
}

impl CloseGuard {
    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.state.store(SessionState::Closing);
        let current = self.client.is_current(self.session_id);
        if current {
            self.client.request_break();
        }
        self.token.cancel();
        self.client.incr(Counter::Disconnects);
        if current {
            self.client.set_status(ClientStatus::Closed);
        }
        t_gauge!("cometload_active_sessions").decrement(1.0);
        self.state.store(SessionState::Closed);
        tracing::debug!(user = %self.client.user_name(), "session closed");
        true
    }
}

/// Clonable handle that closes one session. Only the first close has any effect.
#[derive(Debug, Clone)]
pub struct SessionCloser(Arc<CloseGuard>);

impl SessionCloser {
    pub fn close(&self) -> bool {
        self.0.close()
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::Acquire)
    }
}

/// Everything a duty needs; cheap to clone into each task.
#[derive(Debug, Clone)]
pub(crate) struct DutyContext {
    pub(crate) client: Arc<ClientState>,
    pub(crate) config: Arc<SessionConfig>,
    pub(crate) token: CancellationToken,
    pub(crate) state: Arc<StateCell>,
    guard: Arc<CloseGuard>,
}

impl DutyContext {
    pub(crate) fn close(&self) -> bool {
        self.guard.close()
    }

    pub(crate) fn should_stop(&self) -> bool {
        self.token.is_cancelled() || self.client.break_requested()
    }
}

/// Dial, log in and start the duties for `client`.
///
/// Any session already attached to `client` is closed first. The returned
/// handle owns the duty tasks; dropping it leaves them running until the
/// connection ends.
pub async fn connect(
    client: Arc<ClientState>,
    config: Arc<SessionConfig>,
) -> Result<SessionHandle, SessionError> {
    client.close_session();
    let session_id = client.begin_session();
    let state = Arc::new(StateCell::new(SessionState::Connecting));
    let pending = PendingConnect {
        client: Arc::clone(&client),
        session_id,
        state: Arc::clone(&state),
        armed: true,
    };

    let stream = match dial(&config).await {
        Ok(stream) => stream,
        Err(err) => {
            client.incr(Counter::DialFailures);
            tracing::warn!(user = %client.user_name(), error = %err, "dial failed");
            return Err(err);
        }
    };

    state.store(SessionState::Authenticating);
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let login_start = Instant::now();
    let login = tokio::time::timeout(
        config.handshake_timeout,
        handshake::login(
            &mut reader,
            &mut write_half,
            client.user_name(),
            client.credential(),
            &config.user_agent,
        ),
    )
    .await
    .unwrap_or(Err(HandshakeError::Timeout(config.handshake_timeout)));
    if let Err(err) = login {
        client.incr(Counter::LoginFailures);
        tracing::warn!(user = %client.user_name(), error = %err, "login failed");
        return Err(err.into());
    }
    client.incr(Counter::LoginSuccesses);
    t_histogram!("cometload_login_seconds").record(login_start.elapsed().as_secs_f64());

    let token = CancellationToken::new();
    let guard = Arc::new(CloseGuard {
        closed: AtomicBool::new(false),
        session_id,
        client: Arc::clone(&client),
        token: token.clone(),
        state: Arc::clone(&state),
    });
    state.store(SessionState::Active);
    if client.is_current(session_id) {
        client.set_status(ClientStatus::Active);
    }
    t_gauge!("cometload_active_sessions").increment(1.0);
    let closer = SessionCloser(Arc::clone(&guard));
    client.attach(closer.clone());
    pending.disarm();
    tracing::debug!(
        user = %client.user_name(),
        ack_mode = ?config.ack_mode,
        dialect = config.dialect.as_str(),
        "session active"
    );

    let ctx = DutyContext {
        client: Arc::clone(&client),
        config: Arc::clone(&config),
        token,
        state: Arc::clone(&state),
        guard,
    };
    let (receive, send, outbound) = match config.ack_mode {
        AckMode::Inline => {
            let receive = tokio::spawn(receive::run(ctx, reader, AckSink::Inline(write_half)));
            (receive, None, None)
        }
        AckMode::Queued => {
            let (tx, rx) = mpsc::channel(config.outbound_queue_depth.max(1));
            let receive = tokio::spawn(receive::run(
                ctx.clone(),
                reader,
                AckSink::<OwnedWriteHalf>::Queued(tx.clone()),
            ));
            let send = tokio::spawn(send::run(ctx, write_half, rx));
            (receive, Some(send), Some(tx))
        }
    };

    Ok(SessionHandle {
        client,
        state,
        closer,
        outbound,
        receive,
        send,
    })
}

/// Fails a connect attempt that ends before its session is attached, whether
/// by error or because the `connect` future was dropped.
struct PendingConnect {
    client: Arc<ClientState>,
    session_id: u64,
    state: Arc<StateCell>,
    armed: bool,
}

impl PendingConnect {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingConnect {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.state.store(SessionState::Failed);
        if self.client.is_current(self.session_id) {
            self.client.set_status(ClientStatus::Closed);
        }
    }
}

async fn dial(config: &SessionConfig) -> Result<TcpStream, SessionError> {
    let addr = config.server_addr;
    let stream = tokio::time::timeout(config.dial_timeout, open_stream(addr, config.local_addr))
        .await
        .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::TimedOut, "dial timed out")))
        .map_err(|source| SessionError::Dial { addr, source })?;
    if let Err(err) = stream.set_nodelay(true) {
        tracing::debug!(error = %err, "set_nodelay failed");
    }
    Ok(stream)
}

async fn open_stream(addr: SocketAddr, local_addr: Option<SocketAddr>) -> io::Result<TcpStream> {
    let Some(local_addr) = local_addr else {
        return TcpStream::connect(addr).await;
    };
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.bind(local_addr)?;
    socket.connect(addr).await
}

/// Control surface of a running session.
#[derive(Debug)]
pub struct SessionHandle {
    client: Arc<ClientState>,
    state: Arc<StateCell>,
    closer: SessionCloser,
    outbound: Option<mpsc::Sender<Outbound>>,
    receive: JoinHandle<Result<(), SessionError>>,
    send: Option<JoinHandle<Result<(), SessionError>>>,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        self.state.load()
    }

    pub fn client(&self) -> &Arc<ClientState> {
        &self.client
    }

    pub fn closer(&self) -> SessionCloser {
        self.closer.clone()
    }

    pub fn close(&self) -> bool {
        self.closer.close()
    }

    /// Queue an application payload behind any pending acks. Needs
    /// [`AckMode::Queued`].
    pub async fn send(&self, payload: Bytes) -> Result<(), SessionError> {
        let Some(outbound) = &self.outbound else {
            return Err(SessionError::SendUnsupported);
        };
        if self.closer.is_closed() {
            return Err(SessionError::Closed);
        }
        outbound
            .send(Outbound::Payload(payload))
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Wait for both duties to finish. A peer close or local close is `Ok`.
    pub async fn wait(self) -> Result<(), SessionError> {
        drop(self.outbound);
        let receive = settle(self.receive.await);
        let send = match self.send {
            Some(send) => settle(send.await),
            None => Ok(()),
        };
        receive.and(send)
    }
}

fn settle(joined: Result<Result<(), SessionError>, JoinError>) -> Result<(), SessionError> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) if err.is_expected_close() => Ok(()),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(SessionError::TaskAborted),
    }
}
