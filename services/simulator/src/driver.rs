//! Starts simulated clients in ramped batches and keeps them connected.
use cometload_client::{ClientState, Registry, SessionConfig, connect};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SimulatorConfig;

/// How clients are brought up and what happens when their session ends.
#[derive(Debug, Clone, Copy)]
pub struct LaunchPlan {
    pub ramp_batch: usize,
    pub ramp_pause: Duration,
    pub reconnect_delay: Option<Duration>,
}

impl From<&SimulatorConfig> for LaunchPlan {
    fn from(config: &SimulatorConfig) -> Self {
        Self {
            ramp_batch: config.ramp_batch,
            ramp_pause: config.ramp_pause(),
            reconnect_delay: config.reconnect_delay(),
        }
    }
}

pub fn user_name(prefix: &str, index: usize) -> String {
    format!("{prefix}_{index}")
}

/// Register `count` users whose credential is their own name.
pub fn register_clients(registry: &Registry, prefix: &str, count: usize) -> Vec<Arc<ClientState>> {
    (0..count)
        .map(|index| {
            let name = user_name(prefix, index);
            registry.register(&name, &name)
        })
        .collect()
}

/// Spawn one driver task per client, pausing after every full batch.
///
/// Returns once every client has been started or `shutdown` fires.
pub async fn launch(
    clients: Vec<Arc<ClientState>>,
    session: Arc<SessionConfig>,
    plan: LaunchPlan,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let total = clients.len();
    let batch = plan.ramp_batch.max(1);
    let mut tasks = Vec::with_capacity(total);
    for (index, client) in clients.into_iter().enumerate() {
        if shutdown.is_cancelled() {
            break;
        }
        tasks.push(tokio::spawn(drive_client(
            client,
            Arc::clone(&session),
            plan.reconnect_delay,
            shutdown.clone(),
        )));
        let started = index + 1;
        if started % batch == 0 && started < total && !plan.ramp_pause.is_zero() {
            tracing::info!(started, total, "ramp pause");
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(plan.ramp_pause) => {}
            }
        }
    }
    tasks
}

/// Keep one client connected until `shutdown`, reconnecting after
/// `reconnect_delay` when set.
pub async fn drive_client(
    client: Arc<ClientState>,
    session: Arc<SessionConfig>,
    reconnect_delay: Option<Duration>,
    shutdown: CancellationToken,
) {
    loop {
        let connected = tokio::select! {
            _ = shutdown.cancelled() => return,
            connected = connect(Arc::clone(&client), Arc::clone(&session)) => connected,
        };
        match connected {
            Ok(handle) => {
                let closer = handle.closer();
                let wait = handle.wait();
                tokio::pin!(wait);
                let result = tokio::select! {
                    _ = shutdown.cancelled() => {
                        closer.close();
                        let _ = wait.await;
                        return;
                    }
                    result = &mut wait => result,
                };
                if let Err(err) = result {
                    tracing::debug!(user = %client.user_name(), error = %err, "session ended");
                }
            }
            Err(err) => {
                tracing::debug!(user = %client.user_name(), error = %err, "connect failed");
            }
        }
        let Some(delay) = reconnect_delay else {
            return;
        };
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cometload_client::{ClientStatus, Counter};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    #[test]
    fn register_clients_names_and_credentials() {
        let registry = Registry::new();
        let clients = register_clients(&registry, "load", 3);
        assert_eq!(clients.len(), 3);
        assert_eq!(clients[2].user_name(), "load_2");
        assert_eq!(clients[2].credential(), "load_2");
        assert_eq!(registry.len(), 3);
        let again = register_clients(&registry, "load", 2);
        assert!(Arc::ptr_eq(&clients[1], &again[1]));
    }

    #[tokio::test]
    async fn failed_dial_without_reconnect_gives_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let client = Arc::new(ClientState::new("u", "u"));
        drive_client(
            Arc::clone(&client),
            Arc::new(SessionConfig::new(addr)),
            None,
            CancellationToken::new(),
        )
        .await;
        assert_eq!(client.counters().get(Counter::DialFailures), 1);
    }

    #[tokio::test]
    async fn reconnects_until_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        // Each connection logs in and is closed by the server right away.
        let server = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let (read_half, mut write_half) = stream.into_split();
                let mut reader = BufReader::new(read_half);
                loop {
                    let mut line = String::new();
                    match reader.read_line(&mut line).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) if line == "\r\n" => break,
                        Ok(_) => {}
                    }
                }
                let _ = write_half.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await;
            }
        });

        let client = Arc::new(ClientState::new("u", "u"));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(drive_client(
            Arc::clone(&client),
            Arc::new(SessionConfig::new(addr)),
            Some(Duration::from_millis(10)),
            shutdown.clone(),
        ));
        tokio::time::timeout(Duration::from_secs(5), async {
            while client.counters().get(Counter::LoginSuccesses) < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("reconnects");
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("driver stops")
            .expect("join");
        server.abort();
        assert!(client.counters().get(Counter::Disconnects) >= 2);
        assert_ne!(client.status(), ClientStatus::Active);
    }

    #[tokio::test]
    async fn launch_ramps_and_stops_on_shutdown() {
        let registry = Registry::new();
        let clients = register_clients(&registry, "ramp", 5);
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let session = Arc::new(SessionConfig::new(listener.local_addr().expect("addr")));
        drop(listener);
        let shutdown = CancellationToken::new();
        let plan = LaunchPlan {
            ramp_batch: 2,
            ramp_pause: Duration::from_secs(60),
            reconnect_delay: None,
        };
        let launcher = tokio::spawn(launch(clients, session, plan, shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        let tasks = tokio::time::timeout(Duration::from_secs(5), launcher)
            .await
            .expect("launcher stops")
            .expect("join");
        assert_eq!(tasks.len(), 2);
        for task in tasks {
            task.await.expect("driver");
        }
    }
}
