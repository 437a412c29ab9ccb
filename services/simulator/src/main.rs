// Load simulator entry point.
mod observability;
#[cfg(test)]
mod test_support;

use anyhow::{Context, Result};
use cometload_client::{Registry, SessionConfig};
use simulator::config::SimulatorConfig;
use simulator::{diagnostics, driver};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    run_with_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn run_with_shutdown<F>(shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let session = Arc::new(SessionConfig::from_env_or_yaml(None)?);
    let config = SimulatorConfig::from_env_or_yaml()?;
    let metrics_handle = observability::init_observability(
        "cometload-simulator",
        observability::RunLabels {
            target: session.server_addr,
            clients: config.client_count,
        },
    )?;
    let registry = Arc::new(Registry::new());

    let listener = TcpListener::bind(config.stats_bind)
        .await
        .with_context(|| format!("bind stats listener {}", config.stats_bind))?;
    tracing::info!(addr = %listener.local_addr()?, "stats listener started");
    let app = diagnostics::router(Arc::clone(&registry))
        .merge(observability::metrics_router(metrics_handle));
    let http_task = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app.into_make_service()).await {
            tracing::warn!(error = %err, "stats server exited");
        }
    });

    let clients = driver::register_clients(&registry, &config.user_prefix, config.client_count);
    tracing::info!(
        clients = clients.len(),
        server = %session.server_addr,
        ack_mode = ?session.ack_mode,
        dialect = session.dialect.as_str(),
        "simulator started"
    );
    let token = CancellationToken::new();
    let launcher = tokio::spawn(driver::launch(
        clients,
        session,
        driver::LaunchPlan::from(&config),
        token.clone(),
    ));

    // Block until SIGINT so the clients stay up.
    shutdown.await;
    token.cancel();
    match launcher.await {
        Ok(tasks) => {
            for task in tasks {
                let _ = task.await;
            }
        }
        Err(err) => tracing::warn!(error = %err, "launcher task failed"),
    }
    http_task.abort();

    let aggregate = registry.aggregate();
    tracing::info!(
        users = aggregate.users,
        closed = aggregate.closed,
        accepted = aggregate.totals.messages_accepted,
        acks = aggregate.totals.acks_sent,
        "simulator stopped"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::EnvGuard;
    use serial_test::serial;

    async fn unused_addr() -> Result<String> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        Ok(listener.local_addr()?.to_string())
    }

    #[tokio::test(flavor = "multi_thread")]
    #[serial]
    async fn run_with_shutdown_against_absent_server() -> Result<()> {
        let server = unused_addr().await?;
        let _g0 = EnvGuard::unset("COMETLOAD_CLIENT_CONFIG");
        let _g1 = EnvGuard::unset("COMETLOAD_SIM_CONFIG");
        let _g2 = EnvGuard::set("COMETLOAD_SERVER_ADDR", &server);
        let _g3 = EnvGuard::set("COMETLOAD_SIM_CLIENTS", "2");
        let _g4 = EnvGuard::set("COMETLOAD_SIM_STATS_BIND", "127.0.0.1:0");
        let _g5 = EnvGuard::set("COMETLOAD_SIM_RAMP_PAUSE_MS", "0");
        let _g6 = EnvGuard::unset("COMETLOAD_SIM_RECONNECT");
        run_with_shutdown(async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        })
        .await?;
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn run_with_shutdown_rejects_bad_server_addr() {
        let _g0 = EnvGuard::unset("COMETLOAD_CLIENT_CONFIG");
        let _g1 = EnvGuard::set("COMETLOAD_SERVER_ADDR", "not-an-addr");
        assert!(run_with_shutdown(async {}).await.is_err());
    }
}
