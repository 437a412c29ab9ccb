//! Tracing and metrics for the simulator process.
//!
//! Logs go through a `tracing-subscriber` fmt layer filtered by `RUST_LOG`. Spans are
//! also exported over OTLP when an exporter can be installed; otherwise tracing stays
//! local. Engine counters reach Prometheus through the recorder installed here and are
//! served from the stats listener together with the `/live` and `/ready` probes.

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::get;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace as sdktrace;
use std::net::SocketAddr;
#[cfg(test)]
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[cfg(test)]
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// What a simulator run points at; attached to every exported span.
#[derive(Debug, Clone, Copy)]
pub struct RunLabels {
    pub target: SocketAddr,
    pub clients: usize,
}

/// Install the tracing subscriber and the Prometheus recorder.
///
/// Safe to call more than once in tests: the first subscriber and recorder win.
pub fn init_observability(service_name: &str, labels: RunLabels) -> Result<PrometheusHandle> {
    global::set_text_map_propagator(opentelemetry_sdk::propagation::TraceContextPropagator::new());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    match build_tracer_provider(service_name, labels) {
        Some(provider) => {
            let tracer = provider.tracer(service_name.to_string());
            init_subscriber(registry.with(tracing_opentelemetry::layer().with_tracer(tracer)));
        }
        None => init_subscriber(registry),
    }

    install_metrics_recorder()
}

fn build_tracer_provider(
    service_name: &str,
    labels: RunLabels,
) -> Option<opentelemetry_sdk::trace::TracerProvider> {
    let resource = Resource::new(resource_attributes(service_name, labels));
    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(opentelemetry_otlp::new_exporter().tonic())
        .with_trace_config(sdktrace::Config::default().with_resource(resource))
        .install_batch(opentelemetry_sdk::runtime::Tokio)
        .ok()
}

fn resource_attributes(service_name: &str, labels: RunLabels) -> Vec<KeyValue> {
    let mut attrs = vec![
        KeyValue::new("service.name", service_name.to_string()),
        KeyValue::new("cometload.target", labels.target.to_string()),
        KeyValue::new("cometload.clients", labels.clients as i64),
    ];
    let instance = std::env::var("COMETLOAD_INSTANCE_ID").or_else(|_| std::env::var("HOSTNAME"));
    if let Ok(value) = instance {
        attrs.push(KeyValue::new("service.instance.id", value));
    }
    if let Ok(value) = std::env::var("DEPLOYMENT_ENVIRONMENT") {
        attrs.push(KeyValue::new("deployment.environment", value));
    }
    attrs
}

/// Prometheus scrape endpoint plus liveness and readiness probes.
pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(move || async move { handle.render() }))
        .route("/live", get(|| async { "ok" }))
        .route("/ready", get(|| async { "ok" }))
}

fn install_metrics_recorder() -> Result<PrometheusHandle> {
    // Tests share one process-wide recorder.
    #[cfg(test)]
    {
        if let Some(handle) = METRICS_HANDLE.get() {
            return Ok(handle.clone());
        }
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("install metrics recorder")?;
        let _ = METRICS_HANDLE.set(handle.clone());
        Ok(handle)
    }
    #[cfg(not(test))]
    {
        PrometheusBuilder::new()
            .install_recorder()
            .context("install metrics recorder")
    }
}

fn init_subscriber<S>(subscriber: S)
where
    S: tracing::Subscriber + Send + Sync + 'static,
{
    if let Err(err) = subscriber.try_init() {
        tracing::debug!(error = %err, "tracing subscriber already installed");
    }
}
