//! Diagnostics endpoint over the client registry.
//!
//! A single `/stats` route accepts a JSON order and answers in plain text:
//! - `{"type":"single","userName":"<name>"}`: one client's report
//! - `{"type":"total"}`: every client's report, concatenated
//! - `{"type":"stats"}`: totals over all clients that are not closed
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::routing::any;
use cometload_client::Registry;
use serde::Deserialize;
use std::sync::Arc;

pub const ORDER_UNMARSHAL_ERROR: &str = "order unmarshal is error!";

#[derive(Debug, Deserialize)]
struct Order {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "userName", default)]
    user_name: String,
}

pub fn router(registry: Arc<Registry>) -> Router {
    Router::new()
        .route("/stats", any(stats))
        .with_state(registry)
}

async fn stats(State(registry): State<Arc<Registry>>, body: Bytes) -> String {
    render_order(&registry, &body)
}

/// Answer one order against the registry.
pub fn render_order(registry: &Registry, body: &[u8]) -> String {
    let order: Order = match serde_json::from_slice(body) {
        Ok(order) => order,
        Err(err) => {
            tracing::warn!(
                body = %String::from_utf8_lossy(body),
                error = %err,
                "order unmarshal error"
            );
            return ORDER_UNMARSHAL_ERROR.to_string();
        }
    };
    match order.kind.as_str() {
        "single" => registry
            .snapshot(&order.user_name)
            .map(|snapshot| snapshot.to_string())
            .unwrap_or_else(|| format!("no user:{}", order.user_name)),
        "total" => registry
            .snapshots()
            .iter()
            .map(ToString::to_string)
            .collect(),
        "stats" => registry.aggregate().to_string(),
        other => format!("unknown order:{other}"),
    }
}
