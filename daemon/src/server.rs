//! Local scrape endpoint
//!
//! Serves a Prometheus registry for scraping. The handler only reads the
//! registry; the probe loop stays the single writer.

use crate::exporter::encode_registry;
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use log::{error, info};
use prometheus::{Registry, TEXT_FORMAT};
use tokio::net::TcpListener;

/// Expand `:9356` style addresses to all interfaces
pub fn normalize_listen_address(address: &str) -> String {
    if address.starts_with(':') {
        format!("0.0.0.0{}", address)
    } else {
        address.to_string()
    }
}

/// Router exposing the registry under `path`
pub fn router(path: &str, registry: Registry) -> Router {
    Router::new()
        .route(path, get(metrics_handler))
        .with_state(registry)
}

async fn metrics_handler(State(registry): State<Registry>) -> Response {
    match encode_registry(&registry) {
        Ok(body) => ([(CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Bind `address` and serve until the task is dropped
pub async fn serve(address: &str, path: &str, registry: Registry) -> Result<()> {
    let address = normalize_listen_address(address);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind metrics listener: {}", address))?;
    serve_listener(listener, path, registry).await
}

/// Serve on an already bound listener
pub async fn serve_listener(
    listener: TcpListener,
    path: &str,
    registry: Registry,
) -> Result<()> {
    info!("Providing metrics at {}{}", listener.local_addr()?, path);
    axum::serve(listener, router(path, registry))
        .await
        .context("Metrics server stopped")
}
