use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use veil_dns_infrastructure::dns::{CacheMetrics, MessageCache};

/// Shared state for the debug endpoint.
#[derive(Clone)]
pub struct DebugState {
    pub cache: Arc<MessageCache>,
    pub started: Instant,
}

#[derive(Serialize)]
struct DebugStats {
    cache_metrics: CacheMetrics,
    cache_len: usize,
    cache_cap: usize,
    uptime: String,
}

async fn server_stats(State(state): State<DebugState>) -> Json<DebugStats> {
    Json(DebugStats {
        cache_metrics: state.cache.metrics(),
        cache_len: state.cache.len(),
        cache_cap: state.cache.cap(),
        uptime: format!("{:?}", state.started.elapsed()),
    })
}

/// Serves `/debug/server` on localhost only. Failures here are logged, not
/// fatal: the debug endpoint is an operator convenience.
pub async fn serve(port: u16, state: DebugState) {
    let app = Router::new()
        .route("/debug/server", get(server_stats))
        .with_state(state);
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %addr, error = %e, "failed to bind debug endpoint");
            return;
        }
    };
    info!(addr = %addr, "debug endpoint listening");
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "debug endpoint error");
    }
}
