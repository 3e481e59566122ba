//! marla-api — read-only status API for the controller.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/healthz` | Liveness check |
//! | GET | `/api/v1/decisions?limit=N` | Recent decision records, newest first |
//! | GET | `/api/v1/decisions/latest` | Most recent decision record |
//! | GET | `/api/v1/decisions/{seq}` | One decision record by sequence number |

pub mod handlers;

use std::net::SocketAddr;

use axum::Router;
use axum::routing::get;
use tokio::sync::watch;
use tracing::info;

use marla_state::DecisionLog;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub log: DecisionLog,
}

/// Build the status router.
pub fn build_router(log: DecisionLog) -> Router {
    let api_state = ApiState { log };

    let api_routes = Router::new()
        .route("/decisions", get(handlers::list_decisions))
        .route("/decisions/latest", get(handlers::latest_decision))
        .route("/decisions/{seq}", get(handlers::get_decision))
        .with_state(api_state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
}

/// Serve the router on `bind` until `shutdown` fires.
pub async fn serve(
    bind: SocketAddr,
    log: DecisionLog,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "status API listening");
    axum::serve(listener, build_router(log))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
}
