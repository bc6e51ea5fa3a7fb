//! Dashboard: Axum server exposing the operator surface.
//!
//! Read-only status and decision history, plus the two operator actions
//! (emergency stop and reset after halt). CORS enabled for local tooling.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::engine::coordinator::Coordinator;
use routes::AppState;

/// Start the dashboard web server in the background.
pub fn spawn_dashboard(coordinator: Arc<Coordinator>, port: u16) -> Result<()> {
    let app = build_router(coordinator);

    tokio::spawn(async move {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        info!(port, "Dashboard server starting on http://localhost:{port}");

        let listener = match tokio::net::TcpListener::bind(addr)
            .await
            .context("Failed to bind dashboard port")
        {
            Ok(listener) => listener,
            Err(e) => {
                error!(error = %e, port, "Dashboard disabled");
                return;
            }
        };

        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Dashboard server error");
        }
    });

    Ok(())
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/status", get(routes::get_status))
        .route("/api/decisions", get(routes::get_decisions))
        .route("/api/emergency-stop", post(routes::emergency_stop))
        .route("/api/reset", post(routes::reset))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
