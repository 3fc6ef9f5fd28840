//! HTTP server initialization and routing

use axum::extract::DefaultBodyLimit;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_cookies::CookieManagerLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::analytics::configure_report_routes;
use crate::auth::configure_auth_routes;
use crate::core::shared::state::AppState;
use crate::directory::configure_directory_routes;
use crate::notifications::configure_notification_routes;
use crate::security::create_cors_layer;
use crate::tickets::configure_request_routes;

use super::{health_check, health_check_simple, shutdown_signal};

/// The full application router, layers included.
pub fn build_router(app_state: Arc<AppState>) -> Router {
    let cors = create_cors_layer(
        &app_state.config.cors_allowed_origins,
        app_state.config.is_production(),
    );
    let body_limit = app_state.config.storage.max_upload_bytes;

    Router::new()
        .route("/health", get(health_check_simple))
        .route("/api/health", get(health_check))
        .merge(configure_auth_routes())
        .merge(configure_directory_routes())
        .merge(configure_request_routes())
        .merge(configure_notification_routes())
        .merge(configure_report_routes())
        .with_state(app_state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CookieManagerLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn run_axum_server(app_state: Arc<AppState>) -> std::io::Result<()> {
    let host = app_state.config.server.host.clone();
    let port = app_state.config.server.port;
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let app = build_router(app_state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {addr}: {e} - is another instance running?");
            return Err(e);
        }
    };
    info!("HTTP server listening on {addr}");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(std::io::Error::other)
}
