use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{get, post},
};
use ckadlab_common::rate_limit::{RateLimiter, middleware::RateLimitLayer};
use ckadlab_manager::SessionManager;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::args::ApiArgs;
use crate::handlers;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
    /// RATE_LIMIT_AUTH_PER_MINUTE: guards bearer-token verification
    /// attempts specifically, independent of the general request budget.
    pub auth_limiter: Arc<RateLimiter>,
}

pub async fn run_server(args: ApiArgs, state: AppState, general_limiter: RateLimiter) -> Result<()> {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    let app = Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::healthz))
        .route("/sessions/start", post(handlers::start))
        .route("/sessions/status", get(handlers::status))
        .route("/sessions/{id}/extend", post(handlers::extend))
        .route("/sessions/{id}/stop", post(handlers::stop))
        .route("/platform/status", get(handlers::platform_status))
        .layer(RateLimitLayer::new(general_limiter))
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    info!(%addr, "starting orchestrator API");
    let listener = tokio::net::TcpListener::bind(addr).await.context("failed to bind API listener")?;

    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        ckadlab_common::shutdown::shutdown_signal().await;
        info!("shutdown signal received, no longer accepting new sessions");
    });

    // §5: stop accepting new sessions, wait up to 5s for in-flight requests
    // to finish, then exit. New `start` requests are simply never accepted
    // once the listener stops; existing sessions are not torn down and are
    // reconciled by the Reaper's next sweep on restart.
    tokio::select! {
        result = server => result.context("API server failed")?,
        _ = async {
            ckadlab_common::shutdown::shutdown_signal().await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        } => {
            warn!("graceful shutdown grace period elapsed, exiting");
        }
    }
    info!("API server stopped gracefully");
    Ok(())
}
