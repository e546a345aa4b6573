use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

mod args;
mod error;
mod handlers;
mod models;
mod server;

use args::ApiArgs;
use ckadlab_common::rate_limit::{RateLimiter, RateLimiterConfig};
use ckadlab_core::JwtIdentity;
use ckadlab_drivers::{CliClusterDriver, CliSandboxDriver};
use ckadlab_manager::{Reaper, SessionManager};
use ckadlab_store::{PgTaskCatalog, PortAllocator, SessionStore, init_schema};
use server::{AppState, run_server};

/// One limiter per named rate-limit policy (§6), all Redis-backed via the
/// same sliding-window-log script, only the window/limit/prefix differ.
fn single_window_limiter(redis_pool: deadpool_redis::Pool, limit: i64, window_ms: i64, prefix: &str) -> RateLimiter {
    RateLimiter::new(
        redis_pool,
        RateLimiterConfig {
            burst_limit: limit,
            burst_window_ms: window_ms,
            long_limit: limit,
            long_window_ms: window_ms,
            max_list_size: limit.max(1) + 8,
            key_prefix: prefix.to_string(),
        },
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    ckadlab_common::init();
    tracing_subscriber::fmt::init();
    ckadlab_common::metrics::maybe_spawn_metrics_server();

    let args = ApiArgs::parse();
    let pool = ckadlab_common::postgres::create_pool(args.postgres.clone()).await;
    init_schema(&pool).await.context("failed to initialize database schema")?;
    let redis_pool = ckadlab_common::redis::init_redis(&args.redis).await;

    let store = Arc::new(SessionStore::new(pool.clone()));
    let ports = Arc::new(PortAllocator::new(pool.clone()));
    let cluster_driver = Arc::new(CliClusterDriver::new(
        args.orchestrator.work_dir.clone(),
        args.orchestrator.readiness_poll_interval(),
        "ckadlab".to_string(),
    ));
    let sandbox_driver = Arc::new(CliSandboxDriver::new("ckadlab".to_string()));
    let tasks = Arc::new(PgTaskCatalog::new(pool));
    let identity = Arc::new(JwtIdentity::from_hmac_secret(args.jwt_secret.as_bytes()));
    let config = Arc::new(args.orchestrator.clone());

    let start_limiter = Arc::new(single_window_limiter(
        redis_pool.clone(),
        config.rate_limit_session_start_per_hour,
        3_600_000,
        "rl:start:",
    ));
    let auth_limiter = Arc::new(single_window_limiter(
        redis_pool.clone(),
        config.rate_limit_auth_per_minute,
        60_000,
        "rl:auth:",
    ));
    let general_limiter = single_window_limiter(redis_pool, config.rate_limit_general_per_minute, 60_000, "rl:general:");

    let manager = Arc::new(SessionManager::new(
        store,
        ports,
        cluster_driver,
        sandbox_driver,
        tasks,
        identity,
        config.clone(),
        Some(start_limiter),
    ));

    let reaper = Arc::new(Reaper::new(manager.clone(), config.expire_tick(), config.sweep_tick()));
    let cancel = CancellationToken::new();
    let (expire_handle, sweep_handle) = reaper.spawn(cancel.clone());

    let state = AppState { manager, auth_limiter };
    let result = run_server(args, state, general_limiter).await;

    cancel.cancel();
    let _ = expire_handle.await;
    let _ = sweep_handle.await;

    result
}
