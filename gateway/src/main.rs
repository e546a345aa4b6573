use anyhow::Result;
use clap::Parser;
use std::sync::Arc;

mod args;
mod connections;
mod protocol;
mod server;

use args::GatewayArgs;
use ckadlab_common::rate_limit::{RateLimiter, RateLimiterConfig};
use ckadlab_core::JwtIdentity;
use ckadlab_drivers::CliSandboxDriver;
use ckadlab_store::SessionStore;
use connections::SupersessionRegistry;
use server::{AppState, run_server};
use tokio_util::sync::CancellationToken;

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

    let args = GatewayArgs::parse();
    let pool = ckadlab_common::postgres::create_pool(args.postgres.clone()).await;
    let redis_pool = ckadlab_common::redis::init_redis(&args.redis).await;
    let store = Arc::new(SessionStore::new(pool));
    let sandbox_driver = Arc::new(CliSandboxDriver::new("ckadlab".to_string()));
    let identity = Arc::new(JwtIdentity::from_hmac_secret(args.jwt_secret.as_bytes()));

    let auth_limiter = Arc::new(single_window_limiter(
        redis_pool.clone(),
        args.orchestrator.rate_limit_auth_per_minute,
        60_000,
        "rl:auth:",
    ));
    let general_limiter = single_window_limiter(redis_pool, args.orchestrator.rate_limit_general_per_minute, 60_000, "rl:general:");

    let state = AppState {
        store,
        sandbox_driver,
        identity,
        registry: SupersessionRegistry::new(),
        heartbeat_interval: args.orchestrator.heartbeat_interval(),
        shutdown: CancellationToken::new(),
        auth_limiter,
    };

    run_server(args, state, general_limiter).await
}
