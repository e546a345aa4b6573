use ckadlab_common::args::{PostgresArgs, RedisArgs};
use ckadlab_core::OrchestratorArgs;
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct ApiArgs {
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    #[arg(long, env = "JWT_SECRET", required = true)]
    pub jwt_secret: String,

    #[command(flatten)]
    pub postgres: PostgresArgs,

    #[command(flatten)]
    pub redis: RedisArgs,

    #[command(flatten)]
    pub orchestrator: OrchestratorArgs,
}
