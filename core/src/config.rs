use std::time::Duration;

use clap::Parser;

/// Session time budget, capacity, and port-range configuration.
///
/// Every field here corresponds to one of the "Configuration (options
/// recognized)" entries; defaults match the documented values.
#[derive(Parser, Debug, Clone)]
pub struct OrchestratorArgs {
    #[arg(long, env = "MAX_CONCURRENT", default_value_t = 8)]
    pub max_concurrent: i64,

    #[arg(long, env = "TTL_MINUTES", default_value_t = 60)]
    pub ttl_minutes: i64,

    #[arg(long, env = "EXTENSION_MINUTES", default_value_t = 30)]
    pub extension_minutes: i64,

    #[arg(long, env = "PORT_RANGE_API_START", default_value_t = 30000)]
    pub port_range_api_start: u16,
    #[arg(long, env = "PORT_RANGE_API_END", default_value_t = 39999)]
    pub port_range_api_end: u16,

    #[arg(long, env = "PORT_RANGE_HTTP_START", default_value_t = 40000)]
    pub port_range_http_start: u16,
    #[arg(long, env = "PORT_RANGE_HTTP_END", default_value_t = 44999)]
    pub port_range_http_end: u16,

    #[arg(long, env = "PORT_RANGE_HTTPS_START", default_value_t = 45000)]
    pub port_range_https_start: u16,
    #[arg(long, env = "PORT_RANGE_HTTPS_END", default_value_t = 49999)]
    pub port_range_https_end: u16,

    #[arg(long, env = "SANDBOX_MEMORY_MIB", default_value_t = 512)]
    pub sandbox_memory_mib: u64,
    #[arg(long, env = "SANDBOX_CPU", default_value_t = 0.5)]
    pub sandbox_cpu: f64,
    #[arg(long, env = "SANDBOX_PID_MAX", default_value_t = 100)]
    pub sandbox_pid_max: u32,

    #[arg(long, env = "RATE_LIMIT_SESSION_START_PER_HOUR", default_value_t = 3)]
    pub rate_limit_session_start_per_hour: i64,
    #[arg(long, env = "RATE_LIMIT_AUTH_PER_MINUTE", default_value_t = 10)]
    pub rate_limit_auth_per_minute: i64,
    #[arg(long, env = "RATE_LIMIT_GENERAL_PER_MINUTE", default_value_t = 100)]
    pub rate_limit_general_per_minute: i64,

    #[arg(long, env = "READINESS_POLL_INTERVAL_SECS", default_value_t = 2)]
    pub readiness_poll_interval_secs: u64,
    #[arg(long, env = "EXPIRE_TICK_SECS", default_value_t = 30)]
    pub expire_tick_secs: u64,
    #[arg(long, env = "SWEEP_TICK_SECS", default_value_t = 300)]
    pub sweep_tick_secs: u64,
    #[arg(long, env = "HEARTBEAT_INTERVAL_SECS", default_value_t = 30)]
    pub heartbeat_interval_secs: u64,

    /// Default assigned-task count on a successful `start` (§4.4 step 5).
    #[arg(long, env = "DEFAULT_TASK_COUNT", default_value_t = 20)]
    pub default_task_count: i64,

    /// Working directory under which cluster-keyed filesystem artifacts
    /// (kubeconfigs, rendered specs) live.
    #[arg(long, env = "WORK_DIR", default_value = "/var/lib/ckadlab")]
    pub work_dir: String,
}

impl OrchestratorArgs {
    pub fn port_range(&self, kind: crate::error::PortKind) -> (u16, u16) {
        use crate::error::PortKind;
        match kind {
            PortKind::Api => (self.port_range_api_start, self.port_range_api_end),
            PortKind::IngressHttp => (self.port_range_http_start, self.port_range_http_end),
            PortKind::IngressHttps => (self.port_range_https_start, self.port_range_https_end),
        }
    }

    pub fn readiness_poll_interval(&self) -> Duration {
        Duration::from_secs(self.readiness_poll_interval_secs)
    }

    pub fn expire_tick(&self) -> Duration {
        Duration::from_secs(self.expire_tick_secs)
    }

    pub fn sweep_tick(&self) -> Duration {
        Duration::from_secs(self.sweep_tick_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn defaults_match_spec() {
        let args = OrchestratorArgs::parse_from(["ckadlab"]);
        assert_eq!(args.max_concurrent, 8);
        assert_eq!(args.ttl_minutes, 60);
        assert_eq!(args.extension_minutes, 30);
        assert_eq!((args.port_range_api_start, args.port_range_api_end), (30000, 39999));
        assert_eq!((args.port_range_http_start, args.port_range_http_end), (40000, 44999));
        assert_eq!(
            (args.port_range_https_start, args.port_range_https_end),
            (45000, 49999)
        );
        assert_eq!(args.sandbox_memory_mib, 512);
        assert_eq!(args.default_task_count, 20);
    }
}
