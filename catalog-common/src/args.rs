//! Startup configuration, generalized from the teacher's per-backend
//! `*Args` structs (`DatabaseArgs`, `NatsArgs`, ...) into the single
//! configuration surface `spec.md` §6 names for the operator.

use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct OperatorArgs {
    /// Namespace holding the operator's own install (used for
    /// global-namespace catalog resolution and global secret lookups).
    #[arg(long, env = "GLOBAL_NAMESPACE", default_value = "olm")]
    pub global_namespace: String,

    /// Namespaces to watch; empty means all namespaces.
    #[arg(long, env = "WATCHED_NAMESPACES", value_delimiter = ',')]
    pub watched_namespaces: Vec<String>,

    /// Full informer resync period, e.g. "15m", "900s".
    #[arg(long, env = "RESYNC_PERIOD", default_value = "15m", value_parser = parse_duration_arg)]
    pub resync_period: Duration,

    /// Image used for the configmap-backed bundle unpacker job.
    #[arg(
        long,
        env = "CONFIGMAP_UNPACKER_IMAGE",
        default_value = "quay.io/operator-framework/configmap-unpacker:latest"
    )]
    pub configmap_unpacker_image: String,

    /// Max number of completed/failed InstallPlans retained per
    /// subscription-owner-set (`spec.md` §4.3 "Retention policy").
    #[arg(long, env = "INSTALLPLAN_RETENTION_CAP", default_value_t = 5)]
    pub installplan_retention_cap: usize,

    /// Per-call deadline for cluster API requests.
    #[arg(long, env = "API_REQUEST_TIMEOUT", default_value = "30s", value_parser = parse_duration_arg)]
    pub api_request_timeout: Duration,

    /// Namespace used for the leader-election Lease object.
    #[arg(long, env = "NAMESPACE", default_value = "default")]
    pub lease_namespace: String,

    /// Port the `/metrics`, `/healthz`, `/readyz` exporter listens on.
    #[arg(long, env = "METRICS_PORT", default_value_t = 8080)]
    pub metrics_port: u16,

    /// Reconnect backoff ceiling for C1's catalog-source clients
    /// (`spec.md` §4.1).
    #[arg(long, env = "CATALOG_RECONNECT_BACKOFF_CEILING", default_value = "60s", value_parser = parse_duration_arg)]
    pub catalog_reconnect_backoff_ceiling: Duration,
}

fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration::parse(s).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_human_durations() {
        assert_eq!(parse_duration_arg("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration_arg("30s").unwrap(), Duration::from_secs(30));
    }
}
