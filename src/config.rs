use std::time::Duration;

use crate::resp::RespLimits;

pub const DEFAULT_PORT: u16 = 6379;
pub const DEFAULT_METRICS_PORT: u16 = 9090;
/// Expiry applied by a plain `SET`: two hours.
pub const DEFAULT_TTL_MS: u64 = 2 * 60 * 60 * 1000;
pub const DEFAULT_MAX_CLIENTS: usize = 10_000;
pub const DEFAULT_MAX_RESP_ARGS: usize = 1024 * 1024;
pub const DEFAULT_MAX_RESP_BULK_LEN: usize = 512 * 1024 * 1024; // 512 MiB
pub const DEFAULT_MAX_RESP_LINE_LEN: usize = 64 * 1024;
pub const DEFAULT_MAX_RESP_DEPTH: usize = 128;

pub struct Config {
    pub port: u16,
    pub host: String,
    /// Port for the Prometheus exporter. `0` disables it.
    pub metrics_port: u16,
    pub metrics_host: String,
    /// Expiry in milliseconds applied by `SET key value`. `0` stores keys
    /// without expiry.
    pub default_ttl_ms: u64,
    pub max_clients: usize,
    pub max_array_len: usize,
    pub max_bulk_len: usize,
    pub max_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            host: "0.0.0.0".to_string(),
            metrics_port: DEFAULT_METRICS_PORT,
            metrics_host: "0.0.0.0".to_string(),
            default_ttl_ms: DEFAULT_TTL_MS,
            max_clients: DEFAULT_MAX_CLIENTS,
            max_array_len: DEFAULT_MAX_RESP_ARGS,
            max_bulk_len: DEFAULT_MAX_RESP_BULK_LEN,
            max_depth: DEFAULT_MAX_RESP_DEPTH,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var("KVQ_PORT").ok().as_deref(),
            std::env::var("KVQ_HOST").ok().as_deref(),
            std::env::var("KVQ_METRICS_PORT").ok().as_deref(),
            std::env::var("KVQ_METRICS_HOST").ok().as_deref(),
            std::env::var("KVQ_DEFAULT_TTL_MS").ok().as_deref(),
            std::env::var("KVQ_MAX_CLIENTS").ok().as_deref(),
            std::env::var("KVQ_MAX_ARRAY_LEN").ok().as_deref(),
            std::env::var("KVQ_MAX_BULK_LEN").ok().as_deref(),
            std::env::var("KVQ_MAX_DEPTH").ok().as_deref(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn from_vars(
        port: Option<&str>,
        host: Option<&str>,
        metrics_port: Option<&str>,
        metrics_host: Option<&str>,
        default_ttl_ms: Option<&str>,
        max_clients: Option<&str>,
        max_array_len: Option<&str>,
        max_bulk_len: Option<&str>,
        max_depth: Option<&str>,
    ) -> Self {
        let defaults = Self::default();
        Self {
            port: port
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            host: host
                .map(|s| s.to_string())
                .unwrap_or(defaults.host),
            metrics_port: metrics_port
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.metrics_port),
            metrics_host: metrics_host
                .map(|s| s.to_string())
                .unwrap_or(defaults.metrics_host),
            default_ttl_ms: default_ttl_ms
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.default_ttl_ms),
            max_clients: max_clients
                .and_then(|s| s.parse().ok())
                .filter(|&n| n > 0)
                .unwrap_or(defaults.max_clients),
            max_array_len: max_array_len
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_array_len),
            max_bulk_len: max_bulk_len
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_bulk_len),
            max_depth: max_depth
                .and_then(|s| s.parse().ok())
                .filter(|&n| n > 0)
                .unwrap_or(defaults.max_depth),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn metrics_listen_addr(&self) -> Option<String> {
        (self.metrics_port != 0).then(|| format!("{}:{}", self.metrics_host, self.metrics_port))
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        (self.default_ttl_ms != 0).then(|| Duration::from_millis(self.default_ttl_ms))
    }

    pub fn resp_limits(&self) -> RespLimits {
        RespLimits {
            max_array_len: self.max_array_len,
            max_bulk_len: self.max_bulk_len,
            max_depth: self.max_depth,
            ..RespLimits::default()
        }
    }
}
