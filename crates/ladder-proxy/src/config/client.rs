//! Outbound client and chain pool configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Bound on the whole upstream round trip, body download included.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,

    #[serde(default = "default_pool_max_idle_per_host")]
    pub max_idle_per_host: usize,

    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,

    /// Skip TLS certificate verification (for self-signed certs in dev/test)
    #[serde(default)]
    pub tls_skip_verify: bool,
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            pool_idle_timeout_secs: default_pool_idle_timeout(),
            max_idle_per_host: default_pool_max_idle_per_host(),
            keepalive_secs: default_keepalive(),
            tls_skip_verify: false,
        }
    }
}

fn default_timeout() -> u64 {
    15
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_pool_max_idle_per_host() -> usize {
    32
}

fn default_keepalive() -> u64 {
    60
}

/// How many idle chains the server keeps around for reuse.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    #[serde(default = "default_max_idle_chains")]
    pub max_idle: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle: default_max_idle_chains(),
        }
    }
}

fn default_max_idle_chains() -> usize {
    64
}
