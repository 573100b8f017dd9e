//! Configuration types for the Ladder proxy.

mod client;
mod listen;
mod rules;

use std::path::Path;

use serde::{Deserialize, Serialize};

#[allow(unused_imports)]
pub use client::{ClientConfig, PoolConfig};
#[allow(unused_imports)]
pub use listen::{ListenConfig, MetricsConfig, TlsConfig};
#[allow(unused_imports)]
pub use rules::{RequestModifierSpec, ResponseModifierSpec, Rule};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    /// Log every modification step of each exchange at info level
    #[serde(default)]
    pub verbose: bool,
    /// Domain rules, applied in order
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.listen.mount.starts_with('/') || !self.listen.mount.ends_with('/') {
            anyhow::bail!(
                "listen.mount must start and end with '/', got '{}'",
                self.listen.mount
            );
        }

        if self.client.timeout_secs == 0 {
            anyhow::bail!("client.timeout_secs must be greater than zero");
        }

        if self.metrics.enabled && self.metrics.port == self.listen.port {
            anyhow::bail!(
                "metrics.port and listen.port must differ (both are {})",
                self.listen.port
            );
        }

        for (idx, rule) in self.rules.iter().enumerate() {
            if rule.domains.is_empty() {
                anyhow::bail!("rule #{idx} must list at least one domain");
            }
        }

        // Compiling catches bad regexes and header names up front.
        crate::ruleset::RuleSet::compile(&self.rules)?;

        Ok(())
    }
}
