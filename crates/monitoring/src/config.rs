use std::time::Duration;

use fleet_events::{BrokerConfig, ConsumerConfig};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} has an invalid value: {value}")]
    Invalid { var: &'static str, value: String },
}

/// Monitoring service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    pub database_url: String,
    /// Durable queue the service consumes device events from.
    pub queue: String,
    /// Binding patterns for [`Self::queue`].
    pub routing_keys: Vec<String>,
    /// Time in-flight evaluations get to finish on shutdown.
    pub shutdown_grace: Duration,
}

impl MonitoringConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                    |
    /// |---------------------------|----------------------------|
    /// | `DATABASE_URL`            | required                   |
    /// | `MONITORING_QUEUE`        | `monitoring.device-events` |
    /// | `MONITORING_ROUTING_KEYS` | `device.#`                 |
    /// | `SHUTDOWN_GRACE_SECS`     | `10`                       |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let queue = lookup("MONITORING_QUEUE").unwrap_or_else(|| "monitoring.device-events".into());

        let routing_keys: Vec<String> = lookup("MONITORING_ROUTING_KEYS")
            .unwrap_or_else(|| "device.#".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if routing_keys.is_empty() {
            return Err(ConfigError::Invalid {
                var: "MONITORING_ROUTING_KEYS",
                value: String::new(),
            });
        }

        let grace_raw = lookup("SHUTDOWN_GRACE_SECS").unwrap_or_else(|| "10".into());
        let shutdown_grace_secs: u64 =
            grace_raw.trim().parse().map_err(|_| ConfigError::Invalid {
                var: "SHUTDOWN_GRACE_SECS",
                value: grace_raw.clone(),
            })?;

        Ok(Self {
            database_url,
            queue,
            routing_keys,
            shutdown_grace: Duration::from_secs(shutdown_grace_secs),
        })
    }

    /// Consumer settings for the device-event queue.
    ///
    /// Prefetch and reconnect backoff come from the broker configuration.
    pub fn consumer_config(&self, broker: &BrokerConfig) -> ConsumerConfig {
        let mut config = ConsumerConfig::new(self.queue.clone(), self.routing_keys.clone());
        config.prefetch_count = broker.prefetch_count;
        config.shutdown_grace = self.shutdown_grace;
        config.reconnect = broker.reconnect.clone();
        config
    }
}
