use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Parameters of the per-tablet health stream monitors.
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct HealthCheckConfig {
    /// Wait before retrying a failed connection, in milliseconds. Doubled
    /// after every silent retry, capped at `health_check_timeout_ms`.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Freshness window in milliseconds: a tablet whose stream stays silent
    /// longer than this is flagged non-serving.
    #[serde(default = "default_health_check_timeout_ms")]
    pub health_check_timeout_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: default_retry_delay_ms(),
            health_check_timeout_ms: default_health_check_timeout_ms(),
        }
    }
}

impl HealthCheckConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry_delay_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "healthcheck: retry_delay_ms cannot be 0".to_string(),
            )));
        }
        if self.health_check_timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "healthcheck: health_check_timeout_ms cannot be 0".to_string(),
            )));
        }
        if self.retry_delay_ms > self.health_check_timeout_ms {
            return Err(Error::Config(ConfigError::Message(format!(
                "healthcheck: retry_delay_ms({}) must not exceed health_check_timeout_ms({})",
                self.retry_delay_ms, self.health_check_timeout_ms
            ))));
        }
        Ok(())
    }
}

fn default_retry_delay_ms() -> u64 {
    crate::constants::DEFAULT_RETRY_DELAY.as_millis() as u64
}

fn default_health_check_timeout_ms() -> u64 {
    crate::constants::DEFAULT_HEALTH_CHECK_TIMEOUT.as_millis() as u64
}
