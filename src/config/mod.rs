//! Configuration for the discovery subsystem.
//!
//! Hierarchical loading with:
//! - Default values as code base
//! - Configuration file support via `CONFIG_PATH`
//! - Environment variable overrides (highest priority)
//! - Component-wise validation

mod healthcheck;
mod topology;

pub use healthcheck::*;
pub use topology::*;


use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

/// Main configuration container for the discovery subsystem.
///
/// Sources are merged in order (later overrides earlier):
/// 1. Type defaults
/// 2. Configuration file named by the `CONFIG_PATH` environment variable
/// 3. Environment variables with the `DISCOVERY__` prefix
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct DiscoveryConfig {
    /// Per-tablet health stream parameters
    pub healthcheck: HealthCheckConfig,
    /// Topology watcher parameters
    pub topology: TopologyWatcherConfig,
}

impl DiscoveryConfig {
    /// Loads the merged configuration.
    ///
    /// # Errors
    /// Returns an error when the config file fails to parse or any
    /// validation rule is violated — including the fatal
    /// `tablet_filters`/`keyspaces_to_watch` conflict, which callers must
    /// treat as a startup abort.
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path));
        }

        builder = builder.add_source(
            Environment::with_prefix("DISCOVERY")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validates cross-component configuration rules.
    pub fn validate(&self) -> Result<()> {
        self.healthcheck.validate()?;
        self.topology.validate()?;
        Ok(())
    }
}
