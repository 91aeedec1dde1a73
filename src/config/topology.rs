use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::topo::TabletType;
use crate::Error;
use crate::Result;

/// Parameters of the per-cell topology watchers.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TopologyWatcherConfig {
    /// Cells to watch for tablets. Empty means watch the local cell only.
    #[serde(default)]
    pub cells_to_watch: Vec<String>,

    /// Interval between topology refreshes, in seconds.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// Whether a refresh re-reads tablets it already knows, picking up
    /// address/port changes. When false, known aliases reuse the cached
    /// record.
    #[serde(default = "default_refresh_known_tablets")]
    pub refresh_known_tablets: bool,

    /// Concurrent topology reads allowed per watcher.
    #[serde(default = "default_topo_read_concurrency")]
    pub topo_read_concurrency: usize,

    /// `keyspace|shard` or `keyspace|keyrange` entries narrowing the watched
    /// tablets. Mutually exclusive with `keyspaces_to_watch`.
    #[serde(default)]
    pub tablet_filters: Vec<String>,

    /// Keyspaces this gateway exposes. Mutually exclusive with
    /// `tablet_filters`.
    #[serde(default)]
    pub keyspaces_to_watch: Vec<String>,

    /// Tablet types the selector may hand out. Empty allows every type.
    #[serde(default)]
    pub allowed_tablet_types: Vec<TabletType>,
}

impl Default for TopologyWatcherConfig {
    fn default() -> Self {
        Self {
            cells_to_watch: Vec::new(),
            refresh_interval_secs: default_refresh_interval_secs(),
            refresh_known_tablets: default_refresh_known_tablets(),
            topo_read_concurrency: default_topo_read_concurrency(),
            tablet_filters: Vec::new(),
            keyspaces_to_watch: Vec::new(),
            allowed_tablet_types: Vec::new(),
        }
    }
}

impl TopologyWatcherConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.tablet_filters.is_empty() && !self.keyspaces_to_watch.is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "topology: only one of keyspaces_to_watch and tablet_filters may be specified at a time".to_string(),
            )));
        }
        if self.refresh_interval_secs == 0 {
            return Err(Error::Config(ConfigError::Message(
                "topology: refresh_interval_secs cannot be 0".to_string(),
            )));
        }
        if self.topo_read_concurrency == 0 {
            return Err(Error::Config(ConfigError::Message(
                "topology: topo_read_concurrency cannot be 0".to_string(),
            )));
        }
        Ok(())
    }
}

fn default_refresh_interval_secs() -> u64 {
    crate::constants::DEFAULT_TOPOLOGY_REFRESH_INTERVAL.as_secs()
}

fn default_refresh_known_tablets() -> bool {
    true
}

fn default_topo_read_concurrency() -> usize {
    crate::constants::DEFAULT_TOPO_READ_CONCURRENCY
}
