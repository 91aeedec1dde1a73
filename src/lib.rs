//! # tabletwatch
//!
//! Tablet discovery and health monitoring for a sharded query gateway.
//!
//! The [`HealthCheck`] handle maintains a streaming health RPC to every
//! known tablet and a keyed index the query path consults to pick a
//! healthy tablet for a `(keyspace, shard, tablet_type)` target. Per-cell
//! topology watchers keep the fleet membership in sync with the topology
//! store.
//!
//! ## Quick Start
//! ```no_run
//! use std::sync::Arc;
//!
//! use prometheus::Registry;
//! use tabletwatch::config::DiscoveryConfig;
//! use tabletwatch::HealthCheck;
//! # async fn run(topo: Arc<dyn tabletwatch::topo::TopologyClient>,
//! #              dialer: Arc<dyn tabletwatch::query_service::TabletDialer>) {
//!
//! let config = DiscoveryConfig::new().expect("discovery config");
//! let registry = Registry::new();
//! let hc = HealthCheck::open(&config, topo, dialer, "cell_a", &registry).expect("start healthcheck");
//!
//! hc.wait_for_initial_topology().await;
//! // ... serve queries through hc.pick(...) ...
//! hc.close().await;
//! # }
//! ```

pub mod config;
pub mod healthcheck;
pub mod metrics;
pub mod query_service;
pub mod status;
pub mod topo;
pub mod watcher;

mod constants;
mod errors;
mod utils;

pub use constants::DEFAULT_HEALTH_CHECK_TIMEOUT;
pub use constants::DEFAULT_RETRY_DELAY;
pub use constants::DEFAULT_TOPOLOGY_REFRESH_INTERVAL;
pub use constants::DEFAULT_TOPO_READ_CONCURRENCY;
pub use errors::*;
pub use healthcheck::HealthCheck;
pub use healthcheck::TabletHealthRecord;
pub use healthcheck::TabletStatus;
pub use status::TabletsCacheStatus;

//-----------------------------------------------------------
// Test utils
#[cfg(test)]
#[doc(hidden)]
pub mod test_utils;
