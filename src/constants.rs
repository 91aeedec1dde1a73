use std::time::Duration;

/// Default wait before re-dialing a tablet after a failed attempt.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Default freshness window: a tablet with no health sample for longer than
/// this is considered not healthy.
pub const DEFAULT_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(60);

/// Default interval at which a topology watcher re-lists its cell.
pub const DEFAULT_TOPOLOGY_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Default number of concurrent topology reads per watcher.
pub const DEFAULT_TOPO_READ_CONCURRENCY: usize = 32;

/// Poll interval used while waiting for tablets to appear in the index.
pub(crate) const WAIT_AVAILABLE_TABLET_INTERVAL: Duration = Duration::from_millis(100);

/// Bound on closing a tablet connection whose stream context is already dead.
pub(crate) const CONN_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);
