//! Error hierarchy for the tablet discovery and health-monitoring subsystem,
//! categorized by the collaborator that produced the failure.

use crate::topo::TabletType;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Topology store access failures
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// Per-tablet health stream failures
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Query-path tablet selection failures
    #[error(transparent)]
    Selection(#[from] SelectionError),

    /// Configuration loading and validation failures
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    /// Metric registration failures
    #[error(transparent)]
    Metrics(#[from] prometheus::Error),

    /// Operation stopped by its cancellation token
    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    /// Bulk alias listing failed for a cell
    #[error("cannot list tablets for cell {cell}: {reason}")]
    ListTablets { cell: String, reason: String },

    /// Single tablet record fetch failed
    #[error("cannot get tablet {alias}: {reason}")]
    GetTablet { alias: String, reason: String },

    /// Malformed `keyspace|shard` filter entry
    #[error("invalid tablet filter {entry:?}: {reason}")]
    InvalidFilter { entry: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Fail-fast dial to the tablet did not produce a connection
    #[error("tablet dial failed: {0}")]
    ConnectError(String),

    /// Sample arrived without a target or realtime stats
    #[error("health stats is not valid: {0}")]
    MalformedResponse(String),

    /// Sample carried an alias that is not the monitored tablet's
    #[error("health stats mismatch, tablet {expected} does not match response alias {got}")]
    AliasMismatch { expected: String, got: String },

    /// Application-level error reported by the tablet itself
    #[error("tablet health error: {0}")]
    HealthError(String),

    /// No sample arrived within the freshness window
    #[error("healthcheck timed out (latest {0})")]
    TimedOut(String),

    /// The streaming RPC terminated
    #[error("health stream closed: {0}")]
    Closed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    /// The target bucket holds no usable tablet
    #[error("no valid tablet")]
    NoValidTablet,

    /// Every candidate was invalid or lost its connection
    #[error("no available connection")]
    NoAvailableConnection,

    /// The requested tablet type is excluded by configuration
    #[error("tablet type {0} is not allowed")]
    TypeNotAllowed(TabletType),
}

impl Error {
    /// True for the two UNAVAILABLE selection outcomes the query router
    /// retries on a different target.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Error::Selection(SelectionError::NoValidTablet)
                | Error::Selection(SelectionError::NoAvailableConnection)
        )
    }
}
