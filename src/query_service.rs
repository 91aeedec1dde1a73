//! Interfaces consumed from the tablet dialer / RPC transport.
//!
//! The transport is an external collaborator; only the health-sample shape
//! and the two calls the monitor needs (`stream_health`, `close`) are
//! specified here. Sample contents are opaque to this crate apart from the
//! target, serving flag, alias, primary term and the embedded health error.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Deserialize;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
use mockall::automock;

use crate::topo::Tablet;
use crate::topo::TabletAlias;
use crate::topo::Target;
use crate::Result;

/// Realtime statistics delivered with each health sample. Opaque to the
/// health check except for `health_error`, which forces the tablet
/// non-serving while set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RealtimeStats {
    /// Non-empty when the tablet considers itself unhealthy.
    pub health_error: String,
    pub replication_lag_seconds: u32,
    pub cpu_usage: f64,
    pub qps: f64,
}

/// One message on the tablet's streaming health RPC.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamHealthResponse {
    /// Alias of the responding tablet, when the tablet reports it.
    pub tablet_alias: Option<TabletAlias>,
    /// The `(keyspace, shard, type)` the tablet currently serves. May
    /// differ from the declared type after a reparent.
    pub target: Option<Target>,
    pub serving: bool,
    /// Seconds-since-epoch of the moment this tablet became primary;
    /// zero for non-primaries. Tie-breaker among candidate primaries.
    pub primary_term_start_time: i64,
    pub realtime_stats: Option<RealtimeStats>,
}

/// Stream of health samples; ends on stream error, EOF, or cancellation.
pub type HealthSampleStream = BoxStream<'static, Result<StreamHealthResponse>>;

/// A live connection to one tablet.
#[async_trait]
pub trait QueryService: Send + Sync + 'static {
    /// Opens the streaming health RPC. The returned stream yields samples
    /// until the RPC terminates or `ctx` is cancelled.
    async fn stream_health(
        &self,
        ctx: CancellationToken,
    ) -> Result<HealthSampleStream>;

    /// Tears the connection down. Safe to call with the stream context
    /// already dead.
    async fn close(&self) -> Result<()>;
}

impl std::fmt::Debug for dyn QueryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn QueryService")
    }
}

/// Produces connections to tablets.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TabletDialer: Send + Sync + 'static {
    /// Dials the tablet. With `fail_fast` the dial errors immediately when
    /// the tablet is unreachable instead of waiting for a ready transport.
    async fn dial(
        &self,
        tablet: &Tablet,
        fail_fast: bool,
    ) -> Result<Arc<dyn QueryService>>;
}
