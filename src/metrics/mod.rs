//! Metric collectors for the discovery subsystem.
//!
//! All collectors are owned by the handle and registered into an injected
//! [`prometheus::Registry`], so tests can instantiate several independent
//! handles without clashing on a process-wide registry.


use std::sync::Weak;

use prometheus::core::Collector;
use prometheus::core::Desc;
use prometheus::proto::MetricFamily;
use prometheus::Gauge;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::IntGaugeVec;
use prometheus::Opts;
use prometheus::Registry;

use crate::healthcheck::HealthCheck;
use crate::topo::Target;
use crate::Result;

/// Topology watcher operations broken out in the operation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherOp {
    ListTablets,
    GetTablet,
    AddTablet,
    RemoveTablet,
    ReplaceTablet,
}

impl WatcherOp {
    fn as_str(&self) -> &'static str {
        match self {
            WatcherOp::ListTablets => "ListTablets",
            WatcherOp::GetTablet => "GetTablet",
            WatcherOp::AddTablet => "AddTablet",
            WatcherOp::RemoveTablet => "RemoveTablet",
            WatcherOp::ReplaceTablet => "ReplaceTablet",
        }
    }
}

/// Counters updated on the hot paths of the engine and the watchers.
pub struct DiscoveryMetrics {
    healthcheck_errors: IntCounterVec,
    primary_promoted: IntCounterVec,
    watcher_operations: IntCounterVec,
    watcher_errors: IntCounterVec,
}

impl DiscoveryMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let healthcheck_errors = IntCounterVec::new(
            Opts::new("healthcheck_errors", "Healthcheck errors per target"),
            &["keyspace", "shard", "tablet_type"],
        )?;
        let primary_promoted = IntCounterVec::new(
            Opts::new(
                "healthcheck_primary_promoted",
                "Primary promoted in keyspace/shard because of health check type changes",
            ),
            &["keyspace", "shard"],
        )?;
        let watcher_operations = IntCounterVec::new(
            Opts::new("topology_watcher_operations", "Topology watcher operations"),
            &["op"],
        )?;
        let watcher_errors = IntCounterVec::new(
            Opts::new("topology_watcher_errors", "Topology watcher failed operations"),
            &["op"],
        )?;

        registry.register(Box::new(healthcheck_errors.clone()))?;
        registry.register(Box::new(primary_promoted.clone()))?;
        registry.register(Box::new(watcher_operations.clone()))?;
        registry.register(Box::new(watcher_errors.clone()))?;

        Ok(Self {
            healthcheck_errors,
            primary_promoted,
            watcher_operations,
            watcher_errors,
        })
    }

    pub fn record_healthcheck_error(
        &self,
        target: &Target,
    ) {
        self.healthcheck_errors
            .with_label_values(&[&target.keyspace, &target.shard, &target.tablet_type.to_string()])
            .inc();
    }

    /// Instantiates the error counter for a target at zero so rates are
    /// computed correctly from the first increment.
    pub fn init_healthcheck_error_counter(
        &self,
        target: &Target,
    ) {
        self.healthcheck_errors
            .with_label_values(&[&target.keyspace, &target.shard, &target.tablet_type.to_string()]);
    }

    pub fn record_primary_promoted(
        &self,
        keyspace: &str,
        shard: &str,
    ) {
        self.primary_promoted.with_label_values(&[keyspace, shard]).inc();
    }

    pub fn record_watcher_op(
        &self,
        op: WatcherOp,
    ) {
        self.watcher_operations.with_label_values(&[op.as_str()]).inc();
    }

    pub fn record_watcher_error(
        &self,
        op: WatcherOp,
    ) {
        self.watcher_errors.with_label_values(&[op.as_str()]).inc();
    }

    #[cfg(test)]
    pub(crate) fn healthcheck_error_count(
        &self,
        target: &Target,
    ) -> u64 {
        self.healthcheck_errors
            .with_label_values(&[&target.keyspace, &target.shard, &target.tablet_type.to_string()])
            .get()
    }

    #[cfg(test)]
    pub(crate) fn primary_promoted_count(
        &self,
        keyspace: &str,
        shard: &str,
    ) -> u64 {
        self.primary_promoted.with_label_values(&[keyspace, shard]).get()
    }

    #[cfg(test)]
    pub(crate) fn watcher_op_count(
        &self,
        op: WatcherOp,
    ) -> u64 {
        self.watcher_operations.with_label_values(&[op.as_str()]).get()
    }

    #[cfg(test)]
    pub(crate) fn watcher_error_count(
        &self,
        op: WatcherOp,
    ) -> u64 {
        self.watcher_errors.with_label_values(&[op.as_str()]).get()
    }
}

/// Scrape-time gauges derived from the live handle state: connection counts
/// per target, topology checksum, maximum refresh lag and the health-state
/// checksum.
pub struct HealthCheckCollector {
    hc: Weak<HealthCheck>,
    connections: IntGaugeVec,
    topo_checksum: IntGauge,
    max_refresh_lag: Gauge,
    state_checksum: IntGauge,
}

impl HealthCheckCollector {
    pub fn new(hc: Weak<HealthCheck>) -> Result<Self> {
        let connections = IntGaugeVec::new(
            Opts::new(
                "healthcheck_connections",
                "Number of healthy healthcheck connections registered per target",
            ),
            &["keyspace", "shard", "tablet_type"],
        )?;
        let topo_checksum = IntGauge::new(
            "topology_watcher_checksum",
            "crc32 checksum of the topology watcher state",
        )?;
        let max_refresh_lag = Gauge::new(
            "topology_watcher_max_refresh_lag_seconds",
            "Maximum time since the topology watcher refreshed a cell",
        )?;
        let state_checksum = IntGauge::new("healthcheck_checksum", "crc32 checksum of the current healthcheck state")?;
        Ok(Self {
            hc,
            connections,
            topo_checksum,
            max_refresh_lag,
            state_checksum,
        })
    }
}

impl Collector for HealthCheckCollector {
    fn desc(&self) -> Vec<&Desc> {
        let mut descs = self.connections.desc();
        descs.extend(self.topo_checksum.desc());
        descs.extend(self.max_refresh_lag.desc());
        descs.extend(self.state_checksum.desc());
        descs
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let Some(hc) = self.hc.upgrade() else {
            return Vec::new();
        };

        self.connections.reset();
        for (target, count) in hc.serving_conn_stats() {
            self.connections
                .with_label_values(&[&target.keyspace, &target.shard, &target.tablet_type.to_string()])
                .set(count);
        }
        self.topo_checksum.set(hc.topology_watcher_checksum() as i64);
        self.max_refresh_lag.set(hc.topology_watcher_max_refresh_lag().as_secs_f64());
        self.state_checksum.set(hc.state_checksum() as i64);

        let mut families = self.connections.collect();
        families.extend(self.topo_checksum.collect());
        families.extend(self.max_refresh_lag.collect());
        families.extend(self.state_checksum.collect());
        families
    }
}
