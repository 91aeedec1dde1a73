//! Health check engine.
//!
//! Maintains a streaming health RPC to every known tablet. Tablets are
//! added and removed through [`HealthCheck::add_tablet`] /
//! [`HealthCheck::remove_tablet`]; the per-cell topology watchers drive
//! these from the topology store. A monitor task is spawned per record and
//! keeps it up to date; the query path reads the keyed index through the
//! selector API.

mod monitor;
mod selector;
mod tablet_health;

pub use tablet_health::TabletHealthRecord;
pub use tablet_health::TabletStatus;

#[cfg(test)]
mod selector_test;

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use prometheus::Registry;
use tokio_util::task::TaskTracker;
use tracing::info;
use tracing::warn;

use crate::config::DiscoveryConfig;
use crate::metrics::DiscoveryMetrics;
use crate::metrics::HealthCheckCollector;
use crate::query_service::TabletDialer;
use crate::status::TabletsCacheStatus;
use crate::topo::FilterByKeyspace;
use crate::topo::FilterByShard;
use crate::topo::Tablet;
use crate::topo::TabletFilter;
use crate::topo::TabletType;
use crate::topo::Target;
use crate::topo::TopologyClient;
use crate::watcher::TopologyWatcher;
use crate::Result;

/// The target index: target key to alias to record. Guarded by one coarse
/// mutex; per-record state has its own lock so monitors writing stats do
/// not contend here.
type Buckets = HashMap<Target, HashMap<String, Arc<TabletHealthRecord>>>;

/// Handle over the whole subsystem. Owns its configuration, metrics and
/// watchers; several independent handles can coexist in one process.
pub struct HealthCheck {
    retry_delay: Duration,
    health_check_timeout: Duration,
    local_cell: String,
    allowed_tablet_types: Vec<TabletType>,
    topo: Arc<dyn TopologyClient>,
    dialer: Arc<dyn TabletDialer>,
    metrics: Arc<DiscoveryMetrics>,
    /// `None` after `close()`; membership mutations become no-ops.
    entries: Mutex<Option<Buckets>>,
    /// Joins every monitor task at close.
    monitors: TaskTracker,
    topo_watchers: Vec<Arc<TopologyWatcher>>,
    /// Per-process cache of cell alias groups.
    cell_aliases: DashMap<String, String>,
}

impl HealthCheck {
    /// Builds the handle, registers its metrics into `registry` and starts
    /// one topology watcher per configured cell (or the local cell when
    /// none are configured).
    ///
    /// # Errors
    /// Configuration validation failures — including setting both
    /// `tablet_filters` and `keyspaces_to_watch` — abort startup here.
    pub fn open(
        config: &DiscoveryConfig,
        topo: Arc<dyn TopologyClient>,
        dialer: Arc<dyn TabletDialer>,
        local_cell: impl Into<String>,
        registry: &Registry,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let local_cell = local_cell.into();
        let metrics = Arc::new(DiscoveryMetrics::new(registry)?);

        let filter: Option<Arc<dyn TabletFilter>> = if !config.topology.tablet_filters.is_empty() {
            Some(Arc::new(FilterByShard::new(&config.topology.tablet_filters)?))
        } else if !config.topology.keyspaces_to_watch.is_empty() {
            Some(Arc::new(FilterByKeyspace::new(&config.topology.keyspaces_to_watch)))
        } else {
            None
        };

        let mut cells = config.topology.cells_to_watch.clone();
        if cells.is_empty() {
            cells.push(local_cell.clone());
        }

        let mut topo_watchers = Vec::new();
        for cell in cells.into_iter().filter(|c| !c.is_empty()) {
            topo_watchers.push(Arc::new(TopologyWatcher::new(
                cell,
                Arc::clone(&topo),
                filter.clone(),
                &config.topology,
            )));
        }
        info!(
            cells = ?topo_watchers.iter().map(|tw| tw.cell()).collect::<Vec<_>>(),
            "loading tablets for cells"
        );

        let hc = Arc::new(Self {
            retry_delay: config.healthcheck.retry_delay(),
            health_check_timeout: config.healthcheck.health_check_timeout(),
            local_cell,
            allowed_tablet_types: config.topology.allowed_tablet_types.clone(),
            topo,
            dialer,
            metrics,
            entries: Mutex::new(Some(HashMap::new())),
            monitors: TaskTracker::new(),
            topo_watchers,
            cell_aliases: DashMap::new(),
        });

        registry.register(Box::new(HealthCheckCollector::new(Arc::downgrade(&hc))?))?;

        for tw in &hc.topo_watchers {
            tw.start(Arc::clone(&hc));
        }

        Ok(hc)
    }

    /// Adds the tablet and starts its monitor. Does not block on making a
    /// connection. Idempotent: a second add of the same alias is ignored.
    pub fn add_tablet(
        self: &Arc<Self>,
        tablet: Tablet,
    ) {
        let mut entries = self.entries.lock();
        let Some(buckets) = entries.as_mut() else {
            // already closed
            return;
        };
        let target = tablet.declared_target();
        let alias = tablet.alias.to_string();
        let bucket = buckets.entry(target).or_default();
        if bucket.contains_key(&alias) {
            return;
        }
        let record = Arc::new(TabletHealthRecord::new(tablet));
        bucket.insert(alias, Arc::clone(&record));
        let hc = Arc::clone(self);
        let _ = self.monitors.spawn(monitor::check_conn(hc, record));
    }

    /// Removes the tablet and stops its monitor. Does not block; the
    /// monitor releases the connection as it winds down. Removing an
    /// unknown tablet is not an error.
    pub fn remove_tablet(
        &self,
        tablet: &Tablet,
    ) {
        self.delete_conn(tablet);
    }

    /// Removes the old tablet and adds the new one under a single external
    /// event; between the two steps the selector never sees both.
    pub fn replace_tablet(
        self: &Arc<Self>,
        old: &Tablet,
        new: Tablet,
    ) {
        self.delete_conn(old);
        self.add_tablet(new);
    }

    fn delete_conn(
        &self,
        tablet: &Tablet,
    ) {
        let record = {
            let mut entries = self.entries.lock();
            let Some(buckets) = entries.as_mut() else {
                return;
            };
            let key = tablet.declared_target();
            let alias = tablet.alias.to_string();
            let Some(bucket) = buckets.get_mut(&key) else {
                warn!(tablet = %alias, target = %key, "no health data for tablet's target");
                return;
            };
            let Some(record) = bucket.remove(&alias) else {
                warn!(tablet = %alias, "no health data for tablet");
                return;
            };
            if bucket.is_empty() {
                buckets.remove(&key);
            }
            record
        };
        record.state().up = false;
        record.cancel();
    }

    /// Moves a record between target buckets when its stream reports a
    /// type change. Single critical section under the index lock; the
    /// stored target is updated in the same section so the bucket key and
    /// the record's target never diverge.
    pub(crate) fn move_record_bucket(
        &self,
        record: &Arc<TabletHealthRecord>,
        old_target: &Target,
        new_target: &Target,
    ) {
        let mut entries = self.entries.lock();
        let Some(buckets) = entries.as_mut() else {
            return;
        };
        let alias = record.alias_str().to_string();

        let removed = buckets
            .get_mut(old_target)
            .and_then(|bucket| bucket.remove(&alias))
            .is_some();
        if !removed {
            // Concurrently removed from membership; nothing to move.
            return;
        }
        if let Some(bucket) = buckets.get(old_target) {
            if bucket.is_empty() {
                buckets.remove(old_target);
            }
        }

        if new_target.tablet_type == TabletType::Primary {
            let has_primary = buckets.get(new_target).map_or(false, |b| !b.is_empty());
            if !has_primary {
                self.metrics.record_primary_promoted(&new_target.keyspace, &new_target.shard);
            }
        }

        buckets
            .entry(new_target.clone())
            .or_default()
            .insert(alias, Arc::clone(record));
        record.state().target = new_target.clone();
    }

    /// Displayable, stably sorted version of the cache.
    pub fn cache_status(&self) -> Vec<TabletsCacheStatus> {
        let mut grouped: BTreeMap<(String, Target), Vec<TabletStatus>> = BTreeMap::new();
        {
            let entries = self.entries.lock();
            let Some(buckets) = entries.as_ref() else {
                return Vec::new();
            };
            for bucket in buckets.values() {
                for record in bucket.values() {
                    let snapshot = record.status_snapshot();
                    let key = (record.tablet().alias.cell.clone(), snapshot.target.clone());
                    grouped.entry(key).or_default().push(snapshot);
                }
            }
        }
        grouped
            .into_iter()
            .map(|((cell, target), mut tablet_stats)| {
                tablet_stats.sort_by(|a, b| a.tablet.alias.cmp(&b.tablet.alias));
                TabletsCacheStatus {
                    cell,
                    target,
                    tablet_stats,
                }
            })
            .collect()
    }

    /// Number of healthy connections per target key.
    pub fn serving_conn_stats(&self) -> BTreeMap<Target, i64> {
        let mut res = BTreeMap::new();
        let entries = self.entries.lock();
        let Some(buckets) = entries.as_ref() else {
            return res;
        };
        for (key, bucket) in buckets {
            for record in bucket.values() {
                let st = record.state();
                if !st.up || !st.serving || st.last_error.is_some() {
                    continue;
                }
                *res.entry(key.clone()).or_insert(0) += 1;
            }
        }
        res
    }

    /// CRC-32 over the sorted cache status; stable across gateways holding
    /// the same view.
    pub fn state_checksum(&self) -> u32 {
        let mut buf = String::new();
        for status in self.cache_status() {
            buf.push_str(&format!(
                "{}{}{}{}\n",
                status.cell, status.target.keyspace, status.target.shard, status.target.tablet_type
            ));
            for ts in &status.tablet_stats {
                buf.push_str(&format!("{}{}{}\n", ts.up, ts.serving, ts.primary_term_start_time));
            }
        }
        crc32fast::hash(buf.as_bytes())
    }

    /// XOR of the per-cell topology checksums.
    pub fn topology_watcher_checksum(&self) -> u32 {
        let mut checksum = 0u32;
        for tw in &self.topo_watchers {
            checksum ^= tw.topo_checksum();
        }
        checksum
    }

    /// Maximum time since any watched cell was refreshed.
    pub fn topology_watcher_max_refresh_lag(&self) -> Duration {
        self.topo_watchers
            .iter()
            .map(|tw| tw.refresh_lag())
            .max()
            .unwrap_or_default()
    }

    /// Blocks until every watcher finished its first topology load.
    pub async fn wait_for_initial_topology(&self) {
        for tw in &self.topo_watchers {
            tw.wait_first_load().await;
        }
    }

    /// Stops the health check: cancels every monitor, clears the index,
    /// stops the watchers and returns once every monitor has finalized and
    /// released its connection.
    pub async fn close(&self) {
        {
            let mut entries = self.entries.lock();
            if let Some(buckets) = entries.take() {
                for bucket in buckets.values() {
                    for record in bucket.values() {
                        record.cancel();
                    }
                }
            }
            // The lock is released before joining so in-flight monitors can
            // still reach the index on their way out.
        }
        for tw in &self.topo_watchers {
            tw.stop();
        }
        for tw in &self.topo_watchers {
            tw.join().await;
        }
        self.monitors.close();
        self.monitors.wait().await;
    }

    /// Resolves and caches the alias group of a cell.
    pub(crate) async fn get_alias_by_cell(
        &self,
        cell: &str,
    ) -> String {
        if let Some(alias) = self.cell_aliases.get(cell) {
            return alias.value().clone();
        }
        let alias = self.topo.get_alias_by_cell(cell).await;
        self.cell_aliases.insert(cell.to_string(), alias.clone());
        alias
    }

    /// Whether a tablet is in scope for this health check: primaries
    /// always are; otherwise the tablet's cell must be the local cell or
    /// alias-equivalent to it.
    pub(crate) async fn is_tablet_in_cell(
        &self,
        tablet: &Tablet,
    ) -> bool {
        if tablet.tablet_type == TabletType::Primary {
            return true;
        }
        if tablet.alias.cell == self.local_cell {
            return true;
        }
        self.get_alias_by_cell(&tablet.alias.cell).await == self.get_alias_by_cell(&self.local_cell).await
    }

    /// Cell equivalence from the cached alias map only; used on the
    /// selection hot path. Cache misses fall back to raw name equality.
    pub(crate) fn cells_equivalent_cached(
        &self,
        cell: &str,
        other: &str,
    ) -> bool {
        if cell == other {
            return true;
        }
        match (self.cell_aliases.get(cell), self.cell_aliases.get(other)) {
            (Some(a), Some(b)) => *a == *b,
            _ => false,
        }
    }

    pub fn local_cell(&self) -> &str {
        &self.local_cell
    }

    pub(crate) fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub(crate) fn health_check_timeout(&self) -> Duration {
        self.health_check_timeout
    }

    pub(crate) fn metrics(&self) -> &DiscoveryMetrics {
        &self.metrics
    }

    pub(crate) fn dialer(&self) -> &Arc<dyn TabletDialer> {
        &self.dialer
    }

    pub(crate) fn allowed_tablet_types(&self) -> &[TabletType] {
        &self.allowed_tablet_types
    }
}
