//! Per-cell topology watcher.
//!
//! Periodically lists the tablets of one cell, fetches their records with
//! bounded parallelism, diffs against the previous snapshot on
//! `(alias, address-key)` and drives add/replace/remove into the health
//! check. Exports a stable CRC-32 of its snapshot and its refresh lag.


use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::config::TopologyWatcherConfig;
use crate::healthcheck::HealthCheck;
use crate::metrics::WatcherOp;
use crate::topo::Tablet;
use crate::topo::TabletAlias;
use crate::topo::TabletFilter;
use crate::topo::TopologyClient;

/// One tablet as last seen by the watcher: the diff runs on
/// `(alias, address-key)`.
#[derive(Clone)]
struct TabletInfo {
    alias: String,
    key: String,
    tablet: Tablet,
}

struct WatcherState {
    tablets: HashMap<String, TabletInfo>,
    topo_checksum: u32,
    last_refresh: Option<Instant>,
}

pub struct TopologyWatcher {
    cell: String,
    refresh_interval: Duration,
    refresh_known_tablets: bool,
    sem: Arc<Semaphore>,
    filter: Option<Arc<dyn TabletFilter>>,
    topo: Arc<dyn TopologyClient>,
    ctx: CancellationToken,
    state: Mutex<WatcherState>,
    first_load_tx: watch::Sender<bool>,
    first_load_rx: watch::Receiver<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    started_at: Instant,
}

impl TopologyWatcher {
    pub(crate) fn new(
        cell: String,
        topo: Arc<dyn TopologyClient>,
        filter: Option<Arc<dyn TabletFilter>>,
        config: &TopologyWatcherConfig,
    ) -> Self {
        let (first_load_tx, first_load_rx) = watch::channel(false);
        Self {
            cell,
            refresh_interval: config.refresh_interval(),
            refresh_known_tablets: config.refresh_known_tablets,
            sem: Arc::new(Semaphore::new(config.topo_read_concurrency)),
            filter,
            topo,
            ctx: CancellationToken::new(),
            state: Mutex::new(WatcherState {
                tablets: HashMap::new(),
                topo_checksum: 0,
                last_refresh: None,
            }),
            first_load_tx,
            first_load_rx,
            handle: Mutex::new(None),
            started_at: Instant::now(),
        }
    }

    /// Spawns the refresh loop. One immediate load, then one per
    /// `refresh_interval` until stopped.
    pub(crate) fn start(
        self: &Arc<Self>,
        hc: Arc<HealthCheck>,
    ) {
        let tw = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                load_tablets(&hc, &tw).await;
                tokio::select! {
                    _ = tw.ctx.cancelled() => return,
                    _ = sleep(tw.refresh_interval) => {}
                }
            }
        });
        *self.handle.lock() = Some(handle);
    }

    pub(crate) fn stop(&self) {
        self.ctx.cancel();
    }

    pub(crate) async fn join(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn cell(&self) -> &str {
        &self.cell
    }

    /// CRC-32 over the sorted `(alias, address-key)` pairs of the current
    /// snapshot.
    pub fn topo_checksum(&self) -> u32 {
        self.state.lock().topo_checksum
    }

    /// Time since the cell was last refreshed; time since start when no
    /// refresh completed yet.
    pub fn refresh_lag(&self) -> Duration {
        let st = self.state.lock();
        match st.last_refresh {
            Some(at) => at.elapsed(),
            None => self.started_at.elapsed(),
        }
    }

    /// Resolves once the first topology load has completed.
    pub async fn wait_first_load(&self) {
        let mut rx = self.first_load_rx.clone();
        let _ = rx.wait_for(|done| *done).await;
    }
}

/// One refresh tick. A failed list aborts the tick without touching the
/// snapshot, so a topology outage never turns into a mass removal.
pub(crate) async fn load_tablets(
    hc: &Arc<HealthCheck>,
    tw: &Arc<TopologyWatcher>,
) {
    let metrics = hc.metrics();
    metrics.record_watcher_op(WatcherOp::ListTablets);
    let aliases = tokio::select! {
        _ = tw.ctx.cancelled() => return,
        res = tw.topo.list_tablets(&tw.cell) => match res {
            Ok(aliases) => aliases,
            Err(e) => {
                metrics.record_watcher_error(WatcherOp::ListTablets);
                error!(cell = %tw.cell, error = %e, "cannot get tablets for cell");
                return;
            }
        }
    };

    let mut alias_strs: Vec<String> = Vec::with_capacity(aliases.len());
    let mut new_tablets: HashMap<String, TabletInfo> = HashMap::new();
    let known: HashMap<String, TabletInfo> = tw.state.lock().tablets.clone();

    let mut fetches = FuturesUnordered::new();
    for alias in aliases {
        let alias_str = alias.to_string();
        alias_strs.push(alias_str.clone());
        if !tw.refresh_known_tablets {
            if let Some(info) = known.get(&alias_str) {
                new_tablets.insert(alias_str, info.clone());
                continue;
            }
        }
        fetches.push(fetch_tablet(hc, tw, alias, alias_str));
    }
    while let Some(fetched) = fetches.next().await {
        if let Some(info) = fetched {
            new_tablets.insert(info.alias.clone(), info);
        }
    }
    if tw.ctx.is_cancelled() {
        return;
    }

    let mut st = tw.state.lock();
    let mut replaced: HashSet<String> = HashSet::new();
    for (alias, new_info) in &new_tablets {
        match st.tablets.get(alias) {
            None => {
                // A new alias carrying an address some known tablet already
                // has means the tablet moved: replace it and remember the
                // old alias so the removal pass below leaves it alone.
                let mut found = false;
                for other in st.tablets.values() {
                    if new_info.key == other.key {
                        found = true;
                        hc.replace_tablet(&other.tablet, new_info.tablet.clone());
                        metrics.record_watcher_op(WatcherOp::ReplaceTablet);
                        replaced.insert(other.alias.clone());
                    }
                }
                if !found {
                    hc.add_tablet(new_info.tablet.clone());
                    metrics.record_watcher_op(WatcherOp::AddTablet);
                }
            }
            Some(old) if old.key != new_info.key => {
                // Same alias, new address.
                replaced.insert(alias.clone());
                hc.replace_tablet(&old.tablet, new_info.tablet.clone());
                metrics.record_watcher_op(WatcherOp::ReplaceTablet);
            }
            Some(_) => {}
        }
    }
    for old in st.tablets.values() {
        if !new_tablets.contains_key(&old.alias) && !replaced.contains(&old.alias) {
            hc.remove_tablet(&old.tablet);
            metrics.record_watcher_op(WatcherOp::RemoveTablet);
        }
    }
    st.tablets = new_tablets;

    // stable checksum of the committed snapshot
    alias_strs.sort();
    let mut hasher = crc32fast::Hasher::new();
    for alias in &alias_strs {
        if let Some(info) = st.tablets.get(alias) {
            hasher.update(alias.as_bytes());
            hasher.update(info.key.as_bytes());
        }
    }
    st.topo_checksum = hasher.finalize();
    st.last_refresh = Some(Instant::now());
    drop(st);

    if !*tw.first_load_rx.borrow() {
        let _ = tw.first_load_tx.send(true);
    }
}

async fn fetch_tablet(
    hc: &Arc<HealthCheck>,
    tw: &Arc<TopologyWatcher>,
    alias: TabletAlias,
    alias_str: String,
) -> Option<TabletInfo> {
    // Wait for the read queue to drain.
    let _permit = tw.sem.acquire().await.ok()?;
    hc.metrics().record_watcher_op(WatcherOp::GetTablet);
    let tablet = tokio::select! {
        _ = tw.ctx.cancelled() => return None,
        res = tw.topo.get_tablet(&alias) => match res {
            Ok(tablet) => tablet,
            Err(e) => {
                hc.metrics().record_watcher_error(WatcherOp::GetTablet);
                error!(alias = %alias_str, error = %e, "cannot get tablet for alias");
                return None;
            }
        }
    };
    if !hc.is_tablet_in_cell(&tablet).await {
        return None;
    }
    if let Some(filter) = &tw.filter {
        if !filter.is_included(&tablet) {
            return None;
        }
    }
    Some(TabletInfo {
        alias: alias_str,
        key: tablet.addr_key(),
        tablet,
    })
}
