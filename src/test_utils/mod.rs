//! Controllable fakes behind the consumed traits, for tests that drive the
//! engine end-to-end without a real topology store or tablet transport.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::DashSet;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::query_service::HealthSampleStream;
use crate::query_service::QueryService;
use crate::query_service::RealtimeStats;
use crate::query_service::StreamHealthResponse;
use crate::query_service::TabletDialer;
use crate::topo::Tablet;
use crate::topo::TabletAlias;
use crate::topo::TabletType;
use crate::topo::TopologyClient;
use crate::Result;
use crate::StreamError;
use crate::TopologyError;

pub fn make_tablet(
    cell: &str,
    uid: u32,
    keyspace: &str,
    shard: &str,
    tablet_type: TabletType,
    host: &str,
    port: u16,
) -> Tablet {
    let mut port_map = BTreeMap::new();
    port_map.insert("grpc".to_string(), port);
    Tablet {
        alias: TabletAlias::new(cell, uid),
        keyspace: keyspace.to_string(),
        shard: shard.to_string(),
        tablet_type,
        hostname: host.to_string(),
        port_map,
    }
}

/// Polls `predicate` every few milliseconds until it holds, panicking
/// after `deadline`.
pub async fn eventually(
    deadline: Duration,
    what: &str,
    predicate: impl Fn() -> bool,
) {
    let start = tokio::time::Instant::now();
    loop {
        if predicate() {
            return;
        }
        if start.elapsed() > deadline {
            panic!("condition not reached within {deadline:?}: {what}");
        }
        sleep(Duration::from_millis(5)).await;
    }
}

/// A serving sample matching the tablet's declared target.
pub fn healthy_sample(tablet: &Tablet) -> StreamHealthResponse {
    StreamHealthResponse {
        tablet_alias: Some(tablet.alias.clone()),
        target: Some(tablet.declared_target()),
        serving: true,
        primary_term_start_time: 0,
        realtime_stats: Some(RealtimeStats::default()),
    }
}

/// In-memory topology store with failure injection.
#[derive(Default)]
pub struct FakeTopoServer {
    cells: DashMap<String, Vec<TabletAlias>>,
    tablets: DashMap<String, Tablet>,
    cell_aliases: DashMap<String, String>,
    fail_list: AtomicBool,
    failing_tablets: DashSet<String>,
}

impl FakeTopoServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn upsert_tablet(
        &self,
        tablet: Tablet,
    ) {
        let mut cell = self.cells.entry(tablet.alias.cell.clone()).or_default();
        if !cell.contains(&tablet.alias) {
            cell.push(tablet.alias.clone());
        }
        drop(cell);
        self.tablets.insert(tablet.alias.to_string(), tablet);
    }

    pub fn delete_tablet(
        &self,
        alias: &TabletAlias,
    ) {
        if let Some(mut cell) = self.cells.get_mut(&alias.cell) {
            cell.retain(|a| a != alias);
        }
        self.tablets.remove(&alias.to_string());
    }

    pub fn set_cell_alias(
        &self,
        cell: &str,
        group: &str,
    ) {
        self.cell_aliases.insert(cell.to_string(), group.to_string());
    }

    pub fn set_fail_list(
        &self,
        fail: bool,
    ) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn set_tablet_failing(
        &self,
        alias: &TabletAlias,
        failing: bool,
    ) {
        if failing {
            self.failing_tablets.insert(alias.to_string());
        } else {
            self.failing_tablets.remove(&alias.to_string());
        }
    }
}

#[async_trait]
impl TopologyClient for FakeTopoServer {
    async fn list_tablets(
        &self,
        cell: &str,
    ) -> Result<Vec<TabletAlias>> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(TopologyError::ListTablets {
                cell: cell.to_string(),
                reason: "injected list failure".to_string(),
            }
            .into());
        }
        Ok(self.cells.get(cell).map(|c| c.clone()).unwrap_or_default())
    }

    async fn get_tablet(
        &self,
        alias: &TabletAlias,
    ) -> Result<Tablet> {
        let alias_str = alias.to_string();
        if self.failing_tablets.contains(&alias_str) {
            return Err(TopologyError::GetTablet {
                alias: alias_str,
                reason: "injected get failure".to_string(),
            }
            .into());
        }
        self.tablets.get(&alias_str).map(|t| t.clone()).ok_or_else(|| {
            TopologyError::GetTablet {
                alias: alias_str,
                reason: "not found".to_string(),
            }
            .into()
        })
    }

    async fn get_alias_by_cell(
        &self,
        cell: &str,
    ) -> String {
        self.cell_aliases
            .get(cell)
            .map(|a| a.clone())
            .unwrap_or_else(|| cell.to_string())
    }
}

/// Tablet connection whose health stream is scripted by the test. Each
/// `stream_health` call opens a fresh channel; the test pushes samples,
/// errors, or ends the stream.
#[derive(Default)]
pub struct FakeQueryService {
    sender: Mutex<Option<mpsc::UnboundedSender<Result<StreamHealthResponse>>>>,
    stream_count: AtomicUsize,
    close_count: AtomicUsize,
    fail_next_stream: AtomicBool,
}

impl FakeQueryService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the monitor has opened a stream on this connection.
    pub async fn wait_until_streaming(&self) {
        for _ in 0..500 {
            if self.sender.lock().is_some() {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("health stream was never opened");
    }

    pub fn send_sample(
        &self,
        sample: StreamHealthResponse,
    ) {
        if let Some(tx) = self.sender.lock().as_ref() {
            let _ = tx.send(Ok(sample));
        }
    }

    pub fn send_error(
        &self,
        error: crate::Error,
    ) {
        if let Some(tx) = self.sender.lock().as_ref() {
            let _ = tx.send(Err(error));
        }
    }

    /// Ends the current stream cleanly, as a tablet restart would.
    pub fn end_stream(&self) {
        *self.sender.lock() = None;
    }

    pub fn set_fail_next_stream(&self) {
        self.fail_next_stream.store(true, Ordering::SeqCst);
    }

    pub fn stream_count(&self) -> usize {
        self.stream_count.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryService for FakeQueryService {
    async fn stream_health(
        &self,
        ctx: CancellationToken,
    ) -> Result<HealthSampleStream> {
        if self.fail_next_stream.swap(false, Ordering::SeqCst) {
            return Err(StreamError::Closed("injected stream failure".to_string()).into());
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock() = Some(tx);
        self.stream_count.fetch_add(1, Ordering::SeqCst);
        let stream = futures::stream::unfold((rx, ctx), |(mut rx, ctx)| async move {
            tokio::select! {
                _ = ctx.cancelled() => None,
                item = rx.recv() => item.map(|item| (item, (rx, ctx))),
            }
        });
        Ok(Box::pin(stream))
    }

    async fn close(&self) -> Result<()> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Dialer handing out one [`FakeQueryService`] per tablet address.
#[derive(Default)]
pub struct FakeDialer {
    conns: DashMap<String, Arc<FakeQueryService>>,
    failing: DashSet<String>,
    dial_counts: DashMap<String, usize>,
}

impl FakeDialer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The connection that has been (or will be) handed out for this
    /// tablet's address.
    pub fn conn(
        &self,
        tablet: &Tablet,
    ) -> Arc<FakeQueryService> {
        self.conns
            .entry(tablet.addr_key())
            .or_insert_with(|| Arc::new(FakeQueryService::new()))
            .clone()
    }

    pub fn dial_count(
        &self,
        tablet: &Tablet,
    ) -> usize {
        self.dial_counts.get(&tablet.addr_key()).map(|c| *c).unwrap_or(0)
    }

    pub fn set_dial_failing(
        &self,
        tablet: &Tablet,
        failing: bool,
    ) {
        if failing {
            self.failing.insert(tablet.addr_key());
        } else {
            self.failing.remove(&tablet.addr_key());
        }
    }
}

#[async_trait]
impl TabletDialer for FakeDialer {
    async fn dial(
        &self,
        tablet: &Tablet,
        _fail_fast: bool,
    ) -> Result<Arc<dyn QueryService>> {
        let key = tablet.addr_key();
        *self.dial_counts.entry(key.clone()).or_insert(0) += 1;
        if self.failing.contains(&key) {
            return Err(StreamError::ConnectError(format!("dial refused: {key}")).into());
        }
        Ok(self.conn(tablet))
    }
}
