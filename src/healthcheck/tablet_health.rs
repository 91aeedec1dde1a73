use std::sync::Arc;

use parking_lot::Mutex;
use parking_lot::MutexGuard;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::query_service::QueryService;
use crate::query_service::RealtimeStats;
use crate::topo::Tablet;
use crate::topo::TabletType;
use crate::topo::Target;

/// Mutable per-tablet health state, guarded by the record's own lock so
/// stream-driven updates never contend on the index lock.
pub(crate) struct TabletHealthState {
    /// Last `(keyspace, shard, type)` the tablet reported over its stream.
    /// Always equal to the index bucket the record lives in.
    pub target: Target,
    /// Membership flag: true between add and remove.
    pub up: bool,
    /// Liveness flag: true only while the stream delivers healthy samples
    /// within the freshness window.
    pub serving: bool,
    pub primary_term_start_time: i64,
    pub stats: Option<RealtimeStats>,
    pub last_error: Option<String>,
    pub conn: Option<Arc<dyn QueryService>>,
}

/// Health-tracking unit for one tablet. Created by `add`, mutated
/// exclusively by its monitor task (plus bucket moves under the index
/// lock), destroyed by `remove`.
pub struct TabletHealthRecord {
    /// Identity, address and declared type at the moment of the last
    /// add/replace. Immutable for the record's lifetime; a moved tablet
    /// gets a fresh record via `replace`.
    tablet: Tablet,
    alias: String,
    cancel: CancellationToken,
    state: Mutex<TabletHealthState>,
}

impl TabletHealthRecord {
    pub(crate) fn new(tablet: Tablet) -> Self {
        let target = tablet.declared_target();
        let alias = tablet.alias.to_string();
        Self {
            tablet,
            alias,
            cancel: CancellationToken::new(),
            state: Mutex::new(TabletHealthState {
                target,
                up: true,
                serving: false,
                primary_term_start_time: 0,
                stats: None,
                last_error: None,
                conn: None,
            }),
        }
    }

    pub fn tablet(&self) -> &Tablet {
        &self.tablet
    }

    /// Stable string form of the tablet alias; the index key within a
    /// target bucket and the key of the selector's invalid set.
    pub fn alias_str(&self) -> &str {
        &self.alias
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Terminates the record's monitor task.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, TabletHealthState> {
        self.state.lock()
    }

    /// True for a tablet the selector may hand out for non-primary
    /// targets. Primaries are handed out by presence, not by this
    /// predicate.
    pub fn is_healthy(&self) -> bool {
        let st = self.state.lock();
        st.serving && st.last_error.is_none() && st.target.tablet_type != TabletType::Primary
    }

    /// Point-in-time copy of the record for the status page and the
    /// health-state checksum.
    pub fn status_snapshot(&self) -> TabletStatus {
        let st = self.state.lock();
        TabletStatus {
            tablet: self.tablet.clone(),
            target: st.target.clone(),
            up: st.up,
            serving: st.serving,
            primary_term_start_time: st.primary_term_start_time,
            stats: st.stats.clone(),
            last_error: st.last_error.clone(),
        }
    }
}

/// Serializable snapshot of one tablet's health, as shown on the debug
/// page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TabletStatus {
    pub tablet: Tablet,
    pub target: Target,
    pub up: bool,
    pub serving: bool,
    pub primary_term_start_time: i64,
    pub stats: Option<RealtimeStats>,
    pub last_error: Option<String>,
}
