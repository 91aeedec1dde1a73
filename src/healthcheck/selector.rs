//! Query-path selection: the read surface the router calls per request.

use std::collections::HashSet;
use std::sync::Arc;

use rand::Rng;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::constants::WAIT_AVAILABLE_TABLET_INTERVAL;
use crate::query_service::QueryService;
use crate::topo::TabletType;
use crate::topo::Target;
use crate::Error;
use crate::Result;
use crate::SelectionError;

use super::tablet_health::TabletHealthRecord;
use super::HealthCheck;

impl HealthCheck {
    /// Returns the records the selector may hand out for a target.
    ///
    /// For a PRIMARY target this is at most one record: the primary with
    /// the greatest term start time, whether or not it is currently
    /// serving — trying a reparenting primary beats failing outright. For
    /// other targets, every healthy record in the bucket.
    pub fn get_healthy_tablet_stats(
        &self,
        target: &Target,
    ) -> Vec<Arc<TabletHealthRecord>> {
        let mut result = Vec::new();
        let entries = self.entries.lock();
        let Some(buckets) = entries.as_ref() else {
            return result;
        };
        let Some(bucket) = buckets.get(target) else {
            warn!(target = %target, "healthcheck has no tablet health for target");
            return result;
        };
        if target.tablet_type == TabletType::Primary {
            let best = bucket
                .values()
                .filter(|r| r.state().target.tablet_type == TabletType::Primary)
                .max_by_key(|r| r.state().primary_term_start_time);
            if let Some(best) = best {
                result.push(Arc::clone(best));
            }
            return result;
        }
        for record in bucket.values() {
            if record.is_healthy() {
                result.push(Arc::clone(record));
            }
        }
        result
    }

    /// Every record in the target's bucket regardless of health.
    pub(crate) fn get_tablet_stats(
        &self,
        target: &Target,
    ) -> Vec<Arc<TabletHealthRecord>> {
        let entries = self.entries.lock();
        let Some(buckets) = entries.as_ref() else {
            return Vec::new();
        };
        buckets
            .get(target)
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Picks a tablet and its live connection for the target, preferring
    /// the local cell. Aliases in `invalid` are skipped; an alias whose
    /// connection was torn down concurrently is added to `invalid` so the
    /// caller does not retry it.
    pub fn pick(
        &self,
        target: &Target,
        local_cell: &str,
        invalid: &mut HashSet<String>,
    ) -> Result<(String, Arc<dyn QueryService>)> {
        let allowed = self.allowed_tablet_types();
        if !allowed.is_empty() && !allowed.contains(&target.tablet_type) {
            return Err(SelectionError::TypeNotAllowed(target.tablet_type).into());
        }

        let mut tablets = self.get_healthy_tablet_stats(target);
        if tablets.is_empty() {
            return Err(SelectionError::NoValidTablet.into());
        }
        self.shuffle_tablets(local_cell, &mut tablets);

        for record in tablets {
            let alias = record.alias_str();
            if invalid.contains(alias) {
                continue;
            }
            let conn = record.state().conn.clone();
            match conn {
                Some(conn) => return Ok((alias.to_string(), conn)),
                None => {
                    invalid.insert(alias.to_string());
                }
            }
        }
        Err(SelectionError::NoAvailableConnection.into())
    }

    /// Reorders candidates in place: local-cell tablets first, then the
    /// rest, with a uniform random permutation inside each zone. The
    /// partition is an in-place stable two-pointer pass followed by two
    /// independent Fisher-Yates passes.
    pub(crate) fn shuffle_tablets(
        &self,
        local_cell: &str,
        tablets: &mut [Arc<TabletHealthRecord>],
    ) {
        let length = tablets.len() as i64;
        let mut same_cell: i64 = 0;
        let mut diff_cell: i64 = 0;
        let mut same_cell_max: i64 = -1;

        // move all same cell tablets to the front
        loop {
            same_cell_max = diff_cell - 1;
            same_cell = self.next_tablet(local_cell, tablets, same_cell, length, true);
            diff_cell = self.next_tablet(local_cell, tablets, diff_cell, length, false);
            // either no more diffs or no more same cells stop the iteration
            if same_cell < 0 || diff_cell < 0 {
                break;
            }
            if same_cell < diff_cell {
                // fast forward the same-cell lookup past the diff pointer
                same_cell = diff_cell + 1;
            } else {
                tablets.swap(same_cell as usize, diff_cell as usize);
                same_cell += 1;
                diff_cell += 1;
            }
        }

        let mut rng = rand::thread_rng();

        // shuffle in same cell tablets
        let mut i = same_cell_max;
        while i > 0 {
            let swap = rng.gen_range(0..=i);
            tablets.swap(i as usize, swap as usize);
            i -= 1;
        }

        // shuffle in diff cell tablets
        let diff_cell_min = same_cell_max + 1;
        let mut i = length - 1;
        while i > diff_cell_min {
            let swap = rng.gen_range(0..(i - same_cell_max)) + diff_cell_min;
            tablets.swap(i as usize, swap as usize);
            i -= 1;
        }
    }

    fn next_tablet(
        &self,
        local_cell: &str,
        tablets: &[Arc<TabletHealthRecord>],
        mut offset: i64,
        length: i64,
        same_cell: bool,
    ) -> i64 {
        while offset < length {
            let cell = &tablets[offset as usize].tablet().alias.cell;
            if self.cells_equivalent_cached(cell, local_cell) == same_cell {
                return offset;
            }
            offset += 1;
        }
        -1
    }

    /// Waits until the target has at least one tablet in the index. The
    /// tablet does not have to be healthy.
    pub async fn wait_for_tablets(
        &self,
        ctx: &CancellationToken,
        keyspace: impl Into<String>,
        shard: impl Into<String>,
        tablet_type: TabletType,
    ) -> Result<()> {
        let targets = vec![Target::new(keyspace, shard, tablet_type)];
        self.wait_for_target_set(ctx, targets, false).await
    }

    /// Waits until each target has at least one healthy serving tablet.
    pub async fn wait_for_all_serving_tablets(
        &self,
        ctx: &CancellationToken,
        targets: Vec<Target>,
    ) -> Result<()> {
        self.wait_for_target_set(ctx, targets, true).await
    }

    /// Polls the index until every target is satisfied or `ctx` fires.
    /// Targets are consumed as they are found, so a target once found
    /// stays found even if it later flaps.
    async fn wait_for_target_set(
        &self,
        ctx: &CancellationToken,
        targets: Vec<Target>,
        require_serving: bool,
    ) -> Result<()> {
        let mut targets: Vec<Option<Target>> = targets.into_iter().map(Some).collect();
        loop {
            let mut all_present = true;
            for slot in targets.iter_mut() {
                let Some(target) = slot else {
                    continue;
                };
                let found = if require_serving {
                    !self.get_healthy_tablet_stats(target).is_empty()
                } else {
                    !self.get_tablet_stats(target).is_empty()
                };
                if found {
                    *slot = None;
                } else {
                    all_present = false;
                }
            }
            if all_present {
                return Ok(());
            }
            tokio::select! {
                _ = ctx.cancelled() => return Err(Error::Cancelled("wait for tablets".to_string())),
                _ = sleep(WAIT_AVAILABLE_TABLET_INTERVAL) => {}
            }
        }
    }
}
