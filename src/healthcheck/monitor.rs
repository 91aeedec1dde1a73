//! Per-tablet health stream monitor.
//!
//! One task per [`TabletHealthRecord`]: dial on demand, read the streaming
//! health RPC, enforce the freshness window through a sibling watchdog
//! task, and retry with exponential backoff until the record is cancelled.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use crate::constants::CONN_CLOSE_TIMEOUT;
use crate::query_service::StreamHealthResponse;
use crate::Result;
use crate::StreamError;

use super::tablet_health::TabletHealthRecord;
use super::tablet_health::TabletHealthState;
use super::HealthCheck;

/// Monitor-local state that needs no lock: the monitor task is its only
/// reader and writer.
struct MonitorContext {
    /// Whether a serving-state change was ever logged. Transitions are
    /// logged once and then only on change, so a permanently down tablet
    /// does not flood the log.
    logged_serving_state: bool,
    /// Seconds-since-epoch of the last accepted health sample.
    last_response_at: Option<u64>,
}

/// Runs until the record's cancellation token fires, then finalizes the
/// record and releases its connection.
pub(crate) async fn check_conn(
    hc: Arc<HealthCheck>,
    record: Arc<TabletHealthRecord>,
) {
    let ctx = record.cancel_token();
    let mut mon = MonitorContext {
        logged_serving_state: false,
        last_response_at: None,
    };
    let mut retry_delay = hc.retry_delay();

    loop {
        let stream_ctx = ctx.child_token();

        // The watchdog restarts its timer on every incoming sample. On
        // expiry it flips `timed_out` and cancels the stream context so
        // the read loop below unblocks.
        let (serving_tx, serving_rx) = mpsc::channel::<bool>(1);
        let timed_out = Arc::new(AtomicBool::new(false));
        let watchdog = tokio::spawn(freshness_watchdog(
            serving_rx,
            stream_ctx.clone(),
            Arc::clone(&timed_out),
            hc.health_check_timeout(),
        ));

        run_stream(&hc, &record, &stream_ctx, &serving_tx, &mut mon, &mut retry_delay).await;

        // Idempotent: also stops the watchdog when the stream ended on its
        // own.
        stream_ctx.cancel();
        drop(serving_tx);
        let _ = watchdog.await;

        // Applied after the stream has returned so the timeout verdict
        // prevails over any update the stream delivered concurrently.
        if timed_out.load(Ordering::SeqCst) {
            mark_timed_out(&hc, &record, &mut mon);
        }

        tokio::select! {
            _ = ctx.cancelled() => break,
            _ = sleep(retry_delay) => {
                retry_delay = (retry_delay * 2).min(hc.health_check_timeout());
            }
        }
    }

    finalize_conn(&record, &mut mon).await;
}

async fn freshness_watchdog(
    mut serving_rx: mpsc::Receiver<bool>,
    stream_ctx: CancellationToken,
    timed_out: Arc<AtomicBool>,
    health_check_timeout: Duration,
) {
    loop {
        tokio::select! {
            msg = serving_rx.recv() => {
                if msg.is_none() {
                    return;
                }
            }
            _ = sleep(health_check_timeout) => {
                timed_out.store(true, Ordering::SeqCst);
                stream_ctx.cancel();
                return;
            }
            _ = stream_ctx.cancelled() => return,
        }
    }
}

/// One stream attempt: dial when the record has no connection, then read
/// samples until the stream terminates or the stream context is cancelled.
async fn run_stream(
    hc: &Arc<HealthCheck>,
    record: &Arc<TabletHealthRecord>,
    stream_ctx: &CancellationToken,
    serving_tx: &mpsc::Sender<bool>,
    mon: &mut MonitorContext,
    retry_delay: &mut Duration,
) {
    let conn = {
        let existing = record.state().conn.clone();
        match existing {
            Some(conn) => conn,
            None => match hc.dialer().dial(record.tablet(), true).await {
                Ok(conn) => {
                    let mut st = record.state();
                    st.conn = Some(Arc::clone(&conn));
                    st.last_error = None;
                    conn
                }
                Err(e) => {
                    record.state().last_error = Some(e.to_string());
                    return;
                }
            },
        }
    };

    let mut stream = match conn.stream_health(stream_ctx.clone()).await {
        Ok(stream) => stream,
        Err(e) => {
            teardown_conn(record, mon, &e.to_string()).await;
            return;
        }
    };

    loop {
        let item = tokio::select! {
            _ = stream_ctx.cancelled() => return,
            item = stream.next() => item,
        };
        match item {
            Some(Ok(response)) => {
                // A sample arrived: reset the back-off and feed the
                // watchdog without blocking.
                *retry_delay = hc.retry_delay();
                let _ = serving_tx.try_send(response.serving);
                if let Err(e) = process_response(hc, record, mon, response) {
                    teardown_conn(record, mon, &e.to_string()).await;
                    return;
                }
            }
            Some(Err(e)) => {
                teardown_conn(record, mon, &e.to_string()).await;
                return;
            }
            // Clean end of stream: keep the connection for the next
            // attempt after backoff.
            None => return,
        }
    }
}

/// Interprets one health sample and updates the record.
fn process_response(
    hc: &Arc<HealthCheck>,
    record: &Arc<TabletHealthRecord>,
    mon: &mut MonitorContext,
    response: StreamHealthResponse,
) -> Result<()> {
    let (target, stats) = match (response.target.clone(), response.realtime_stats.clone()) {
        (Some(target), Some(stats)) => (target, stats),
        _ => return Err(StreamError::MalformedResponse(format!("{response:?}")).into()),
    };

    if let Some(alias) = &response.tablet_alias {
        if *alias != record.tablet().alias {
            return Err(StreamError::AliasMismatch {
                expected: record.tablet().alias.to_string(),
                got: alias.to_string(),
            }
            .into());
        }
    }

    // An app-level error from the tablet forces the serving state but the
    // remaining fields are still applied.
    let mut serving = response.serving;
    let mut health_error = None;
    if !stats.health_error.is_empty() {
        health_error = Some(StreamError::HealthError(stats.health_error.clone()).to_string());
        serving = false;
    }

    // A reported type change moves the record into its new bucket and
    // initializes the error counter for the new target key.
    let current_target = record.state().target.clone();
    if current_target.tablet_type != target.tablet_type {
        hc.metrics().init_healthcheck_error_counter(&target);
        hc.move_record_bucket(record, &current_target, &target);
    }

    mon.last_response_at = Some(crate::utils::time::get_now_as_u64());
    let mut st = record.state();
    st.target = target;
    st.primary_term_start_time = response.primary_term_start_time;
    st.stats = Some(stats);
    st.last_error = health_error.clone();
    let reason = match &health_error {
        Some(e) => format!("healthcheck update error: {e}"),
        None => "healthcheck update".to_string(),
    };
    set_serving_state(record, &mut st, mon, serving, &reason);
    Ok(())
}

/// Records a stream failure and drops the connection so the next attempt
/// re-dials.
async fn teardown_conn(
    record: &Arc<TabletHealthRecord>,
    mon: &mut MonitorContext,
    reason: &str,
) {
    warn!(tablet = %record.alias_str(), error = %reason, "tablet healthcheck stream error");
    let conn = {
        let mut st = record.state();
        set_serving_state(record, &mut st, mon, false, reason);
        st.last_error = Some(reason.to_string());
        st.conn.take()
    };
    if let Some(conn) = conn {
        if timeout(CONN_CLOSE_TIMEOUT, conn.close()).await.is_err() {
            warn!(tablet = %record.alias_str(), "timed out closing tablet connection");
        }
    }
}

fn mark_timed_out(
    hc: &Arc<HealthCheck>,
    record: &Arc<TabletHealthRecord>,
    mon: &mut MonitorContext,
) {
    let latest = mon
        .last_response_at
        .map(|t| t.to_string())
        .unwrap_or_else(|| "never".to_string());
    let error = StreamError::TimedOut(latest).to_string();
    let target = {
        let mut st = record.state();
        st.last_error = Some(error.clone());
        set_serving_state(record, &mut st, mon, false, &error);
        st.target.clone()
    };
    hc.metrics().record_healthcheck_error(&target);
}

/// Sets the serving flag, logging the first transition and every change
/// afterwards. Logging is dispatched to a detached task because the
/// per-record lock is held here.
fn set_serving_state(
    record: &TabletHealthRecord,
    st: &mut TabletHealthState,
    mon: &mut MonitorContext,
    serving: bool,
    reason: &str,
) {
    if !mon.logged_serving_state || serving != st.serving {
        let tablet = record.alias_str().to_string();
        let keyspace = st.target.keyspace.clone();
        let shard = st.target.shard.clone();
        let tablet_type = st.target.tablet_type;
        let reason = reason.to_string();
        tokio::spawn(async move {
            info!(
                %tablet,
                %keyspace,
                %shard,
                %tablet_type,
                serving,
                %reason,
                "healthcheck serving state change"
            );
        });
        mon.logged_serving_state = true;
    }
    st.serving = serving;
}

/// Final notification on monitor exit: the tablet is no longer up and its
/// connection is released with a bounded close, since the stream context
/// is already dead.
async fn finalize_conn(
    record: &Arc<TabletHealthRecord>,
    mon: &mut MonitorContext,
) {
    let conn = {
        let mut st = record.state();
        st.up = false;
        set_serving_state(record, &mut st, mon, false, "health monitor closing connection");
        st.last_error = Some("health stream cancelled".to_string());
        st.conn.take()
    };
    if let Some(conn) = conn {
        let _ = timeout(CONN_CLOSE_TIMEOUT, conn.close()).await;
    }
}
