use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use prometheus::Registry;

use crate::config::DiscoveryConfig;
use crate::test_utils::eventually;
use crate::test_utils::healthy_sample;
use crate::test_utils::make_tablet;
use crate::test_utils::FakeDialer;
use crate::test_utils::FakeTopoServer;
use crate::topo::Tablet;
use crate::topo::TabletType;

use super::HealthCheck;

struct Setup {
    topo: Arc<FakeTopoServer>,
    dialer: Arc<FakeDialer>,
    hc: Arc<HealthCheck>,
}

fn open_hc(local_cell: &str) -> Setup {
    let topo = FakeTopoServer::new();
    let dialer = FakeDialer::new();
    let registry = Registry::new();
    let hc = HealthCheck::open(&DiscoveryConfig::default(), topo.clone(), dialer.clone(), local_cell, &registry)
        .expect("open healthcheck");
    Setup { topo, dialer, hc }
}

async fn add_serving_replica(
    s: &Setup,
    tablet: &Tablet,
) {
    s.hc.add_tablet(tablet.clone());
    let conn = s.dialer.conn(tablet);
    conn.wait_until_streaming().await;
    conn.send_sample(healthy_sample(tablet));
}

/// Scenario: with one replica in the local cell and one in a remote cell,
/// the local one is always picked.
#[tokio::test]
async fn test_pick_prefers_local_cell() {
    let s = open_hc("cell_a");
    let local = make_tablet("cell_a", 1, "ks", "0", TabletType::Replica, "host_a", 1);
    let remote = make_tablet("cell_b", 2, "ks", "0", TabletType::Replica, "host_b", 1);
    add_serving_replica(&s, &local).await;
    add_serving_replica(&s, &remote).await;

    let target = local.declared_target();
    eventually(Duration::from_secs(1), "both replicas serving", || {
        s.hc.get_healthy_tablet_stats(&target).len() == 2
    })
    .await;

    for _ in 0..1_000 {
        let mut invalid = HashSet::new();
        let (alias, _conn) = s.hc.pick(&target, "cell_a", &mut invalid).unwrap();
        assert_eq!(alias, local.alias.to_string());
    }
}

/// Within a cell the shuffle is approximately uniform.
#[tokio::test]
async fn test_shuffle_uniform_within_cell() {
    let s = open_hc("cell_a");
    let t1 = make_tablet("cell_a", 1, "ks", "0", TabletType::Replica, "host1", 1);
    let t2 = make_tablet("cell_a", 2, "ks", "0", TabletType::Replica, "host2", 1);
    add_serving_replica(&s, &t1).await;
    add_serving_replica(&s, &t2).await;

    let target = t1.declared_target();
    eventually(Duration::from_secs(1), "both replicas serving", || {
        s.hc.get_healthy_tablet_stats(&target).len() == 2
    })
    .await;

    let rounds = 2_000;
    let mut first_counts: HashMap<String, usize> = HashMap::new();
    for _ in 0..rounds {
        let mut tablets = s.hc.get_healthy_tablet_stats(&target);
        s.hc.shuffle_tablets("cell_a", &mut tablets);
        *first_counts.entry(tablets[0].alias_str().to_string()).or_insert(0) += 1;
    }

    // Expect roughly 50/50; allow a wide tolerance to avoid flakiness.
    for tablet in [&t1, &t2] {
        let count = *first_counts.get(&tablet.alias.to_string()).unwrap_or(&0);
        assert!(
            count > rounds * 35 / 100 && count < rounds * 65 / 100,
            "shuffle is skewed: {first_counts:?}"
        );
    }
}

#[tokio::test]
async fn test_shuffle_partitions_by_cell_zone() {
    let s = open_hc("cell_a");
    let locals = [
        make_tablet("cell_a", 1, "ks", "0", TabletType::Replica, "host1", 1),
        make_tablet("cell_a", 2, "ks", "0", TabletType::Replica, "host2", 1),
    ];
    let remotes = [
        make_tablet("cell_b", 3, "ks", "0", TabletType::Replica, "host3", 1),
        make_tablet("cell_b", 4, "ks", "0", TabletType::Replica, "host4", 1),
    ];
    for tablet in locals.iter().chain(remotes.iter()) {
        add_serving_replica(&s, tablet).await;
    }

    let target = locals[0].declared_target();
    eventually(Duration::from_secs(1), "all four serving", || {
        s.hc.get_healthy_tablet_stats(&target).len() == 4
    })
    .await;

    for _ in 0..100 {
        let mut tablets = s.hc.get_healthy_tablet_stats(&target);
        s.hc.shuffle_tablets("cell_a", &mut tablets);
        assert_eq!(tablets.len(), 4);
        for record in &tablets[..2] {
            assert_eq!(record.tablet().alias.cell, "cell_a");
        }
        for record in &tablets[2..] {
            assert_eq!(record.tablet().alias.cell, "cell_b");
        }
    }
}

/// Cells that share an alias group count as local once the alias cache is
/// warm.
#[tokio::test]
async fn test_shuffle_uses_cell_alias_equivalence() {
    let s = open_hc("cell_a");
    s.topo.set_cell_alias("cell_a", "metro");
    s.topo.set_cell_alias("cell_a2", "metro");
    // Warm the per-process alias cache.
    s.hc.get_alias_by_cell("cell_a").await;
    s.hc.get_alias_by_cell("cell_a2").await;
    s.hc.get_alias_by_cell("cell_b").await;

    let sibling = make_tablet("cell_a2", 1, "ks", "0", TabletType::Replica, "host1", 1);
    let remote = make_tablet("cell_b", 2, "ks", "0", TabletType::Replica, "host2", 1);
    add_serving_replica(&s, &sibling).await;
    add_serving_replica(&s, &remote).await;

    let target = sibling.declared_target();
    eventually(Duration::from_secs(1), "both serving", || {
        s.hc.get_healthy_tablet_stats(&target).len() == 2
    })
    .await;

    for _ in 0..100 {
        let mut tablets = s.hc.get_healthy_tablet_stats(&target);
        s.hc.shuffle_tablets("cell_a", &mut tablets);
        assert_eq!(tablets[0].tablet().alias.cell, "cell_a2");
    }
}

#[tokio::test]
async fn test_get_healthy_requires_health_for_replicas() {
    let s = open_hc("cell_a");
    let tablet = make_tablet("cell_a", 1, "ks", "0", TabletType::Replica, "host1", 1);
    s.hc.add_tablet(tablet.clone());
    let conn = s.dialer.conn(&tablet);
    conn.wait_until_streaming().await;

    // Present but never served: not a candidate.
    assert!(s.hc.get_healthy_tablet_stats(&tablet.declared_target()).is_empty());
    assert_eq!(s.hc.get_tablet_stats(&tablet.declared_target()).len(), 1);
}

/// A primary is returned even when it is not serving; a reparenting
/// primary beats failing outright.
#[tokio::test]
async fn test_get_healthy_returns_primary_unconditionally() {
    let s = open_hc("cell_a");
    let primary = make_tablet("cell_a", 1, "ks", "0", TabletType::Primary, "host1", 1);
    s.hc.add_tablet(primary.clone());
    let conn = s.dialer.conn(&primary);
    conn.wait_until_streaming().await;

    let mut sample = healthy_sample(&primary);
    sample.serving = false;
    sample.primary_term_start_time = 50;
    conn.send_sample(sample);

    let target = primary.declared_target();
    eventually(Duration::from_secs(1), "sample applied", || {
        s.hc.cache_status()
            .first()
            .map(|st| st.tablet_stats[0].primary_term_start_time == 50)
            .unwrap_or(false)
    })
    .await;

    let stats = s.hc.get_healthy_tablet_stats(&target);
    assert_eq!(stats.len(), 1);
    assert!(!stats[0].is_healthy());
}
