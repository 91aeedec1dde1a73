use std::collections::BTreeMap;

use super::*;

fn tablet_in(
    keyspace: &str,
    shard: &str,
) -> Tablet {
    Tablet {
        alias: TabletAlias::new("cell_a", 1),
        keyspace: keyspace.to_string(),
        shard: shard.to_string(),
        tablet_type: TabletType::Replica,
        hostname: "host1".to_string(),
        port_map: BTreeMap::new(),
    }
}

#[test]
fn test_keyrange_parse() {
    assert!(KeyRange::parse("40-80").is_some());
    assert!(KeyRange::parse("-80").is_some());
    assert!(KeyRange::parse("40-").is_some());
    assert!(KeyRange::parse("-").is_some());
    // odd-length and non-hex bounds are rejected
    assert!(KeyRange::parse("4-80").is_none());
    assert!(KeyRange::parse("zz-80").is_none());
    assert!(KeyRange::parse("80").is_none());
}

#[test]
fn test_keyrange_includes() {
    let full = KeyRange::parse("-").unwrap();
    let half = KeyRange::parse("-80").unwrap();
    let quarter = KeyRange::parse("40-80").unwrap();

    assert!(full.includes(&half));
    assert!(full.includes(&quarter));
    assert!(half.includes(&quarter));
    assert!(!quarter.includes(&half));
    assert!(!half.includes(&full));
}

#[test]
fn test_filter_by_shard_names() {
    let f = FilterByShard::new(&["ks1|0".to_string(), "ks2|1".to_string()]).unwrap();
    assert!(f.is_included(&tablet_in("ks1", "0")));
    assert!(!f.is_included(&tablet_in("ks1", "1")));
    assert!(f.is_included(&tablet_in("ks2", "1")));
    assert!(!f.is_included(&tablet_in("ks3", "0")));
}

#[test]
fn test_filter_by_shard_keyrange() {
    let f = FilterByShard::new(&["ks1|-80".to_string()]).unwrap();
    assert!(f.is_included(&tablet_in("ks1", "-40")));
    assert!(f.is_included(&tablet_in("ks1", "40-80")));
    assert!(!f.is_included(&tablet_in("ks1", "80-c0")));
    assert!(!f.is_included(&tablet_in("ks1", "40-c0")));
}

#[test]
fn test_filter_by_shard_rejects_malformed() {
    assert!(FilterByShard::new(&["ks1".to_string()]).is_err());
    assert!(FilterByShard::new(&["|0".to_string()]).is_err());
    assert!(FilterByShard::new(&["ks1|".to_string()]).is_err());
    assert!(FilterByShard::new(&["ks1|4-80".to_string()]).is_err());
}

#[test]
fn test_filter_by_keyspace() {
    let f = FilterByKeyspace::new(&["ks1".to_string(), "ks2".to_string()]);
    assert!(f.is_included(&tablet_in("ks1", "0")));
    assert!(f.is_included(&tablet_in("ks2", "80-c0")));
    assert!(!f.is_included(&tablet_in("ks3", "0")));
}
