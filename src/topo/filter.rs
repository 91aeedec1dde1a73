use std::collections::HashMap;

use crate::Result;
use crate::TopologyError;

use super::Tablet;

/// Narrows the set of tablets a topology watcher feeds into the health
/// check. Applied after the cell-inclusion check.
pub trait TabletFilter: Send + Sync + 'static {
    fn is_included(
        &self,
        tablet: &Tablet,
    ) -> bool;
}

/// Half-open keyrange over the keyspace-id space, parsed from hex bounds.
/// An empty bound means "from the start" / "to the end" respectively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    start: Vec<u8>,
    end: Vec<u8>,
}

impl KeyRange {
    /// Parses `"40-80"`, `"-80"`, `"40-"` or `"-"`.
    pub fn parse(value: &str) -> Option<Self> {
        let (start, end) = value.split_once('-')?;
        Some(Self {
            start: parse_hex_bound(start)?,
            end: parse_hex_bound(end)?,
        })
    }

    /// True when `other` lies entirely within `self`.
    pub fn includes(
        &self,
        other: &KeyRange,
    ) -> bool {
        self.start <= other.start && (self.end.is_empty() || (!other.end.is_empty() && other.end <= self.end))
    }
}

fn parse_hex_bound(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(s.len() / 2);
    let bytes = s.as_bytes();
    for pair in bytes.chunks(2) {
        let hi = (pair[0] as char).to_digit(16)?;
        let lo = (pair[1] as char).to_digit(16)?;
        out.push(((hi << 4) | lo) as u8);
    }
    Some(out)
}

#[derive(Debug, Clone)]
struct ShardSelector {
    shard: String,
    key_range: Option<KeyRange>,
}

/// Filter built from `keyspace|shard` entries, where `shard` is either a
/// shard name or a hex keyrange. A tablet passes when its keyspace has an
/// entry whose shard name matches, or whose keyrange contains the tablet's
/// shard range.
pub struct FilterByShard {
    selectors: HashMap<String, Vec<ShardSelector>>,
}

impl FilterByShard {
    pub fn new(entries: &[String]) -> Result<Self> {
        let mut selectors: HashMap<String, Vec<ShardSelector>> = HashMap::new();
        for entry in entries {
            let (keyspace, shard) = entry.split_once('|').ok_or_else(|| TopologyError::InvalidFilter {
                entry: entry.clone(),
                reason: "expected keyspace|shard".to_string(),
            })?;
            if keyspace.is_empty() || shard.is_empty() {
                return Err(TopologyError::InvalidFilter {
                    entry: entry.clone(),
                    reason: "keyspace and shard must be non-empty".to_string(),
                }
                .into());
            }
            let key_range = if shard.contains('-') {
                Some(KeyRange::parse(shard).ok_or_else(|| TopologyError::InvalidFilter {
                    entry: entry.clone(),
                    reason: "malformed keyrange".to_string(),
                })?)
            } else {
                None
            };
            selectors.entry(keyspace.to_string()).or_default().push(ShardSelector {
                shard: shard.to_string(),
                key_range,
            });
        }
        Ok(Self { selectors })
    }
}

impl TabletFilter for FilterByShard {
    fn is_included(
        &self,
        tablet: &Tablet,
    ) -> bool {
        let Some(selectors) = self.selectors.get(&tablet.keyspace) else {
            return false;
        };
        for selector in selectors {
            match (&selector.key_range, KeyRange::parse(&tablet.shard)) {
                // Both filter and tablet shard are keyranges: containment.
                (Some(range), Some(tablet_range)) => {
                    if range.includes(&tablet_range) {
                        return true;
                    }
                }
                _ => {
                    if selector.shard == tablet.shard {
                        return true;
                    }
                }
            }
        }
        false
    }
}

/// Filter that admits tablets of the listed keyspaces only.
pub struct FilterByKeyspace {
    keyspaces: Vec<String>,
}

impl FilterByKeyspace {
    pub fn new(keyspaces: &[String]) -> Self {
        Self {
            keyspaces: keyspaces.to_vec(),
        }
    }
}

impl TabletFilter for FilterByKeyspace {
    fn is_included(
        &self,
        tablet: &Tablet,
    ) -> bool {
        self.keyspaces.iter().any(|k| *k == tablet.keyspace)
    }
}
