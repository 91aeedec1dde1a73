use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Serving role of a tablet. Only the primary accepts writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TabletType {
    #[default]
    Unknown,
    Primary,
    Replica,
    Rdonly,
    Spare,
    Backup,
    Drained,
}

impl fmt::Display for TabletType {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            TabletType::Unknown => "unknown",
            TabletType::Primary => "primary",
            TabletType::Replica => "replica",
            TabletType::Rdonly => "rdonly",
            TabletType::Spare => "spare",
            TabletType::Backup => "backup",
            TabletType::Drained => "drained",
        };
        f.write_str(s)
    }
}

/// Stable tablet identity: the cell it was provisioned in plus a uid unique
/// within that cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TabletAlias {
    pub cell: String,
    pub uid: u32,
}

impl TabletAlias {
    pub fn new(
        cell: impl Into<String>,
        uid: u32,
    ) -> Self {
        Self { cell: cell.into(), uid }
    }
}

impl fmt::Display for TabletAlias {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}-{:010}", self.cell, self.uid)
    }
}

/// A backend database server instance as recorded in topology.
///
/// `tablet_type` is the declared type at record-read time; the type the
/// tablet actually serves is reported over its health stream and may differ
/// after a reparent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tablet {
    pub alias: TabletAlias,
    pub keyspace: String,
    pub shard: String,
    pub tablet_type: TabletType,
    pub hostname: String,
    /// Named ports (grpc, mysql, ...). Sorted map so the address key below
    /// is stable.
    pub port_map: BTreeMap<String, u16>,
}

impl Tablet {
    /// Address key used to detect "same tablet, moved": the hostname plus
    /// every named port, in sorted order.
    pub fn addr_key(&self) -> String {
        let mut key = self.hostname.clone();
        for (name, port) in &self.port_map {
            key.push_str(&format!(",{}:{}", name, port));
        }
        key
    }

    /// The `(keyspace, shard, type)` this tablet was declared to serve.
    pub fn declared_target(&self) -> Target {
        Target {
            keyspace: self.keyspace.clone(),
            shard: self.shard.clone(),
            tablet_type: self.tablet_type,
        }
    }
}

/// A serving role the query router can address: `(keyspace, shard, type)`.
/// Cell is deliberately excluded; the index spans all watched cells.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Target {
    pub keyspace: String,
    pub shard: String,
    pub tablet_type: TabletType,
}

impl Target {
    pub fn new(
        keyspace: impl Into<String>,
        shard: impl Into<String>,
        tablet_type: TabletType,
    ) -> Self {
        Self {
            keyspace: keyspace.into(),
            shard: shard.into(),
            tablet_type,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}.{}.{}", self.keyspace, self.shard, self.tablet_type)
    }
}
