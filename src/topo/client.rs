use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::Result;

use super::Tablet;
use super::TabletAlias;

/// Read access to the external topology store.
///
/// Callers cancel in-flight reads by dropping the returned future; the
/// watcher wraps every call in a select against its cancellation token.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TopologyClient: Send + Sync + 'static {
    /// Lists every tablet alias registered in the given cell.
    async fn list_tablets(
        &self,
        cell: &str,
    ) -> Result<Vec<TabletAlias>>;

    /// Fetches the full tablet record for one alias.
    async fn get_tablet(
        &self,
        alias: &TabletAlias,
    ) -> Result<Tablet>;

    /// Resolves the alias group a cell belongs to. Returns the cell name
    /// itself when the cell is not part of any alias group; infallible
    /// enough to cache per process.
    async fn get_alias_by_cell(
        &self,
        cell: &str,
    ) -> String;
}
