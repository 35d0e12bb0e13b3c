//! Storage engine contract consumed by the commit pipeline

use crate::chain::{BatchChain, CursorContext, StoreCursors};
use crate::command::{Command, NodeRecord};
use crate::ordering::ApplicationOrdering;
use crate::state::TransactionState;
use std::sync::Arc;
use tessera_core::{Result, TransactionApplicationMode};

/// Change of one indexed property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexUpdate {
    /// Node id
    pub entity: u64,
    /// Property key token
    pub key: u32,
    /// Value before, `None` if absent
    pub before: Option<i64>,
    /// Value after, `None` if removed
    pub after: Option<i64>,
}

/// Receives index updates derived from applied batches.
pub trait IndexUpdateListener: Send + Sync {
    /// Apply updates produced by one batch chain.
    fn apply_updates(&self, updates: &[IndexUpdate], mode: TransactionApplicationMode) -> Result<()>;
}

/// Read access to committed state.
pub trait StorageReader: Send + Sync {
    /// Record of a node, if it is in use.
    fn node(&self, id: u64) -> Option<NodeRecord>;

    /// Value of a node property.
    fn property(&self, entity: u64, key: u32) -> Option<i64>;

    /// Number of nodes carrying `label`.
    fn node_count(&self, label: u32) -> i64;
}

/// Turns transaction state into commands and applies command batches.
pub trait StorageEngine: StorageReader {
    /// Reserve an id for a node about to be created.
    fn reserve_node_id(&self) -> u64;

    /// Return reserved ids that never became nodes.
    fn release_node_ids(&self, ids: &[u64]);

    /// Build the commands that turn committed state into `state` applied.
    fn create_commands(
        &self,
        state: &TransactionState,
        context: &mut CursorContext,
    ) -> Result<Vec<Command>>;

    /// Open cursors for a batch about to be applied.
    fn create_store_cursors(&self) -> Box<dyn StoreCursors>;

    /// Ordering shared by every ordering-sensitive batch of this engine.
    fn application_ordering(&self) -> Arc<ApplicationOrdering>;

    /// Apply every batch of `chain` in `mode`.
    fn apply(&self, chain: &mut BatchChain, mode: TransactionApplicationMode) -> Result<()>;
}
