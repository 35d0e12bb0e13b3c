//! In-memory record storage engine
//!
//! # Design
//!
//! - Node store: DashMap `id -> NodeRecord`, unused records are absent
//! - Property store: DashMap `node -> FxHashMap<key, value>`
//! - Counts store: label counts guarded by an applied watermark
//! - Id generator: high id plus free list
//!
//! Node and property commands carry absolute images and are applied by
//! overwriting, so re-applying them is a no-op. Count deltas are checked
//! against the counts watermark, an append index, under both recovery
//! passes.

use crate::chain::{BatchChain, CommandBatchToApply, CommandsToApply, CursorContext, StoreCursors};
use crate::command::{Command, Labels, NodeRecord};
use crate::engine::{IndexUpdate, IndexUpdateListener, StorageEngine, StorageReader};
use crate::ordering::ApplicationOrdering;
use crate::state::TransactionState;
use crate::stores::{CountsStore, IdGenerator};
use dashmap::DashMap;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tessera_core::{KernelError, Result, TransactionApplicationMode};
use tracing::{debug, trace};

/// Cursors handed to batches by [`MemoryStorageEngine`].
#[derive(Debug)]
pub struct MemoryStoreCursors {
    open: Arc<AtomicUsize>,
    closed: bool,
}

impl MemoryStoreCursors {
    fn open(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        MemoryStoreCursors {
            open: Arc::clone(counter),
            closed: false,
        }
    }
}

impl StoreCursors for MemoryStoreCursors {
    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Full content of the stores, for comparisons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreImage {
    /// In-use node records
    pub nodes: BTreeMap<u64, NodeRecord>,
    /// Properties by (node, key)
    pub properties: BTreeMap<(u64, u32), i64>,
    /// Non-zero label counts
    pub counts: BTreeMap<u32, i64>,
}

/// Storage engine keeping every store in memory.
pub struct MemoryStorageEngine {
    nodes: DashMap<u64, NodeRecord>,
    properties: DashMap<u64, FxHashMap<u32, i64>>,
    counts: CountsStore,
    ids: IdGenerator,
    ordering: Arc<ApplicationOrdering>,
    index_listener: RwLock<Option<Arc<dyn IndexUpdateListener>>>,
    open_cursors: Arc<AtomicUsize>,
    fail_next_apply: AtomicBool,
}

impl MemoryStorageEngine {
    /// Empty engine.
    pub fn new() -> Self {
        MemoryStorageEngine {
            nodes: DashMap::new(),
            properties: DashMap::new(),
            counts: CountsStore::new(),
            ids: IdGenerator::new(),
            ordering: Arc::new(ApplicationOrdering::new()),
            index_listener: RwLock::new(None),
            open_cursors: Arc::new(AtomicUsize::new(0)),
            fail_next_apply: AtomicBool::new(false),
        }
    }

    /// Register the listener receiving index updates.
    pub fn set_index_update_listener(&self, listener: Arc<dyn IndexUpdateListener>) {
        *self.index_listener.write() = Some(listener);
    }

    /// Make the next batch apply fail with a storage error.
    pub fn fail_next_apply(&self) {
        self.fail_next_apply.store(true, Ordering::SeqCst);
    }

    /// Store cursors currently open.
    pub fn open_cursors(&self) -> usize {
        self.open_cursors.load(Ordering::SeqCst)
    }

    /// One past the highest node id seen.
    pub fn high_node_id(&self) -> u64 {
        self.ids.high_id()
    }

    /// Node ids waiting for reuse.
    pub fn free_node_ids(&self) -> usize {
        self.ids.free_count()
    }

    /// Append index of the last batch whose count deltas were applied.
    pub fn counts_watermark(&self) -> u64 {
        self.counts.applied()
    }

    /// Copy of every store.
    pub fn image(&self) -> StoreImage {
        let nodes = self
            .nodes
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        let mut properties = BTreeMap::new();
        for entry in self.properties.iter() {
            for (key, value) in entry.value() {
                properties.insert((*entry.key(), *key), *value);
            }
        }
        StoreImage {
            nodes,
            properties,
            counts: self.counts.image(),
        }
    }

    fn existing_node(&self, id: u64, context: &mut CursorContext) -> Result<NodeRecord> {
        context.record_read();
        self.nodes
            .get(&id)
            .map(|record| record.clone())
            .ok_or_else(|| KernelError::Storage(format!("node {} does not exist", id)))
    }

    fn write_node(&self, id: u64, image: &NodeRecord) {
        if image.in_use {
            self.nodes.insert(id, image.clone());
        } else {
            self.nodes.remove(&id);
        }
    }

    fn write_property(&self, entity: u64, key: u32, value: Option<i64>) {
        match value {
            Some(v) => {
                self.properties.entry(entity).or_default().insert(key, v);
            }
            None => {
                let now_empty = match self.properties.get_mut(&entity) {
                    Some(mut props) => {
                        props.remove(&key);
                        props.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    self.properties.remove_if(&entity, |_, props| props.is_empty());
                }
            }
        }
    }

    fn apply_batch(
        &self,
        batch: &mut CommandBatchToApply,
        mode: TransactionApplicationMode,
    ) -> Result<Vec<IndexUpdate>> {
        // Reverse steps walk the chain backwards, so waiting for lower
        // keys would wait on the chain's own later links.
        if !mode.is_reverse_step() {
            batch.await_application_turn();
        }
        let result = self.apply_commands(batch, mode);
        batch.application_done();
        result
    }

    fn apply_commands(
        &self,
        batch: &mut CommandBatchToApply,
        mode: TransactionApplicationMode,
    ) -> Result<Vec<IndexUpdate>> {
        if self.fail_next_apply.swap(false, Ordering::SeqCst) {
            return Err(KernelError::Storage(format!(
                "injected failure applying transaction {}",
                batch.transaction_id()
            )));
        }

        let reverse = mode.is_reverse_step();
        let append_index = batch.batch().append_index();
        let mut updates = Vec::new();
        let mut deltas: SmallVec<[(u32, i64); 4]> = SmallVec::new();
        let mut writes = 0;

        let commands: Vec<&Command> = if reverse {
            batch.commands().iter().rev().collect()
        } else {
            batch.commands().iter().collect()
        };

        for command in commands {
            match command {
                Command::Node { id, before, after } => {
                    self.write_node(*id, if reverse { before } else { after });
                    if mode.needs_high_id_tracking() && after.in_use {
                        self.ids.mark_used(*id);
                    }
                    if mode.needs_rollback_id_processing() && !before.in_use && after.in_use {
                        self.ids.free(*id);
                    }
                    writes += 1;
                }
                Command::Property {
                    entity,
                    key: property_key,
                    before,
                    after,
                } => {
                    let (from, to) = if reverse { (*after, *before) } else { (*before, *after) };
                    self.write_property(*entity, *property_key, to);
                    if mode.needs_auxiliary_stores() {
                        updates.push(IndexUpdate {
                            entity: *entity,
                            key: *property_key,
                            before: from,
                            after: to,
                        });
                    }
                    writes += 1;
                }
                // Also under reverse recovery: the counts watermark tells
                // which deltas were counted.
                Command::Counts { label, delta } => {
                    deltas.push((*label, if reverse { -*delta } else { *delta }));
                }
            }
        }

        if !deltas.is_empty() && !self.counts.apply(append_index, &deltas, mode) {
            trace!(
                target: "tessera::recovery",
                tx_id = batch.transaction_id(),
                chunk_id = batch.chunk_id(),
                append_index = append_index.unwrap_or(0),
                %mode,
                "Count deltas skipped"
            );
        }

        let context = batch.cursor_context_mut();
        for _ in 0..writes {
            context.record_write();
        }
        Ok(updates)
    }
}

impl Default for MemoryStorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageReader for MemoryStorageEngine {
    fn node(&self, id: u64) -> Option<NodeRecord> {
        self.nodes.get(&id).map(|record| record.clone())
    }

    fn property(&self, entity: u64, key: u32) -> Option<i64> {
        self.properties
            .get(&entity)
            .and_then(|props| props.get(&key).copied())
    }

    fn node_count(&self, label: u32) -> i64 {
        self.counts.get(label)
    }
}

impl StorageEngine for MemoryStorageEngine {
    fn reserve_node_id(&self) -> u64 {
        self.ids.next_id()
    }

    fn release_node_ids(&self, ids: &[u64]) {
        for id in ids {
            self.ids.free(*id);
        }
    }

    fn create_commands(
        &self,
        state: &TransactionState,
        context: &mut CursorContext,
    ) -> Result<Vec<Command>> {
        let mut node_commands = Vec::new();
        let mut property_commands = Vec::new();
        let mut counts: FxHashMap<u32, i64> = FxHashMap::default();

        let mut created: Vec<u64> = state.created_nodes().to_vec();
        created.sort_unstable();
        for id in created {
            let mut labels: Labels = state.added_labels(id).cloned().unwrap_or_default();
            labels.sort_unstable();
            for label in &labels {
                *counts.entry(*label).or_insert(0) += 1;
            }
            node_commands.push(Command::Node {
                id,
                before: NodeRecord::unused(),
                after: NodeRecord::in_use(labels),
            });
        }

        for id in state.nodes_with_added_labels() {
            if state.is_created(id) || state.is_deleted(id) {
                continue;
            }
            let before = self.existing_node(id, context)?;
            let mut after = before.clone();
            for label in state.added_labels(id).into_iter().flatten() {
                if !after.labels.contains(label) {
                    after.labels.push(*label);
                    *counts.entry(*label).or_insert(0) += 1;
                }
            }
            after.labels.sort_unstable();
            if after != before {
                node_commands.push(Command::Node { id, before, after });
            }
        }

        let mut deleted: Vec<u64> = state.deleted_nodes().to_vec();
        deleted.sort_unstable();
        for id in deleted {
            let before = self.existing_node(id, context)?;
            for label in &before.labels {
                *counts.entry(*label).or_insert(0) -= 1;
            }
            let mut props: Vec<(u32, i64)> = self
                .properties
                .get(&id)
                .map(|p| p.iter().map(|(k, v)| (*k, *v)).collect())
                .unwrap_or_default();
            props.sort_unstable();
            for (key, value) in props {
                property_commands.push(Command::Property {
                    entity: id,
                    key,
                    before: Some(value),
                    after: None,
                });
            }
            node_commands.push(Command::Node {
                id,
                before,
                after: NodeRecord::unused(),
            });
        }

        for ((entity, key), after) in state.sorted_property_changes() {
            let before = if state.is_created(entity) {
                None
            } else {
                context.record_read();
                self.property(entity, key)
            };
            if before != after {
                property_commands.push(Command::Property {
                    entity,
                    key,
                    before,
                    after,
                });
            }
        }

        let mut count_commands: Vec<Command> = counts
            .into_iter()
            .filter(|(_, delta)| *delta != 0)
            .map(|(label, delta)| Command::Counts { label, delta })
            .collect();
        count_commands.sort_unstable_by_key(|c| match c {
            Command::Counts { label, .. } => *label,
            _ => 0,
        });

        // Properties of deleted nodes go before the node itself.
        let (deletions, others): (Vec<Command>, Vec<Command>) = node_commands
            .into_iter()
            .partition(|c| matches!(c, Command::Node { after, .. } if !after.in_use));

        let mut commands = others;
        commands.extend(property_commands);
        commands.extend(deletions);
        commands.extend(count_commands);
        Ok(commands)
    }

    fn create_store_cursors(&self) -> Box<dyn StoreCursors> {
        Box::new(MemoryStoreCursors::open(&self.open_cursors))
    }

    fn application_ordering(&self) -> Arc<ApplicationOrdering> {
        Arc::clone(&self.ordering)
    }

    fn apply(&self, chain: &mut BatchChain, mode: TransactionApplicationMode) -> Result<()> {
        let mut order = chain.link_order();
        if mode.is_reverse_step() {
            order.reverse();
        }

        let mut updates = Vec::new();
        for index in order {
            if let Some(batch) = chain.get_mut(index) {
                updates.extend(self.apply_batch(batch, mode)?);
            }
        }

        if mode.needs_auxiliary_stores() && !updates.is_empty() {
            let listener = self.index_listener.read().clone();
            if let Some(listener) = listener {
                listener.apply_updates(&updates, mode)?;
            }
        }

        debug!(
            target: "tessera::commit",
            batches = chain.len(),
            index_updates = updates.len(),
            %mode,
            "Applied batch chain"
        );
        Ok(())
    }
}
