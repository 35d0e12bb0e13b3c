//! Logical changes accumulated by a transaction before commit

use crate::command::Labels;
use rustc_hash::FxHashMap;

/// Changes made by one transaction, turned into commands at commit.
///
/// Pooled transactions keep their state between uses; [`clear`](Self::clear)
/// empties it without giving up the allocated capacity.
#[derive(Debug, Default)]
pub struct TransactionState {
    created_nodes: Vec<u64>,
    deleted_nodes: Vec<u64>,
    discarded_nodes: Vec<u64>,
    added_labels: FxHashMap<u64, Labels>,
    properties: FxHashMap<(u64, u32), Option<i64>>,
}

impl TransactionState {
    /// Empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a node created with a freshly reserved id.
    pub fn node_created(&mut self, id: u64) {
        self.created_nodes.push(id);
    }

    /// Record a node deletion.
    ///
    /// Deleting a node created by this same transaction drops it and its
    /// changes; its id ends up in [`discarded_nodes`](Self::discarded_nodes).
    pub fn node_deleted(&mut self, id: u64) {
        if let Some(pos) = self.created_nodes.iter().position(|n| *n == id) {
            self.created_nodes.swap_remove(pos);
            self.discarded_nodes.push(id);
        } else if !self.deleted_nodes.contains(&id) {
            self.deleted_nodes.push(id);
        }
        self.added_labels.remove(&id);
        self.properties.retain(|(entity, _), _| *entity != id);
    }

    /// Record a label added to a node.
    pub fn label_added(&mut self, node: u64, label: u32) {
        let labels = self.added_labels.entry(node).or_default();
        if !labels.contains(&label) {
            labels.push(label);
        }
    }

    /// Record a property set on a node.
    pub fn property_set(&mut self, node: u64, key: u32, value: i64) {
        self.properties.insert((node, key), Some(value));
    }

    /// Record a property removed from a node.
    pub fn property_removed(&mut self, node: u64, key: u32) {
        self.properties.insert((node, key), None);
    }

    /// Whether anything was changed.
    pub fn has_changes(&self) -> bool {
        !self.created_nodes.is_empty()
            || !self.deleted_nodes.is_empty()
            || !self.added_labels.is_empty()
            || !self.properties.is_empty()
    }

    /// Nodes created, in creation order.
    pub fn created_nodes(&self) -> &[u64] {
        &self.created_nodes
    }

    /// Pre-existing nodes deleted.
    pub fn deleted_nodes(&self) -> &[u64] {
        &self.deleted_nodes
    }

    /// Nodes created and deleted again by this transaction.
    pub fn discarded_nodes(&self) -> &[u64] {
        &self.discarded_nodes
    }

    /// Whether `node` was created by this transaction.
    pub fn is_created(&self, node: u64) -> bool {
        self.created_nodes.contains(&node)
    }

    /// Whether `node` was deleted by this transaction.
    pub fn is_deleted(&self, node: u64) -> bool {
        self.deleted_nodes.contains(&node) || self.discarded_nodes.contains(&node)
    }

    /// Labels added to `node`, if any.
    pub fn added_labels(&self, node: u64) -> Option<&Labels> {
        self.added_labels.get(&node)
    }

    /// Nodes that got labels, ascending.
    pub fn nodes_with_added_labels(&self) -> Vec<u64> {
        let mut nodes: Vec<u64> = self.added_labels.keys().copied().collect();
        nodes.sort_unstable();
        nodes
    }

    /// Pending value of a property: `Some(None)` if removed here, `None`
    /// if untouched.
    pub fn property(&self, node: u64, key: u32) -> Option<Option<i64>> {
        self.properties.get(&(node, key)).copied()
    }

    /// Property changes ordered by (node, key).
    pub fn sorted_property_changes(&self) -> Vec<((u64, u32), Option<i64>)> {
        let mut changes: Vec<_> = self.properties.iter().map(|(k, v)| (*k, *v)).collect();
        changes.sort_unstable_by_key(|(k, _)| *k);
        changes
    }

    /// Empty the state, keeping allocated capacity.
    pub fn clear(&mut self) {
        self.created_nodes.clear();
        self.deleted_nodes.clear();
        self.discarded_nodes.clear();
        self.added_labels.clear();
        self.properties.clear();
    }

    /// Capacity of the created-node list, used to observe reuse.
    pub fn created_capacity(&self) -> usize {
        self.created_nodes.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_state_has_no_changes() {
        assert!(!TransactionState::new().has_changes());
    }

    #[test]
    fn test_delete_of_created_node_discards_it() {
        let mut state = TransactionState::new();
        state.node_created(4);
        state.label_added(4, 1);
        state.property_set(4, 2, 10);
        state.node_deleted(4);

        assert!(state.created_nodes().is_empty());
        assert!(state.deleted_nodes().is_empty());
        assert_eq!(state.discarded_nodes(), &[4]);
        assert!(state.added_labels(4).is_none());
        assert!(state.sorted_property_changes().is_empty());
    }

    #[test]
    fn test_labels_deduplicated() {
        let mut state = TransactionState::new();
        state.label_added(1, 7);
        state.label_added(1, 7);
        assert_eq!(state.added_labels(1).unwrap().len(), 1);
    }

    #[test]
    fn test_property_changes_sorted() {
        let mut state = TransactionState::new();
        state.property_set(2, 1, 5);
        state.property_removed(1, 3);
        state.property_set(1, 1, 6);
        let keys: Vec<_> = state
            .sorted_property_changes()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![(1, 1), (1, 3), (2, 1)]);
        assert_eq!(state.property(1, 3), Some(None));
        assert_eq!(state.property(9, 9), None);
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut state = TransactionState::new();
        for id in 0..64 {
            state.node_created(id);
        }
        let capacity = state.created_capacity();
        state.clear();
        assert!(!state.has_changes());
        assert_eq!(state.created_capacity(), capacity);
    }
}
