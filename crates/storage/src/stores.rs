//! Auxiliary stores of the in-memory engine: id generation and counts

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use tessera_core::TransactionApplicationMode;

#[derive(Debug, Default)]
struct IdState {
    high_id: u64,
    free: Vec<u64>,
}

/// Node id allocator with a high-id watermark and a free list.
#[derive(Debug, Default)]
pub struct IdGenerator {
    state: Mutex<IdState>,
}

impl IdGenerator {
    /// Generator starting at id 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id: a freed one if available, otherwise the high id.
    pub fn next_id(&self) -> u64 {
        let mut state = self.state.lock();
        if let Some(id) = state.free.pop() {
            return id;
        }
        let id = state.high_id;
        state.high_id += 1;
        id
    }

    /// Note that `id` is in use, raising the high id past it.
    pub fn mark_used(&self, id: u64) {
        let mut state = self.state.lock();
        if id >= state.high_id {
            state.high_id = id + 1;
        }
        state.free.retain(|free| *free != id);
    }

    /// Return an id for reuse.
    pub fn free(&self, id: u64) {
        let mut state = self.state.lock();
        debug_assert!(id < state.high_id, "freeing id {} above high id", id);
        if !state.free.contains(&id) {
            state.free.push(id);
        }
    }

    /// One past the highest id ever handed out or seen.
    pub fn high_id(&self) -> u64 {
        self.state.lock().high_id
    }

    /// Number of ids waiting for reuse.
    pub fn free_count(&self) -> usize {
        self.state.lock().free.len()
    }
}

#[derive(Debug, Default)]
struct CountsState {
    applied: u64,
    reverted: BTreeSet<u64>,
}

/// Label counts plus the append index of the last batch they include.
///
/// Count deltas are not idempotent. Batches carrying deltas apply in append
/// order, so every appended batch at or below the watermark is counted.
/// Under reverse recovery a counted batch has its deltas taken back and the
/// watermark drops below it; under recovery a batch at or below the
/// watermark is skipped. Replaying a log tail into a live store therefore
/// counts each complete batch once and leaves unfinished ones out.
///
/// A counted batch undone by MVCC rollback is remembered, so reverse
/// recovery does not take its deltas back a second time.
#[derive(Debug, Default)]
pub struct CountsStore {
    counts: DashMap<u32, i64>,
    state: Mutex<CountsState>,
}

impl CountsStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the deltas of the batch appended at `append_index`. Returns
    /// false if they were skipped.
    pub fn apply(
        &self,
        append_index: Option<u64>,
        deltas: &[(u32, i64)],
        mode: TransactionApplicationMode,
    ) -> bool {
        use TransactionApplicationMode::*;

        let mut state = self.state.lock();
        match (mode, append_index) {
            (Recovery, Some(index)) if index <= state.applied => return false,
            (ReverseRecovery, Some(index)) if index <= state.applied => {
                state.applied = index.saturating_sub(1);
                if state.reverted.remove(&index) {
                    return false;
                }
            }
            (ReverseRecovery, _) => return false,
            (MvccRollback, Some(index)) if index <= state.applied => {
                state.reverted.insert(index);
            }
            _ => {}
        }
        for (label, delta) in deltas {
            *self.counts.entry(*label).or_insert(0) += *delta;
        }
        if let (false, Some(index)) = (mode.is_reverse_step(), append_index) {
            if index > state.applied {
                state.applied = index;
            }
        }
        true
    }

    /// Count of `label`.
    pub fn get(&self, label: u32) -> i64 {
        self.counts.get(&label).map(|c| *c).unwrap_or(0)
    }

    /// Append index of the last counted batch.
    pub fn applied(&self) -> u64 {
        self.state.lock().applied
    }

    /// All non-zero counts, ordered by label.
    pub fn image(&self) -> BTreeMap<u32, i64> {
        self.counts
            .iter()
            .filter(|entry| *entry.value() != 0)
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransactionApplicationMode::*;

    #[test]
    fn test_ids_reuse_freed() {
        let ids = IdGenerator::new();
        assert_eq!(ids.next_id(), 0);
        assert_eq!(ids.next_id(), 1);
        ids.free(0);
        assert_eq!(ids.next_id(), 0);
        assert_eq!(ids.next_id(), 2);
    }

    #[test]
    fn test_mark_used_raises_high_id() {
        let ids = IdGenerator::new();
        ids.mark_used(10);
        assert_eq!(ids.high_id(), 11);
        ids.mark_used(3);
        assert_eq!(ids.high_id(), 11);
        assert_eq!(ids.next_id(), 11);
    }

    #[test]
    fn test_mark_used_removes_from_free_list() {
        let ids = IdGenerator::new();
        ids.next_id();
        ids.free(0);
        ids.mark_used(0);
        assert_eq!(ids.free_count(), 0);
    }

    #[test]
    fn test_counts_recovery_skips_applied() {
        let counts = CountsStore::new();
        assert!(counts.apply(Some(2), &[(1, 3)], Internal));
        assert!(!counts.apply(Some(2), &[(1, 3)], Recovery));
        assert!(!counts.apply(Some(1), &[(1, 3)], Recovery));
        assert_eq!(counts.get(1), 3);

        assert!(counts.apply(Some(3), &[(1, 1)], Recovery));
        assert_eq!(counts.get(1), 4);
        assert_eq!(counts.applied(), 3);
    }

    #[test]
    fn test_counts_unappended_batch_leaves_watermark() {
        let counts = CountsStore::new();
        assert!(counts.apply(None, &[(1, 1)], Internal));
        assert_eq!(counts.applied(), 0);
        assert!(!counts.apply(None, &[(1, -1)], ReverseRecovery));
        assert_eq!(counts.get(1), 1);
    }

    #[test]
    fn test_counts_reverse_recovery_takes_back_counted() {
        let counts = CountsStore::new();
        counts.apply(Some(1), &[(1, 1)], Internal);
        counts.apply(Some(2), &[(1, 1)], Internal);

        // Appended but never applied.
        assert!(!counts.apply(Some(3), &[(1, -1)], ReverseRecovery));
        assert!(counts.apply(Some(2), &[(1, -1)], ReverseRecovery));
        assert_eq!(counts.get(1), 1);
        assert_eq!(counts.applied(), 1);

        assert!(counts.apply(Some(2), &[(1, 1)], Recovery));
        assert!(counts.apply(Some(3), &[(1, 1)], Recovery));
        assert_eq!(counts.get(1), 3);
        assert_eq!(counts.applied(), 3);
    }

    #[test]
    fn test_counts_rolled_back_not_taken_back_twice() {
        let counts = CountsStore::new();
        counts.apply(Some(4), &[(1, 2)], Internal);
        assert!(counts.apply(Some(4), &[(1, -2)], MvccRollback));
        assert_eq!(counts.get(1), 0);
        assert_eq!(counts.applied(), 4);
        assert!(counts.image().is_empty());

        assert!(!counts.apply(Some(4), &[(1, -2)], ReverseRecovery));
        assert_eq!(counts.get(1), 0);
        assert_eq!(counts.applied(), 3);
    }
}
