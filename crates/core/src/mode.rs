//! How a batch is applied to the store
//!
//! [`TransactionApplicationMode`] is data only. The apply pipeline reads its
//! flags; nothing dispatches on the mode itself.

use std::fmt;

/// Mode a batch chain is applied in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionApplicationMode {
    /// Committed by this kernel; in-memory structures are already updated.
    Internal,
    /// Arrived as raw commands from outside.
    External,
    /// Replayed forward from the log after a crash.
    Recovery,
    /// Rewinds the core store to the last checkpoint.
    ReverseRecovery,
    /// Undoes a transaction as if it never happened.
    MvccRollback,
}

/// Direction commands are applied in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplyDirection {
    /// First command to last, after-images
    Forward,
    /// Last command to first, before-images
    Backward,
}

impl TransactionApplicationMode {
    /// All modes.
    pub const ALL: [TransactionApplicationMode; 5] = [
        TransactionApplicationMode::Internal,
        TransactionApplicationMode::External,
        TransactionApplicationMode::Recovery,
        TransactionApplicationMode::ReverseRecovery,
        TransactionApplicationMode::MvccRollback,
    ];

    /// Whether id high-watermarks must be rebuilt from the commands.
    pub fn needs_high_id_tracking(&self) -> bool {
        matches!(
            self,
            TransactionApplicationMode::External | TransactionApplicationMode::Recovery
        )
    }

    /// Whether index and counts stores take part in apply.
    pub fn needs_auxiliary_stores(&self) -> bool {
        !matches!(self, TransactionApplicationMode::ReverseRecovery)
    }

    /// Whether ids reserved by the batch are returned to the allocator.
    pub fn needs_rollback_id_processing(&self) -> bool {
        matches!(self, TransactionApplicationMode::MvccRollback)
    }

    /// Direction commands are applied in.
    pub fn direction(&self) -> ApplyDirection {
        match self {
            TransactionApplicationMode::ReverseRecovery | TransactionApplicationMode::MvccRollback => {
                ApplyDirection::Backward
            }
            _ => ApplyDirection::Forward,
        }
    }

    /// Whether commands should use their before-image variant.
    pub fn is_reverse_step(&self) -> bool {
        self.direction() == ApplyDirection::Backward
    }
}

impl fmt::Display for TransactionApplicationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionApplicationMode::Internal => "INTERNAL",
            TransactionApplicationMode::External => "EXTERNAL",
            TransactionApplicationMode::Recovery => "RECOVERY",
            TransactionApplicationMode::ReverseRecovery => "REVERSE_RECOVERY",
            TransactionApplicationMode::MvccRollback => "MVCC_ROLLBACK",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransactionApplicationMode::*;

    #[test]
    fn test_flag_table() {
        // (mode, high id, aux stores, rollback ids, reverse)
        let table = [
            (Internal, false, true, false, false),
            (External, true, true, false, false),
            (Recovery, true, true, false, false),
            (ReverseRecovery, false, false, false, true),
            (MvccRollback, false, true, true, true),
        ];
        for (mode, high_id, aux, rollback, reverse) in table {
            assert_eq!(mode.needs_high_id_tracking(), high_id, "{}", mode);
            assert_eq!(mode.needs_auxiliary_stores(), aux, "{}", mode);
            assert_eq!(mode.needs_rollback_id_processing(), rollback, "{}", mode);
            assert_eq!(mode.is_reverse_step(), reverse, "{}", mode);
        }
    }

    #[test]
    fn test_all_covers_every_mode() {
        assert_eq!(TransactionApplicationMode::ALL.len(), 5);
        assert_eq!(ReverseRecovery.to_string(), "REVERSE_RECOVERY");
    }
}
