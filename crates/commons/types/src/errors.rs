//! Error types for the round engine

use crate::{GroupId, ParticipantId, Phase, Points, RoundNumber};

/// Errors that can occur in engine operations
///
/// `DuplicateReport`, `BudgetExceeded` and `InvalidDecision` are caller
/// errors local to one participant's report; the group's barrier state is
/// left untouched. `AlreadySettled` and `LedgerConflict` indicate a broken
/// internal invariant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Duplicate report from {participant} in group {group}, round {round} ({phase})")]
    DuplicateReport {
        group: GroupId,
        round: RoundNumber,
        phase: Phase,
        participant: ParticipantId,
    },

    #[error("Budget exceeded for {participant}: required {required}, available {available}")]
    BudgetExceeded {
        participant: ParticipantId,
        required: Points,
        available: Points,
    },

    #[error("Invalid decision from {participant}: {reason}")]
    InvalidDecision {
        participant: ParticipantId,
        reason: String,
    },

    #[error("Round {round} of group {group} already settled ({phase})")]
    AlreadySettled {
        group: GroupId,
        round: RoundNumber,
        phase: Phase,
    },

    #[error("Ledger conflict: row for {participant} in group {group}, round {round} already written")]
    LedgerConflict {
        group: GroupId,
        round: RoundNumber,
        participant: ParticipantId,
    },

    #[error("Round {round} ({phase}) is not collecting in group {group}")]
    RoundNotOpen {
        group: GroupId,
        round: RoundNumber,
        phase: Phase,
    },

    #[error("Round {round} is outside 1..={num_rounds}")]
    RoundOutOfRange { round: RoundNumber, num_rounds: u32 },

    #[error("Group not found: {0}")]
    UnknownGroup(GroupId),

    #[error("Group already exists: {0}")]
    GroupAlreadyExists(GroupId),

    #[error("Participant {participant} not found in group {group}")]
    UnknownParticipant {
        group: GroupId,
        participant: ParticipantId,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Lock poisoned")]
    LockPoisoned,
}

impl EngineError {
    /// Internal invariant violations; never a recoverable runtime condition
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::AlreadySettled { .. }
                | EngineError::LedgerConflict { .. }
                | EngineError::LockPoisoned
        )
    }

    /// Errors the caller can recover from by re-prompting the participant
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::BudgetExceeded { .. } | EngineError::InvalidDecision { .. }
        )
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_exceeded_display() {
        let err = EngineError::BudgetExceeded {
            participant: ParticipantId::new("p-1"),
            required: Points::from_points(25),
            available: Points::from_minor(22_500),
        };
        let s = err.to_string();
        assert!(s.contains("p-1"));
        assert!(s.contains("25"));
        assert!(s.contains("22.5"));
        assert!(err.is_recoverable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_fatal_classification() {
        let err = EngineError::LedgerConflict {
            group: GroupId::new("g"),
            round: RoundNumber(1),
            participant: ParticipantId::new("p"),
        };
        assert!(err.is_fatal());
        assert!(!err.is_recoverable());
    }
}
