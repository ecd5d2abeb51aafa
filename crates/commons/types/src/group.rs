//! Group specification and status

use crate::{GroupId, Participant, ParticipantId, Phase, RoundNumber};
use serde::{Deserialize, Serialize};

/// Specification for creating a new group
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupSpec {
    /// Explicit id; generated when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<GroupId>,
    /// Members in `id_in_group` order
    pub participants: Vec<ParticipantId>,
    /// Explicit treatment; the configured assignment decides when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub punishment: Option<bool>,
}

impl GroupSpec {
    pub fn new(participants: Vec<ParticipantId>) -> Self {
        Self {
            id: None,
            participants,
            punishment: None,
        }
    }

    pub fn with_id(mut self, id: GroupId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_punishment(mut self, enabled: bool) -> Self {
        self.punishment = Some(enabled);
        self
    }
}

/// Lifecycle status of a group
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GroupStatus {
    /// Collecting reports for a round and phase
    Collecting { round: RoundNumber, phase: Phase },
    /// All rounds sealed
    Completed,
    /// Fell below quorum; no further settlement
    Failed { round: RoundNumber },
}

impl GroupStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, GroupStatus::Collecting { .. })
    }
}

/// Read-only view of a group
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupSnapshot {
    pub id: GroupId,
    pub punishment_enabled: bool,
    pub status: GroupStatus,
    pub failed: bool,
    pub inactive_count: usize,
    pub participants: Vec<Participant>,
}

impl GroupSnapshot {
    pub fn size(&self) -> usize {
        self.participants.len()
    }

    pub fn active_count(&self) -> usize {
        self.participants.iter().filter(|p| p.is_active()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_spec_builder() {
        let spec = GroupSpec::new(vec![ParticipantId::new("a"), ParticipantId::new("b")])
            .with_id(GroupId::new("g-1"))
            .with_punishment(false);
        assert_eq!(spec.id, Some(GroupId::new("g-1")));
        assert_eq!(spec.punishment, Some(false));
        assert_eq!(spec.participants.len(), 2);
    }

    #[test]
    fn test_status_terminality() {
        let collecting = GroupStatus::Collecting {
            round: RoundNumber(1),
            phase: Phase::Contribution,
        };
        assert!(!collecting.is_terminal());
        assert!(GroupStatus::Completed.is_terminal());
        assert!(GroupStatus::Failed {
            round: RoundNumber(2)
        }
        .is_terminal());
    }
}
