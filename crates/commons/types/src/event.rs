//! Engine events
//!
//! Emitted on every lifecycle transition so the flow layer can wake waiting
//! participants without polling.

use crate::{GroupId, ParticipantId, Phase, RoundNumber};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for an engine event
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EngineEventId(pub String);

impl EngineEventId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for EngineEventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A transition in one group
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineEvent {
    pub id: EngineEventId,
    pub group: GroupId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round: Option<RoundNumber>,
    pub kind: EngineEventKind,
    pub at: DateTime<Utc>,
}

impl EngineEvent {
    pub fn new(group: GroupId, round: Option<RoundNumber>, kind: EngineEventKind) -> Self {
        Self {
            id: EngineEventId::generate(),
            group,
            round,
            kind,
            at: Utc::now(),
        }
    }

    /// Whether the event ends the group's game
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            EngineEventKind::GameCompleted | EngineEventKind::GroupFailed { .. }
        )
    }
}

/// Kinds of engine events
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEventKind {
    GroupCreated { punishment_enabled: bool },
    RoundOpened,
    PhaseReleased { phase: Phase },
    PhaseSettled { phase: Phase },
    RoundSealed,
    /// The round was released after the group failed; nothing settled
    RoundAborted,
    ParticipantDroppedOut { participant: ParticipantId },
    GroupFailed { inactive_count: usize },
    GameCompleted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = EngineEvent::new(
            GroupId::new("g-1"),
            Some(RoundNumber(2)),
            EngineEventKind::PhaseReleased {
                phase: Phase::Punishment,
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"]["type"], "phase_released");
        assert_eq!(json["kind"]["phase"], "punishment");
        assert_eq!(json["round"], 2);
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_terminal_events() {
        let failed = EngineEvent::new(
            GroupId::new("g-1"),
            Some(RoundNumber(1)),
            EngineEventKind::GroupFailed { inactive_count: 2 },
        );
        assert!(failed.is_terminal());
    }
}
