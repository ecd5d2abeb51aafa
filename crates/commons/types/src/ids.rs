//! Identifiers for groups, participants and rounds

use serde::{Deserialize, Serialize};

/// Unique identifier for a group within one game instance
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(pub String);

impl GroupId {
    /// Generate a new random GroupId
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Create a GroupId from a known string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Short display form (first 8 chars)
    pub fn short(&self) -> String {
        self.0.chars().take(8).collect()
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identity of a participant, valid across all rounds
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Round number, starting at 1 with no gaps
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RoundNumber(pub u32);

impl RoundNumber {
    pub const FIRST: RoundNumber = RoundNumber(1);

    pub fn new(n: u32) -> Self {
        Self(n)
    }

    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for RoundNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_id_generate() {
        let id = GroupId::generate();
        assert!(!id.0.is_empty());
        assert_eq!(id.short().len(), 8);
    }

    #[test]
    fn test_participant_id_display() {
        let id = ParticipantId::new("p-1");
        assert_eq!(format!("{}", id), "p-1");
    }

    #[test]
    fn test_round_number_ordering() {
        let first = RoundNumber::FIRST;
        assert_eq!(first.next(), RoundNumber(2));
        assert!(first < first.next());
        assert_eq!(serde_json::to_string(&first).unwrap(), "1");
    }
}
