//! Participant records
//!
//! A participant is created once per game instance and persists across all
//! rounds. Its status only ever moves from `Active` to `DroppedOut`.

use crate::{ParticipantId, Points, ReportOutcome, RoundNumber};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A member of a group
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Stable identity across rounds
    pub id: ParticipantId,
    /// 1-based position in the group
    pub id_in_group: usize,
    /// Endowment received at the start of every round
    pub endowment: Points,
    /// Current status
    pub status: ParticipantStatus,
    /// Earnings carried across rounds, floored at zero
    pub accumulated_earnings: Points,
    /// Report for the phase currently collecting; cleared each round
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_decision: Option<ReportOutcome>,
    /// Round in which the participant dropped out
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dropped_out_in: Option<RoundNumber>,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    pub fn new(id: ParticipantId, id_in_group: usize, endowment: Points) -> Self {
        Self {
            id,
            id_in_group,
            endowment,
            status: ParticipantStatus::Active,
            accumulated_earnings: Points::zero(),
            current_decision: None,
            dropped_out_in: None,
            joined_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, ParticipantStatus::Active)
    }

    /// Mark the participant as dropped out.
    ///
    /// Returns `true` only on the transition; repeated calls are no-ops.
    pub fn deactivate(&mut self, round: RoundNumber) -> bool {
        if !self.is_active() {
            return false;
        }
        self.status = ParticipantStatus::DroppedOut;
        self.dropped_out_in = Some(round);
        true
    }

    /// Whether the participant was still active during the given round
    pub fn was_active_in(&self, round: RoundNumber) -> bool {
        match self.dropped_out_in {
            Some(dropped) => round < dropped,
            None => true,
        }
    }
}

/// Status of a participant within its group
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    #[default]
    Active,
    /// Timed out on a phase or page that counts as dropout; final
    DroppedOut,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_participant_is_active() {
        let p = Participant::new(ParticipantId::new("p-1"), 1, Points::from_points(20));
        assert!(p.is_active());
        assert_eq!(p.accumulated_earnings, Points::zero());
        assert!(p.was_active_in(RoundNumber(7)));
    }

    #[test]
    fn test_deactivate_is_one_way() {
        let mut p = Participant::new(ParticipantId::new("p-1"), 1, Points::from_points(20));
        assert!(p.deactivate(RoundNumber(3)));
        assert!(!p.is_active());
        assert!(!p.deactivate(RoundNumber(4)));
        assert_eq!(p.dropped_out_in, Some(RoundNumber(3)));
        assert!(p.was_active_in(RoundNumber(2)));
        assert!(!p.was_active_in(RoundNumber(3)));
    }
}
