//! Round phases, reports and settled outcomes

use crate::{GroupId, ParticipantId, Points, PunishmentAllocation, RoundNumber};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Decision phase within a round
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Private contribution to the public account
    Contribution,
    /// Peer punishment, only in groups with the punishment condition
    Punishment,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Contribution => write!(f, "contribution"),
            Phase::Punishment => write!(f, "punishment"),
        }
    }
}

/// A participant's decision for one phase
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Decision {
    Contribution(Points),
    Punishment(PunishmentAllocation),
}

impl Decision {
    /// The phase this decision belongs to
    pub fn phase(&self) -> Phase {
        match self {
            Decision::Contribution(_) => Phase::Contribution,
            Decision::Punishment(_) => Phase::Punishment,
        }
    }
}

/// What a participant reported to a barrier
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportOutcome {
    Decided(Decision),
    TimedOut,
}

impl ReportOutcome {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ReportOutcome::TimedOut)
    }

    /// Contributed amount; a timeout counts as zero
    pub fn contribution(&self) -> Points {
        match self {
            ReportOutcome::Decided(Decision::Contribution(value)) => *value,
            _ => Points::zero(),
        }
    }

    /// Punishment allocation, if one was submitted
    pub fn allocation(&self) -> Option<&PunishmentAllocation> {
        match self {
            ReportOutcome::Decided(Decision::Punishment(allocation)) => Some(allocation),
            _ => None,
        }
    }
}

/// Why a participant has no settled row for a round
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    /// The participant dropped out
    Dropout,
    /// The participant's group fell below quorum
    GroupFailure,
}

/// Per participant-round state machine
///
/// `Pending → Decided | TimedOut → Settled | ExcludedByDropout | ExcludedByGroupFailure`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ParticipantRoundState {
    #[default]
    Pending,
    Decided,
    TimedOut,
    Settled,
    ExcludedByDropout,
    ExcludedByGroupFailure,
}

impl ParticipantRoundState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ParticipantRoundState::Settled
                | ParticipantRoundState::ExcludedByDropout
                | ParticipantRoundState::ExcludedByGroupFailure
        )
    }
}

impl From<ExclusionReason> for ParticipantRoundState {
    fn from(reason: ExclusionReason) -> Self {
        match reason {
            ExclusionReason::Dropout => ParticipantRoundState::ExcludedByDropout,
            ExclusionReason::GroupFailure => ParticipantRoundState::ExcludedByGroupFailure,
        }
    }
}

/// Result of the contribution phase for one participant
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionOutcome {
    pub contribution: Points,
    pub timed_out: bool,
    /// Sum of all active members' contributions
    pub pool: Points,
    /// `endowment - contribution`
    pub private_share: Points,
    /// `efficiency_factor * pool`
    pub public_share: Points,
    /// `private_share + public_share`
    pub gross_profit: Points,
    /// Accumulated earnings after this phase
    pub accumulated_after: Points,
}

/// Result of the punishment phase for one participant
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PunishmentOutcome {
    /// Levels this participant sent to active members
    pub sent: PunishmentAllocation,
    pub timed_out: bool,
    /// Levels received from other active members
    pub received: u32,
    /// Cost of the levels sent
    pub cost: Points,
    /// Payoff reduction from received punishment, in basis points
    pub reduction_bps: u32,
    /// `max(0, gross * (1 - reduction) - cost)`
    pub payoff: Points,
    /// Accumulated earnings after this phase
    pub accumulated_after: Points,
}

/// Immutable settled outputs for one participant in one round
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettledRow {
    pub group_id: GroupId,
    pub round: RoundNumber,
    pub participant_id: ParticipantId,
    /// 1-based position in the group
    pub id_in_group: usize,
    pub contribution: Points,
    pub contribution_timed_out: bool,
    pub group_pool: Points,
    pub private_share: Points,
    pub public_share: Points,
    pub gross_profit: Points,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub punishment: Option<PunishmentOutcome>,
    /// Net payoff for the round (gross profit when there is no punishment stage)
    pub payoff: Points,
    pub accumulated_earnings: Points,
    pub settled_at: DateTime<Utc>,
}

impl SettledRow {
    /// Punishment levels received (0 without a punishment stage)
    pub fn received_punishment(&self) -> u32 {
        self.punishment.as_ref().map(|p| p.received).unwrap_or(0)
    }

    /// Cost of punishment sent (0 without a punishment stage)
    pub fn punishment_cost(&self) -> Points {
        self.punishment
            .as_ref()
            .map(|p| p.cost)
            .unwrap_or_else(Points::zero)
    }
}

/// Answer to "what happened to this participant in this round"
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundOutcome {
    Settled(Box<SettledRow>),
    Pending,
    Excluded(ExclusionReason),
}

impl RoundOutcome {
    pub fn settled(&self) -> Option<&SettledRow> {
        match self {
            RoundOutcome::Settled(row) => Some(row),
            _ => None,
        }
    }
}

/// What happened when a barrier released
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleaseOutcome {
    /// The phase was settled
    Settled,
    /// The group had failed; reports were discarded and nothing settled
    SkippedGroupFailed,
}

/// Acknowledgement of an accepted report
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportAck {
    /// Report recorded; the barrier is still waiting
    Accepted { reported: usize, required: usize },
    /// Report recorded and it released the barrier
    Released { phase: Phase, outcome: ReleaseOutcome },
    /// The reporter or its group is out of the game; nothing recorded
    Excluded(ExclusionReason),
}

impl ReportAck {
    pub fn is_released(&self) -> bool {
        matches!(self, ReportAck::Released { .. })
    }
}

/// Ordering of history reads
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// One member's entry in a group history table
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberHistory {
    pub participant_id: ParticipantId,
    pub id_in_group: usize,
    /// Whether the member had dropped out by the end of this round
    pub dropped_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<SettledRow>,
}

/// All members' entries for one round
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRound {
    pub round: RoundNumber,
    pub members: Vec<MemberHistory>,
}

/// Real-world payout for a participant who completed the game
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub currency_code: String,
    pub amount_minor: i64,
}

/// Final routing of a participant
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FinalResult {
    InProgress { round: RoundNumber },
    Completed {
        accumulated_earnings: Points,
        payout: Payout,
    },
    DroppedOut { round: RoundNumber },
    GroupFailed { round: RoundNumber },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_phase() {
        assert_eq!(
            Decision::Contribution(Points::from_points(5)).phase(),
            Phase::Contribution
        );
        assert_eq!(
            Decision::Punishment(PunishmentAllocation::none()).phase(),
            Phase::Punishment
        );
    }

    #[test]
    fn test_timeout_contributes_zero() {
        assert_eq!(ReportOutcome::TimedOut.contribution(), Points::zero());
        assert!(ReportOutcome::TimedOut.allocation().is_none());
        let decided = ReportOutcome::Decided(Decision::Contribution(Points::from_points(7)));
        assert_eq!(decided.contribution(), Points::from_points(7));
    }

    #[test]
    fn test_round_state_terminality() {
        assert!(!ParticipantRoundState::Pending.is_terminal());
        assert!(!ParticipantRoundState::TimedOut.is_terminal());
        assert!(ParticipantRoundState::Settled.is_terminal());
        assert_eq!(
            ParticipantRoundState::from(ExclusionReason::GroupFailure),
            ParticipantRoundState::ExcludedByGroupFailure
        );
    }

    #[test]
    fn test_final_result_serialization() {
        let result = FinalResult::DroppedOut {
            round: RoundNumber(2),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "dropped_out");
        assert_eq!(json["round"], 2);
    }
}
