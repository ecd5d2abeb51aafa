//! Round barrier: collects one report per active participant
//!
//! A barrier belongs to one group, round and phase. It releases once every
//! currently-active participant has reported. The active set is passed in at
//! each evaluation, so a participant who drops out mid-collection stops being
//! waited for immediately.

use commons_types::{
    EngineError, EngineResult, GroupId, ParticipantId, Phase, ReportOutcome, RoundNumber,
};
use std::collections::BTreeMap;

/// Result of evaluating a barrier against the active set
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BarrierStatus {
    /// Still waiting for active participants
    Waiting { reported: usize, required: usize },
    /// This evaluation released the barrier
    Released,
    /// Released by an earlier evaluation
    AlreadyReleased,
}

/// Synchronization point for one round phase
#[derive(Clone, Debug)]
pub struct RoundBarrier {
    group: GroupId,
    round: RoundNumber,
    phase: Phase,
    reports: BTreeMap<ParticipantId, ReportOutcome>,
    released: bool,
}

impl RoundBarrier {
    pub fn new(group: GroupId, round: RoundNumber, phase: Phase) -> Self {
        Self {
            group,
            round,
            phase,
            reports: BTreeMap::new(),
            released: false,
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Check that a report from this participant would be accepted
    pub fn admit(&self, participant: &ParticipantId) -> EngineResult<()> {
        if self.reports.contains_key(participant) {
            return Err(EngineError::DuplicateReport {
                group: self.group.clone(),
                round: self.round,
                phase: self.phase,
                participant: participant.clone(),
            });
        }
        if self.released {
            return Err(EngineError::RoundNotOpen {
                group: self.group.clone(),
                round: self.round,
                phase: self.phase,
            });
        }
        Ok(())
    }

    /// Record a report; exactly one per participant
    pub fn record(&mut self, participant: &ParticipantId, outcome: ReportOutcome) -> EngineResult<()> {
        self.admit(participant)?;
        self.reports.insert(participant.clone(), outcome);
        Ok(())
    }

    pub fn report(&self, participant: &ParticipantId) -> Option<&ReportOutcome> {
        self.reports.get(participant)
    }

    pub fn has_reported(&self, participant: &ParticipantId) -> bool {
        self.reports.contains_key(participant)
    }

    /// Evaluate the release condition against the currently-active set.
    ///
    /// Releases when the reports received from active participants equal the
    /// number of active participants. Returns `Released` at most once.
    pub fn evaluate<'a>(&mut self, active: impl IntoIterator<Item = &'a ParticipantId>) -> BarrierStatus {
        if self.released {
            return BarrierStatus::AlreadyReleased;
        }

        let mut required = 0;
        let mut reported = 0;
        for participant in active {
            required += 1;
            if self.reports.contains_key(participant) {
                reported += 1;
            }
        }

        if reported == required {
            self.released = true;
            BarrierStatus::Released
        } else {
            BarrierStatus::Waiting { reported, required }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commons_types::{Decision, Points};

    fn setup() -> (RoundBarrier, Vec<ParticipantId>) {
        let members = vec![
            ParticipantId::new("a"),
            ParticipantId::new("b"),
            ParticipantId::new("c"),
        ];
        let barrier = RoundBarrier::new(GroupId::new("g"), RoundNumber(1), Phase::Contribution);
        (barrier, members)
    }

    fn contribute(value: i64) -> ReportOutcome {
        ReportOutcome::Decided(Decision::Contribution(Points::from_points(value)))
    }

    #[test]
    fn test_releases_when_all_active_reported() {
        let (mut barrier, members) = setup();

        barrier.record(&members[0], contribute(20)).unwrap();
        assert_eq!(
            barrier.evaluate(&members),
            BarrierStatus::Waiting {
                reported: 1,
                required: 3
            }
        );

        barrier.record(&members[1], ReportOutcome::TimedOut).unwrap();
        barrier.record(&members[2], contribute(5)).unwrap();
        assert_eq!(barrier.evaluate(&members), BarrierStatus::Released);
        assert_eq!(barrier.evaluate(&members), BarrierStatus::AlreadyReleased);
    }

    #[test]
    fn test_duplicate_report_rejected() {
        let (mut barrier, members) = setup();
        barrier.record(&members[0], contribute(20)).unwrap();

        let err = barrier.record(&members[0], contribute(10)).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateReport { .. }));
        // First report is kept
        assert_eq!(barrier.report(&members[0]), Some(&contribute(20)));
    }

    #[test]
    fn test_deactivation_shrinks_required_count() {
        let (mut barrier, members) = setup();
        barrier.record(&members[0], contribute(20)).unwrap();
        barrier.record(&members[1], contribute(20)).unwrap();
        assert!(matches!(
            barrier.evaluate(&members),
            BarrierStatus::Waiting { .. }
        ));

        // "c" drops out without reporting
        assert_eq!(barrier.evaluate(&members[..2]), BarrierStatus::Released);
    }

    #[test]
    fn test_reports_from_inactive_are_not_counted() {
        let (mut barrier, members) = setup();
        barrier.record(&members[2], ReportOutcome::TimedOut).unwrap();

        // "c" reported then dropped; "a" and "b" are still owed
        assert_eq!(
            barrier.evaluate(&members[..2]),
            BarrierStatus::Waiting {
                reported: 0,
                required: 2
            }
        );
    }

    #[test]
    fn test_no_reports_after_release() {
        let (mut barrier, members) = setup();
        for m in &members {
            barrier.record(m, contribute(1)).unwrap();
        }
        barrier.evaluate(&members);

        let late = ParticipantId::new("d");
        assert!(matches!(
            barrier.record(&late, contribute(1)),
            Err(EngineError::RoundNotOpen { .. })
        ));
    }

    #[test]
    fn test_empty_active_set_releases() {
        let (mut barrier, _) = setup();
        assert_eq!(barrier.evaluate(std::iter::empty()), BarrierStatus::Released);
    }
}
