//! Mutable state of one group
//!
//! Every method runs under the owning engine's per-group mutex, which makes
//! the report, deactivation, release and settlement of a group one serial
//! sequence. Release decisions are taken nowhere else.

use crate::barrier::{BarrierStatus, RoundBarrier};
use crate::ledger::RoundLedger;
use crate::payout::compute_payout;
use crate::quorum::{QuorumMonitor, QuorumVerdict};
use crate::settlement::{ContributionInput, PunishmentInput, SettlementEngine};
use chrono::Utc;
use commons_types::{
    ContributionOutcome, Decision, EngineError, EngineEvent, EngineEventKind, EngineResult,
    ExclusionReason, FinalResult, GameConfig, GroupId, GroupSnapshot, GroupStatus, HistoryRound,
    MemberHistory, Participant, ParticipantId, ParticipantRoundState, Phase, Points,
    PunishmentOutcome, ReleaseOutcome, ReportAck, ReportOutcome, RoundNumber, RoundOutcome,
    SettledRow, SortOrder,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Shared, read-only collaborators of every group
pub(crate) struct SessionContext<'a> {
    pub config: &'a GameConfig,
    pub settlement: &'a SettlementEngine,
    pub ledger: &'a RoundLedger,
}

/// Collection and settlement state of one round
#[derive(Debug)]
struct RoundState {
    contribution: RoundBarrier,
    /// Opened once the contribution phase has settled
    punishment: Option<RoundBarrier>,
    /// Staged phase 1 results; committed only when the round seals
    contributions: BTreeMap<ParticipantId, ContributionOutcome>,
    punishments: BTreeMap<ParticipantId, PunishmentOutcome>,
    settled: BTreeSet<Phase>,
    sealed: bool,
    aborted: bool,
}

impl RoundState {
    fn new(group: &GroupId, round: RoundNumber) -> Self {
        Self {
            contribution: RoundBarrier::new(group.clone(), round, Phase::Contribution),
            punishment: None,
            contributions: BTreeMap::new(),
            punishments: BTreeMap::new(),
            settled: BTreeSet::new(),
            sealed: false,
            aborted: false,
        }
    }

    fn barrier(&self, phase: Phase) -> Option<&RoundBarrier> {
        match phase {
            Phase::Contribution => Some(&self.contribution),
            Phase::Punishment => self.punishment.as_ref(),
        }
    }

    fn barrier_mut(&mut self, phase: Phase) -> Option<&mut RoundBarrier> {
        match phase {
            Phase::Contribution => Some(&mut self.contribution),
            Phase::Punishment => self.punishment.as_mut(),
        }
    }

    /// Phase currently collecting
    fn open_phase(&self) -> Phase {
        if self.punishment.is_some() {
            Phase::Punishment
        } else {
            Phase::Contribution
        }
    }

    fn is_closed(&self) -> bool {
        self.sealed || self.aborted
    }
}

/// State of one group for the whole game
#[derive(Debug)]
pub(crate) struct GroupSession {
    id: GroupId,
    punishment_enabled: bool,
    num_rounds: u32,
    participants: Vec<Participant>,
    quorum: QuorumMonitor,
    failed_in: Option<RoundNumber>,
    current: RoundNumber,
    status: GroupStatus,
    rounds: BTreeMap<RoundNumber, RoundState>,
}

impl GroupSession {
    /// Create a group collecting contributions for round 1
    pub fn new(
        id: GroupId,
        members: Vec<ParticipantId>,
        punishment_enabled: bool,
        config: &GameConfig,
    ) -> Self {
        let endowment = config.endowment_points();
        let participants: Vec<Participant> = members
            .into_iter()
            .enumerate()
            .map(|(i, pid)| Participant::new(pid, i + 1, endowment))
            .collect();
        let quorum = QuorumMonitor::new(config.quorum.clone(), participants.len());

        let mut rounds = BTreeMap::new();
        rounds.insert(RoundNumber::FIRST, RoundState::new(&id, RoundNumber::FIRST));

        Self {
            id,
            punishment_enabled,
            num_rounds: config.num_rounds,
            participants,
            quorum,
            failed_in: None,
            current: RoundNumber::FIRST,
            status: GroupStatus::Collecting {
                round: RoundNumber::FIRST,
                phase: Phase::Contribution,
            },
            rounds,
        }
    }

    pub fn id(&self) -> &GroupId {
        &self.id
    }

    pub fn status(&self) -> GroupStatus {
        self.status
    }

    pub fn is_failed(&self) -> bool {
        self.quorum.is_failed()
    }

    /// Round currently collecting, if the game is still running
    pub fn current_round(&self) -> Option<RoundNumber> {
        match self.status {
            GroupStatus::Collecting { round, .. } => Some(round),
            _ => None,
        }
    }

    pub fn participant(&self, participant: &ParticipantId) -> EngineResult<&Participant> {
        let index = self.index_of(participant)?;
        Ok(&self.participants[index])
    }

    pub fn snapshot(&self) -> GroupSnapshot {
        GroupSnapshot {
            id: self.id.clone(),
            punishment_enabled: self.punishment_enabled,
            status: self.status,
            failed: self.quorum.is_failed(),
            inactive_count: self.quorum.inactive_count(),
            participants: self.participants.clone(),
        }
    }

    /// Record a decision or timeout and run every transition it triggers
    pub fn report(
        &mut self,
        ctx: &SessionContext<'_>,
        round: RoundNumber,
        participant: &ParticipantId,
        phase: Phase,
        outcome: ReportOutcome,
        events: &mut Vec<EngineEvent>,
    ) -> EngineResult<ReportAck> {
        let index = self.index_of(participant)?;
        self.check_range(round)?;

        if !self.participants[index].is_active() {
            warn!(
                group = %self.id,
                round = %round,
                participant = %participant,
                "Report from dropped-out participant ignored"
            );
            return Ok(ReportAck::Excluded(ExclusionReason::Dropout));
        }

        if phase == Phase::Punishment && !self.punishment_enabled {
            return Err(EngineError::InvalidDecision {
                participant: participant.clone(),
                reason: "group plays without punishment".to_string(),
            });
        }
        if let ReportOutcome::Decided(decision) = &outcome {
            if decision.phase() != phase {
                return Err(EngineError::InvalidDecision {
                    participant: participant.clone(),
                    reason: format!("{} decision reported for {} phase", decision.phase(), phase),
                });
            }
        }

        let failed = self.quorum.is_failed();
        let state = self.rounds.get(&round);
        let closed = state.map_or(true, RoundState::is_closed);
        let barrier = match state.and_then(|state| state.barrier(phase)) {
            // Once failed, only a barrier still collecting takes reports
            Some(barrier) if failed && (closed || barrier.is_released()) => {
                return Ok(ReportAck::Excluded(ExclusionReason::GroupFailure))
            }
            Some(barrier) => barrier,
            None if failed => return Ok(ReportAck::Excluded(ExclusionReason::GroupFailure)),
            None => {
                return Err(EngineError::RoundNotOpen {
                    group: self.id.clone(),
                    round,
                    phase,
                })
            }
        };
        barrier.admit(participant)?;

        if failed {
            warn!(
                group = %self.id,
                round = %round,
                participant = %participant,
                "Group has failed; report accepted and discarded"
            );
        } else {
            self.validate(ctx, round, index, &outcome)?;
        }

        let timed_out = outcome.is_timeout();
        if let Some(barrier) = self
            .rounds
            .get_mut(&round)
            .and_then(|state| state.barrier_mut(phase))
        {
            barrier.record(participant, outcome.clone())?;
        }
        self.participants[index].current_decision = Some(outcome);

        debug!(
            group = %self.id,
            round = %round,
            phase = %phase,
            participant = %participant,
            timed_out,
            "Report accepted"
        );

        // Deactivation precedes the release decision
        if timed_out && ctx.config.timeout_is_dropout(phase) {
            self.drop_out(index, round, events);
        }

        let released = self.advance(ctx, events)?;
        if let Some((_, _, outcome)) = released
            .iter()
            .find(|(r, p, _)| *r == round && *p == phase)
        {
            return Ok(ReportAck::Released {
                phase,
                outcome: *outcome,
            });
        }

        let (reported, required) = self.progress(round, phase);
        Ok(ReportAck::Accepted { reported, required })
    }

    /// Inactivity on a page without a barrier.
    ///
    /// Returns whether the participant was deactivated.
    pub fn report_inactivity(
        &mut self,
        ctx: &SessionContext<'_>,
        participant: &ParticipantId,
        events: &mut Vec<EngineEvent>,
    ) -> EngineResult<bool> {
        let index = self.index_of(participant)?;

        if !ctx.config.dropout.page_inactivity {
            debug!(
                group = %self.id,
                participant = %participant,
                "Page inactivity does not count as dropout"
            );
            return Ok(false);
        }
        if self.status.is_terminal() || !self.participants[index].is_active() {
            return Ok(false);
        }

        let round = self.current;
        self.drop_out(index, round, events);
        self.advance(ctx, events)?;
        Ok(true)
    }

    /// What happened to a participant in a round
    pub fn round_outcome(
        &self,
        ledger: &RoundLedger,
        round: RoundNumber,
        participant: &ParticipantId,
    ) -> EngineResult<RoundOutcome> {
        let index = self.index_of(participant)?;
        self.check_range(round)?;

        if let Some(row) = ledger.get(&self.id, round, participant)? {
            return Ok(RoundOutcome::Settled(Box::new(row)));
        }

        if !self.participants[index].was_active_in(round) {
            return Ok(RoundOutcome::Excluded(ExclusionReason::Dropout));
        }
        if self.failed_in.map_or(false, |failed| failed <= round) {
            return Ok(RoundOutcome::Excluded(ExclusionReason::GroupFailure));
        }
        Ok(RoundOutcome::Pending)
    }

    /// Position of a participant in the per-round state machine
    pub fn round_state(
        &self,
        ledger: &RoundLedger,
        round: RoundNumber,
        participant: &ParticipantId,
    ) -> EngineResult<ParticipantRoundState> {
        match self.round_outcome(ledger, round, participant)? {
            RoundOutcome::Settled(_) => Ok(ParticipantRoundState::Settled),
            RoundOutcome::Excluded(reason) => Ok(reason.into()),
            RoundOutcome::Pending => {
                let report = self
                    .rounds
                    .get(&round)
                    .and_then(|state| state.barrier(state.open_phase()))
                    .and_then(|barrier| barrier.report(participant));
                Ok(match report {
                    Some(ReportOutcome::TimedOut) => ParticipantRoundState::TimedOut,
                    Some(ReportOutcome::Decided(_)) => ParticipantRoundState::Decided,
                    None => ParticipantRoundState::Pending,
                })
            }
        }
    }

    /// Group-wide table of the last `k` sealed rounds
    pub fn history(
        &self,
        ledger: &RoundLedger,
        k: usize,
        order: SortOrder,
    ) -> EngineResult<Vec<HistoryRound>> {
        let last = match self.last_sealed_round() {
            Some(last) if k > 0 => last.get(),
            _ => return Ok(Vec::new()),
        };
        let window = u32::try_from(k).unwrap_or(u32::MAX);
        let first = last.saturating_sub(window.saturating_sub(1)).max(1);

        let mut history = Vec::new();
        for n in first..=last {
            let round = RoundNumber(n);
            let mut members = Vec::with_capacity(self.participants.len());
            for p in &self.participants {
                members.push(MemberHistory {
                    participant_id: p.id.clone(),
                    id_in_group: p.id_in_group,
                    dropped_out: !p.was_active_in(round),
                    row: ledger.get(&self.id, round, &p.id)?,
                });
            }
            history.push(HistoryRound { round, members });
        }

        if order == SortOrder::Descending {
            history.reverse();
        }
        Ok(history)
    }

    /// Final routing of a participant
    pub fn final_result(
        &self,
        ctx: &SessionContext<'_>,
        participant: &ParticipantId,
    ) -> EngineResult<FinalResult> {
        let index = self.index_of(participant)?;
        let p = &self.participants[index];

        if let Some(round) = p.dropped_out_in {
            return Ok(FinalResult::DroppedOut { round });
        }
        if let Some(round) = self.failed_in {
            return Ok(FinalResult::GroupFailed { round });
        }
        if self.status != GroupStatus::Completed {
            return Ok(FinalResult::InProgress {
                round: self.current,
            });
        }

        let points = if ctx.config.accumulate_earnings {
            p.accumulated_earnings
        } else {
            ctx.ledger
                .recent(&self.id, participant, usize::MAX, SortOrder::Ascending)?
                .iter()
                .map(|row| row.payoff)
                .sum::<Points>()
        };

        Ok(FinalResult::Completed {
            accumulated_earnings: points,
            payout: compute_payout(&ctx.config.payout, points),
        })
    }

    fn index_of(&self, participant: &ParticipantId) -> EngineResult<usize> {
        self.participants
            .iter()
            .position(|p| &p.id == participant)
            .ok_or_else(|| EngineError::UnknownParticipant {
                group: self.id.clone(),
                participant: participant.clone(),
            })
    }

    fn check_range(&self, round: RoundNumber) -> EngineResult<()> {
        if round.get() == 0 || round.get() > self.num_rounds {
            return Err(EngineError::RoundOutOfRange {
                round,
                num_rounds: self.num_rounds,
            });
        }
        Ok(())
    }

    fn active_ids(&self) -> Vec<ParticipantId> {
        self.participants
            .iter()
            .filter(|p| p.is_active())
            .map(|p| p.id.clone())
            .collect()
    }

    fn last_sealed_round(&self) -> Option<RoundNumber> {
        self.rounds
            .iter()
            .rev()
            .find(|(_, state)| state.sealed)
            .map(|(round, _)| *round)
    }

    fn event(&self, round: Option<RoundNumber>, kind: EngineEventKind) -> EngineEvent {
        EngineEvent::new(self.id.clone(), round, kind)
    }

    /// Reports from active participants against the active count
    fn progress(&self, round: RoundNumber, phase: Phase) -> (usize, usize) {
        let barrier = match self.rounds.get(&round).and_then(|s| s.barrier(phase)) {
            Some(barrier) => barrier,
            None => return (0, 0),
        };
        let active: Vec<&Participant> = self.participants.iter().filter(|p| p.is_active()).collect();
        let reported = active.iter().filter(|p| barrier.has_reported(&p.id)).count();
        (reported, active.len())
    }

    /// Submission-time checks; nothing is mutated
    fn validate(
        &self,
        ctx: &SessionContext<'_>,
        round: RoundNumber,
        index: usize,
        outcome: &ReportOutcome,
    ) -> EngineResult<()> {
        let p = &self.participants[index];
        match outcome {
            ReportOutcome::TimedOut => Ok(()),
            ReportOutcome::Decided(Decision::Contribution(value)) => {
                ctx.settlement.validate_contribution(&p.id, p.endowment, *value)
            }
            ReportOutcome::Decided(Decision::Punishment(allocation)) => {
                let staged = self
                    .rounds
                    .get(&round)
                    .and_then(|state| state.contributions.get(&p.id));
                let (gross, accumulated) = match staged {
                    Some(c) => (c.gross_profit, c.accumulated_after),
                    None => (Points::zero(), p.accumulated_earnings),
                };
                let budget = ctx.settlement.punishment_budget(gross, accumulated);
                let targets: BTreeSet<ParticipantId> = self
                    .participants
                    .iter()
                    .filter(|other| other.is_active() && other.id != p.id)
                    .map(|other| other.id.clone())
                    .collect();
                ctx.settlement
                    .validate_allocation(&p.id, allocation, &targets, budget)
                    .map(|_| ())
            }
        }
    }

    /// Deactivate a participant and notify the quorum monitor
    fn drop_out(&mut self, index: usize, round: RoundNumber, events: &mut Vec<EngineEvent>) {
        if !self.participants[index].deactivate(round) {
            return;
        }
        let participant = self.participants[index].id.clone();
        info!(
            group = %self.id,
            round = %round,
            participant = %participant,
            "Participant dropped out"
        );
        events.push(self.event(
            Some(round),
            EngineEventKind::ParticipantDroppedOut { participant },
        ));

        if let QuorumVerdict::Failed { inactive_count } = self.quorum.on_dropout() {
            self.failed_in = Some(round);
            self.status = GroupStatus::Failed { round };
            warn!(
                group = %self.id,
                round = %round,
                inactive = inactive_count,
                "Group failed"
            );
            events.push(self.event(Some(round), EngineEventKind::GroupFailed { inactive_count }));
        }
    }

    /// Release and settle every barrier whose condition now holds.
    ///
    /// Returns each release as (round, phase, outcome).
    fn advance(
        &mut self,
        ctx: &SessionContext<'_>,
        events: &mut Vec<EngineEvent>,
    ) -> EngineResult<Vec<(RoundNumber, Phase, ReleaseOutcome)>> {
        let mut released = Vec::new();

        loop {
            if self.status == GroupStatus::Completed {
                break;
            }
            let round = self.current;
            let active = self.active_ids();
            let failed = self.quorum.is_failed();

            let state = match self.rounds.get_mut(&round) {
                Some(state) if !state.is_closed() => state,
                _ => break,
            };
            let phase = state.open_phase();
            let status = match state.barrier_mut(phase) {
                Some(barrier) => barrier.evaluate(&active),
                None => break,
            };
            if status != BarrierStatus::Released {
                break;
            }

            info!(
                group = %self.id,
                round = %round,
                phase = %phase,
                active = active.len(),
                "Barrier released"
            );
            events.push(self.event(Some(round), EngineEventKind::PhaseReleased { phase }));

            if failed {
                if let Some(state) = self.rounds.get_mut(&round) {
                    state.aborted = true;
                }
                warn!(
                    group = %self.id,
                    round = %round,
                    phase = %phase,
                    "Settlement skipped for failed group"
                );
                events.push(self.event(Some(round), EngineEventKind::RoundAborted));
                released.push((round, phase, ReleaseOutcome::SkippedGroupFailed));
                break;
            }

            self.settle_phase(ctx, round, phase, events)?;
            released.push((round, phase, ReleaseOutcome::Settled));
        }

        Ok(released)
    }

    /// Run one settlement phase; at most once per round and phase
    fn settle_phase(
        &mut self,
        ctx: &SessionContext<'_>,
        round: RoundNumber,
        phase: Phase,
        events: &mut Vec<EngineEvent>,
    ) -> EngineResult<()> {
        let participants = &self.participants;
        let state = self
            .rounds
            .get_mut(&round)
            .ok_or_else(|| EngineError::RoundNotOpen {
                group: self.id.clone(),
                round,
                phase,
            })?;

        if !state.settled.insert(phase) {
            return Err(EngineError::AlreadySettled {
                group: self.id.clone(),
                round,
                phase,
            });
        }

        match phase {
            Phase::Contribution => {
                let inputs: Vec<ContributionInput> = participants
                    .iter()
                    .filter(|p| p.is_active())
                    .map(|p| ContributionInput {
                        participant: p.id.clone(),
                        endowment: p.endowment,
                        report: state
                            .contribution
                            .report(&p.id)
                            .cloned()
                            .unwrap_or(ReportOutcome::TimedOut),
                        accumulated_before: p.accumulated_earnings,
                    })
                    .collect();
                state.contributions = ctx.settlement.settle_contributions(&inputs);

                let pool = state
                    .contributions
                    .values()
                    .next()
                    .map(|c| c.pool)
                    .unwrap_or_else(Points::zero);
                info!(
                    group = %self.id,
                    round = %round,
                    pool = %pool,
                    members = inputs.len(),
                    "Contribution phase settled"
                );
            }
            Phase::Punishment => {
                let barrier = state.punishment.as_ref();
                let inputs: Vec<PunishmentInput> = participants
                    .iter()
                    .filter(|p| p.is_active())
                    .filter_map(|p| {
                        let staged = state.contributions.get(&p.id)?;
                        Some(PunishmentInput {
                            participant: p.id.clone(),
                            gross_profit: staged.gross_profit,
                            accumulated: staged.accumulated_after,
                            report: barrier
                                .and_then(|b| b.report(&p.id))
                                .cloned()
                                .unwrap_or(ReportOutcome::TimedOut),
                        })
                    })
                    .collect();
                state.punishments = ctx.settlement.settle_punishments(&inputs);
                info!(
                    group = %self.id,
                    round = %round,
                    members = inputs.len(),
                    "Punishment phase settled"
                );
            }
        }
        events.push(self.event(Some(round), EngineEventKind::PhaseSettled { phase }));

        if phase == Phase::Contribution && self.punishment_enabled {
            self.open_punishment(round);
            Ok(())
        } else {
            self.seal_round(ctx, round, events)
        }
    }

    fn open_punishment(&mut self, round: RoundNumber) {
        if let Some(state) = self.rounds.get_mut(&round) {
            state.punishment = Some(RoundBarrier::new(self.id.clone(), round, Phase::Punishment));
        }
        for p in &mut self.participants {
            p.current_decision = None;
        }
        self.status = GroupStatus::Collecting {
            round,
            phase: Phase::Punishment,
        };
        debug!(group = %self.id, round = %round, "Punishment phase opened");
    }

    /// Commit the round's rows, carry earnings forward and open the next round
    fn seal_round(
        &mut self,
        ctx: &SessionContext<'_>,
        round: RoundNumber,
        events: &mut Vec<EngineEvent>,
    ) -> EngineResult<()> {
        let settled_at = Utc::now();
        let state = match self.rounds.get(&round) {
            Some(state) => state,
            None => return Ok(()),
        };

        let mut rows = Vec::new();
        for p in self.participants.iter().filter(|p| p.is_active()) {
            let contribution = match state.contributions.get(&p.id) {
                Some(c) => c,
                None => continue,
            };
            let punishment = state.punishments.get(&p.id).cloned();
            let (payoff, accumulated) = match &punishment {
                Some(pun) => (pun.payoff, pun.accumulated_after),
                None => (contribution.gross_profit, contribution.accumulated_after),
            };
            rows.push(SettledRow {
                group_id: self.id.clone(),
                round,
                participant_id: p.id.clone(),
                id_in_group: p.id_in_group,
                contribution: contribution.contribution,
                contribution_timed_out: contribution.timed_out,
                group_pool: contribution.pool,
                private_share: contribution.private_share,
                public_share: contribution.public_share,
                gross_profit: contribution.gross_profit,
                punishment,
                payoff,
                accumulated_earnings: accumulated,
                settled_at,
            });
        }

        let carried: BTreeMap<ParticipantId, Points> = rows
            .iter()
            .map(|row| (row.participant_id.clone(), row.accumulated_earnings))
            .collect();
        let count = rows.len();
        ctx.ledger.commit_round(rows)?;

        for p in &mut self.participants {
            if let Some(accumulated) = carried.get(&p.id) {
                p.accumulated_earnings = *accumulated;
            }
            p.current_decision = None;
        }
        if let Some(state) = self.rounds.get_mut(&round) {
            state.sealed = true;
        }

        info!(group = %self.id, round = %round, rows = count, "Round sealed");
        events.push(self.event(Some(round), EngineEventKind::RoundSealed));

        if round.get() >= self.num_rounds {
            self.status = GroupStatus::Completed;
            info!(group = %self.id, rounds = self.num_rounds, "Game completed");
            events.push(self.event(Some(round), EngineEventKind::GameCompleted));
        } else {
            let next = round.next();
            self.rounds.insert(next, RoundState::new(&self.id, next));
            self.current = next;
            self.status = GroupStatus::Collecting {
                round: next,
                phase: Phase::Contribution,
            };
            debug!(group = %self.id, round = %next, "Round opened");
            events.push(self.event(Some(next), EngineEventKind::RoundOpened));
        }
        Ok(())
    }
}
