//! External interface of one game instance
//!
//! Groups live in a concurrent map; each group's state sits behind its own
//! mutex, so reports for different groups proceed in parallel while all
//! transitions of one group are serialized. Events are published while the
//! group lock is held, which keeps each group's event order identical to its
//! transition order.

use crate::assignment::TreatmentAssigner;
use crate::group::{GroupSession, SessionContext};
use crate::ledger::RoundLedger;
use crate::settlement::SettlementEngine;
use commons_types::{
    Decision, EngineError, EngineEvent, EngineEventKind, EngineResult, FinalResult, GameConfig,
    GroupId, GroupSnapshot, GroupSpec, GroupStatus, HistoryRound, Participant, ParticipantId,
    ParticipantRoundState, Phase, ReportAck, ReportOutcome, RoundNumber, RoundOutcome,
    SettledRow, SortOrder,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::info;

/// Coordinates every group of one game instance
pub struct GameEngine {
    config: Arc<GameConfig>,
    settlement: SettlementEngine,
    ledger: Arc<RoundLedger>,
    groups: DashMap<GroupId, Arc<Mutex<GroupSession>>>,
    treatments: TreatmentAssigner,
    events: broadcast::Sender<EngineEvent>,
}

impl GameEngine {
    /// Create an engine; the configuration is validated and then frozen
    pub fn new(config: GameConfig) -> EngineResult<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(1000);
        Ok(Self {
            settlement: SettlementEngine::new(&config),
            treatments: TreatmentAssigner::new(config.treatment),
            config: Arc::new(config),
            ledger: Arc::new(RoundLedger::new()),
            groups: DashMap::new(),
            events,
        })
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Shared ledger, for display readers
    pub fn ledger(&self) -> Arc<RoundLedger> {
        Arc::clone(&self.ledger)
    }

    /// Subscribe to lifecycle events of all groups
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Create a group collecting contributions for round 1
    pub fn create_group(&self, spec: GroupSpec) -> EngineResult<GroupId> {
        if spec.participants.len() != self.config.players_per_group {
            return Err(EngineError::InvalidConfig(format!(
                "group needs {} participants, got {}",
                self.config.players_per_group,
                spec.participants.len()
            )));
        }
        let unique: BTreeSet<&ParticipantId> = spec.participants.iter().collect();
        if unique.len() != spec.participants.len() {
            return Err(EngineError::InvalidConfig(
                "participant ids within a group must be unique".to_string(),
            ));
        }

        let id = spec.id.unwrap_or_else(GroupId::generate);
        match self.groups.entry(id.clone()) {
            Entry::Occupied(_) => return Err(EngineError::GroupAlreadyExists(id)),
            Entry::Vacant(slot) => {
                let punishment_enabled = self.treatments.assign(spec.punishment);
                let session =
                    GroupSession::new(id.clone(), spec.participants, punishment_enabled, &self.config);
                // The shard stays locked until both events are out, so no report
                // for this group can publish ahead of them
                let _entry = slot.insert(Arc::new(Mutex::new(session)));

                info!(
                    group = %id,
                    punishment = punishment_enabled,
                    players = self.config.players_per_group,
                    "Group created"
                );
                self.publish(EngineEvent::new(
                    id.clone(),
                    None,
                    EngineEventKind::GroupCreated { punishment_enabled },
                ));
                self.publish(EngineEvent::new(
                    id.clone(),
                    Some(RoundNumber::FIRST),
                    EngineEventKind::RoundOpened,
                ));
            }
        }
        Ok(id)
    }

    /// Submit a contribution or punishment allocation
    pub fn submit_decision(
        &self,
        group: &GroupId,
        round: RoundNumber,
        participant: &ParticipantId,
        decision: Decision,
    ) -> EngineResult<ReportAck> {
        let phase = decision.phase();
        self.mutate(group, |session, ctx, events| {
            session.report(
                ctx,
                round,
                participant,
                phase,
                ReportOutcome::Decided(decision),
                events,
            )
        })
    }

    /// Report that a participant's deadline for a phase passed
    pub fn report_timeout(
        &self,
        group: &GroupId,
        round: RoundNumber,
        phase: Phase,
        participant: &ParticipantId,
    ) -> EngineResult<ReportAck> {
        self.mutate(group, |session, ctx, events| {
            session.report(ctx, round, participant, phase, ReportOutcome::TimedOut, events)
        })
    }

    /// Report a timeout on a page without a barrier.
    ///
    /// Returns whether the participant was deactivated.
    pub fn report_inactivity(
        &self,
        group: &GroupId,
        participant: &ParticipantId,
    ) -> EngineResult<bool> {
        self.mutate(group, |session, ctx, events| {
            session.report_inactivity(ctx, participant, events)
        })
    }

    pub fn get_round_outcome(
        &self,
        group: &GroupId,
        round: RoundNumber,
        participant: &ParticipantId,
    ) -> EngineResult<RoundOutcome> {
        self.read(group, |session| {
            session.round_outcome(&self.ledger, round, participant)
        })
    }

    /// Position of a participant in the per-round state machine
    pub fn round_state(
        &self,
        group: &GroupId,
        round: RoundNumber,
        participant: &ParticipantId,
    ) -> EngineResult<ParticipantRoundState> {
        self.read(group, |session| {
            session.round_state(&self.ledger, round, participant)
        })
    }

    pub fn is_group_failed(&self, group: &GroupId) -> EngineResult<bool> {
        self.read(group, |session| Ok(session.is_failed()))
    }

    pub fn group_status(&self, group: &GroupId) -> EngineResult<GroupStatus> {
        self.read(group, |session| Ok(session.status()))
    }

    /// Round currently collecting; `None` once the group completed or failed
    pub fn current_round(&self, group: &GroupId) -> EngineResult<Option<RoundNumber>> {
        self.read(group, |session| Ok(session.current_round()))
    }

    pub fn participant(
        &self,
        group: &GroupId,
        participant: &ParticipantId,
    ) -> EngineResult<Participant> {
        self.read(group, |session| session.participant(participant).cloned())
    }

    pub fn snapshot(&self, group: &GroupId) -> EngineResult<GroupSnapshot> {
        self.read(group, |session| Ok(session.snapshot()))
    }

    /// A participant's last `k` settled rounds
    pub fn get_recent_rounds(
        &self,
        group: &GroupId,
        participant: &ParticipantId,
        k: usize,
        order: SortOrder,
    ) -> EngineResult<Vec<SettledRow>> {
        self.read(group, |session| {
            session.participant(participant)?;
            self.ledger.recent(session.id(), participant, k, order)
        })
    }

    /// All members' rows for the last `k` sealed rounds
    pub fn group_history(
        &self,
        group: &GroupId,
        k: usize,
        order: SortOrder,
    ) -> EngineResult<Vec<HistoryRound>> {
        self.read(group, |session| session.history(&self.ledger, k, order))
    }

    pub fn final_result(
        &self,
        group: &GroupId,
        participant: &ParticipantId,
    ) -> EngineResult<FinalResult> {
        self.read(group, |session| {
            session.final_result(&self.context(), participant)
        })
    }

    pub fn group_ids(&self) -> Vec<GroupId> {
        let mut ids: Vec<GroupId> = self.groups.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    fn context(&self) -> SessionContext<'_> {
        SessionContext {
            config: &self.config,
            settlement: &self.settlement,
            ledger: &self.ledger,
        }
    }

    fn session(&self, group: &GroupId) -> EngineResult<Arc<Mutex<GroupSession>>> {
        self.groups
            .get(group)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| EngineError::UnknownGroup(group.clone()))
    }

    fn publish(&self, event: EngineEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn read<T>(
        &self,
        group: &GroupId,
        f: impl FnOnce(&GroupSession) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let session = self.session(group)?;
        let guard = session.lock().map_err(|_| EngineError::LockPoisoned)?;
        f(&guard)
    }

    fn mutate<T>(
        &self,
        group: &GroupId,
        f: impl FnOnce(&mut GroupSession, &SessionContext<'_>, &mut Vec<EngineEvent>) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let session = self.session(group)?;
        let mut guard = session.lock().map_err(|_| EngineError::LockPoisoned)?;

        let mut events = Vec::new();
        let result = f(&mut guard, &self.context(), &mut events);
        for event in events {
            self.publish(event);
        }
        result
    }
}
