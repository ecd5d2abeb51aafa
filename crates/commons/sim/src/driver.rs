//! Simulated participants playing whole games against the engine

use crate::config::SimulationConfig;
use crate::error::{SimError, SimResult};
use commons_runtime::GameEngine;
use commons_types::{
    Decision, EngineError, FinalResult, GroupId, GroupSpec, GroupStatus, ParticipantId, Phase,
    Points, PunishmentAllocation, RoundNumber,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

const BPS_DENOMINATOR: u32 = 10_000;

/// Per-participant outcome of a simulated game
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantSummary {
    pub participant_id: ParticipantId,
    pub result: FinalResult,
}

/// Per-group outcome of a simulated game
#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    pub group_id: GroupId,
    pub punishment_enabled: bool,
    pub status: GroupStatus,
    pub inactive_count: usize,
    pub participants: Vec<ParticipantSummary>,
}

/// Everything the driver reports once all groups stopped
#[derive(Debug, Clone, Serialize)]
pub struct SimulationSummary {
    pub seed: u64,
    pub ledger_rows: usize,
    pub groups: Vec<GroupSummary>,
}

/// Drives simulated participants until every group is terminal
pub struct Simulation {
    engine: Arc<GameEngine>,
    settings: SimulationConfig,
    seed: u64,
}

impl Simulation {
    pub fn new(engine: Arc<GameEngine>, settings: SimulationConfig) -> Self {
        let seed = settings.seed.unwrap_or_else(rand::random);
        Self {
            engine,
            settings,
            seed,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub async fn run(self) -> SimResult<SimulationSummary> {
        let players = self.engine.config().players_per_group;
        let mut groups = Vec::with_capacity(self.settings.groups);
        for g in 0..self.settings.groups {
            let members: Vec<ParticipantId> = (0..players)
                .map(|p| ParticipantId::new(format!("g{}-p{}", g + 1, p + 1)))
                .collect();
            let id = self.engine.create_group(GroupSpec::new(members.clone()))?;
            groups.push((id, members));
        }
        info!(
            groups = groups.len(),
            players,
            seed = self.seed,
            "Simulation started"
        );

        let mut handles = Vec::new();
        for (group, members) in &groups {
            for member in members {
                let index = handles.len() as u64;
                let player = SimulatedParticipant {
                    engine: Arc::clone(&self.engine),
                    group: group.clone(),
                    id: member.clone(),
                    settings: self.settings.clone(),
                    rng: StdRng::seed_from_u64(participant_seed(self.seed, index)),
                };
                handles.push(tokio::spawn(player.play()));
            }
        }

        for handle in handles {
            handle.await.map_err(|e| SimError::Task(e.to_string()))??;
        }

        let mut summaries = Vec::with_capacity(groups.len());
        for (group, members) in &groups {
            let snapshot = self.engine.snapshot(group)?;
            let mut participants = Vec::with_capacity(members.len());
            for member in members {
                participants.push(ParticipantSummary {
                    participant_id: member.clone(),
                    result: self.engine.final_result(group, member)?,
                });
            }
            summaries.push(GroupSummary {
                group_id: group.clone(),
                punishment_enabled: snapshot.punishment_enabled,
                status: snapshot.status,
                inactive_count: snapshot.inactive_count,
                participants,
            });
        }

        let summary = SimulationSummary {
            seed: self.seed,
            ledger_rows: self.engine.ledger().len()?,
            groups: summaries,
        };
        info!(ledger_rows = summary.ledger_rows, "Simulation finished");
        Ok(summary)
    }
}

fn participant_seed(seed: u64, index: u64) -> u64 {
    seed ^ index.wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

struct SimulatedParticipant {
    engine: Arc<GameEngine>,
    group: GroupId,
    id: ParticipantId,
    settings: SimulationConfig,
    rng: StdRng,
}

impl SimulatedParticipant {
    async fn play(mut self) -> SimResult<()> {
        // Subscribe before the first status read so no transition is missed
        let mut events = self.engine.subscribe();
        let mut acted: Option<(RoundNumber, Phase)> = None;

        loop {
            let (round, phase) = match self.engine.group_status(&self.group)? {
                GroupStatus::Collecting { round, phase } => (round, phase),
                GroupStatus::Completed | GroupStatus::Failed { .. } => break,
            };
            if !self.engine.participant(&self.group, &self.id)?.is_active() {
                break;
            }

            if acted != Some((round, phase)) {
                self.think().await;
                if phase == Phase::Contribution && self.chance(self.settings.inactivity_bps) {
                    self.engine.report_inactivity(&self.group, &self.id)?;
                    info!(group = %self.group, participant = %self.id, round = %round, "Participant idled out");
                    break;
                }
                self.act(round, phase)?;
                acted = Some((round, phase));
                continue;
            }

            // Any event may move this group on; the status is re-read either way
            match events.recv().await {
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
        Ok(())
    }

    fn act(&mut self, round: RoundNumber, phase: Phase) -> SimResult<()> {
        if self.chance(self.settings.timeout_bps) {
            debug!(group = %self.group, participant = %self.id, round = %round, phase = %phase, "Missed deadline");
            return self.tolerate(self.engine.report_timeout(&self.group, round, phase, &self.id));
        }

        let decision = match phase {
            Phase::Contribution => {
                let endowment = self.engine.config().endowment;
                Decision::Contribution(Points::from_points(
                    self.rng.gen_range(0..=endowment) as i64,
                ))
            }
            Phase::Punishment => Decision::Punishment(self.allocation()?),
        };

        match self
            .engine
            .submit_decision(&self.group, round, &self.id, decision)
        {
            Err(EngineError::BudgetExceeded {
                required,
                available,
                ..
            }) => {
                // Re-prompted; settle for punishing nobody
                debug!(participant = %self.id, %required, %available, "Allocation over budget");
                self.tolerate(self.engine.submit_decision(
                    &self.group,
                    round,
                    &self.id,
                    Decision::Punishment(PunishmentAllocation::none()),
                ))
            }
            other => self.tolerate(other),
        }
    }

    /// Random levels towards the other active members
    fn allocation(&mut self) -> SimResult<PunishmentAllocation> {
        let max_level = self.engine.config().schedule().max_level().unwrap_or(0);
        let snapshot = self.engine.snapshot(&self.group)?;
        let mut allocation = PunishmentAllocation::none();
        if max_level == 0 {
            return Ok(allocation);
        }
        for member in snapshot.participants.iter() {
            if member.id == self.id || !member.is_active() {
                continue;
            }
            if self.chance(self.settings.punish_bps) {
                let level = self.rng.gen_range(1..=max_level.min(3));
                allocation.set(member.id.clone(), level);
            }
        }
        Ok(allocation)
    }

    /// Races with a phase release are expected; anything fatal is not
    fn tolerate<T>(&self, result: Result<T, EngineError>) -> SimResult<()> {
        match result {
            Ok(_) => Ok(()),
            Err(
                err @ (EngineError::DuplicateReport { .. } | EngineError::RoundNotOpen { .. }),
            ) => {
                debug!(participant = %self.id, error = %err, "Report raced a release");
                Ok(())
            }
            Err(err) if err.is_recoverable() => {
                warn!(participant = %self.id, error = %err, "Report not taken");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn chance(&mut self, bps: u32) -> bool {
        self.rng.gen_range(0..BPS_DENOMINATOR) < bps
    }

    async fn think(&mut self) {
        if self.settings.max_think_ms > 0 {
            let ms = self.rng.gen_range(0..=self.settings.max_think_ms);
            sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commons_types::{GameConfig, QuorumPolicy};

    fn settings(groups: usize) -> SimulationConfig {
        SimulationConfig {
            groups,
            seed: Some(7),
            timeout_bps: 0,
            inactivity_bps: 0,
            punish_bps: 5_000,
            max_think_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_cooperative_run_completes_every_group() {
        let engine = Arc::new(GameEngine::new(GameConfig::default().with_num_rounds(3)).unwrap());
        let summary = Simulation::new(Arc::clone(&engine), settings(4))
            .run()
            .await
            .unwrap();

        assert_eq!(summary.seed, 7);
        assert_eq!(summary.groups.len(), 4);
        assert_eq!(summary.ledger_rows, 4 * 3 * 3);
        for group in &summary.groups {
            assert_eq!(group.status, GroupStatus::Completed);
            for p in &group.participants {
                assert!(matches!(p.result, FinalResult::Completed { .. }));
            }
        }
    }

    #[tokio::test]
    async fn test_every_timeout_fails_the_group() {
        let config = GameConfig::default().with_quorum(QuorumPolicy::min_active(3));
        let engine = Arc::new(GameEngine::new(config).unwrap());
        let mut settings = settings(1);
        settings.timeout_bps = BPS_DENOMINATOR;

        let summary = Simulation::new(engine, settings).run().await.unwrap();
        assert_eq!(summary.ledger_rows, 0);
        assert!(matches!(
            summary.groups[0].status,
            GroupStatus::Failed { .. }
        ));
    }

    #[test]
    fn test_participant_seeds_differ() {
        assert_ne!(participant_seed(1, 0), participant_seed(1, 1));
        assert_eq!(participant_seed(9, 0), 9);
    }
}
