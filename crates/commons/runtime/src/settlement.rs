//! Per-phase payoff computation
//!
//! Phase 1 aggregates contributions into the public pool; phase 2 applies
//! peer punishment. Both are pure functions over the reports of the members
//! that are active when the barrier releases; the caller guarantees each runs
//! at most once per round and phase.
//!
//! Submission-time validation (budget and target checks) also lives here so
//! that an invalid decision never reaches a barrier.

use commons_types::{
    BudgetSource, ContributionOutcome, EngineError, EngineResult, GameConfig, ParticipantId,
    Points, PunishmentAllocation, PunishmentOutcome, PunishmentSchedule, ReportOutcome,
    BASIS_POINTS,
};
use std::collections::{BTreeMap, BTreeSet};

/// Phase 1 input for one active participant
#[derive(Clone, Debug)]
pub struct ContributionInput {
    pub participant: ParticipantId,
    pub endowment: Points,
    pub report: ReportOutcome,
    /// Accumulated earnings at the end of the previous round
    pub accumulated_before: Points,
}

/// Phase 2 input for one active participant
#[derive(Clone, Debug)]
pub struct PunishmentInput {
    pub participant: ParticipantId,
    /// Gross profit from phase 1 of this round
    pub gross_profit: Points,
    /// Accumulated earnings after phase 1 of this round
    pub accumulated: Points,
    pub report: ReportOutcome,
}

/// Computes contribution and punishment settlements
#[derive(Clone, Debug)]
pub struct SettlementEngine {
    efficiency_factor_bps: u32,
    schedule: PunishmentSchedule,
    saturation_point: u32,
    accumulate: bool,
    budget_source: BudgetSource,
}

impl SettlementEngine {
    pub fn new(config: &GameConfig) -> Self {
        Self {
            efficiency_factor_bps: config.efficiency_factor_bps,
            schedule: config.schedule(),
            saturation_point: config.punishment.saturation_point,
            accumulate: config.accumulate_earnings,
            budget_source: config.punishment.budget_source,
        }
    }

    /// Reject a contribution outside `0..=endowment` or not in whole points
    pub fn validate_contribution(
        &self,
        participant: &ParticipantId,
        endowment: Points,
        value: Points,
    ) -> EngineResult<()> {
        if value.is_negative() {
            return Err(EngineError::InvalidDecision {
                participant: participant.clone(),
                reason: format!("negative contribution {}", value),
            });
        }
        if value.minor() % Points::SCALE != 0 {
            return Err(EngineError::InvalidDecision {
                participant: participant.clone(),
                reason: format!("contribution {} is not a whole number of points", value),
            });
        }
        if value > endowment {
            return Err(EngineError::BudgetExceeded {
                participant: participant.clone(),
                required: value,
                available: endowment,
            });
        }
        Ok(())
    }

    /// Amount a participant may spend on punishment this round
    pub fn punishment_budget(&self, gross_profit: Points, accumulated: Points) -> Points {
        match self.budget_source {
            BudgetSource::GrossProfit => gross_profit,
            BudgetSource::AccumulatedEarnings => accumulated,
        }
    }

    /// Validate an allocation against the schedule, the group and the budget.
    ///
    /// `targets` is the set of currently-active members other than the
    /// sender. Returns the allocation's total cost.
    pub fn validate_allocation(
        &self,
        participant: &ParticipantId,
        allocation: &PunishmentAllocation,
        targets: &BTreeSet<ParticipantId>,
        budget: Points,
    ) -> EngineResult<Points> {
        let invalid = |reason: String| EngineError::InvalidDecision {
            participant: participant.clone(),
            reason,
        };

        let max_level = self.schedule.max_level().unwrap_or(0);
        for (target, level) in allocation.levels() {
            if level > max_level {
                return Err(invalid(format!(
                    "punishment level {} above maximum {}",
                    level, max_level
                )));
            }
            if target == participant {
                return Err(invalid("cannot punish self".to_string()));
            }
            if !targets.contains(target) {
                return Err(invalid(format!(
                    "{} is not an active member of the group",
                    target
                )));
            }
        }

        let cost = self
            .schedule
            .total_cost(allocation)
            .ok_or_else(|| invalid("allocation uses an unpriced level".to_string()))?;

        if cost > budget {
            return Err(EngineError::BudgetExceeded {
                participant: participant.clone(),
                required: cost,
                available: budget,
            });
        }
        Ok(cost)
    }

    /// Phase 1: aggregate contributions of the active members
    pub fn settle_contributions(
        &self,
        inputs: &[ContributionInput],
    ) -> BTreeMap<ParticipantId, ContributionOutcome> {
        let pool: Points = inputs.iter().map(|i| i.report.contribution()).sum();
        let public_share = pool.scale_bps(self.efficiency_factor_bps);

        inputs
            .iter()
            .map(|input| {
                let contribution = input.report.contribution();
                let private_share = input.endowment - contribution;
                let gross_profit = private_share + public_share;
                let accumulated_after = if self.accumulate {
                    input.accumulated_before + gross_profit
                } else {
                    input.accumulated_before
                };

                let outcome = ContributionOutcome {
                    contribution,
                    timed_out: input.report.is_timeout(),
                    pool,
                    private_share,
                    public_share,
                    gross_profit,
                    accumulated_after,
                };
                (input.participant.clone(), outcome)
            })
            .collect()
    }

    /// Phase 2: apply punishment among the active members.
    ///
    /// Punishment aimed at a member who is no longer active is void: it costs
    /// nothing and affects nobody.
    pub fn settle_punishments(
        &self,
        inputs: &[PunishmentInput],
    ) -> BTreeMap<ParticipantId, PunishmentOutcome> {
        let active: BTreeSet<&ParticipantId> = inputs.iter().map(|i| &i.participant).collect();

        // Effective allocations, restricted to active targets
        let sent: BTreeMap<&ParticipantId, PunishmentAllocation> = inputs
            .iter()
            .map(|input| {
                let allocation = input
                    .report
                    .allocation()
                    .map(|a| {
                        a.levels()
                            .filter(|(target, _)| {
                                *target != &input.participant && active.contains(target)
                            })
                            .map(|(target, level)| (target.clone(), level))
                            .collect::<PunishmentAllocation>()
                    })
                    .unwrap_or_default();
                (&input.participant, allocation)
            })
            .collect();

        let saturation = i64::from(self.saturation_point);

        inputs
            .iter()
            .map(|input| {
                let me = &input.participant;
                let received: u32 = sent
                    .iter()
                    .filter(|(sender, _)| *sender != &me)
                    .map(|(_, allocation)| u32::from(allocation.level_to(me)))
                    .sum();

                let allocation = sent.get(me).cloned().unwrap_or_default();
                let cost = allocation
                    .levels()
                    .filter_map(|(_, level)| self.schedule.cost(level))
                    .sum::<Points>();

                let capped = i64::from(received).min(saturation);
                let reduction_bps = if saturation > 0 {
                    (capped * i64::from(BASIS_POINTS) / saturation) as u32
                } else {
                    0
                };
                let kept = input.gross_profit.scale_ratio(saturation - capped, saturation);
                let payoff = (kept - cost).floor_zero();

                let accumulated_after = if self.accumulate {
                    (input.accumulated - input.gross_profit + payoff - cost).floor_zero()
                } else {
                    input.accumulated
                };

                let outcome = PunishmentOutcome {
                    sent: allocation,
                    timed_out: input.report.is_timeout(),
                    received,
                    cost,
                    reduction_bps,
                    payoff,
                    accumulated_after,
                };
                (me.clone(), outcome)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commons_types::Decision;
    use proptest::prelude::*;

    fn setup() -> SettlementEngine {
        SettlementEngine::new(&GameConfig::default())
    }

    fn ids(n: usize) -> Vec<ParticipantId> {
        (1..=n).map(|i| ParticipantId::new(format!("p{}", i))).collect()
    }

    fn contribution_inputs(values: &[Option<i64>]) -> Vec<ContributionInput> {
        ids(values.len())
            .into_iter()
            .zip(values)
            .map(|(participant, value)| ContributionInput {
                participant,
                endowment: Points::from_points(20),
                report: match value {
                    Some(v) => ReportOutcome::Decided(Decision::Contribution(Points::from_points(*v))),
                    None => ReportOutcome::TimedOut,
                },
                accumulated_before: Points::zero(),
            })
            .collect()
    }

    #[test]
    fn test_full_cooperation() {
        let engine = setup();
        let outcomes = engine.settle_contributions(&contribution_inputs(&[Some(20), Some(20), Some(20)]));

        for outcome in outcomes.values() {
            assert_eq!(outcome.pool, Points::from_points(60));
            assert_eq!(outcome.private_share, Points::zero());
            assert_eq!(outcome.public_share, Points::from_minor(22_500));
            assert_eq!(outcome.gross_profit, Points::from_minor(22_500));
            assert_eq!(outcome.accumulated_after, Points::from_minor(22_500));
        }
    }

    #[test]
    fn test_timeout_counts_as_zero() {
        let engine = setup();
        let outcomes = engine.settle_contributions(&contribution_inputs(&[Some(20), None, Some(20)]));
        let ids = ids(3);

        let gross: Vec<Points> = ids.iter().map(|id| outcomes[id].gross_profit).collect();
        assert_eq!(
            gross,
            vec![
                Points::from_points(15),
                Points::from_points(35),
                Points::from_points(15)
            ]
        );
        assert!(outcomes[&ids[1]].timed_out);
        assert_eq!(outcomes[&ids[1]].private_share, Points::from_points(20));
        assert_eq!(outcomes[&ids[0]].pool, Points::from_points(40));
    }

    #[test]
    fn test_no_accumulation_keeps_previous_total() {
        let config = GameConfig::default().with_accumulation(false);
        let engine = SettlementEngine::new(&config);
        let mut inputs = contribution_inputs(&[Some(10)]);
        inputs[0].accumulated_before = Points::from_points(7);
        let outcomes = engine.settle_contributions(&inputs);
        assert_eq!(outcomes[&ids(1)[0]].accumulated_after, Points::from_points(7));
    }

    #[test]
    fn test_validate_contribution_bounds() {
        let engine = setup();
        let p = ParticipantId::new("p1");
        let endowment = Points::from_points(20);

        assert!(engine.validate_contribution(&p, endowment, Points::from_points(20)).is_ok());
        assert!(engine.validate_contribution(&p, endowment, Points::zero()).is_ok());
        assert!(matches!(
            engine.validate_contribution(&p, endowment, Points::from_points(21)),
            Err(EngineError::BudgetExceeded { .. })
        ));
        assert!(matches!(
            engine.validate_contribution(&p, endowment, Points::from_points(-1)),
            Err(EngineError::InvalidDecision { .. })
        ));
        assert!(matches!(
            engine.validate_contribution(&p, endowment, Points::from_minor(1)),
            Err(EngineError::InvalidDecision { .. })
        ));
        assert!(matches!(
            engine.validate_contribution(&p, endowment, Points::from_minor(19_500)),
            Err(EngineError::InvalidDecision { .. })
        ));
    }

    #[test]
    fn test_validate_allocation() {
        let engine = setup();
        let ids = ids(3);
        let targets: BTreeSet<ParticipantId> = ids[1..].iter().cloned().collect();
        let budget = Points::from_minor(22_500);

        // levels 3 and 5 cost 4 + 9
        let ok = PunishmentAllocation::none()
            .with(ids[1].clone(), 3)
            .with(ids[2].clone(), 5);
        assert_eq!(
            engine.validate_allocation(&ids[0], &ok, &targets, budget),
            Ok(Points::from_points(13))
        );

        let too_high = PunishmentAllocation::none().with(ids[1].clone(), 11);
        assert!(matches!(
            engine.validate_allocation(&ids[0], &too_high, &targets, budget),
            Err(EngineError::InvalidDecision { .. })
        ));

        let self_target = PunishmentAllocation::none().with(ids[0].clone(), 1);
        assert!(matches!(
            engine.validate_allocation(&ids[0], &self_target, &targets, budget),
            Err(EngineError::InvalidDecision { .. })
        ));

        let stranger = PunishmentAllocation::none().with(ParticipantId::new("x"), 1);
        assert!(matches!(
            engine.validate_allocation(&ids[0], &stranger, &targets, budget),
            Err(EngineError::InvalidDecision { .. })
        ));

        // 20 + 20 = 40 > 22.5
        let expensive = PunishmentAllocation::none()
            .with(ids[1].clone(), 8)
            .with(ids[2].clone(), 8);
        assert!(matches!(
            engine.validate_allocation(&ids[0], &expensive, &targets, budget),
            Err(EngineError::BudgetExceeded { .. })
        ));
    }

    fn punishment_input(
        participant: &ParticipantId,
        gross: Points,
        report: ReportOutcome,
    ) -> PunishmentInput {
        PunishmentInput {
            participant: participant.clone(),
            gross_profit: gross,
            accumulated: gross,
            report,
        }
    }

    #[test]
    fn test_saturated_punishment_wipes_gross() {
        let engine = setup();
        let ids = ids(3);
        let gross = Points::from_minor(22_500);

        // p2 and p3 each send level 5 to p1 (10 received); p1 sends level 2 to p2
        let inputs = vec![
            punishment_input(
                &ids[0],
                gross,
                ReportOutcome::Decided(Decision::Punishment(
                    PunishmentAllocation::none().with(ids[1].clone(), 2),
                )),
            ),
            punishment_input(
                &ids[1],
                gross,
                ReportOutcome::Decided(Decision::Punishment(
                    PunishmentAllocation::none().with(ids[0].clone(), 5),
                )),
            ),
            punishment_input(
                &ids[2],
                gross,
                ReportOutcome::Decided(Decision::Punishment(
                    PunishmentAllocation::none().with(ids[0].clone(), 5),
                )),
            ),
        ];
        let outcomes = engine.settle_punishments(&inputs);

        let p1 = &outcomes[&ids[0]];
        assert_eq!(p1.received, 10);
        assert_eq!(p1.reduction_bps, 10_000);
        assert_eq!(p1.cost, Points::from_points(2));
        // max(0, 0 - 2)
        assert_eq!(p1.payoff, Points::zero());
        assert_eq!(p1.accumulated_after, Points::zero());

        // p2: received 2, cost 9 -> 22.5 * 0.8 - 9 = 9
        let p2 = &outcomes[&ids[1]];
        assert_eq!(p2.received, 2);
        assert_eq!(p2.payoff, Points::from_points(9));
        // 22.5 - 22.5 + 9 - 9 = 0
        assert_eq!(p2.accumulated_after, Points::zero());

        // p3: nothing received, cost 9 -> 13.5
        let p3 = &outcomes[&ids[2]];
        assert_eq!(p3.payoff, Points::from_minor(13_500));
        assert_eq!(p3.accumulated_after, Points::from_minor(4_500));
    }

    #[test]
    fn test_timeout_sends_no_punishment() {
        let engine = setup();
        let ids = ids(2);
        let gross = Points::from_points(15);
        let inputs = vec![
            punishment_input(&ids[0], gross, ReportOutcome::TimedOut),
            punishment_input(
                &ids[1],
                gross,
                ReportOutcome::Decided(Decision::Punishment(PunishmentAllocation::none())),
            ),
        ];
        let outcomes = engine.settle_punishments(&inputs);
        assert!(outcomes[&ids[0]].timed_out);
        assert!(outcomes[&ids[0]].sent.is_empty());
        assert_eq!(outcomes[&ids[1]].received, 0);
        assert_eq!(outcomes[&ids[1]].payoff, gross);
    }

    #[test]
    fn test_punishment_of_inactive_target_is_void() {
        let engine = setup();
        let ids = ids(3);
        let gross = Points::from_points(15);
        // ids[2] is no longer active and is not among the inputs
        let inputs = vec![
            punishment_input(
                &ids[0],
                gross,
                ReportOutcome::Decided(Decision::Punishment(
                    PunishmentAllocation::none().with(ids[2].clone(), 4),
                )),
            ),
            punishment_input(&ids[1], gross, ReportOutcome::TimedOut),
        ];
        let outcomes = engine.settle_punishments(&inputs);
        assert_eq!(outcomes[&ids[0]].cost, Points::zero());
        assert!(outcomes[&ids[0]].sent.is_empty());
        assert_eq!(outcomes[&ids[0]].payoff, gross);
    }

    proptest! {
        #[test]
        fn prop_share_identity_is_exact(
            contributions in proptest::collection::vec(proptest::option::of(0i64..=20), 1..8),
            efficiency_tenths_bps in 0u32..=1_000,
        ) {
            let efficiency_bps = efficiency_tenths_bps * 10;
            let mut config = GameConfig::default();
            config.efficiency_factor_bps = efficiency_bps;
            let engine = SettlementEngine::new(&config);

            let inputs = contribution_inputs(&contributions);
            let n = inputs.len() as i128;
            let outcomes = engine.settle_contributions(&inputs);

            let pool: i128 = contributions.iter().map(|c| i128::from(c.unwrap_or(0)) * 1_000).sum();
            let total: i128 = outcomes
                .values()
                .map(|o| i128::from((o.private_share + o.public_share).minor()))
                .sum();
            let endowment = 20_000i128;
            let expected_scaled = (endowment * n - pool) * 10_000 + i128::from(efficiency_bps) * pool * n;
            prop_assert_eq!(total * 10_000, expected_scaled);
        }

        #[test]
        fn prop_payoff_never_negative(
            gross in 0i64..=40_000,
            received in 0u8..=10,
            own_level in 0u8..=10,
        ) {
            let engine = setup();
            let ids = ids(2);
            let gross = Points::from_minor(gross);
            let inputs = vec![
                punishment_input(
                    &ids[0],
                    gross,
                    ReportOutcome::Decided(Decision::Punishment(
                        PunishmentAllocation::none().with(ids[1].clone(), own_level),
                    )),
                ),
                punishment_input(
                    &ids[1],
                    gross,
                    ReportOutcome::Decided(Decision::Punishment(
                        PunishmentAllocation::none().with(ids[0].clone(), received),
                    )),
                ),
            ];
            let outcomes = engine.settle_punishments(&inputs);
            for outcome in outcomes.values() {
                prop_assert!(!outcome.payoff.is_negative());
                prop_assert!(!outcome.accumulated_after.is_negative());
            }
        }
    }
}
