//! Punishment schedule and allocations
//!
//! A punishment allocation maps each target participant to a punishment
//! level. The schedule prices every level; it is fixed when the game is
//! configured and shared read-only afterwards.

use crate::{ParticipantId, Points};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cost of each punishment level in whole points, as priced in the laboratory
/// experiment (levels 0..=10)
pub const DEFAULT_PUNISHMENT_COSTS: [u32; 11] = [0, 1, 2, 4, 6, 9, 12, 16, 20, 25, 30];

/// Mapping from punishment level (0..=K) to the cost paid by the sender
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PunishmentSchedule {
    costs: Vec<Points>,
}

impl PunishmentSchedule {
    pub fn new(costs: Vec<Points>) -> Self {
        Self { costs }
    }

    /// Build a schedule from whole-point costs
    pub fn from_whole_points(costs: &[u32]) -> Self {
        Self {
            costs: costs
                .iter()
                .map(|c| Points::from_points(i64::from(*c)))
                .collect(),
        }
    }

    /// Highest level that can be sent, `None` for an empty schedule
    pub fn max_level(&self) -> Option<u8> {
        self.costs.len().checked_sub(1).map(|k| k.min(u8::MAX as usize) as u8)
    }

    /// Cost of sending one punishment of the given level
    pub fn cost(&self, level: u8) -> Option<Points> {
        self.costs.get(level as usize).copied()
    }

    pub fn costs(&self) -> &[Points] {
        &self.costs
    }

    pub fn is_empty(&self) -> bool {
        self.costs.is_empty()
    }

    /// Total cost of an allocation, `None` if any level is off the schedule
    pub fn total_cost(&self, allocation: &PunishmentAllocation) -> Option<Points> {
        allocation
            .levels()
            .try_fold(Points::zero(), |acc, (_, level)| {
                self.cost(level).map(|c| acc + c)
            })
    }
}

impl Default for PunishmentSchedule {
    fn default() -> Self {
        Self::from_whole_points(&DEFAULT_PUNISHMENT_COSTS)
    }
}

/// Punishment levels one participant sends to the other group members
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PunishmentAllocation {
    sent: BTreeMap<ParticipantId, u8>,
}

impl PunishmentAllocation {
    /// An allocation that punishes nobody
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with(mut self, target: ParticipantId, level: u8) -> Self {
        self.set(target, level);
        self
    }

    /// Set the level for a target; level 0 removes the entry
    pub fn set(&mut self, target: ParticipantId, level: u8) {
        if level == 0 {
            self.sent.remove(&target);
        } else {
            self.sent.insert(target, level);
        }
    }

    /// Level sent to a target (0 if none)
    pub fn level_to(&self, target: &ParticipantId) -> u8 {
        self.sent.get(target).copied().unwrap_or(0)
    }

    /// Iterate over (target, level) pairs with a non-zero level
    pub fn levels(&self) -> impl Iterator<Item = (&ParticipantId, u8)> {
        self.sent.iter().map(|(target, level)| (target, *level))
    }

    pub fn targets(&self) -> impl Iterator<Item = &ParticipantId> {
        self.sent.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }
}

impl FromIterator<(ParticipantId, u8)> for PunishmentAllocation {
    fn from_iter<I: IntoIterator<Item = (ParticipantId, u8)>>(iter: I) -> Self {
        let mut allocation = Self::none();
        for (target, level) in iter {
            allocation.set(target, level);
        }
        allocation
    }
}
