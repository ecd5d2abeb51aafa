//! Game configuration
//!
//! Read-only after the game instance is constructed. Defaults reproduce the
//! classic public-goods laboratory setup: groups of 3, 7 rounds, endowment 20,
//! efficiency factor 0.375 and the 0..=10 punishment price list.

use crate::{EngineError, EngineResult, Phase, Points, PunishmentSchedule, BASIS_POINTS};
use serde::{Deserialize, Serialize};

/// Configuration of one game instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    /// Members per group
    #[serde(default = "default_players_per_group")]
    pub players_per_group: usize,

    /// Rounds per game
    #[serde(default = "default_num_rounds")]
    pub num_rounds: u32,

    /// Endowment per participant per round, in whole points
    #[serde(default = "default_endowment")]
    pub endowment: u32,

    /// Share of the contribution pool paid to every member, in basis points
    #[serde(default = "default_efficiency_factor_bps")]
    pub efficiency_factor_bps: u32,

    /// Carry earnings forward across rounds
    #[serde(default = "default_true")]
    pub accumulate_earnings: bool,

    /// Punishment stage settings
    #[serde(default)]
    pub punishment: PunishmentConfig,

    /// When a group is considered failed
    #[serde(default)]
    pub quorum: QuorumPolicy,

    /// Which timeouts count as dropout
    #[serde(default)]
    pub dropout: DropoutPolicy,

    /// How the punishment condition is assigned to new groups
    #[serde(default)]
    pub treatment: TreatmentAssignment,

    /// Real-world payout conversion
    #[serde(default)]
    pub payout: PayoutConfig,

    /// Rounds shown in history tables
    #[serde(default = "default_recent_rounds")]
    pub recent_rounds_to_display: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            players_per_group: default_players_per_group(),
            num_rounds: default_num_rounds(),
            endowment: default_endowment(),
            efficiency_factor_bps: default_efficiency_factor_bps(),
            accumulate_earnings: true,
            punishment: PunishmentConfig::default(),
            quorum: QuorumPolicy::default(),
            dropout: DropoutPolicy::default(),
            treatment: TreatmentAssignment::default(),
            payout: PayoutConfig::default(),
            recent_rounds_to_display: default_recent_rounds(),
        }
    }
}

impl GameConfig {
    /// Endowment as an amount
    pub fn endowment_points(&self) -> Points {
        Points::from_points(i64::from(self.endowment))
    }

    /// Punishment price list
    pub fn schedule(&self) -> PunishmentSchedule {
        PunishmentSchedule::from_whole_points(&self.punishment.costs)
    }

    /// Whether a timeout in this phase turns the participant into a dropout
    pub fn timeout_is_dropout(&self, phase: Phase) -> bool {
        match phase {
            Phase::Contribution => self.dropout.contribution_timeout,
            Phase::Punishment => self.dropout.punishment_timeout,
        }
    }

    pub fn with_players_per_group(mut self, players: usize) -> Self {
        self.players_per_group = players;
        self
    }

    pub fn with_num_rounds(mut self, rounds: u32) -> Self {
        self.num_rounds = rounds;
        self
    }

    pub fn with_quorum(mut self, quorum: QuorumPolicy) -> Self {
        self.quorum = quorum;
        self
    }

    pub fn with_dropout(mut self, dropout: DropoutPolicy) -> Self {
        self.dropout = dropout;
        self
    }

    pub fn with_treatment(mut self, treatment: TreatmentAssignment) -> Self {
        self.treatment = treatment;
        self
    }

    pub fn with_accumulation(mut self, accumulate: bool) -> Self {
        self.accumulate_earnings = accumulate;
        self
    }

    /// Reject inconsistent settings
    pub fn validate(&self) -> EngineResult<()> {
        if self.players_per_group == 0 {
            return Err(invalid("players_per_group must be at least 1"));
        }
        if self.num_rounds == 0 {
            return Err(invalid("num_rounds must be at least 1"));
        }
        if self.recent_rounds_to_display == 0 {
            return Err(invalid("recent_rounds_to_display must be at least 1"));
        }

        // Whole-point pools must scale to whole minor units
        if (i64::from(self.efficiency_factor_bps) * Points::SCALE) % i64::from(BASIS_POINTS) != 0 {
            return Err(invalid(format!(
                "efficiency_factor_bps {} must be a multiple of {}",
                self.efficiency_factor_bps,
                i64::from(BASIS_POINTS) / Points::SCALE
            )));
        }

        let costs = &self.punishment.costs;
        if costs.is_empty() {
            return Err(invalid("punishment.costs must list at least level 0"));
        }
        if costs.len() > usize::from(u8::MAX) + 1 {
            return Err(invalid("punishment.costs supports at most 256 levels"));
        }
        if costs[0] != 0 {
            return Err(invalid("punishment level 0 must be free"));
        }
        if self.punishment.saturation_point == 0 {
            return Err(invalid("punishment.saturation_point must be positive"));
        }
        if self.punishment.budget_source == BudgetSource::AccumulatedEarnings
            && !self.accumulate_earnings
        {
            return Err(invalid(
                "punishment budget from accumulated earnings requires accumulate_earnings",
            ));
        }

        match &self.quorum {
            QuorumPolicy::MinParticipationFraction { fraction_bps, .. } => {
                if *fraction_bps > BASIS_POINTS {
                    return Err(invalid("quorum fraction_bps cannot exceed 10000"));
                }
            }
            QuorumPolicy::MinActivePlayers { min_active } => {
                if *min_active > self.players_per_group {
                    return Err(invalid(format!(
                        "quorum min_active {} exceeds players_per_group {}",
                        min_active, self.players_per_group
                    )));
                }
            }
        }

        if self.payout.minor_units_per_point < 0
            || self.payout.participation_fee_minor < 0
            || self.payout.min_payout_minor < 0
        {
            return Err(invalid("payout amounts cannot be negative"));
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::InvalidConfig(message.into())
}

/// Punishment stage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PunishmentConfig {
    /// Cost of each punishment level in whole points; index = level
    #[serde(default = "default_punishment_costs")]
    pub costs: Vec<u32>,

    /// Received punishment at which the payoff reduction reaches 100%
    #[serde(default = "default_saturation_point")]
    pub saturation_point: u32,

    /// What the total cost of an allocation is checked against
    #[serde(default)]
    pub budget_source: BudgetSource,
}

impl Default for PunishmentConfig {
    fn default() -> Self {
        Self {
            costs: default_punishment_costs(),
            saturation_point: default_saturation_point(),
            budget_source: BudgetSource::default(),
        }
    }
}

/// Budget a punishment allocation must fit into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BudgetSource {
    /// This round's gross profit
    GrossProfit,
    /// Earnings accumulated so far, including this round's gross profit
    #[default]
    AccumulatedEarnings,
}

/// When a group has lost too many members to continue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum QuorumPolicy {
    /// Fail when `remaining < round(group_size * fraction)`
    MinParticipationFraction {
        fraction_bps: u32,
        #[serde(default)]
        rounding: ThresholdRounding,
    },
    /// Fail when `inactive > group_size - min_active`
    MinActivePlayers { min_active: usize },
}

impl QuorumPolicy {
    pub fn fraction(fraction_bps: u32) -> Self {
        Self::MinParticipationFraction {
            fraction_bps,
            rounding: ThresholdRounding::default(),
        }
    }

    pub fn min_active(min_active: usize) -> Self {
        Self::MinActivePlayers { min_active }
    }
}

impl Default for QuorumPolicy {
    fn default() -> Self {
        Self::fraction(6_300)
    }
}

/// Rounding of the required active count under the fractional policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdRounding {
    #[default]
    Ceil,
    /// Round to nearest, ties to even
    Nearest,
}

/// Which timeouts deactivate a participant for the rest of the game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropoutPolicy {
    #[serde(default = "default_true")]
    pub contribution_timeout: bool,

    #[serde(default = "default_true")]
    pub punishment_timeout: bool,

    /// Timeouts on pages without a barrier (introduction, results)
    #[serde(default = "default_true")]
    pub page_inactivity: bool,
}

impl DropoutPolicy {
    /// Timeouts never deactivate anyone; a missed contribution counts as 0
    pub fn lenient() -> Self {
        Self {
            contribution_timeout: false,
            punishment_timeout: false,
            page_inactivity: false,
        }
    }
}

impl Default for DropoutPolicy {
    fn default() -> Self {
        Self {
            contribution_timeout: true,
            punishment_timeout: true,
            page_inactivity: true,
        }
    }
}

/// Assignment of the punishment condition to newly created groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TreatmentAssignment {
    /// First group with punishment, second without, and so on
    #[default]
    Alternating,
    AllPunishment,
    NoPunishment,
}

/// Conversion of final points into a real-world payout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutConfig {
    #[serde(default = "default_currency_code")]
    pub currency_code: String,

    /// Real-world minor units (e.g. cents) paid per whole point
    #[serde(default = "default_minor_units_per_point")]
    pub minor_units_per_point: i64,

    #[serde(default)]
    pub participation_fee_minor: i64,

    #[serde(default = "default_min_payout_minor")]
    pub min_payout_minor: i64,
}

impl Default for PayoutConfig {
    fn default() -> Self {
        Self {
            currency_code: default_currency_code(),
            minor_units_per_point: default_minor_units_per_point(),
            participation_fee_minor: 0,
            min_payout_minor: default_min_payout_minor(),
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_players_per_group() -> usize {
    3
}

fn default_num_rounds() -> u32 {
    7
}

fn default_endowment() -> u32 {
    20
}

fn default_efficiency_factor_bps() -> u32 {
    3_750
}

fn default_recent_rounds() -> usize {
    3
}

fn default_punishment_costs() -> Vec<u32> {
    crate::DEFAULT_PUNISHMENT_COSTS.to_vec()
}

fn default_saturation_point() -> u32 {
    10
}

fn default_currency_code() -> String {
    "USD".to_string()
}

fn default_minor_units_per_point() -> i64 {
    1
}

fn default_min_payout_minor() -> i64 {
    500
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GameConfig::default();
        assert_eq!(config.players_per_group, 3);
        assert_eq!(config.num_rounds, 7);
        assert_eq!(config.endowment_points(), Points::from_points(20));
        assert_eq!(config.schedule().max_level(), Some(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial_config() {
        let json = r#"{
            "players_per_group": 4,
            "quorum": { "policy": "min_active_players", "min_active": 2 },
            "dropout": { "contribution_timeout": false }
        }"#;
        let config: GameConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.players_per_group, 4);
        assert_eq!(config.num_rounds, 7);
        assert_eq!(config.quorum, QuorumPolicy::min_active(2));
        assert!(!config.dropout.contribution_timeout);
        assert!(config.dropout.punishment_timeout);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fractional_quorum_rounding_defaults_to_ceil() {
        let json = r#"{ "quorum": { "policy": "min_participation_fraction", "fraction_bps": 6300 } }"#;
        let config: GameConfig = serde_json::from_str(json).unwrap();
        assert_eq!(
            config.quorum,
            QuorumPolicy::MinParticipationFraction {
                fraction_bps: 6_300,
                rounding: ThresholdRounding::Ceil
            }
        );
    }

    #[test]
    fn test_validate_rejects_unrepresentable_efficiency_factor() {
        let mut config = GameConfig::default();
        config.efficiency_factor_bps = 3_755;
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));

        config.efficiency_factor_bps = 3_760;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_oversized_min_active() {
        let config = GameConfig::default().with_quorum(QuorumPolicy::min_active(5));
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_accumulated_budget_without_accumulation() {
        let config = GameConfig::default().with_accumulation(false);
        assert!(config.validate().is_err());

        let mut config = config;
        config.punishment.budget_source = BudgetSource::GrossProfit;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_paid_level_zero() {
        let mut config = GameConfig::default();
        config.punishment.costs = vec![1, 2];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeout_is_dropout() {
        let config = GameConfig::default().with_dropout(DropoutPolicy {
            contribution_timeout: false,
            punishment_timeout: true,
            page_inactivity: true,
        });
        assert!(!config.timeout_is_dropout(Phase::Contribution));
        assert!(config.timeout_is_dropout(Phase::Punishment));
    }
}
