//! Quorum monitor: group failure latch
//!
//! Counts dropouts and trips a one-way `failed` latch once the group has too
//! few active members left to continue.

use commons_types::{QuorumPolicy, ThresholdRounding, BASIS_POINTS};
use tracing::{debug, warn};

/// Outcome of registering a dropout
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuorumVerdict {
    /// Group still has enough active members
    Healthy { remaining_active: usize },
    /// This dropout tripped the latch
    Failed { inactive_count: usize },
    /// The group had already failed; nothing changed
    AlreadyFailed,
}

/// Tracks inactive members of one group
#[derive(Clone, Debug)]
pub struct QuorumMonitor {
    group_size: usize,
    required_active: usize,
    inactive_count: usize,
    failed: bool,
}

impl QuorumMonitor {
    pub fn new(policy: QuorumPolicy, group_size: usize) -> Self {
        let required_active = required_active(&policy, group_size);
        Self {
            group_size,
            required_active,
            inactive_count: 0,
            failed: false,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn inactive_count(&self) -> usize {
        self.inactive_count
    }

    pub fn remaining_active(&self) -> usize {
        self.group_size.saturating_sub(self.inactive_count)
    }

    /// Fewest active members the group may keep without failing
    pub fn required_active(&self) -> usize {
        self.required_active
    }

    /// Inactive count at which the group fails
    pub fn failure_threshold(&self) -> usize {
        (self.group_size + 1).saturating_sub(self.required_active)
    }

    /// Register one previously-active member becoming inactive
    pub fn on_dropout(&mut self) -> QuorumVerdict {
        if self.failed {
            return QuorumVerdict::AlreadyFailed;
        }

        self.inactive_count = (self.inactive_count + 1).min(self.group_size);
        let remaining_active = self.remaining_active();

        // Same as remaining_active < required_active
        if self.inactive_count >= self.failure_threshold() {
            self.failed = true;
            warn!(
                inactive = self.inactive_count,
                remaining = remaining_active,
                required = self.required_active(),
                "Group fell below quorum"
            );
            QuorumVerdict::Failed {
                inactive_count: self.inactive_count,
            }
        } else {
            debug!(
                inactive = self.inactive_count,
                remaining = remaining_active,
                "Dropout registered"
            );
            QuorumVerdict::Healthy { remaining_active }
        }
    }
}

/// Active members a group of `group_size` must keep under `policy`
pub fn required_active(policy: &QuorumPolicy, group_size: usize) -> usize {
    match policy {
        QuorumPolicy::MinActivePlayers { min_active } => *min_active,
        QuorumPolicy::MinParticipationFraction {
            fraction_bps,
            rounding,
        } => {
            let scaled = group_size as u64 * u64::from(*fraction_bps);
            let denom = u64::from(BASIS_POINTS);
            let whole = scaled / denom;
            let rem = scaled % denom;
            let rounded = match rounding {
                ThresholdRounding::Ceil => {
                    if rem > 0 {
                        whole + 1
                    } else {
                        whole
                    }
                }
                ThresholdRounding::Nearest => {
                    let half = denom / 2;
                    if rem > half || (rem == half && whole % 2 == 1) {
                        whole + 1
                    } else {
                        whole
                    }
                }
            };
            rounded as usize
        }
    }
}
