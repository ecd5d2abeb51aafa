//! Treatment assignment for new groups

use commons_types::TreatmentAssignment;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Decides whether a newly created group plays with punishment
pub struct TreatmentAssigner {
    assignment: TreatmentAssignment,
    created: AtomicUsize,
}

impl TreatmentAssigner {
    pub fn new(assignment: TreatmentAssignment) -> Self {
        Self {
            assignment,
            created: AtomicUsize::new(0),
        }
    }

    /// Treatment for the next group; an explicit choice takes precedence
    /// and does not advance the alternation
    pub fn assign(&self, explicit: Option<bool>) -> bool {
        if let Some(enabled) = explicit {
            return enabled;
        }
        match self.assignment {
            TreatmentAssignment::AllPunishment => true,
            TreatmentAssignment::NoPunishment => false,
            TreatmentAssignment::Alternating => {
                self.created.fetch_add(1, Ordering::Relaxed) % 2 == 0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alternating_starts_with_punishment() {
        let assigner = TreatmentAssigner::new(TreatmentAssignment::Alternating);
        let seq: Vec<bool> = (0..4).map(|_| assigner.assign(None)).collect();
        assert_eq!(seq, vec![true, false, true, false]);
    }

    #[test]
    fn test_explicit_override_keeps_alternation() {
        let assigner = TreatmentAssigner::new(TreatmentAssignment::Alternating);
        assert!(assigner.assign(None));
        assert!(assigner.assign(Some(true)));
        assert!(!assigner.assign(None));
    }

    #[test]
    fn test_fixed_treatments() {
        assert!(TreatmentAssigner::new(TreatmentAssignment::AllPunishment).assign(None));
        assert!(!TreatmentAssigner::new(TreatmentAssignment::NoPunishment).assign(None));
        assert!(TreatmentAssigner::new(TreatmentAssignment::NoPunishment).assign(Some(true)));
    }
}
