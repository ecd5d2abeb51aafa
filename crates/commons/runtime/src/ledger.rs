//! Round Ledger - write-once record of settled rounds
//!
//! Rows are keyed by (group, participant, round). A round's rows are
//! committed together under one write lock, so readers see either the whole
//! round or none of it.

use commons_types::{
    EngineError, EngineResult, GroupId, ParticipantId, RoundNumber, SettledRow, SortOrder,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;
use tracing::debug;

/// Ledger key; ordered so that one participant's rounds are contiguous
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LedgerKey {
    pub group: GroupId,
    pub participant: ParticipantId,
    pub round: RoundNumber,
}

impl LedgerKey {
    pub fn new(group: GroupId, participant: ParticipantId, round: RoundNumber) -> Self {
        Self {
            group,
            participant,
            round,
        }
    }

    fn of(row: &SettledRow) -> Self {
        Self::new(row.group_id.clone(), row.participant_id.clone(), row.round)
    }
}

/// Append-only store of settled rows shared by all groups
pub struct RoundLedger {
    rows: RwLock<BTreeMap<LedgerKey, SettledRow>>,
}

impl RoundLedger {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
        }
    }

    /// Commit all rows of one round atomically.
    ///
    /// Fails with `LedgerConflict` without writing anything if any key is
    /// already present or repeated within the batch.
    pub fn commit_round(&self, rows: Vec<SettledRow>) -> EngineResult<()> {
        let mut stored = self.rows.write().map_err(|_| EngineError::LockPoisoned)?;

        let mut batch = BTreeSet::new();
        for row in &rows {
            let key = LedgerKey::of(row);
            if stored.contains_key(&key) || !batch.insert(key) {
                return Err(EngineError::LedgerConflict {
                    group: row.group_id.clone(),
                    round: row.round,
                    participant: row.participant_id.clone(),
                });
            }
        }

        let count = rows.len();
        for row in rows {
            stored.insert(LedgerKey::of(&row), row);
        }
        debug!(rows = count, "Round committed to ledger");
        Ok(())
    }

    pub fn get(
        &self,
        group: &GroupId,
        round: RoundNumber,
        participant: &ParticipantId,
    ) -> EngineResult<Option<SettledRow>> {
        let rows = self.rows.read().map_err(|_| EngineError::LockPoisoned)?;
        let key = LedgerKey::new(group.clone(), participant.clone(), round);
        Ok(rows.get(&key).cloned())
    }

    /// The participant's last `k` settled rounds in the requested order
    pub fn recent(
        &self,
        group: &GroupId,
        participant: &ParticipantId,
        k: usize,
        order: SortOrder,
    ) -> EngineResult<Vec<SettledRow>> {
        let rows = self.rows.read().map_err(|_| EngineError::LockPoisoned)?;

        let from = LedgerKey::new(group.clone(), participant.clone(), RoundNumber(0));
        let to = LedgerKey::new(group.clone(), participant.clone(), RoundNumber(u32::MAX));

        let mut recent: Vec<SettledRow> = rows
            .range(from..=to)
            .rev()
            .take(k)
            .map(|(_, row)| row.clone())
            .collect();

        if order == SortOrder::Ascending {
            recent.reverse();
        }
        Ok(recent)
    }

    /// All rows of one round of a group, in participant order
    pub fn round_rows(&self, group: &GroupId, round: RoundNumber) -> EngineResult<Vec<SettledRow>> {
        let rows = self.rows.read().map_err(|_| EngineError::LockPoisoned)?;
        Ok(rows
            .iter()
            .filter(|(key, _)| &key.group == group && key.round == round)
            .map(|(_, row)| row.clone())
            .collect())
    }

    pub fn len(&self) -> EngineResult<usize> {
        let rows = self.rows.read().map_err(|_| EngineError::LockPoisoned)?;
        Ok(rows.len())
    }

    pub fn is_empty(&self) -> EngineResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl Default for RoundLedger {
    fn default() -> Self {
        Self::new()
    }
}
