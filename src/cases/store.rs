//! Case store
//!
//! This module provides the guild-scoped collection of case records. Case
//! numbers are indexed per guild so that a number can only be held by one
//! record at a time.

use crate::cases::{AuditMessageRef, Case, CaseError, CaseResult, NewCase};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Store for case records
#[derive(Clone)]
pub struct CaseStore {
    /// Records keyed by internal id
    records: Arc<DashMap<u64, Case>>,
    /// (guild, case number) -> internal id
    numbers: Arc<DashMap<(u64, u64), u64>>,
    next_id: Arc<AtomicU64>,
}

impl Default for CaseStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CaseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaseStore")
            .field("records", &self.records.len())
            .field("next_id", &self.next_id.load(Ordering::SeqCst))
            .finish()
    }
}

impl CaseStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            numbers: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Rebuild a store from persisted records
    ///
    /// # Errors
    /// Returns `DuplicateCaseNumber` if two records share a number in one guild.
    pub fn from_cases(cases: Vec<Case>) -> CaseResult<Self> {
        let store = Self::new();
        let mut max_id = 0;

        for case in cases {
            match store.numbers.entry((case.guild_id, case.case_number)) {
                Entry::Occupied(_) => {
                    return Err(CaseError::DuplicateCaseNumber {
                        guild_id: case.guild_id,
                        case_number: case.case_number,
                    });
                }
                Entry::Vacant(slot) => {
                    slot.insert(case.id);
                }
            }
            max_id = max_id.max(case.id);
            store.records.insert(case.id, case);
        }

        store.next_id.store(max_id + 1, Ordering::SeqCst);
        Ok(store)
    }

    /// Insert a new case under the given number
    ///
    /// # Errors
    /// Returns `DuplicateCaseNumber` if the number is already taken in the guild.
    pub fn create(
        &self,
        case_number: u64,
        new_case: NewCase,
        audit_message: Option<AuditMessageRef>,
    ) -> CaseResult<Case> {
        let guild_id = new_case.guild_id;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        match self.numbers.entry((guild_id, case_number)) {
            Entry::Occupied(_) => {
                return Err(CaseError::DuplicateCaseNumber {
                    guild_id,
                    case_number,
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let case = Case::from_new(id, case_number, new_case, audit_message);
        self.records.insert(id, case.clone());
        Ok(case)
    }

    /// Get a case by internal id
    #[must_use]
    pub fn get(&self, id: u64) -> Option<Case> {
        self.records.get(&id).map(|entry| entry.value().clone())
    }

    /// Get a case by its guild-visible number
    #[must_use]
    pub fn find_by_number(&self, guild_id: u64, case_number: u64) -> Option<Case> {
        let id = *self.numbers.get(&(guild_id, case_number))?;
        self.records.get(&id).map(|entry| entry.value().clone())
    }

    /// Snapshot of every case in the guild numbered above `case_number`, ascending
    #[must_use]
    pub fn find_after(&self, guild_id: u64, case_number: u64) -> Vec<Case> {
        let mut cases: Vec<Case> = self
            .records
            .iter()
            .filter_map(|entry| {
                let case = entry.value();
                if case.guild_id == guild_id && case.case_number > case_number {
                    Some(case.clone())
                } else {
                    None
                }
            })
            .collect();
        cases.sort_by_key(|case| (case.case_number, case.id));
        cases
    }

    /// Move a record to a new number
    ///
    /// # Errors
    /// Returns `UnknownRecord` for an unknown id, or `DuplicateCaseNumber`
    /// if another record holds the new number.
    pub fn update_number(&self, id: u64, new_number: u64) -> CaseResult<()> {
        let mut record = self
            .records
            .get_mut(&id)
            .ok_or(CaseError::UnknownRecord(id))?;

        let guild_id = record.guild_id;
        let old_number = record.case_number;
        if old_number == new_number {
            return Ok(());
        }

        match self.numbers.entry((guild_id, new_number)) {
            Entry::Occupied(holder) if *holder.get() != id => {
                return Err(CaseError::DuplicateCaseNumber {
                    guild_id,
                    case_number: new_number,
                });
            }
            Entry::Occupied(_) => {}
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }
        self.numbers
            .remove_if(&(guild_id, old_number), |_, holder| *holder == id);

        record.case_number = new_number;
        Ok(())
    }

    /// All cases about a user, across guilds, in no particular order
    #[must_use]
    pub fn find_by_target(&self, target_id: u64) -> Vec<Case> {
        self.records
            .iter()
            .filter_map(|entry| {
                let case = entry.value();
                if case.target_id == target_id {
                    Some(case.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    /// Remove a record for good
    ///
    /// # Errors
    /// Returns `UnknownRecord` if the id is not stored.
    pub fn remove(&self, id: u64) -> CaseResult<Case> {
        let (_, case) = self
            .records
            .remove(&id)
            .ok_or(CaseError::UnknownRecord(id))?;
        self.numbers
            .remove_if(&(case.guild_id, case.case_number), |_, holder| *holder == id);
        Ok(case)
    }

    /// Number the next case in the guild should get
    #[must_use]
    pub fn next_case_number(&self, guild_id: u64) -> u64 {
        self.records
            .iter()
            .filter(|entry| entry.value().guild_id == guild_id)
            .map(|entry| entry.value().case_number)
            .max()
            .map_or(1, |max| max + 1)
    }

    /// Timed mutes that have run out but still hold their role
    #[must_use]
    pub fn find_expired_mutes(&self, now: DateTime<Utc>) -> Vec<Case> {
        let mut cases: Vec<Case> = self
            .records
            .iter()
            .filter_map(|entry| {
                let case = entry.value();
                if case.is_due_for_expiry(now) {
                    Some(case.clone())
                } else {
                    None
                }
            })
            .collect();
        cases.sort_by_key(|case| case.id);
        cases
    }

    /// Flag a case's timed side effect as handled
    ///
    /// # Errors
    /// Returns `UnknownRecord` if the id is not stored.
    pub fn mark_processed(&self, id: u64) -> CaseResult<()> {
        let mut record = self
            .records
            .get_mut(&id)
            .ok_or(CaseError::UnknownRecord(id))?;
        record.action_processed = true;
        Ok(())
    }

    /// Guilds with at least one case, ascending
    #[must_use]
    pub fn guild_ids(&self) -> Vec<u64> {
        let mut guild_ids: Vec<u64> = self
            .records
            .iter()
            .map(|entry| entry.value().guild_id)
            .collect();
        guild_ids.sort_unstable();
        guild_ids.dedup();
        guild_ids
    }

    /// Every record, ordered by internal id
    #[must_use]
    pub fn snapshot(&self) -> Vec<Case> {
        let mut cases: Vec<Case> = self.records.iter().map(|e| e.value().clone()).collect();
        cases.sort_by_key(|case| case.id);
        cases
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
