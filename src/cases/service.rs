//! Case service
//!
//! This module ties the store, the mod log and the role reconciler together.
//! Deletion runs in a fixed order: drop the rendered entry, reconcile the
//! punitive role, remove the record, then close the numbering gap one case at
//! a time.

use crate::CASE_TARGET;
use crate::cases::{
    AuditLog, Case, CaseError, CaseLink, CaseLogEntry, CaseResult, CaseSettings,
    CaseStore, ExpiryCheckRequest, HistorySummary, InFlightSet, LogAuthor, MemberDirectory,
    NewCase, Reconciliation, RoleMutator, RoleReconciler, SettingsLookup, Target,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::sync::mpsc::Receiver;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{error, info, warn};

/// Everything the ledger talks to outside the process
pub trait Gateway: AuditLog + MemberDirectory + RoleMutator {}

impl<T: AuditLog + MemberDirectory + RoleMutator + ?Sized> Gateway for T {}

/// A case that moved during a renumbering walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Renumbered {
    pub id: u64,
    pub from: u64,
    pub to: u64,
}

/// Result of a case deletion
#[derive(Debug, Clone)]
pub struct DeletionReport {
    /// The record as it was before removal
    pub deleted: Case,
    pub roles: Reconciliation,
    pub renumbered: Vec<Renumbered>,
}

impl DeletionReport {
    /// Warning to show the moderator who deleted the case
    #[must_use]
    pub fn warning(&self) -> Option<&str> {
        self.roles.failure_message()
    }
}

/// Service for case ledger operations
#[derive(Clone, Default)]
pub struct CaseService {
    /// Store for case records
    pub store: CaseStore,
    reconciler: RoleReconciler,
    /// One gate per guild; serializes operations that assign or move numbers
    gates: Arc<DashMap<u64, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for CaseService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaseService")
            .field("store", &self.store)
            .field("in_flight", &self.reconciler.in_flight().len())
            .finish()
    }
}

impl CaseService {
    /// Create a service with an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::with_store(CaseStore::new())
    }

    /// Create a service over an existing store
    #[must_use]
    pub fn with_store(store: CaseStore) -> Self {
        Self {
            store,
            reconciler: RoleReconciler::new(InFlightSet::new()),
            gates: Arc::new(DashMap::new()),
        }
    }

    #[must_use]
    pub fn reconciler(&self) -> &RoleReconciler {
        &self.reconciler
    }

    fn gate(&self, guild_id: u64) -> Arc<Mutex<()>> {
        Arc::clone(self.gates.entry(guild_id).or_default().value())
    }

    /// Number, log and store a new case
    ///
    /// # Errors
    /// Returns a store error if the number could not be claimed. A failed mod
    /// log post is logged and the case is stored without a rendering.
    pub async fn create_case<A>(
        &self,
        audit: &A,
        new_case: NewCase,
        target: &Target,
        author: Option<LogAuthor>,
        settings: &CaseSettings,
    ) -> CaseResult<Case>
    where
        A: AuditLog + ?Sized,
    {
        let guild_id = new_case.guild_id;
        let gate = self.gate(guild_id);
        let _guard = gate.lock().await;

        let case_number = self.store.next_case_number(guild_id);

        let audit_message = if let Some(channel_id) = settings.mod_log_channel_id {
            let entry = CaseLogEntry {
                author,
                target: target.clone(),
                action: new_case.action,
                case_number,
                reason: new_case.reason.clone(),
                duration: new_case.duration,
                reference: self.link_for(guild_id, new_case.reference),
            };
            match audit.post_entry(channel_id, &entry).await {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!(
                        target: CASE_TARGET,
                        guild_id,
                        case_number,
                        error = %e,
                        "Failed to post mod log entry"
                    );
                    None
                }
            }
        } else {
            None
        };

        let case = self.store.create(case_number, new_case, audit_message)?;
        info!(
            target: CASE_TARGET,
            guild_id,
            case_number,
            action = %case.action,
            target_id = case.target_id,
            moderator_id = case.moderator_id,
            "Case created"
        );
        Ok(case)
    }

    fn link_for(&self, guild_id: u64, reference: Option<u64>) -> Option<CaseLink> {
        let referenced = self.store.find_by_number(guild_id, reference?)?;
        Some(CaseLink {
            case_number: referenced.case_number,
            guild_id,
            message: referenced.audit_message?,
        })
    }

    /// Get a case by number, waiting out any renumbering in the guild
    ///
    /// # Errors
    /// Returns `NotFound` if the guild has no such case.
    pub async fn get_case(&self, guild_id: u64, case_number: u64) -> CaseResult<Case> {
        let gate = self.gate(guild_id);
        let _guard = gate.lock().await;
        self.find_case(guild_id, case_number)
    }

    fn find_case(&self, guild_id: u64, case_number: u64) -> CaseResult<Case> {
        self.store
            .find_by_number(guild_id, case_number)
            .ok_or(CaseError::NotFound {
                guild_id,
                case_number,
            })
    }

    /// Delete a case and shift every later case down by one
    ///
    /// Set `keep_roles` to leave the punitive role on the member.
    ///
    /// # Errors
    /// Returns `NotFound` if there is no such case (nothing is changed), or a
    /// store error if the walk could not finish. Steps already applied stay
    /// applied; running [`Self::renumber`] again completes the walk.
    pub async fn delete_case<G>(
        &self,
        gateway: &G,
        guild_id: u64,
        case_number: u64,
        actor: &str,
        settings: &CaseSettings,
        keep_roles: bool,
    ) -> CaseResult<DeletionReport>
    where
        G: Gateway + ?Sized,
    {
        let gate = self.gate(guild_id);
        let _guard = gate.lock().await;

        let case = self.find_case(guild_id, case_number)?;

        if settings.mod_log_channel_id.is_some() {
            if let Some(message) = &case.audit_message {
                if let Err(e) = gateway.remove_entry(message).await {
                    warn!(
                        target: CASE_TARGET,
                        guild_id,
                        case_number,
                        error = %e,
                        "Failed to remove mod log entry"
                    );
                }
            }
        }

        let roles = if keep_roles {
            Reconciliation::NotApplicable
        } else {
            self.reconciler
                .reconcile_deleted(gateway, &case, actor, settings)
                .await
        };

        self.store.remove(case.id)?;
        info!(
            target: CASE_TARGET,
            guild_id,
            case_number,
            actor,
            "Case deleted"
        );

        let renumbered = self
            .renumber_locked(gateway, guild_id, case_number.saturating_sub(1), settings)
            .await?;

        Ok(DeletionReport {
            deleted: case,
            roles,
            renumbered,
        })
    }

    /// Make the guild's numbers above `after` dense again, starting at `after + 1`
    ///
    /// Cases already at the right number are left alone, so running this on a
    /// consistent range changes nothing.
    ///
    /// # Errors
    /// Returns a store error if a number could not be moved.
    pub async fn renumber<A>(
        &self,
        audit: &A,
        guild_id: u64,
        after: u64,
        settings: &CaseSettings,
    ) -> CaseResult<Vec<Renumbered>>
    where
        A: AuditLog + ?Sized,
    {
        let gate = self.gate(guild_id);
        let _guard = gate.lock().await;
        self.renumber_locked(audit, guild_id, after, settings).await
    }

    async fn renumber_locked<A>(
        &self,
        audit: &A,
        guild_id: u64,
        after: u64,
        settings: &CaseSettings,
    ) -> CaseResult<Vec<Renumbered>>
    where
        A: AuditLog + ?Sized,
    {
        let mut moved = Vec::new();
        let mut expected = after;

        for case in self.store.find_after(guild_id, after) {
            expected += 1;
            if case.case_number == expected {
                continue;
            }

            self.store.update_number(case.id, expected)?;
            moved.push(Renumbered {
                id: case.id,
                from: case.case_number,
                to: expected,
            });

            if settings.mod_log_channel_id.is_none() {
                continue;
            }
            if let Some(message) = &case.audit_message {
                if let Err(e) = audit.restamp_entry(message, expected).await {
                    warn!(
                        target: CASE_TARGET,
                        guild_id,
                        from = case.case_number,
                        to = expected,
                        error = %e,
                        "Failed to restamp mod log entry"
                    );
                }
            }
        }

        if !moved.is_empty() {
            info!(
                target: CASE_TARGET,
                guild_id,
                after,
                moved = moved.len(),
                "Cases renumbered"
            );
        }
        Ok(moved)
    }

    /// Summarize a member's cases in one guild
    pub async fn history(&self, guild_id: u64, target_id: u64) -> HistorySummary {
        let gate = self.gate(guild_id);
        let _guard = gate.lock().await;
        let cases: Vec<Case> = self
            .store
            .find_by_target(target_id)
            .into_iter()
            .filter(|case| case.guild_id == guild_id)
            .collect();
        HistorySummary::from_cases(&cases)
    }

    /// Copy of every case for persisting, ordered by internal id
    ///
    /// Each guild is read under its gate, so no guild is caught halfway
    /// through a renumbering walk.
    pub async fn snapshot(&self) -> Vec<Case> {
        let mut cases = Vec::new();
        for guild_id in self.store.guild_ids() {
            let gate = self.gate(guild_id);
            let _guard = gate.lock().await;
            cases.extend(self.store.find_after(guild_id, 0));
        }
        cases.sort_by_key(|case| case.id);
        cases
    }

    /// Take the mute role off every timed mute that ran out by `now`
    ///
    /// Returns how many cases were handled. Each case is handled once, whether
    /// or not the role could be removed.
    pub async fn process_expired<G, S>(&self, gateway: &G, settings: &S, now: DateTime<Utc>) -> usize
    where
        G: Gateway + ?Sized,
        S: SettingsLookup + ?Sized,
    {
        let mut handled = 0;

        for expired in self.store.find_expired_mutes(now) {
            let gate = self.gate(expired.guild_id);
            let _guard = gate.lock().await;

            // Deleted or handled while waiting on the gate
            let Some(case) = self.store.get(expired.id) else {
                continue;
            };
            if case.action_processed {
                continue;
            }

            let guild_settings = settings.case_settings(case.guild_id);
            let outcome = self
                .reconciler
                .reconcile_expired(gateway, &case, &guild_settings)
                .await;
            if let Some(message) = outcome.failure_message() {
                error!(
                    target: CASE_TARGET,
                    guild_id = case.guild_id,
                    case_number = case.case_number,
                    error = %message,
                    "Failed to lift expired mute"
                );
            }

            if let Err(e) = self.store.mark_processed(case.id) {
                warn!(target: CASE_TARGET, error = %e, "Failed to mark mute as processed");
                continue;
            }
            handled += 1;
        }

        handled
    }

    /// Spawn the periodic mute expiry task
    pub fn start_expiry_task<G, S>(
        self,
        gateway: Arc<G>,
        settings: S,
        rx: Receiver<ExpiryCheckRequest>,
        check_interval_seconds: u64,
    ) -> JoinHandle<()>
    where
        G: Gateway + 'static,
        S: SettingsLookup + 'static,
    {
        tokio::spawn(async move {
            self.expiry_task(gateway, settings, rx, check_interval_seconds)
                .await;
        })
    }

    async fn expiry_task<G, S>(
        &self,
        gateway: Arc<G>,
        settings: S,
        mut rx: Receiver<ExpiryCheckRequest>,
        check_interval_seconds: u64,
    ) where
        G: Gateway + 'static,
        S: SettingsLookup + 'static,
    {
        info!("Starting mute expiry task with {check_interval_seconds}s interval");

        let mut interval = tokio::time::interval(Duration::from_secs(check_interval_seconds.max(1)));

        loop {
            tokio::select! {
                request = rx.recv() => {
                    match request {
                        Some(ExpiryCheckRequest::CheckAll) => {
                            info!("Received request to check expired mutes");
                            self.process_expired(gateway.as_ref(), &settings, Utc::now()).await;
                        }
                        Some(ExpiryCheckRequest::Shutdown) | None => {
                            info!("Received shutdown request for mute expiry task");
                            break;
                        }
                    }
                }

                _ = interval.tick() => {
                    let handled = self.process_expired(gateway.as_ref(), &settings, Utc::now()).await;
                    if handled > 0 {
                        info!("Lifted {handled} expired mute(s)");
                    }
                }
            }
        }

        info!("Mute expiry task shut down");
    }
}
