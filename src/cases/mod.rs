//! Case ledger
//!
//! Numbered moderation cases per guild, kept in step with the mod log channel
//! and with the punitive roles members hold.

mod action;
mod audit;
mod error;
mod history;
mod record;
mod roles;
mod service;
mod settings;
mod store;
mod target;

pub use action::{CaseAction, HistoryBucket, PunitiveRole};
pub use audit::{AuditLog, CaseLink, CaseLogEntry, LogAuthor, case_footer, format_duration};
pub use error::{CaseError, CaseResult};
pub use history::{HISTORY_COLORS, HistorySummary};
pub use record::{AuditMessageRef, Case, NewCase};
pub use roles::{
    InFlightKey, InFlightSet, MemberDirectory, Reconciliation, RoleDirection, RoleMutator,
    RoleReconciler,
};
pub use service::{CaseService, DeletionReport, Gateway, Renumbered};
pub use settings::{CaseSettings, RestrictionRoles, SettingsLookup};
pub use store::CaseStore;
pub use target::{Profile, Target};

/// Request type for the mute expiry task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryCheckRequest {
    /// Check every case for an expired mute now
    CheckAll,
    /// Shutdown the expiry task
    Shutdown,
}
