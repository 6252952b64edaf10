//! Case records
//!
//! This module defines the persisted case record and the request used to
//! create one.

use crate::cases::{CaseAction, Target};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Location of the rendered mod log entry for a case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuditMessageRef {
    pub channel_id: u64,
    pub message_id: u64,
}

/// A moderation case as stored in the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    /// Internal identity, assigned by the store and never shown
    pub id: u64,
    /// Guild the case belongs to
    pub guild_id: u64,
    /// Number shown to moderators, dense within the guild
    pub case_number: u64,
    /// Rendered mod log entry, if one was posted
    pub audit_message: Option<AuditMessageRef>,
    pub target_id: u64,
    pub target_tag: String,
    pub moderator_id: u64,
    pub moderator_tag: String,
    pub action: CaseAction,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    /// Length in seconds, only meaningful for mutes
    pub duration: Option<u64>,
    /// Case number of an earlier related case
    #[serde(default)]
    pub reference: Option<u64>,
    /// Whether the timed side effect (mute expiry) has been handled
    #[serde(default = "processed_default")]
    pub action_processed: bool,
}

fn processed_default() -> bool {
    true
}

/// Everything the caller knows about a case before the ledger numbers it
#[derive(Debug, Clone)]
pub struct NewCase {
    pub guild_id: u64,
    pub target_id: u64,
    pub target_tag: String,
    pub moderator_id: u64,
    pub moderator_tag: String,
    pub action: CaseAction,
    pub reason: String,
    pub duration: Option<u64>,
    pub reference: Option<u64>,
}

impl NewCase {
    /// Create a request without duration or reference
    pub fn new(
        guild_id: u64,
        target_id: u64,
        target_tag: impl Into<String>,
        moderator_id: u64,
        moderator_tag: impl Into<String>,
        action: CaseAction,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            guild_id,
            target_id,
            target_tag: target_tag.into(),
            moderator_id,
            moderator_tag: moderator_tag.into(),
            action,
            reason: reason.into(),
            duration: None,
            reference: None,
        }
    }

    /// Request for an action against `target`
    pub fn against(
        guild_id: u64,
        target: &Target,
        moderator_id: u64,
        moderator_tag: impl Into<String>,
        action: CaseAction,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(
            guild_id,
            target.id(),
            target.display_name(),
            moderator_id,
            moderator_tag,
            action,
            reason,
        )
    }

    #[must_use]
    pub fn with_duration(mut self, seconds: u64) -> Self {
        self.duration = Some(seconds);
        self
    }

    #[must_use]
    pub fn with_reference(mut self, case_number: u64) -> Self {
        self.reference = Some(case_number);
        self
    }
}

impl Case {
    /// Build the stored record for a numbered request
    pub(crate) fn from_new(
        id: u64,
        case_number: u64,
        new_case: NewCase,
        audit_message: Option<AuditMessageRef>,
    ) -> Self {
        let times_out = new_case.action == CaseAction::Mute
            && new_case.duration.is_some_and(|secs| secs > 0);

        Self {
            id,
            guild_id: new_case.guild_id,
            case_number,
            audit_message,
            target_id: new_case.target_id,
            target_tag: new_case.target_tag,
            moderator_id: new_case.moderator_id,
            moderator_tag: new_case.moderator_tag,
            action: new_case.action,
            reason: new_case.reason,
            created_at: Utc::now(),
            duration: new_case.duration,
            reference: new_case.reference,
            action_processed: !times_out,
        }
    }

    /// When a timed mute runs out
    ///
    /// A length too large to represent never runs out.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        if self.action != CaseAction::Mute {
            return None;
        }
        let secs = i64::try_from(self.duration?).ok().filter(|secs| *secs > 0)?;
        self.created_at
            .checked_add_signed(TimeDelta::try_seconds(secs)?)
    }

    /// Check if this mute has run out and still needs its role removed
    #[must_use]
    pub fn is_due_for_expiry(&self, now: DateTime<Utc>) -> bool {
        !self.action_processed && self.expires_at().is_some_and(|at| at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mute(duration: Option<u64>) -> NewCase {
        let new_case = NewCase::new(1, 2, "target#0001", 3, "mod#0001", CaseAction::Mute, "spam");
        match duration {
            Some(secs) => new_case.with_duration(secs),
            None => new_case,
        }
    }

    #[test]
    fn test_timed_mute_needs_processing() {
        let case = Case::from_new(1, 1, mute(Some(600)), None);
        assert!(!case.action_processed);
        assert!(case.expires_at().is_some());
        assert!(!case.is_due_for_expiry(Utc::now()));
        assert!(case.is_due_for_expiry(Utc::now() + TimeDelta::seconds(601)));
    }

    #[test]
    fn test_untimed_cases_never_expire() {
        let case = Case::from_new(1, 1, mute(None), None);
        assert!(case.action_processed);
        assert!(case.expires_at().is_none());

        let warn = NewCase::new(1, 2, "t", 3, "m", CaseAction::Warn, "rude").with_duration(60);
        let case = Case::from_new(2, 2, warn, None);
        assert!(case.expires_at().is_none());
        assert!(!case.is_due_for_expiry(Utc::now() + TimeDelta::days(1)));
    }

    #[test]
    fn test_huge_mute_never_expires() {
        // Past what a timestamp can hold
        let case = Case::from_new(1, 1, mute(Some(60_000_000_000_000)), None);
        assert!(!case.action_processed);
        assert!(case.expires_at().is_none());
        assert!(!case.is_due_for_expiry(Utc::now()));

        // Past what a time delta can hold
        let case = Case::from_new(2, 2, mute(Some(u64::MAX / 2)), None);
        assert!(case.expires_at().is_none());
        assert!(!case.is_due_for_expiry(DateTime::<Utc>::MAX_UTC));
    }

    #[test]
    fn test_case_serialization() {
        let case = Case::from_new(
            9,
            4,
            mute(Some(60)).with_reference(2),
            Some(AuditMessageRef {
                channel_id: 10,
                message_id: 11,
            }),
        );

        let yaml = serde_yaml::to_string(&case).expect("Failed to serialize");
        assert!(yaml.contains("case_number: 4"));
        assert!(yaml.contains("action: 5"));
        assert!(yaml.contains("message_id: 11"));

        let back: Case = serde_yaml::from_str(&yaml).expect("Failed to deserialize");
        assert_eq!(back, case);
    }
}
