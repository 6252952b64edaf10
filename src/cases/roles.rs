//! Punitive role reconciliation
//!
//! When a case is deleted or a timed mute runs out, the role backing it has to
//! come off the member. Role changes made here show up again as member update
//! events; the in-flight set lets the event handler tell those apart from
//! changes made by hand.

use crate::CASE_TARGET;
use crate::cases::{Case, CaseAction, CaseResult, CaseSettings, PunitiveRole, Target};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Lookup of guild members
#[async_trait::async_trait]
pub trait MemberDirectory: Send + Sync {
    async fn fetch_member(&self, guild_id: u64, user_id: u64) -> CaseResult<Target>;
}

/// Grants and revokes roles, leaving a reason in the guild's audit log
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RoleMutator: Send + Sync {
    async fn revoke_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        reason: &str,
    ) -> CaseResult<()>;

    async fn grant_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        reason: &str,
    ) -> CaseResult<()>;
}

/// Which way a role change goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleDirection {
    Grant,
    Revoke,
}

/// Marker for a role change the bot started and has not yet seen echoed back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InFlightKey {
    pub guild_id: u64,
    pub user_id: u64,
    pub role: PunitiveRole,
    pub direction: RoleDirection,
}

impl InFlightKey {
    #[must_use]
    pub fn new(guild_id: u64, user_id: u64, role: PunitiveRole, direction: RoleDirection) -> Self {
        Self {
            guild_id,
            user_id,
            role,
            direction,
        }
    }

    #[must_use]
    pub fn grant(guild_id: u64, user_id: u64, role: PunitiveRole) -> Self {
        Self::new(guild_id, user_id, role, RoleDirection::Grant)
    }

    #[must_use]
    pub fn revoke(guild_id: u64, user_id: u64, role: PunitiveRole) -> Self {
        Self::new(guild_id, user_id, role, RoleDirection::Revoke)
    }
}

/// How long a marker waits for its echo before it stops counting
pub const IN_FLIGHT_TTL: Duration = Duration::from_secs(30);

/// Thread-safe set of in-flight role changes
///
/// Markers older than the set's time to live are stale: observing one still
/// consumes it but does not count as the bot's own change.
#[derive(Debug, Clone)]
pub struct InFlightSet {
    keys: Arc<DashMap<InFlightKey, Instant>>,
    ttl: Duration,
}

impl Default for InFlightSet {
    fn default() -> Self {
        Self::with_ttl(IN_FLIGHT_TTL)
    }
}

impl InFlightSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            keys: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Returns false if the key was already marked; the mark is refreshed
    /// either way and stale markers are dropped
    pub fn mark(&self, key: InFlightKey) -> bool {
        self.keys.retain(|_, marked| marked.elapsed() < self.ttl);
        self.keys.insert(key, Instant::now()).is_none()
    }

    /// Returns true if the key was marked
    pub fn release(&self, key: &InFlightKey) -> bool {
        self.keys.remove(key).is_some()
    }

    /// Remove the key; true only if it was marked within the time to live
    pub fn take_fresh(&self, key: &InFlightKey) -> bool {
        self.keys
            .remove(key)
            .is_some_and(|(_, marked)| marked.elapsed() < self.ttl)
    }

    #[must_use]
    pub fn contains(&self, key: &InFlightKey) -> bool {
        self.keys.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// What happened to the punitive role of a case
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// The action is not backed by a role
    NotApplicable,
    /// The guild has no role configured for this action
    RoleNotConfigured(PunitiveRole),
    /// The member could not be fetched, nothing to revoke
    MemberUnavailable,
    /// The timed mute already ran out and its role was handled then
    AlreadyLifted,
    Revoked { role: PunitiveRole, role_id: u64 },
    /// The revoke was rejected; the message is meant for the invoking moderator
    Failed { role: PunitiveRole, message: String },
}

impl Reconciliation {
    /// Message for the moderator, if there is one
    #[must_use]
    pub fn failure_message(&self) -> Option<&str> {
        match self {
            Self::Failed { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Engine that takes punitive roles off members
#[derive(Debug, Clone, Default)]
pub struct RoleReconciler {
    in_flight: InFlightSet,
}

impl RoleReconciler {
    #[must_use]
    pub fn new(in_flight: InFlightSet) -> Self {
        Self { in_flight }
    }

    #[must_use]
    pub fn in_flight(&self) -> &InFlightSet {
        &self.in_flight
    }

    /// Revoke the role backing a case that is being deleted
    pub async fn reconcile_deleted<G>(
        &self,
        gateway: &G,
        case: &Case,
        actor: &str,
        settings: &CaseSettings,
    ) -> Reconciliation
    where
        G: MemberDirectory + RoleMutator + ?Sized,
    {
        let Some(role) = case.action.punitive_role() else {
            return Reconciliation::NotApplicable;
        };
        if case.action == CaseAction::Mute
            && case.action_processed
            && case.duration.is_some_and(|secs| secs > 0)
        {
            return Reconciliation::AlreadyLifted;
        }
        let Some(role_id) = settings.role_for(role) else {
            return Reconciliation::RoleNotConfigured(role);
        };

        let reason = format!(
            "{} removed by {actor} | Removed Case #{}",
            role.title(),
            case.case_number
        );
        self.revoke(gateway, case, role, role_id, &reason).await
    }

    /// Revoke the mute role of a timed mute that ran out
    pub async fn reconcile_expired<G>(
        &self,
        gateway: &G,
        case: &Case,
        settings: &CaseSettings,
    ) -> Reconciliation
    where
        G: MemberDirectory + RoleMutator + ?Sized,
    {
        let Some(role_id) = settings.mute_role_id else {
            return Reconciliation::RoleNotConfigured(PunitiveRole::Mute);
        };

        let reason = format!("Mute expired | Case #{}", case.case_number);
        self.revoke(gateway, case, PunitiveRole::Mute, role_id, &reason)
            .await
    }

    async fn revoke<G>(
        &self,
        gateway: &G,
        case: &Case,
        role: PunitiveRole,
        role_id: u64,
        reason: &str,
    ) -> Reconciliation
    where
        G: MemberDirectory + RoleMutator + ?Sized,
    {
        let (guild_id, user_id) = (case.guild_id, case.target_id);

        // Only mutes echo back into a new case, so only they are tracked
        let key = InFlightKey::revoke(guild_id, user_id, role);
        let tracked = role == PunitiveRole::Mute;
        if tracked {
            self.in_flight.mark(key);
        }

        if let Err(e) = gateway.fetch_member(guild_id, user_id).await {
            if tracked {
                self.in_flight.release(&key);
            }
            debug!(
                target: CASE_TARGET,
                guild_id,
                user_id,
                error = %e,
                "Member unavailable, skipping {role} removal"
            );
            return Reconciliation::MemberUnavailable;
        }

        match gateway.revoke_role(guild_id, user_id, role_id, reason).await {
            Ok(()) => {
                info!(
                    target: CASE_TARGET,
                    guild_id,
                    user_id,
                    role_id,
                    case_number = case.case_number,
                    "Removed {role} role"
                );
                Reconciliation::Revoked { role, role_id }
            }
            Err(e) => {
                if tracked {
                    self.in_flight.release(&key);
                }
                warn!(
                    target: CASE_TARGET,
                    guild_id,
                    user_id,
                    role_id,
                    error = %e,
                    "Failed to remove {role} role"
                );
                Reconciliation::Failed {
                    role,
                    message: format!(
                        "there was an error removing the {role} on this member: `{e}`"
                    ),
                }
            }
        }
    }

    /// Give a member a punitive role, marking it so the echo is ignored
    ///
    /// # Errors
    /// Returns the role holder's error; the marker is cleared first.
    pub async fn grant<R>(
        &self,
        roles: &R,
        key: InFlightKey,
        role_id: u64,
        reason: &str,
    ) -> CaseResult<()>
    where
        R: RoleMutator + ?Sized,
    {
        self.in_flight.mark(key);
        if let Err(e) = roles
            .grant_role(key.guild_id, key.user_id, role_id, reason)
            .await
        {
            self.in_flight.release(&key);
            return Err(e);
        }
        Ok(())
    }

    /// Consume the marker for an observed role change; true if the bot made it
    pub fn observe_role_change(&self, key: &InFlightKey) -> bool {
        self.in_flight.take_fresh(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cases::{CaseError, NewCase, Profile, RestrictionRoles};

    mockall::mock! {
        pub Gateway {}

        #[async_trait::async_trait]
        impl MemberDirectory for Gateway {
            async fn fetch_member(&self, guild_id: u64, user_id: u64) -> CaseResult<Target>;
        }

        #[async_trait::async_trait]
        impl RoleMutator for Gateway {
            async fn revoke_role(
                &self,
                guild_id: u64,
                user_id: u64,
                role_id: u64,
                reason: &str,
            ) -> CaseResult<()>;

            async fn grant_role(
                &self,
                guild_id: u64,
                user_id: u64,
                role_id: u64,
                reason: &str,
            ) -> CaseResult<()>;
        }
    }

    const GUILD: u64 = 100;
    const TARGET: u64 = 42;
    const MUTE_ROLE: u64 = 500;
    const EMBED_ROLE: u64 = 501;

    fn settings() -> CaseSettings {
        CaseSettings {
            mod_log_channel_id: None,
            mute_role_id: Some(MUTE_ROLE),
            restriction_roles: RestrictionRoles {
                embed: Some(EMBED_ROLE),
                emoji: None,
                reaction: None,
            },
        }
    }

    fn case(action: CaseAction) -> Case {
        let new_case = NewCase::new(GUILD, TARGET, "target#0001", 1, "mod#0001", action, "r");
        Case::from_new(1, 3, new_case, None)
    }

    fn member() -> Target {
        Target::Member {
            guild_id: GUILD,
            profile: Profile {
                id: TARGET,
                tag: "target#0001".to_string(),
                avatar_url: String::new(),
            },
        }
    }

    fn mute_key() -> InFlightKey {
        InFlightKey::revoke(GUILD, TARGET, PunitiveRole::Mute)
    }

    fn grant_key() -> InFlightKey {
        InFlightKey::grant(GUILD, TARGET, PunitiveRole::Mute)
    }

    #[tokio::test]
    async fn test_mute_revoke_keeps_marker_on_success() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_fetch_member()
            .returning(|_, _| Ok(member()));
        gateway
            .expect_revoke_role()
            .withf(|guild, user, role, reason| {
                *guild == GUILD
                    && *user == TARGET
                    && *role == MUTE_ROLE
                    && reason == "Mute removed by mod#0001 | Removed Case #3"
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let reconciler = RoleReconciler::default();
        let outcome = reconciler
            .reconcile_deleted(&gateway, &case(CaseAction::Mute), "mod#0001", &settings())
            .await;

        assert_eq!(
            outcome,
            Reconciliation::Revoked {
                role: PunitiveRole::Mute,
                role_id: MUTE_ROLE
            }
        );
        assert!(reconciler.in_flight().contains(&mute_key()));

        // The member update echo clears it
        assert!(reconciler.observe_role_change(&mute_key()));
        assert!(reconciler.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_mute_revoke_failure_clears_marker_and_reports() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_fetch_member()
            .returning(|_, _| Ok(member()));
        gateway
            .expect_revoke_role()
            .returning(|_, _, _, _| Err(CaseError::ExternalSync("Missing Permissions".into())));

        let reconciler = RoleReconciler::default();
        let outcome = reconciler
            .reconcile_deleted(&gateway, &case(CaseAction::Mute), "mod#0001", &settings())
            .await;

        assert_eq!(
            outcome.failure_message(),
            Some(
                "there was an error removing the mute on this member: \
                 `External sync failed: Missing Permissions`"
            )
        );
        assert!(!reconciler.in_flight().contains(&mute_key()));
    }

    #[tokio::test]
    async fn test_member_fetch_failure_is_silent() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_fetch_member()
            .returning(|_, _| Err(CaseError::ExternalSync("Unknown Member".into())));
        gateway.expect_revoke_role().never();

        let reconciler = RoleReconciler::default();
        let outcome = reconciler
            .reconcile_deleted(&gateway, &case(CaseAction::Mute), "mod#0001", &settings())
            .await;

        assert_eq!(outcome, Reconciliation::MemberUnavailable);
        assert!(outcome.failure_message().is_none());
        assert!(reconciler.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_restriction_revoke_is_not_tracked() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_fetch_member()
            .returning(|_, _| Ok(member()));
        gateway
            .expect_revoke_role()
            .withf(|_, _, role, reason| {
                *role == EMBED_ROLE
                    && reason == "Embed restriction removed by mod#0001 | Removed Case #3"
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let reconciler = RoleReconciler::default();
        let outcome = reconciler
            .reconcile_deleted(
                &gateway,
                &case(CaseAction::EmbedRestriction),
                "mod#0001",
                &settings(),
            )
            .await;

        assert!(matches!(outcome, Reconciliation::Revoked { .. }));
        assert!(reconciler.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_restriction_failure_reports_kind() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_fetch_member()
            .returning(|_, _| Ok(member()));
        gateway
            .expect_revoke_role()
            .returning(|_, _, _, _| Err(CaseError::ExternalSync("Unknown Role".into())));

        let reconciler = RoleReconciler::default();
        let outcome = reconciler
            .reconcile_deleted(
                &gateway,
                &case(CaseAction::EmbedRestriction),
                "mod#0001",
                &settings(),
            )
            .await;

        let message = outcome.failure_message().unwrap();
        assert!(message.starts_with("there was an error removing the embed restriction"));
    }

    #[tokio::test]
    async fn test_unconfigured_and_unbacked_actions_are_noops() {
        let mut gateway = MockGateway::new();
        gateway.expect_fetch_member().never();
        gateway.expect_revoke_role().never();

        let reconciler = RoleReconciler::default();
        let outcome = reconciler
            .reconcile_deleted(
                &gateway,
                &case(CaseAction::EmojiRestriction),
                "mod#0001",
                &settings(),
            )
            .await;
        assert_eq!(
            outcome,
            Reconciliation::RoleNotConfigured(PunitiveRole::Emoji)
        );

        for action in [CaseAction::Ban, CaseAction::Warn, CaseAction::Restriction] {
            let outcome = reconciler
                .reconcile_deleted(&gateway, &case(action), "mod#0001", &settings())
                .await;
            assert_eq!(outcome, Reconciliation::NotApplicable);
        }
    }

    #[tokio::test]
    async fn test_expired_mute_reason() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_fetch_member()
            .returning(|_, _| Ok(member()));
        gateway
            .expect_revoke_role()
            .withf(|_, _, _, reason| reason == "Mute expired | Case #3")
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let reconciler = RoleReconciler::default();
        let outcome = reconciler
            .reconcile_expired(&gateway, &case(CaseAction::Mute), &settings())
            .await;
        assert!(matches!(outcome, Reconciliation::Revoked { .. }));
        assert!(reconciler.in_flight().contains(&mute_key()));
    }

    #[tokio::test]
    async fn test_grant_clears_marker_on_failure() {
        let mut roles = MockRoleMutator::new();
        roles
            .expect_grant_role()
            .returning(|_, _, _, _| Err(CaseError::ExternalSync("Missing Access".into())));

        let reconciler = RoleReconciler::default();
        let result = reconciler
            .grant(&roles, grant_key(), MUTE_ROLE, "Muted by mod#0001")
            .await;
        assert!(result.is_err());
        assert!(reconciler.in_flight().is_empty());

        let mut roles = MockRoleMutator::new();
        roles.expect_grant_role().returning(|_, _, _, _| Ok(()));
        reconciler
            .grant(&roles, grant_key(), MUTE_ROLE, "Muted by mod#0001")
            .await
            .unwrap();
        assert!(reconciler.in_flight().contains(&grant_key()));
    }

    #[test]
    fn test_in_flight_set() {
        let set = InFlightSet::new();
        let key = mute_key();
        assert!(set.mark(key));
        assert!(!set.mark(key));
        assert_eq!(set.len(), 1);
        assert!(set.release(&key));
        assert!(!set.release(&key));
        assert!(set.is_empty());
    }

    #[test]
    fn test_marker_direction_must_match() {
        let reconciler = RoleReconciler::default();
        reconciler.in_flight().mark(mute_key());

        // A manual mute after our own revoke is not ours
        assert!(!reconciler.observe_role_change(&grant_key()));
        assert!(reconciler.observe_role_change(&mute_key()));
    }

    #[test]
    fn test_stale_marker_is_consumed_but_not_ours() {
        let reconciler = RoleReconciler::new(InFlightSet::with_ttl(Duration::ZERO));
        reconciler.in_flight().mark(grant_key());

        assert!(!reconciler.observe_role_change(&grant_key()));
        assert!(reconciler.in_flight().is_empty());
    }

    #[test]
    fn test_mark_drops_stale_markers() {
        let set = InFlightSet::with_ttl(Duration::ZERO);
        set.mark(grant_key());
        set.mark(mute_key());
        assert_eq!(set.len(), 1);
        assert!(set.contains(&mute_key()));
    }

    #[tokio::test]
    async fn test_lifted_timed_mute_is_not_revoked_again() {
        let mut gateway = MockGateway::new();
        gateway.expect_fetch_member().never();
        gateway.expect_revoke_role().never();

        let new_case = NewCase::new(GUILD, TARGET, "target#0001", 1, "mod#0001", CaseAction::Mute, "r")
            .with_duration(60);
        let mut case = Case::from_new(1, 3, new_case, None);
        case.action_processed = true;

        let reconciler = RoleReconciler::default();
        let outcome = reconciler
            .reconcile_deleted(&gateway, &case, "mod#0001", &settings())
            .await;

        assert_eq!(outcome, Reconciliation::AlreadyLifted);
        assert!(reconciler.in_flight().is_empty());
    }
}
