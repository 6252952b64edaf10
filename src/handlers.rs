use crate::cases::{
    CaseAction, InFlightKey, LogAuthor, NewCase, Profile, PunitiveRole, RoleDirection,
    SettingsLookup, Target,
};
use crate::{Data, DiscordGateway, EVENT_TARGET};
use poise::serenity_prelude::{
    self as serenity, Context, EventHandler, GuildId, GuildMemberUpdateEvent, Member, Ready,
    RoleId, UserId,
    model::guild::audit_log::{Action, MemberAction},
};
use tracing::{debug, info, warn};

/// Reason recorded when nobody gave one
const NO_REASON: &str = "No reason provided";

/// How the mute role moved in a member update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleChange {
    Added,
    Removed,
}

impl From<RoleChange> for RoleDirection {
    fn from(change: RoleChange) -> Self {
        match change {
            RoleChange::Added => RoleDirection::Grant,
            RoleChange::Removed => RoleDirection::Revoke,
        }
    }
}

/// Compare two role lists for the mute role
#[must_use]
pub fn mute_role_change(
    old_roles: &[RoleId],
    new_roles: &[RoleId],
    mute_role: RoleId,
) -> Option<RoleChange> {
    match (old_roles.contains(&mute_role), new_roles.contains(&mute_role)) {
        (false, true) => Some(RoleChange::Added),
        (true, false) => Some(RoleChange::Removed),
        _ => None,
    }
}

/// Who applied a role by hand, as read from the guild audit log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executor {
    pub author: LogAuthor,
    pub reason: Option<String>,
}

/// Case for a mute role someone assigned by hand
#[must_use]
pub fn manual_mute_case(guild_id: u64, target: &Target, executor: Option<&Executor>) -> NewCase {
    let (moderator_id, moderator_tag) = executor.map_or((0, "Unknown"), |executor| {
        (executor.author.id, executor.author.tag.as_str())
    });
    let reason = executor
        .and_then(|executor| executor.reason.as_deref())
        .unwrap_or(NO_REASON);

    NewCase::against(
        guild_id,
        target,
        moderator_id,
        moderator_tag,
        CaseAction::Mute,
        reason,
    )
}

pub struct Handler {
    pub data: Data,
}

impl Handler {
    #[must_use]
    pub fn new(data: Data) -> Self {
        Self { data }
    }

    /// Consume the mute marker for a change in `direction`; true if the bot made it
    fn observe_mute_change(&self, guild_id: u64, user_id: u64, direction: RoleDirection) -> bool {
        let key = InFlightKey::new(guild_id, user_id, PunitiveRole::Mute, direction);
        self.data.cases.reconciler().observe_role_change(&key)
    }

    /// Find the most recent role update for `user_id` in the audit log
    async fn find_executor(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<Executor> {
        let logs = match guild_id
            .audit_logs(
                &ctx.http,
                Some(Action::Member(MemberAction::RoleUpdate)),
                None,
                None,
                Some(5),
            )
            .await
        {
            Ok(logs) => logs,
            Err(e) => {
                debug!(target: EVENT_TARGET, %guild_id, error = %e, "Audit log unavailable");
                return None;
            }
        };

        let entry = logs
            .entries
            .into_iter()
            .find(|entry| entry.target_id.is_some_and(|id| id.get() == user_id.get()))?;
        let moderator = entry.user_id.to_user(ctx).await.ok()?;

        Some(Executor {
            author: LogAuthor {
                id: moderator.id.get(),
                tag: moderator.tag(),
                avatar_url: moderator.face(),
            },
            reason: entry.reason,
        })
    }

    async fn record_manual_mute(&self, ctx: &Context, member: Target, guild_id: GuildId) {
        let user_id = UserId::new(member.id());
        let executor = Self::find_executor(ctx, guild_id, user_id).await;
        // The bot's own role changes never become manual cases
        if executor
            .as_ref()
            .is_some_and(|executor| executor.author.id == ctx.cache.current_user().id.get())
        {
            return;
        }

        let new_case = manual_mute_case(guild_id.get(), &member, executor.as_ref());
        let settings = self.data.case_settings(guild_id.get());
        let gateway = DiscordGateway::new(ctx.http.clone());

        match self
            .data
            .cases
            .create_case(
                &gateway,
                new_case,
                &member,
                executor.map(|executor| executor.author),
                &settings,
            )
            .await
        {
            Ok(case) => {
                info!(
                    target: EVENT_TARGET,
                    %guild_id,
                    user_id = %user_id,
                    case_number = case.case_number,
                    "Recorded manual mute"
                );
                if let Err(e) = self.data.save().await {
                    warn!(target: EVENT_TARGET, error = %e, "Failed to save data");
                }
            }
            Err(e) => {
                warn!(target: EVENT_TARGET, %guild_id, error = %e, "Failed to record manual mute");
            }
        }
    }
}

#[serenity::async_trait]
impl EventHandler for Handler {
    /// Called when the bot is ready, but the cache may not be fully populated yet.
    async fn ready(&self, ctx: Context, ready: Ready) {
        let user_name = ready.user.name.clone();
        let shard_id = ctx.shard_id;
        info!("Connected as {user_name}, shard {shard_id}");
    }

    /// Called when the cache is fully populated.
    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        let guild_count_cache = ctx.cache.guild_count();
        let guild_count = guilds.len();
        if guild_count != guild_count_cache {
            warn!(
                "Cache guild count mismatch: {guild_count_cache} (cache) vs {guild_count} (actual)"
            );
        }
        info!(
            "Cache ready! The bot is in {guild_count} guild(s), {} case(s) loaded",
            self.data.cases.store.len()
        );

        // Mutes may have run out while the bot was offline
        if !self.data.request_expiry_check().await {
            warn!(target: EVENT_TARGET, "Mute expiry task is not running");
        }
    }

    async fn guild_member_update(
        &self,
        ctx: Context,
        old_if_available: Option<Member>,
        _new: Option<Member>,
        event: GuildMemberUpdateEvent,
    ) {
        let guild_id = event.guild_id;
        let user_id = event.user.id;
        let Some(mute_role) = self.data.case_settings(guild_id.get()).mute_role_id else {
            return;
        };
        let mute_role = RoleId::new(mute_role);

        let Some(old) = old_if_available else {
            // Without the old roles only a marker the new roles agree with is cleared
            let direction = if event.roles.contains(&mute_role) {
                RoleDirection::Grant
            } else {
                RoleDirection::Revoke
            };
            let ours = self.observe_mute_change(guild_id.get(), user_id.get(), direction);
            debug!(
                target: EVENT_TARGET,
                %guild_id,
                %user_id,
                ours,
                "Member update without cached roles"
            );
            return;
        };

        let Some(change) = mute_role_change(&old.roles, &event.roles, mute_role) else {
            return;
        };

        if self.observe_mute_change(guild_id.get(), user_id.get(), change.into()) {
            debug!(
                target: EVENT_TARGET,
                %guild_id,
                %user_id,
                ?change,
                "Observed our own mute role change"
            );
            return;
        }

        match change {
            RoleChange::Added => {
                let target = Target::Member {
                    guild_id: guild_id.get(),
                    profile: Profile::from(&event.user),
                };
                self.record_manual_mute(&ctx, target, guild_id).await;
            }
            RoleChange::Removed => {
                info!(
                    target: EVENT_TARGET,
                    %guild_id,
                    %user_id,
                    "Mute role removed by hand"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(ids: &[u64]) -> Vec<RoleId> {
        ids.iter().copied().map(RoleId::new).collect()
    }

    #[test]
    fn test_mute_role_change() {
        let mute = RoleId::new(9);
        assert_eq!(
            mute_role_change(&roles(&[1]), &roles(&[1, 9]), mute),
            Some(RoleChange::Added)
        );
        assert_eq!(
            mute_role_change(&roles(&[9, 2]), &roles(&[2]), mute),
            Some(RoleChange::Removed)
        );
        assert_eq!(mute_role_change(&roles(&[9]), &roles(&[9, 3]), mute), None);
        assert_eq!(mute_role_change(&roles(&[]), &roles(&[4]), mute), None);
    }

    fn target() -> Target {
        Target::User(Profile {
            id: 42,
            tag: "member#0001".to_string(),
            avatar_url: String::new(),
        })
    }

    #[test]
    fn test_manual_mute_case_with_executor() {
        let executor = Executor {
            author: LogAuthor {
                id: 5,
                tag: "mod#0001".to_string(),
                avatar_url: String::new(),
            },
            reason: Some("spamming".to_string()),
        };
        let new_case = manual_mute_case(1, &target(), Some(&executor));
        assert_eq!(new_case.action, CaseAction::Mute);
        assert_eq!(new_case.target_id, 42);
        assert_eq!(new_case.moderator_id, 5);
        assert_eq!(new_case.moderator_tag, "mod#0001");
        assert_eq!(new_case.reason, "spamming");
        assert!(new_case.duration.is_none());
    }

    #[test]
    fn test_manual_mute_case_unknown_executor() {
        let new_case = manual_mute_case(1, &target(), None);
        assert_eq!(new_case.moderator_id, 0);
        assert_eq!(new_case.moderator_tag, "Unknown");
        assert_eq!(new_case.reason, NO_REASON);
    }

    #[test]
    fn test_handler_implements_event_handler() {
        fn assert_impl<T: EventHandler>() {}
        assert_impl::<Handler>();
    }

    #[test]
    fn test_own_change_is_consumed_once() {
        let handler = Handler::new(Data::new());
        let key = InFlightKey::grant(1, 42, PunitiveRole::Mute);
        handler.data.cases.reconciler().in_flight().mark(key);

        assert!(handler.observe_mute_change(1, 42, RoleChange::Added.into()));
        assert!(!handler.observe_mute_change(1, 42, RoleChange::Added.into()));
    }

    #[test]
    fn test_leftover_revoke_does_not_hide_manual_mute() {
        let handler = Handler::new(Data::new());
        let in_flight = handler.data.cases.reconciler().in_flight();
        in_flight.mark(InFlightKey::revoke(1, 42, PunitiveRole::Mute));

        assert!(!handler.observe_mute_change(1, 42, RoleChange::Added.into()));
        assert!(handler.observe_mute_change(1, 42, RoleChange::Removed.into()));
        assert!(in_flight.is_empty());
    }
}
