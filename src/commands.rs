use crate::cases::{
    Case, CaseAction, DeletionReport, InFlightKey, LogAuthor, NewCase, PunitiveRole,
    SettingsLookup, Target, format_duration,
};
use crate::{COMMAND_TARGET, Data, DiscordGateway, Error};
use poise::serenity_prelude::{
    self as serenity, CreateEmbed, CreateEmbedAuthor, CreateEmbedFooter, Timestamp,
};
use poise::{Context, CreateReply, command};
use tracing::warn;

type CommandResult = Result<(), Error>;

/// Longest mute a moderator can set, one year
pub const MAX_MUTE_MINUTES: u64 = 60 * 24 * 365;

fn require_guild(ctx: Context<'_, Data, Error>) -> Result<serenity::GuildId, Error> {
    ctx.guild_id()
        .ok_or_else(|| "This command only works in a server".into())
}

fn gateway(ctx: Context<'_, Data, Error>) -> DiscordGateway {
    DiscordGateway::new(ctx.serenity_context().http.clone())
}

fn log_author(user: &serenity::User) -> LogAuthor {
    LogAuthor {
        id: user.id.get(),
        tag: user.tag(),
        avatar_url: user.face(),
    }
}

/// Resolve a user to a member of the guild if they are still in it
async fn resolve_target(
    ctx: Context<'_, Data, Error>,
    guild_id: serenity::GuildId,
    user: &serenity::User,
) -> Target {
    match guild_id.member(ctx, user.id).await {
        Ok(member) => Target::from(&member),
        Err(_) => Target::from(user),
    }
}

/// Persist the ledger after a change; a failed write is logged, not fatal
async fn persist(data: &Data) {
    if let Err(e) = data.save().await {
        warn!(target: COMMAND_TARGET, error = %e, "Failed to save data");
    }
}

/// Length of a timed mute in seconds; zero means indefinite
///
/// # Errors
/// Returns an error past [`MAX_MUTE_MINUTES`].
pub fn mute_seconds(minutes: u64) -> Result<Option<u64>, Error> {
    if minutes > MAX_MUTE_MINUTES {
        return Err(format!("A mute can last at most {MAX_MUTE_MINUTES} minutes").into());
    }
    Ok((minutes > 0).then_some(minutes * 60))
}

/// Moderator-facing summary of a deletion
#[must_use]
pub fn deletion_summary(report: &DeletionReport) -> String {
    let mut text = format!(
        "Deleted case #{} ({} against {})",
        report.deleted.case_number, report.deleted.action, report.deleted.target_tag
    );
    if !report.renumbered.is_empty() {
        text.push_str(&format!(
            ", {} later case(s) renumbered",
            report.renumbered.len()
        ));
    }
    if let Some(warning) = report.warning() {
        text.push_str(&format!("\nWarning: {warning}"));
    }
    text
}

/// Embed describing a stored case
#[must_use]
pub fn case_embed(case: &Case) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title(format!("Case #{}", case.case_number))
        .field(
            "Member",
            format!("{} ({})", case.target_tag, case.target_id),
            true,
        )
        .field(
            "Moderator",
            format!("{} ({})", case.moderator_tag, case.moderator_id),
            true,
        )
        .field("Action", case.action.to_string(), true)
        .field("Reason", case.reason.clone(), false)
        .timestamp(Timestamp::from(case.created_at));

    if let Some(secs) = case.duration.filter(|secs| *secs > 0) {
        embed = embed.field("Length", format_duration(secs), true);
    }
    if let Some(reference) = case.reference {
        embed = embed.field("Ref case", format!("#{reference}"), true);
    }
    embed
}

/// Case ledger commands
#[command(
    slash_command,
    prefix_command,
    guild_only,
    subcommands("show", "delete", "repair"),
    subcommand_required,
    required_permissions = "MANAGE_MESSAGES"
)]
pub async fn case(_ctx: Context<'_, Data, Error>) -> CommandResult {
    Ok(())
}

/// Show a case by number
#[command(slash_command, prefix_command, guild_only)]
pub async fn show(
    ctx: Context<'_, Data, Error>,
    #[description = "Case number"] number: u64,
) -> CommandResult {
    let guild_id = require_guild(ctx)?;
    let case = ctx.data().cases.get_case(guild_id.get(), number).await?;
    ctx.send(CreateReply::default().embed(case_embed(&case)))
        .await?;
    Ok(())
}

/// Delete a case and renumber the cases after it
#[command(slash_command, prefix_command, guild_only)]
pub async fn delete(
    ctx: Context<'_, Data, Error>,
    #[description = "Case number"] number: u64,
    #[description = "Leave the mute or restriction role on the member"]
    keep_roles: Option<bool>,
) -> CommandResult {
    let guild_id = require_guild(ctx)?;
    let data = ctx.data();
    let settings = data.case_settings(guild_id.get());

    let report = data
        .cases
        .delete_case(
            &gateway(ctx),
            guild_id.get(),
            number,
            &ctx.author().tag(),
            &settings,
            keep_roles.unwrap_or(false),
        )
        .await?;
    persist(data).await;

    ctx.say(deletion_summary(&report)).await?;
    Ok(())
}

/// Close any gaps in this server's case numbers
#[command(slash_command, prefix_command, guild_only)]
pub async fn repair(ctx: Context<'_, Data, Error>) -> CommandResult {
    let guild_id = require_guild(ctx)?;
    let data = ctx.data();
    let settings = data.case_settings(guild_id.get());

    let moved = data
        .cases
        .renumber(&gateway(ctx), guild_id.get(), 0, &settings)
        .await?;
    if !moved.is_empty() {
        persist(data).await;
    }

    ctx.say(format!("{} case(s) renumbered", moved.len()))
        .await?;
    Ok(())
}

/// Show a member's moderation history in this server
#[command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "MANAGE_MESSAGES"
)]
pub async fn history(
    ctx: Context<'_, Data, Error>,
    #[description = "Member to look up"] user: serenity::User,
) -> CommandResult {
    let guild_id = require_guild(ctx)?;
    let target = resolve_target(ctx, guild_id, &user).await;
    let summary = ctx.data().cases.history(guild_id.get(), target.id()).await;

    let embed = CreateEmbed::new()
        .author(CreateEmbedAuthor::new(target.label()).icon_url(target.avatar_url()))
        .thumbnail(target.avatar_url())
        .color(summary.color())
        .footer(CreateEmbedFooter::new(summary.footer()));
    ctx.send(CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Warn a member and record a case
#[command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "MANAGE_MESSAGES"
)]
pub async fn warn(
    ctx: Context<'_, Data, Error>,
    #[description = "Member to warn"] user: serenity::User,
    #[description = "Case this relates to"] reference: Option<u64>,
    #[description = "Reason"]
    #[rest]
    reason: String,
) -> CommandResult {
    let guild_id = require_guild(ctx)?;
    let data = ctx.data();
    let target = resolve_target(ctx, guild_id, &user).await;
    let author = ctx.author();

    let mut new_case = NewCase::against(
        guild_id.get(),
        &target,
        author.id.get(),
        author.tag(),
        CaseAction::Warn,
        reason,
    );
    if let Some(reference) = reference {
        new_case = new_case.with_reference(reference);
    }

    let case = data
        .cases
        .create_case(
            &gateway(ctx),
            new_case,
            &target,
            Some(log_author(author)),
            &data.case_settings(guild_id.get()),
        )
        .await?;
    persist(data).await;

    ctx.say(format!(
        "Warned {}, case #{}",
        target.display_name(),
        case.case_number
    ))
    .await?;
    Ok(())
}

/// Mute a member with the configured mute role and record a case
#[command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "MANAGE_ROLES"
)]
pub async fn mute(
    ctx: Context<'_, Data, Error>,
    #[description = "Member to mute"] member: serenity::Member,
    #[description = "Length in minutes; leave empty for an indefinite mute"]
    #[max = 525600]
    minutes: Option<u64>,
    #[description = "Case this relates to"] reference: Option<u64>,
    #[description = "Reason"]
    #[rest]
    reason: String,
) -> CommandResult {
    let guild_id = require_guild(ctx)?;
    let data = ctx.data();
    let settings = data.case_settings(guild_id.get());
    let role_id = settings
        .mute_role_id
        .ok_or("No mute role is configured, set one with /config muterole")?;

    let gateway = gateway(ctx);
    let target = Target::from(&member);
    let author = ctx.author();

    let duration = minutes.map(mute_seconds).transpose()?.flatten();

    // No member update follows for a role the member already has
    if !member.roles.contains(&serenity::RoleId::new(role_id)) {
        let key = InFlightKey::grant(guild_id.get(), target.id(), PunitiveRole::Mute);
        data.cases
            .reconciler()
            .grant(
                &gateway,
                key,
                role_id,
                &format!("Mute by {} | {reason}", author.tag()),
            )
            .await?;
    }

    let mut new_case = NewCase::against(
        guild_id.get(),
        &target,
        author.id.get(),
        author.tag(),
        CaseAction::Mute,
        reason,
    );
    if let Some(secs) = duration {
        new_case = new_case.with_duration(secs);
    }
    if let Some(reference) = reference {
        new_case = new_case.with_reference(reference);
    }

    let case = data
        .cases
        .create_case(
            &gateway,
            new_case,
            &target,
            Some(log_author(author)),
            &settings,
        )
        .await?;
    persist(data).await;

    ctx.say(format!(
        "Muted {}, case #{}",
        target.display_name(),
        case.case_number
    ))
    .await?;
    Ok(())
}

/// Which restriction a role backs
#[derive(Debug, Clone, Copy, PartialEq, Eq, poise::ChoiceParameter)]
pub enum RestrictionKind {
    Embed,
    Emoji,
    Reaction,
}

impl From<RestrictionKind> for PunitiveRole {
    fn from(kind: RestrictionKind) -> Self {
        match kind {
            RestrictionKind::Embed => Self::Embed,
            RestrictionKind::Emoji => Self::Emoji,
            RestrictionKind::Reaction => Self::Reaction,
        }
    }
}

/// Server settings for the case ledger
#[command(
    slash_command,
    prefix_command,
    guild_only,
    subcommands("modlog", "muterole", "restrictrole", "config_show"),
    subcommand_required,
    required_permissions = "MANAGE_GUILD"
)]
pub async fn config(_ctx: Context<'_, Data, Error>) -> CommandResult {
    Ok(())
}

/// Set the channel that mirrors the case ledger
#[command(slash_command, prefix_command, guild_only)]
pub async fn modlog(
    ctx: Context<'_, Data, Error>,
    #[description = "Mod log channel"] channel: serenity::GuildChannel,
) -> CommandResult {
    let guild_id = require_guild(ctx)?;
    let data = ctx.data();
    data.update_guild_config(guild_id, |config| {
        config.mod_log_channel_id = Some(channel.id.get());
    });
    persist(data).await;

    ctx.say(format!("Mod log channel set to <#{}>", channel.id))
        .await?;
    Ok(())
}

/// Set the role given to muted members
#[command(slash_command, prefix_command, guild_only)]
pub async fn muterole(
    ctx: Context<'_, Data, Error>,
    #[description = "Mute role"] role: serenity::Role,
) -> CommandResult {
    let guild_id = require_guild(ctx)?;
    let data = ctx.data();
    data.update_guild_config(guild_id, |config| {
        config.mute_role_id = Some(role.id.get());
    });
    persist(data).await;

    ctx.say(format!("Mute role set to {}", role.name)).await?;
    Ok(())
}

/// Set the role backing a restriction
#[command(slash_command, prefix_command, guild_only)]
pub async fn restrictrole(
    ctx: Context<'_, Data, Error>,
    #[description = "Restriction"] kind: RestrictionKind,
    #[description = "Role"] role: serenity::Role,
) -> CommandResult {
    let guild_id = require_guild(ctx)?;
    let data = ctx.data();
    data.update_guild_config(guild_id, |config| {
        let slot = match kind {
            RestrictionKind::Embed => &mut config.restriction_roles.embed,
            RestrictionKind::Emoji => &mut config.restriction_roles.emoji,
            RestrictionKind::Reaction => &mut config.restriction_roles.reaction,
        };
        *slot = Some(role.id.get());
    });
    persist(data).await;

    ctx.say(format!(
        "{} role set to {}",
        PunitiveRole::from(kind).title(),
        role.name
    ))
    .await?;
    Ok(())
}

fn describe_channel(id: Option<u64>) -> String {
    id.map_or_else(|| "not set".to_string(), |id| format!("<#{id}>"))
}

fn describe_role(id: Option<u64>) -> String {
    id.map_or_else(|| "not set".to_string(), |id| format!("<@&{id}>"))
}

/// Show this server's case ledger settings
#[command(slash_command, prefix_command, guild_only, rename = "show")]
pub async fn config_show(ctx: Context<'_, Data, Error>) -> CommandResult {
    let guild_id = require_guild(ctx)?;
    let settings = ctx.data().case_settings(guild_id.get());

    let embed = CreateEmbed::new()
        .title("Case ledger settings")
        .field(
            "Mod log",
            describe_channel(settings.mod_log_channel_id),
            false,
        )
        .field("Mute role", describe_role(settings.mute_role_id), true)
        .field(
            "Embed restriction",
            describe_role(settings.restriction_roles.embed),
            true,
        )
        .field(
            "Emoji restriction",
            describe_role(settings.restriction_roles.emoji),
            true,
        )
        .field(
            "Reaction restriction",
            describe_role(settings.restriction_roles.reaction),
            true,
        );
    ctx.send(CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}

/// Every command the bot registers
#[must_use]
pub fn all() -> Vec<poise::Command<Data, Error>> {
    vec![case(), history(), warn(), mute(), config()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cases::{Reconciliation, Renumbered};

    fn subcommand_names(cmd: &poise::Command<Data, Error>) -> Vec<&str> {
        cmd.subcommands.iter().map(|sub| sub.name.as_str()).collect()
    }

    #[test]
    fn test_case_command_definition() {
        let cmd = case();
        assert_eq!(cmd.name, "case");
        assert!(cmd.guild_only);
        assert!(cmd.subcommand_required);
        assert_eq!(subcommand_names(&cmd), vec!["show", "delete", "repair"]);
        assert!(cmd.create_as_slash_command().is_some());
    }

    #[test]
    fn test_config_command_definition() {
        let cmd = config();
        assert_eq!(
            subcommand_names(&cmd),
            vec!["modlog", "muterole", "restrictrole", "show"]
        );
        assert!(
            cmd.required_permissions
                .contains(serenity::Permissions::MANAGE_GUILD)
        );
    }

    #[test]
    fn test_all_commands_registered() {
        let names: Vec<String> = all().into_iter().map(|cmd| cmd.name).collect();
        assert_eq!(names, vec!["case", "history", "warn", "mute", "config"]);
        for cmd in all() {
            assert!(cmd.guild_only, "{} should be guild only", cmd.name);
        }
    }

    #[test]
    fn test_delete_takes_optional_keep_roles() {
        let cmd = delete();
        let keep_roles = cmd
            .parameters
            .iter()
            .find(|param| param.name == "keep_roles")
            .expect("keep_roles parameter");
        assert!(!keep_roles.required);
    }

    #[test]
    fn test_mute_seconds_bounds() {
        assert_eq!(mute_seconds(0).unwrap(), None);
        assert_eq!(mute_seconds(10).unwrap(), Some(600));
        assert_eq!(
            mute_seconds(MAX_MUTE_MINUTES).unwrap(),
            Some(MAX_MUTE_MINUTES * 60)
        );
        assert!(mute_seconds(MAX_MUTE_MINUTES + 1).is_err());
        assert!(mute_seconds(1_000_000_000_000).is_err());
    }

    fn report(roles: Reconciliation, renumbered: Vec<Renumbered>) -> DeletionReport {
        let new_case = NewCase::new(1, 2, "target#0001", 3, "mod#0001", CaseAction::Mute, "spam");
        DeletionReport {
            deleted: Case::from_new(10, 3, new_case, None),
            roles,
            renumbered,
        }
    }

    #[test]
    fn test_deletion_summary() {
        let plain = report(Reconciliation::NotApplicable, Vec::new());
        assert_eq!(
            deletion_summary(&plain),
            "Deleted case #3 (Mute against target#0001)"
        );

        let failed = report(
            Reconciliation::Failed {
                role: PunitiveRole::Mute,
                message: "there was an error removing the mute on this member: `Missing Permissions`"
                    .to_string(),
            },
            vec![Renumbered {
                id: 11,
                from: 4,
                to: 3,
            }],
        );
        let text = deletion_summary(&failed);
        assert!(text.contains("1 later case(s) renumbered"));
        assert!(text.ends_with("removing the mute on this member: `Missing Permissions`"));
    }

    #[test]
    fn test_describe_settings() {
        assert_eq!(describe_channel(None), "not set");
        assert_eq!(describe_channel(Some(5)), "<#5>");
        assert_eq!(describe_role(Some(6)), "<@&6>");
    }
}
