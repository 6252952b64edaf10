//! Discord side of the case ledger
//!
//! Implements the mod log, member lookup and role calls over serenity's HTTP
//! client.

use crate::cases::{
    AuditLog, AuditMessageRef, CaseLogEntry, CaseResult, MemberDirectory, RoleMutator, Target,
};
use poise::serenity_prelude::{
    ChannelId, CreateEmbed, CreateEmbedAuthor, CreateEmbedFooter, CreateMessage, EditMessage,
    GuildId, Http, MessageId, RoleId, Timestamp, UserId,
};
use std::sync::Arc;

/// Gateway backed by the bot's HTTP client
#[derive(Clone)]
pub struct DiscordGateway {
    http: Arc<Http>,
}

impl std::fmt::Debug for DiscordGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordGateway").finish_non_exhaustive()
    }
}

impl DiscordGateway {
    #[must_use]
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

/// Build the mod log embed for a case
#[must_use]
pub fn render_entry(entry: &CaseLogEntry) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .description(entry.description())
        .footer(CreateEmbedFooter::new(entry.footer()))
        .timestamp(Timestamp::now());

    if let (Some(line), Some(author)) = (entry.author_line(), &entry.author) {
        embed = embed.author(CreateEmbedAuthor::new(line).icon_url(&author.avatar_url));
    }
    if !entry.target.avatar_url().is_empty() {
        embed = embed.thumbnail(entry.target.avatar_url());
    }

    embed
}

#[async_trait::async_trait]
impl AuditLog for DiscordGateway {
    async fn post_entry(
        &self,
        channel_id: u64,
        entry: &CaseLogEntry,
    ) -> CaseResult<AuditMessageRef> {
        let message = ChannelId::new(channel_id)
            .send_message(&*self.http, CreateMessage::new().embed(render_entry(entry)))
            .await?;

        Ok(AuditMessageRef {
            channel_id,
            message_id: message.id.get(),
        })
    }

    async fn remove_entry(&self, entry: &AuditMessageRef) -> CaseResult<()> {
        ChannelId::new(entry.channel_id)
            .delete_message(&*self.http, MessageId::new(entry.message_id))
            .await?;
        Ok(())
    }

    async fn restamp_entry(&self, entry: &AuditMessageRef, case_number: u64) -> CaseResult<()> {
        let mut message = ChannelId::new(entry.channel_id)
            .message(&*self.http, MessageId::new(entry.message_id))
            .await?;

        let Some(embed) = message.embeds.first().cloned() else {
            return Err(crate::cases::CaseError::ExternalSync(format!(
                "mod log message {} has no embed",
                entry.message_id
            )));
        };

        let embed = CreateEmbed::from(embed)
            .footer(CreateEmbedFooter::new(crate::cases::case_footer(case_number)));
        message
            .edit(&*self.http, EditMessage::new().embed(embed))
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl MemberDirectory for DiscordGateway {
    async fn fetch_member(&self, guild_id: u64, user_id: u64) -> CaseResult<Target> {
        let member = GuildId::new(guild_id)
            .member(&*self.http, UserId::new(user_id))
            .await?;
        Ok(Target::from(&member))
    }
}

#[async_trait::async_trait]
impl RoleMutator for DiscordGateway {
    async fn revoke_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        reason: &str,
    ) -> CaseResult<()> {
        self.http
            .remove_member_role(
                GuildId::new(guild_id),
                UserId::new(user_id),
                RoleId::new(role_id),
                Some(reason),
            )
            .await?;
        Ok(())
    }

    async fn grant_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        reason: &str,
    ) -> CaseResult<()> {
        self.http
            .add_member_role(
                GuildId::new(guild_id),
                UserId::new(user_id),
                RoleId::new(role_id),
                Some(reason),
            )
            .await?;
        Ok(())
    }
}
