//! Case action kinds
//!
//! Actions are persisted as small integer tags. The tag set is closed and
//! several tags collapse into the same history bucket.

use derive_more::Display;
use serde::{Deserialize, Serialize};

use super::CaseError;

/// Kind of moderation action recorded by a case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum CaseAction {
    Ban,
    Unban,
    Kick,
    /// Ban-and-unban used to clear messages, logged as a kick
    Softban,
    Mute,
    EmbedRestriction,
    EmojiRestriction,
    ReactionRestriction,
    Warn,
    /// Restriction not tied to a configured role
    Restriction,
}

/// Display buckets used by the history summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum HistoryBucket {
    #[display("warning")]
    Warn,
    #[display("restriction")]
    Restriction,
    #[display("mute")]
    Mute,
    #[display("kick")]
    Kick,
    #[display("ban")]
    Ban,
}

/// Punitive roles the ledger knows how to revoke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum PunitiveRole {
    #[display("mute")]
    Mute,
    #[display("embed restriction")]
    Embed,
    #[display("emoji restriction")]
    Emoji,
    #[display("reaction restriction")]
    Reaction,
}

impl CaseAction {
    /// Every action, in tag order
    pub const ALL: [Self; 10] = [
        Self::Ban,
        Self::Unban,
        Self::Kick,
        Self::Softban,
        Self::Mute,
        Self::EmbedRestriction,
        Self::EmojiRestriction,
        Self::ReactionRestriction,
        Self::Warn,
        Self::Restriction,
    ];

    /// Persisted tag for this action
    #[must_use]
    pub fn tag(self) -> u8 {
        match self {
            Self::Ban => 1,
            Self::Unban => 2,
            Self::Kick => 3,
            Self::Softban => 4,
            Self::Mute => 5,
            Self::EmbedRestriction => 6,
            Self::EmojiRestriction => 7,
            Self::ReactionRestriction => 8,
            Self::Warn => 9,
            Self::Restriction => 10,
        }
    }

    /// History bucket this action counts towards; unbans count nowhere
    #[must_use]
    pub fn bucket(self) -> Option<HistoryBucket> {
        match self {
            Self::Ban => Some(HistoryBucket::Ban),
            Self::Kick | Self::Softban => Some(HistoryBucket::Kick),
            Self::Mute => Some(HistoryBucket::Mute),
            Self::EmbedRestriction
            | Self::EmojiRestriction
            | Self::ReactionRestriction
            | Self::Restriction => Some(HistoryBucket::Restriction),
            Self::Warn => Some(HistoryBucket::Warn),
            Self::Unban => None,
        }
    }

    /// Role that backs this action while it is in force
    #[must_use]
    pub fn punitive_role(self) -> Option<PunitiveRole> {
        match self {
            Self::Mute => Some(PunitiveRole::Mute),
            Self::EmbedRestriction => Some(PunitiveRole::Embed),
            Self::EmojiRestriction => Some(PunitiveRole::Emoji),
            Self::ReactionRestriction => Some(PunitiveRole::Reaction),
            _ => None,
        }
    }

    /// Label shown in the mod log
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Ban => "Ban",
            Self::Unban => "Unban",
            Self::Kick => "Kick",
            Self::Softban => "Softban",
            Self::Mute => "Mute",
            Self::EmbedRestriction => "Embed restriction",
            Self::EmojiRestriction => "Emoji restriction",
            Self::ReactionRestriction => "Reaction restriction",
            Self::Warn => "Warn",
            Self::Restriction => "Restriction",
        }
    }
}

impl std::fmt::Display for CaseAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl TryFrom<u8> for CaseAction {
    type Error = CaseError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|action| action.tag() == tag)
            .ok_or(CaseError::InvalidAction(tag))
    }
}

impl From<CaseAction> for u8 {
    fn from(action: CaseAction) -> Self {
        action.tag()
    }
}

impl PunitiveRole {
    /// Capitalized form used in audit reasons
    #[must_use]
    pub fn title(self) -> &'static str {
        match self {
            Self::Mute => "Mute",
            Self::Embed => "Embed restriction",
            Self::Emoji => "Emoji restriction",
            Self::Reaction => "Reaction restriction",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_mapping() {
        for (index, action) in CaseAction::ALL.into_iter().enumerate() {
            assert_eq!(usize::from(action.tag()), index + 1);
            assert_eq!(CaseAction::try_from(action.tag()).unwrap(), action);
        }
        assert!(matches!(
            CaseAction::try_from(0),
            Err(CaseError::InvalidAction(0))
        ));
        assert!(CaseAction::try_from(11).is_err());
    }

    #[test]
    fn test_many_to_one_buckets() {
        let kicks = CaseAction::ALL
            .into_iter()
            .filter(|a| a.bucket() == Some(HistoryBucket::Kick))
            .count();
        let restrictions = CaseAction::ALL
            .into_iter()
            .filter(|a| a.bucket() == Some(HistoryBucket::Restriction))
            .count();
        assert_eq!(kicks, 2);
        assert_eq!(restrictions, 4);
        assert_eq!(CaseAction::Unban.bucket(), None);
    }

    #[test]
    fn test_punitive_roles() {
        assert_eq!(CaseAction::Mute.punitive_role(), Some(PunitiveRole::Mute));
        assert_eq!(
            CaseAction::ReactionRestriction.punitive_role(),
            Some(PunitiveRole::Reaction)
        );
        assert_eq!(CaseAction::Restriction.punitive_role(), None);
        assert_eq!(CaseAction::Ban.punitive_role(), None);
        assert_eq!(PunitiveRole::Emoji.to_string(), "emoji restriction");
    }

    #[test]
    fn test_serde_uses_tags() {
        let yaml = serde_yaml::to_string(&CaseAction::Softban).unwrap();
        assert_eq!(yaml.trim(), "4");
        let action: CaseAction = serde_yaml::from_str("8").unwrap();
        assert_eq!(action, CaseAction::ReactionRestriction);
        assert!(serde_yaml::from_str::<CaseAction>("42").is_err());
    }
}
