//! Per-guild settings the ledger reads

use crate::cases::PunitiveRole;
use serde::{Deserialize, Serialize};

/// Role ids for the narrower restriction actions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestrictionRoles {
    pub embed: Option<u64>,
    pub emoji: Option<u64>,
    pub reaction: Option<u64>,
}

/// Settings resolved for one guild
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaseSettings {
    pub mod_log_channel_id: Option<u64>,
    pub mute_role_id: Option<u64>,
    pub restriction_roles: RestrictionRoles,
}

impl CaseSettings {
    /// Configured role backing a punitive action
    #[must_use]
    pub fn role_for(&self, role: PunitiveRole) -> Option<u64> {
        match role {
            PunitiveRole::Mute => self.mute_role_id,
            PunitiveRole::Embed => self.restriction_roles.embed,
            PunitiveRole::Emoji => self.restriction_roles.emoji,
            PunitiveRole::Reaction => self.restriction_roles.reaction,
        }
    }

    /// Whether the guild has any punitive role configured
    #[must_use]
    pub fn has_punitive_roles(&self) -> bool {
        self.mute_role_id.is_some()
            || self.restriction_roles.embed.is_some()
            || self.restriction_roles.emoji.is_some()
            || self.restriction_roles.reaction.is_some()
    }
}

/// Lookup of guild settings; unset guilds resolve to the default
pub trait SettingsLookup: Send + Sync {
    fn case_settings(&self, guild_id: u64) -> CaseSettings;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_for() {
        let settings = CaseSettings {
            mod_log_channel_id: None,
            mute_role_id: Some(1),
            restriction_roles: RestrictionRoles {
                embed: Some(2),
                emoji: None,
                reaction: Some(4),
            },
        };

        assert_eq!(settings.role_for(PunitiveRole::Mute), Some(1));
        assert_eq!(settings.role_for(PunitiveRole::Embed), Some(2));
        assert_eq!(settings.role_for(PunitiveRole::Emoji), None);
        assert_eq!(settings.role_for(PunitiveRole::Reaction), Some(4));
        assert!(settings.has_punitive_roles());
        assert!(!CaseSettings::default().has_punitive_roles());
    }
}
