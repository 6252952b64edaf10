//! Subjects of moderation actions

use serenity::all::{Member, User};

/// Identity details shared by members and plain users
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub id: u64,
    pub tag: String,
    pub avatar_url: String,
}

/// Who a case is about: a guild member, or a user that is no longer (or never was) one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Member { guild_id: u64, profile: Profile },
    User(Profile),
}

impl Target {
    fn profile(&self) -> &Profile {
        match self {
            Self::Member { profile, .. } | Self::User(profile) => profile,
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.profile().id
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.profile().tag
    }

    #[must_use]
    pub fn avatar_url(&self) -> &str {
        &self.profile().avatar_url
    }

    /// `tag (id)`, as used in embed authors and log lines
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} ({})", self.display_name(), self.id())
    }
}

impl From<&User> for Profile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.get(),
            tag: user.tag(),
            avatar_url: user.face(),
        }
    }
}

impl From<&User> for Target {
    fn from(user: &User) -> Self {
        Self::User(Profile::from(user))
    }
}

impl From<&Member> for Target {
    fn from(member: &Member) -> Self {
        Self::Member {
            guild_id: member.guild_id.get(),
            profile: Profile::from(&member.user),
        }
    }
}
