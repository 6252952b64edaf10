//! Mod log rendering and synchronization
//!
//! The mod log channel mirrors the ledger: one embed per case, with the case
//! number in the footer. Every call here is best-effort; the store stays the
//! source of truth.

use crate::cases::{AuditMessageRef, CaseAction, CaseResult, Target};

/// Access to the rendered mod log
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait AuditLog: Send + Sync {
    /// Render and post the entry for a new case
    async fn post_entry(&self, channel_id: u64, entry: &CaseLogEntry)
    -> CaseResult<AuditMessageRef>;

    /// Delete the rendered entry
    async fn remove_entry(&self, entry: &AuditMessageRef) -> CaseResult<()>;

    /// Rewrite the footer of the rendered entry to show `case_number`
    async fn restamp_entry(&self, entry: &AuditMessageRef, case_number: u64) -> CaseResult<()>;
}

/// Moderator shown as the author of a log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogAuthor {
    pub id: u64,
    pub tag: String,
    pub avatar_url: String,
}

/// Link to an earlier case mentioned by a new one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseLink {
    pub case_number: u64,
    pub guild_id: u64,
    pub message: AuditMessageRef,
}

/// Everything needed to render the mod log embed for one case
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseLogEntry {
    pub author: Option<LogAuthor>,
    pub target: Target,
    pub action: CaseAction,
    pub case_number: u64,
    pub reason: String,
    pub duration: Option<u64>,
    pub reference: Option<CaseLink>,
}

impl CaseLogEntry {
    /// Embed author line, `tag (id)`
    #[must_use]
    pub fn author_line(&self) -> Option<String> {
        self.author
            .as_ref()
            .map(|author| format!("{} ({})", author.tag, author.id))
    }

    /// Embed description
    #[must_use]
    pub fn description(&self) -> String {
        let mut text = format!(
            "**Member:** {}\n**Action:** {}",
            self.target.label(),
            self.action
        );
        if self.action == CaseAction::Mute {
            if let Some(secs) = self.duration.filter(|secs| *secs > 0) {
                text.push_str(&format!("\n**Length:** {}", format_duration(secs)));
            }
        }
        text.push_str(&format!("\n**Reason:** {}", self.reason));
        if let Some(link) = &self.reference {
            text.push_str(&format!(
                "\n**Ref case:** [{}](https://discord.com/channels/{}/{}/{})",
                link.case_number, link.guild_id, link.message.channel_id, link.message.message_id
            ));
        }
        text
    }

    #[must_use]
    pub fn footer(&self) -> String {
        case_footer(self.case_number)
    }
}

/// Footer text carrying the case number
#[must_use]
pub fn case_footer(case_number: u64) -> String {
    format!("Case {case_number}")
}

/// Long-form duration, e.g. `1 day, 2 hours`
#[must_use]
pub fn format_duration(seconds: u64) -> String {
    const UNITS: [(u64, &str); 4] = [(86_400, "day"), (3_600, "hour"), (60, "minute"), (1, "second")];

    let mut remaining = seconds;
    let mut parts = Vec::new();
    for (size, name) in UNITS {
        let count = remaining / size;
        remaining %= size;
        if count > 0 {
            let suffix = if count == 1 { "" } else { "s" };
            parts.push(format!("{count} {name}{suffix}"));
        }
    }

    if parts.is_empty() {
        "0 seconds".to_string()
    } else {
        parts.join(", ")
    }
}
