//! Error types for the case ledger
//!
//! This module defines the errors that can occur while creating, deleting and
//! renumbering cases, and while mirroring them to Discord.

use thiserror::Error;

/// Errors that can occur during case ledger operations
#[derive(Debug, Error)]
pub enum CaseError {
    /// No case with this number exists in the guild
    #[error("Case #{case_number} not found in guild {guild_id}")]
    NotFound { guild_id: u64, case_number: u64 },

    /// No record with this internal id exists in the store
    #[error("Case record {0} not found")]
    UnknownRecord(u64),

    /// The case number is already taken in the guild
    #[error("Case #{case_number} already exists in guild {guild_id}")]
    DuplicateCaseNumber { guild_id: u64, case_number: u64 },

    /// Persistence failure
    #[error("Store error: {0}")]
    Store(String),

    /// A best-effort call to the mod log, member directory or role holder failed
    #[error("External sync failed: {0}")]
    ExternalSync(String),

    /// Discord API error
    #[error("Discord API error: {0}")]
    DiscordApi(#[from] Box<serenity::Error>),

    /// Stored action tag outside the known range
    #[error("Unknown action tag: {0}")]
    InvalidAction(u8),
}

impl From<serenity::Error> for CaseError {
    fn from(error: serenity::Error) -> Self {
        Self::DiscordApi(Box::new(error))
    }
}

impl From<serde_yaml::Error> for CaseError {
    fn from(error: serde_yaml::Error) -> Self {
        Self::Store(error.to_string())
    }
}

impl From<std::io::Error> for CaseError {
    fn from(error: std::io::Error) -> Self {
        Self::Store(error.to_string())
    }
}

impl CaseError {
    /// Whether this error came from a call outside the ledger itself
    #[must_use]
    pub fn is_external(&self) -> bool {
        matches!(self, Self::ExternalSync(_) | Self::DiscordApi(_))
    }
}

/// Result type for case ledger operations
pub type CaseResult<T> = Result<T, CaseError>;
