pub mod cases;
pub mod commands;
pub mod data;
pub mod gateway;
pub mod handlers;
pub mod logging;

pub const BOT_NAME: &str = "case_ledger";
pub const COMMAND_TARGET: &str = "case_ledger::command";
pub const ERROR_TARGET: &str = "case_ledger::error";
pub const EVENT_TARGET: &str = "case_ledger::handlers";
pub const CASE_TARGET: &str = "case_ledger::cases";
pub const CONSOLE_TARGET: &str = "case_ledger";

pub use data::{Data, DataInner, GuildConfig};
pub use gateway::DiscordGateway;
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
