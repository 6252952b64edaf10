use crate::{CASE_TARGET, COMMAND_TARGET, CONSOLE_TARGET, Data, ERROR_TARGET, Error};
use poise::{Context, FrameworkError};
use std::path::Path;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::filter_fn,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Log directory name
pub const LOG_DIR: &str = "logs";
/// Command log file name
pub const COMMAND_LOG_FILE: &str = "commands";
/// Case ledger log file name
pub const CASE_LOG_FILE: &str = "cases";

/// Serenity is only interesting when it fails
const SERENITY_DIRECTIVE: &str = "serenity=error";

/// Initialize the logging system with console and file outputs
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Create log directory if it doesn't exist
    if !Path::new(LOG_DIR).exists() {
        std::fs::create_dir_all(LOG_DIR)?;
    }

    // Set up file appenders with daily rotation
    let command_file = RollingFileAppender::new(Rotation::DAILY, LOG_DIR, COMMAND_LOG_FILE);
    let case_file = RollingFileAppender::new(Rotation::DAILY, LOG_DIR, CASE_LOG_FILE);

    // Create a layer for console output (human-readable format)
    let console_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(true);

    // Create a layer for command logs (JSON format)
    let command_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_writer(command_file);

    // Ledger changes only: creations, deletions, renumbering, role sync
    let case_layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_writer(case_file)
        .with_filter(filter_fn(|metadata| metadata.target() == CASE_TARGET));

    // RUST_LOG wins; otherwise info, with serenity heartbeats filtered out
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("info,{SERENITY_DIRECTIVE}")));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(command_layer)
        .with(case_layer)
        .try_init()?;

    info!("Logging system initialized");
    Ok(())
}

// Store command start time in the context data
thread_local! {
    static COMMAND_START_TIME: std::cell::RefCell<Option<Instant>> = const { std::cell::RefCell::new(None) };
}

/// Command name, guild and invoking user, as logged on every command event
fn command_fields(ctx: Context<'_, Data, Error>) -> (String, String, String) {
    let command_name = ctx.command().qualified_name.clone();
    let guild_id = ctx
        .guild_id()
        .map_or_else(|| "DM".to_string(), |id| id.get().to_string());
    let user_id = ctx.author().id.get().to_string();
    (command_name, guild_id, user_id)
}

/// Log the start of a command execution (pre-command hook)
pub fn log_command_start(ctx: Context<'_, Data, Error>) {
    COMMAND_START_TIME.with(|cell| {
        *cell.borrow_mut() = Some(Instant::now());
    });

    let (command_name, guild_id, user_id) = command_fields(ctx);
    let args = if ctx.command().parameters.is_empty() {
        String::new()
    } else {
        ctx.invocation_string()
    };

    info!(
        target: COMMAND_TARGET,
        command = %command_name,
        guild_id = %guild_id,
        user_id = %user_id,
        arguments = %args,
        event = "start",
        "Command execution started"
    );
}

/// Log the end of a command execution (post-command hook)
pub fn log_command_end(ctx: Context<'_, Data, Error>) {
    let duration =
        COMMAND_START_TIME.with(|cell| cell.borrow_mut().take().map(|start| start.elapsed()));
    let duration_ms = u64::try_from(duration.map_or(0, |d| d.as_millis())).unwrap_or_default();

    let (command_name, guild_id, user_id) = command_fields(ctx);
    info!(
        target: COMMAND_TARGET,
        command = %command_name,
        guild_id = %guild_id,
        user_id = %user_id,
        duration_ms = duration_ms,
        event = "end",
        "Command execution completed"
    );
}

/// Log errors that occur during command execution
pub fn log_command_error(error: &FrameworkError<'_, Data, Error>) {
    match error {
        FrameworkError::Command { error, ctx, .. } => {
            let (command_name, guild_id, user_id) = command_fields(*ctx);
            error!(
                target: ERROR_TARGET,
                command = %command_name,
                guild_id = %guild_id,
                user_id = %user_id,
                error = %error,
                "Command error"
            );
        }
        FrameworkError::CommandCheckFailed { error, ctx, .. } => {
            let (command_name, guild_id, user_id) = command_fields(*ctx);
            let error_msg = error
                .as_ref()
                .map_or_else(|| "Check failed".to_string(), ToString::to_string);

            error!(
                target: ERROR_TARGET,
                command = %command_name,
                guild_id = %guild_id,
                user_id = %user_id,
                error = %error_msg,
                "Command check failed"
            );
        }
        err => {
            error!(
                target: ERROR_TARGET,
                error = ?err,
                "Other framework error"
            );
        }
    }
}

/// Log a framework error, then let the moderator know what went wrong
pub async fn handle_command_error(error: FrameworkError<'_, Data, Error>) {
    log_command_error(&error);

    if let FrameworkError::Command { error, ctx, .. } = &error {
        let reply = poise::CreateReply::default()
            .content(format!("Error: {error}"))
            .ephemeral(true);
        if let Err(e) = ctx.send(reply).await {
            warn!(target: ERROR_TARGET, error = %e, "Failed to report command error");
        }
        return;
    }

    if let Err(e) = poise::builtins::on_error(error).await {
        warn!(target: ERROR_TARGET, error = %e, "Failed to handle framework error");
    }
}

pub fn log_console(message: String) {
    info!(
        target: CONSOLE_TARGET,
        message = %message,
        event = "console",
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_targets_are_distinct() {
        let targets = [COMMAND_TARGET, ERROR_TARGET, CASE_TARGET, CONSOLE_TARGET];
        for (i, a) in targets.iter().enumerate() {
            for b in &targets[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert!(CASE_TARGET.starts_with(CONSOLE_TARGET));
    }

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(format!("info,{SERENITY_DIRECTIVE}")).is_ok());
    }
}
