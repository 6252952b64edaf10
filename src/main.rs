use std::env;
use std::sync::Arc;

use case_ledger::cases::ExpiryCheckRequest;
use case_ledger::{Data, DiscordGateway, Error, commands, handlers, logging};
use poise::serenity_prelude::{self as serenity};
use serenity::GatewayIntents;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Seconds between mute expiry sweeps when not configured
const DEFAULT_EXPIRY_INTERVAL_SECS: u64 = 60;

fn expiry_interval() -> u64 {
    match env::var("CASE_EXPIRY_INTERVAL_SECS") {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            warn!("Invalid CASE_EXPIRY_INTERVAL_SECS {value:?}, using {DEFAULT_EXPIRY_INTERVAL_SECS}");
            DEFAULT_EXPIRY_INTERVAL_SECS
        }),
        Err(_) => DEFAULT_EXPIRY_INTERVAL_SECS,
    }
}

/// Main function to run the bot
async fn async_main() -> Result<(), Error> {
    logging::init()?;

    let token = env::var("DISCORD_TOKEN").map_err(|_| "DISCORD_TOKEN must be set")?;
    let interval_secs = expiry_interval();

    // Wire the expiry channel before the data is shared
    let (expiry_tx, expiry_rx) = mpsc::channel::<ExpiryCheckRequest>(16);
    let mut data = Data::load()
        .await
        .inspect_err(|e| error!("Data files could not be loaded, not starting: {e}"))?;
    data.set_expiry_tx(expiry_tx.clone());
    info!(
        "Loaded {} guild config(s) and {} case(s)",
        data.guild_configs.len(),
        data.cases.store.len()
    );

    let framework_data = data.clone();
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::all(),
            pre_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_start(ctx);
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_end(ctx);
                })
            },
            on_error: |error| Box::pin(logging::handle_command_error(error)),
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                logging::log_console("Registering commands".to_string());
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                let gateway = Arc::new(DiscordGateway::new(ctx.http.clone()));
                framework_data.cases.clone().start_expiry_task(
                    gateway,
                    framework_data.clone(),
                    expiry_rx,
                    interval_secs,
                );
                Ok(framework_data)
            })
        })
        .build();

    let intents = GatewayIntents::non_privileged()
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::MESSAGE_CONTENT;
    let mut client = serenity::ClientBuilder::new(token, intents)
        .event_handler(handlers::Handler::new(data.clone()))
        .framework(framework)
        .await?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {e}");
            return;
        }
        info!("Shutting down");
        if expiry_tx.send(ExpiryCheckRequest::Shutdown).await.is_err() {
            warn!("Mute expiry task already stopped");
        }
        shard_manager.shutdown_all().await;
    });

    info!("Starting bot...");
    client.start().await?;

    if let Err(e) = data.save().await {
        error!("Failed to save data on shutdown: {e}");
    }
    Ok(())
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to build runtime: {err}");
            return;
        }
    };

    if let Err(err) = runtime.block_on(async_main()) {
        eprintln!("Error: {err}");
    }
}
