use tracing::{error, info, info_span, warn};

use config::WarConfig;
use database::PgDatabase;
use poise::{serenity_prelude as serenity, CreateReply};

use commands::{manager_commands::ManagerCommands, user_commands::UserCommands, CommandsContainer};
use ticker::Ticker;

use crate::log::discord_log_error;

/// Carries a match winner into the next round.
mod advancement;
/// Bracket construction and the pure rules of the match graph.
mod bracket;
/// All the commands that the bot can run.
///
/// Additionally, it contains the `CommandsContainer` trait that groups all the commands together
/// as well as checks used by various commands.
mod commands;
mod config;
/// Traits and types used for interacting with the database.
mod database;
mod error;
/// Handles button presses on War messages.
mod event_handler;
/// Contains functions for logging.
mod log;
/// Everything players see of a War.
mod presentation;
/// Who takes part in a War and which characters they fight with.
mod roster;
/// The state machine that plays a War round by round.
mod scheduler;
mod seed;
/// Wakes the scheduler up for every open War.
mod ticker;
/// Vote counting and voting windows.
mod voting;

/// Stores data used by the bot.
///
/// Accessible by all bot commands through Context.
#[derive(Debug, Clone)]
pub struct Data {
    database: PgDatabase,
    config: WarConfig,
}

/// Convenience alias kept for the command containers.
pub type BotData = Data;

/// A thread-safe Error type used by the bot.
pub type BotError = anyhow::Error;

/// A context that gives the bot information about the action that invoked it.
///
/// It also includes other useful data that the bot uses such as the database.
/// You can access the data in commands by using ``ctx.data()``.
pub type BotContext<'a> = poise::Context<'a, BotData, BotError>;

#[tokio::main]
async fn main() {
    if let Err(e) = log::setup_tracing() {
        panic!("Error trying to setup tracing: {}", e);
    }

    if let Err(e) = run().await {
        panic!("Error trying to run the bot: {}", e);
    }
}

/// The main function that runs the bot.
async fn run() -> Result<(), BotError> {
    let setup_span = info_span!("bot_setup");
    let _guard = setup_span.enter();
    // Load the .env file only in the development environment (bypassed with the --release flag)
    #[cfg(debug_assertions)]
    dotenv::dotenv().ok();

    let discord_token =
        std::env::var("DISCORD_TOKEN").expect("Expected DISCORD_TOKEN as an environment variable");
    info!("Successfully loaded Discord Token");
    let database_url =
        std::env::var("DATABASE_URL").expect("Expected DATABASE_URL as an environment variable");
    let war_config = WarConfig::from_env()?;
    info!("Loaded War configuration: {:?}", war_config);

    let pg_database = PgDatabase::connect(&database_url).await?;
    pg_database.migrate().await?;
    info!("Database is up to date");

    let commands: Vec<_> = vec![ManagerCommands::get_all(), UserCommands::get_all()]
        .into_iter()
        .flatten()
        .collect();
    commands.iter().for_each(|c| info!("Command: {}", c.name));

    let intents = serenity::GatewayIntents::non_privileged();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands,
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler::event_handler(ctx, event, framework, data))
            },
            on_error: |error| {
                Box::pin(async move {
                    let error_msg = match error {
                        poise::FrameworkError::GuildOnly { .. }
                        | poise::FrameworkError::DmOnly { .. }
                        | poise::FrameworkError::UnknownCommand { .. } => return,
                        poise::FrameworkError::MissingUserPermissions { .. } => {
                            "You need the Manage Server permission for this.".to_string()
                        }
                        poise::FrameworkError::CommandCheckFailed { ref error, .. } => {
                            match error {
                                Some(error) => format!("{}", error),
                                None => return,
                            }
                        }
                        poise::FrameworkError::Setup { ref error, .. } => format!("{}", error),
                        poise::FrameworkError::EventHandler { ref error, .. } => {
                            format!("{}", error)
                        }
                        poise::FrameworkError::Command { ref error, .. } => format!("{}", error),
                        poise::FrameworkError::ArgumentParse { ref error, .. } => {
                            format!("{}", error)
                        }
                        _ => "No cause available for this error type.".to_string(),
                    };
                    error!("Error in command: {:?}", error);
                    let ctx = match error.ctx() {
                        Some(ctx) => ctx,
                        None => {
                            error!("No context in this error");
                            return;
                        }
                    };
                    if let Err(e) = ctx
                        .send(
                            CreateReply::default()
                                .content("Something went wrong. Please let the bot maintainers know if the issue persists.")
                                .ephemeral(true),
                        )
                        .await
                    {
                        error!("Error sending generic error message to user: {}", e);
                    }
                    let guild_id = match ctx.guild_id() {
                        Some(guild_id) => guild_id.to_string(),
                        None => {
                            warn!("No guild id in this error context. Cannot send error message to log channel.");
                            return;
                        }
                    };

                    let user_field = format!("<@{}>", ctx.author().id);
                    let fields = vec![
                        ("Cause", error_msg.as_str(), false),
                        ("User", user_field.as_str(), false),
                    ];

                    discord_log_error(
                        &ctx.serenity_context().http,
                        &ctx.data().database,
                        &guild_id,
                        &error.to_string(),
                        fields,
                    )
                    .await
                    .unwrap_or_else(|e| error!("Error sending error message to log channel: {:?}", e));
                })
            },
            ..Default::default()
        })
        .setup(|ctx, ready, framework| {
            Box::pin(async move {
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                info!("Ready as {}", ready.user.name);

                let data = Data {
                    database: pg_database,
                    config: war_config,
                };
                let ticker = Ticker::new(ctx.http.clone(), data.database.clone(), data.config.clone());
                tokio::spawn(ticker.run());

                Ok(data)
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(discord_token, intents)
        .framework(framework)
        .await?;

    client.start().await?;

    Ok(())
}
