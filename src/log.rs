use std::{fs::File, str::FromStr, time::SystemTime};

use anyhow::anyhow;
use poise::serenity_prelude::{ChannelId, Color, CreateEmbed, CreateMessage, Http};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

use crate::{database::ConfigDatabase, BotContext, BotError};

/// Sets up the tracing subscriber for the bot.
pub fn setup_tracing() -> Result<(), BotError> {
    if cfg!(debug_assertions) {
        let filter = EnvFilter::from_default_env()
            .add_directive("none".parse()?)
            .add_directive("war_bot=info".parse()?);

        tracing_subscriber::fmt::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::NONE)
            .pretty()
            .init();

        return Ok(());
    }

    let log_file = File::create("debug.log")?;

    // Only errors make it to the log file in production
    tracing_subscriber::fmt::fmt()
        .with_span_events(FmtSpan::NONE)
        .with_max_level(LevelFilter::ERROR)
        .with_writer(log_file)
        .pretty()
        .init();

    Ok(())
}

fn now_field() -> String {
    format!(
        "<t:{}:F>",
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    )
}

async fn log_channel<DB: ConfigDatabase>(
    database: &DB,
    guild_id: &str,
) -> Result<ChannelId, BotError> {
    let config = database.get_config(guild_id).await?.ok_or(anyhow!(
        "Error sending log: config not found for guild {}",
        guild_id
    ))?;
    Ok(ChannelId::from_str(&config.log_channel_id)?)
}

/// Creates an info log message in the current guild's designated log channel.
pub async fn discord_log_info(
    ctx: BotContext<'_>,
    title: &str,
    mut fields: Vec<(&str, &str, bool)>,
) -> Result<(), BotError> {
    let guild_id = ctx
        .guild_id()
        .ok_or(anyhow!(
            "Error sending info log: Attempted to perform an info log outside of a guild"
        ))?
        .to_string();
    let channel = log_channel(&ctx.data().database, &guild_id).await?;

    info!("ℹ️ {}\n\n{:#?}", title, fields);

    let now_string = now_field();
    fields.push(("Happened at", &now_string, false));

    channel
        .send_message(
            ctx,
            CreateMessage::default().embed(
                CreateEmbed::new()
                    .title(format!("ℹ️ {}", title))
                    .fields(fields)
                    .color(Color::BLURPLE),
            ),
        )
        .await?;

    Ok(())
}

/// Creates an error log message in a guild's designated log channel.
///
/// Takes the HTTP client directly so the ticker can report problems outside of any command.
pub async fn discord_log_error<DB: ConfigDatabase>(
    http: &Http,
    database: &DB,
    guild_id: &str,
    title: &str,
    mut fields: Vec<(&str, &str, bool)>,
) -> Result<(), BotError> {
    let channel = log_channel(database, guild_id).await?;

    let now_string = now_field();
    fields.push(("Seen at", &now_string, false));

    channel
        .send_message(
            http,
            CreateMessage::default()
                .content("⚠️ Something went wrong with a War!")
                .embed(
                    CreateEmbed::new()
                        .title(title)
                        .description("Please check the logs for more information.")
                        .fields(fields)
                        .color(Color::RED),
                ),
        )
        .await?;

    Ok(())
}
