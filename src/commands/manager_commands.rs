use chrono::Utc;
use poise::{serenity_prelude as serenity, CreateReply};
use tracing::{error, info, instrument};

use crate::{
    commands::checks::is_config_set,
    database::{ConfigDatabase, TournamentDatabase},
    error::{ErrorClass, WarError},
    log::discord_log_info,
    presentation::DiscordPresenter,
    scheduler::{cancel_tournament, open_tournament},
    BotContext, BotData, BotError,
};

use super::CommandsContainer;

/// CommandsContainer for the Manager commands
pub struct ManagerCommands;

impl CommandsContainer for ManagerCommands {
    type Data = BotData;
    type Error = BotError;

    fn get_all() -> Vec<poise::Command<Self::Data, Self::Error>> {
        vec![war_config(), war_start(), war_cancel()]
    }
}

/// Set the War configuration for a guild
///
/// - War Channel: where rounds, battles and results are posted and where members vote.
/// - Log Channel: where the bot reports what it does and anything that goes wrong.
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "MANAGE_GUILD"
)]
#[instrument]
async fn war_config(
    ctx: BotContext<'_>,
    #[description = "Rounds, battles and votes happen here"] channel: serenity::Channel,
    #[description = "This channel logs activities"] log_channel: serenity::Channel,
) -> Result<(), BotError> {
    let Some(guild_id) = ctx.guild_id() else {
        return Ok(());
    };

    let war_channel_id = match channel.guild() {
        Some(channel) => channel.id.to_string(),
        None => {
            ctx.send(
                CreateReply::default()
                    .content("Please enter a valid server channel as the War channel")
                    .ephemeral(true),
            )
            .await?;
            error!("Invalid War channel entered by {}", ctx.author());
            return Ok(());
        }
    };

    let log_channel_id = match log_channel.guild() {
        Some(channel) => channel.id.to_string(),
        None => {
            ctx.send(
                CreateReply::default()
                    .content("Please enter a valid server channel as the log channel")
                    .ephemeral(true),
            )
            .await?;
            error!("Invalid log channel entered by {}", ctx.author());
            return Ok(());
        }
    };

    ctx.data()
        .database
        .set_config(&guild_id.to_string(), &war_channel_id, &log_channel_id)
        .await?;

    ctx.send(
        CreateReply::default()
            .content("Successfully set the configuration. You can run the same command again to update the configuration.")
            .ephemeral(true),
    )
    .await?;

    info!("Set the War configuration for guild {}", guild_id);

    Ok(())
}

/// Start a War between everyone holding characters in this server
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "MANAGE_GUILD",
    check = "is_config_set"
)]
#[instrument]
async fn war_start(
    ctx: BotContext<'_>,
    #[description = "What this War is about"] event: String,
) -> Result<(), BotError> {
    let Some(guild_id) = ctx.guild_id().map(|id| id.to_string()) else {
        return Ok(());
    };
    ctx.defer_ephemeral().await?;

    let database = &ctx.data().database;
    let tournament = match open_tournament(
        database,
        database,
        &guild_id,
        &event,
        Utc::now().timestamp(),
    )
    .await
    {
        Ok(tournament) => tournament,
        Err(error) if WarError::classify(&error) == ErrorClass::Configuration => {
            ctx.send(
                CreateReply::default()
                    .content(format!("The War could not start: {}", error))
                    .ephemeral(true),
            )
            .await?;
            return Ok(());
        }
        Err(error) => return Err(error),
    };
    let participants = database
        .get_participants(tournament.tournament_id)
        .await?
        .iter()
        .filter(|p| !p.entrant.is_bye())
        .count();

    ctx.send(
        CreateReply::default()
            .content(format!(
                "War {} has begun with {} participants! The first round will be posted shortly.",
                tournament.tournament_id, participants
            ))
            .ephemeral(true),
    )
    .await?;

    let id_field = tournament.tournament_id.to_string();
    let participants_field = participants.to_string();
    let manager_field = format!("<@{}>", ctx.author().id);
    discord_log_info(
        ctx,
        "A War has started",
        vec![
            ("Tournament", &id_field, false),
            ("Event", &event, false),
            ("Participants", &participants_field, false),
            ("Started by", &manager_field, false),
        ],
    )
    .await?;

    Ok(())
}

/// Stop the War running in this server without a champion
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "MANAGE_GUILD",
    check = "is_config_set"
)]
#[instrument]
async fn war_cancel(ctx: BotContext<'_>) -> Result<(), BotError> {
    let Some(guild_id) = ctx.guild_id().map(|id| id.to_string()) else {
        return Ok(());
    };
    ctx.defer_ephemeral().await?;

    let database = &ctx.data().database;
    let Some(tournament) = database.get_open_tournament(&guild_id).await? else {
        ctx.send(
            CreateReply::default()
                .content("There is no War running in this server.")
                .ephemeral(true),
        )
        .await?;
        return Ok(());
    };

    let presenter = DiscordPresenter::new(ctx.serenity_context().http.clone(), database.clone());
    cancel_tournament(
        database,
        &presenter,
        tournament.tournament_id,
        Utc::now().timestamp(),
    )
    .await?;

    ctx.send(
        CreateReply::default()
            .content(format!("War {} has been cancelled.", tournament.tournament_id))
            .ephemeral(true),
    )
    .await?;

    let id_field = tournament.tournament_id.to_string();
    let manager_field = format!("<@{}>", ctx.author().id);
    discord_log_info(
        ctx,
        "A War was cancelled",
        vec![
            ("Tournament", &id_field, false),
            ("Cancelled by", &manager_field, false),
        ],
    )
    .await?;

    Ok(())
}
