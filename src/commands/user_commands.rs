use std::collections::HashMap;

use chrono::DateTime;
use poise::CreateReply;
use prettytable::{row, Table};
use tracing::{info, instrument};

use crate::{
    commands::checks::is_config_set,
    database::{
        models::{Entrant, Match, Participant},
        BattleDatabase, MatchDatabase, RoundDatabase, TournamentDatabase,
    },
    BotContext, BotData, BotError,
};

use super::CommandsContainer;

/// CommandsContainer for the User commands
pub struct UserCommands;

impl CommandsContainer for UserCommands {
    type Data = BotData;
    type Error = BotError;

    fn get_all() -> Vec<poise::Command<Self::Data, Self::Error>> {
        vec![war_status()]
    }
}

fn slot_name(entrant: &Option<Entrant>, names: &HashMap<&str, &str>) -> String {
    match entrant {
        Some(Entrant::Player(id)) => names.get(id.as_str()).copied().unwrap_or(id.as_str()).to_string(),
        Some(Entrant::Bye) => "BYE".to_string(),
        None => "TBD".to_string(),
    }
}

/// Renders the matches of a round as a plain-text table.
fn round_table(matches: &[Match], participants: &[Participant], battles: &[String]) -> Table {
    let names: HashMap<&str, &str> = participants
        .iter()
        .filter_map(|p| Some((p.entrant.user_id()?, p.display_name.as_str())))
        .collect();

    let mut table = Table::new();
    table.set_titles(row!["No.", "Red", "Blue", "Battle", "Winner"]);
    for (bracket, battle) in matches.iter().zip(battles) {
        let winner = bracket
            .winner
            .as_deref()
            .map(|id| names.get(id).copied().unwrap_or(id))
            .unwrap_or("-");
        table.add_row(row![
            bracket.number,
            slot_name(&bracket.red, &names),
            slot_name(&bracket.blue, &names),
            battle,
            winner
        ]);
    }
    table
}

/// See how the War in this server is going.
#[poise::command(slash_command, prefix_command, guild_only, check = "is_config_set")]
#[instrument]
async fn war_status(ctx: BotContext<'_>) -> Result<(), BotError> {
    let Some(guild_id) = ctx.guild_id().map(|id| id.to_string()) else {
        return Ok(());
    };
    ctx.defer_ephemeral().await?;
    info!("User {} checked the War status", ctx.author().name);

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

    let rounds = database.get_rounds(tournament.tournament_id).await?;
    let Some(round) = rounds.iter().find(|r| r.is_current()) else {
        ctx.send(
            CreateReply::default()
                .content(format!(
                    "War {} ({}) is getting ready. Check back in a moment!",
                    tournament.tournament_id, tournament.event_ref
                ))
                .ephemeral(true),
        )
        .await?;
        return Ok(());
    };

    let participants = database.get_participants(tournament.tournament_id).await?;
    let matches = database.get_matches(round.round_id).await?;
    let mut battles = Vec::with_capacity(matches.len());
    for bracket in &matches {
        let battle = match database.get_open_battle(bracket.match_id).await? {
            Some(battle) => match battle.deadline() {
                Some(deadline) => format!(
                    "#{} until {}",
                    battle.number,
                    DateTime::from_timestamp(deadline, 0)
                        .unwrap_or_default()
                        .format("%H:%M UTC")
                ),
                None => format!("#{} starting", battle.number),
            },
            None => "-".to_string(),
        };
        battles.push(battle);
    }
    let table = round_table(&matches, &participants, &battles);

    ctx.send(
        CreateReply::default()
            .content(format!(
                "**War {}: {}**\nRound {} of {}\n```\n{}\n```",
                tournament.tournament_id,
                tournament.event_ref,
                round.number,
                rounds.len(),
                table
            ))
            .ephemeral(true),
    )
    .await?;

    Ok(())
}
