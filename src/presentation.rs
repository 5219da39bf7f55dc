use std::str::FromStr;
use std::sync::Arc;

use anyhow::anyhow;
use poise::serenity_prelude::{
    ButtonStyle, ChannelId, Colour, CreateActionRow, CreateButton, CreateEmbed, CreateMessage,
    EditMessage, Http, MessageId,
};
use tracing::info;

use crate::database::models::{Battle, Entrant, Match, Round, Side, Tournament};
use crate::database::{ConfigDatabase, PgDatabase};
use crate::voting::{BattleTally, TallyResult};
use crate::BotError;

/// Prefix of the custom id carried by vote buttons: `war_vote_<battle id>_<side>`.
pub const VOTE_BUTTON_PREFIX: &str = "war_vote_";

/// Everything players see of a War.
///
/// Implementations may fail at any time (rate limits, deleted channels); the scheduler retries
/// the affected step on the next tick.
#[allow(async_fn_in_trait)]
pub trait Presenter {
    /// Posts the overview of a round, returning a reference to the posted message.
    async fn post_round_banner(
        &self,
        tournament: &Tournament,
        round: &Round,
        matches: &[Match],
        total_rounds: i32,
    ) -> Result<String, BotError>;

    /// Posts a battle with its voting buttons, returning a reference to the posted message.
    async fn post_battle_card(
        &self,
        tournament: &Tournament,
        battle: &Battle,
        deadline: i64,
    ) -> Result<String, BotError>;

    /// Removes the voting buttons of a battle card.
    async fn close_voting_affordance(
        &self,
        tournament: &Tournament,
        battle: &Battle,
    ) -> Result<(), BotError>;

    async fn announce_battle_result(
        &self,
        tournament: &Tournament,
        battle: &Battle,
        tally: &BattleTally,
    ) -> Result<(), BotError>;

    async fn announce_match_result(
        &self,
        tournament: &Tournament,
        bracket: &Match,
        winner: &str,
        loser: &str,
    ) -> Result<(), BotError>;

    /// Announces the end of a War. `None` means it ended without a champion.
    async fn announce_champion(
        &self,
        tournament: &Tournament,
        champion: Option<&str>,
    ) -> Result<(), BotError>;
}

pub fn vote_button_id(battle_id: i64, side: Side) -> String {
    format!("{}{}_{}", VOTE_BUTTON_PREFIX, battle_id, side)
}

/// Parses a vote button id back into the battle and the chosen side.
pub fn parse_vote_button_id(custom_id: &str) -> Option<(i64, Side)> {
    let rest = custom_id.strip_prefix(VOTE_BUTTON_PREFIX)?;
    let (battle_id, side) = rest.split_once('_')?;
    Some((battle_id.parse().ok()?, Side::parse(side)?))
}

pub fn mention(entrant: &Option<Entrant>) -> String {
    match entrant {
        Some(Entrant::Player(id)) => format!("<@{}>", id),
        Some(Entrant::Bye) => "BYE".to_string(),
        None => "TBD".to_string(),
    }
}

/// Posts War messages to the guild's configured war channel.
#[derive(Debug, Clone)]
pub struct DiscordPresenter {
    http: Arc<Http>,
    database: PgDatabase,
}

impl DiscordPresenter {
    pub fn new(http: Arc<Http>, database: PgDatabase) -> Self {
        Self { http, database }
    }

    async fn war_channel(&self, tournament: &Tournament) -> Result<ChannelId, BotError> {
        let config = self
            .database
            .get_config(&tournament.guild_id)
            .await?
            .ok_or(anyhow!(
                "War channel is not configured for guild {}",
                tournament.guild_id
            ))?;
        Ok(ChannelId::from_str(&config.war_channel_id)?)
    }

    async fn send(&self, tournament: &Tournament, message: CreateMessage) -> Result<String, BotError> {
        let channel = self.war_channel(tournament).await?;
        let sent = channel.send_message(self.http.as_ref(), message).await?;
        Ok(sent.id.to_string())
    }
}

impl Presenter for DiscordPresenter {
    async fn post_round_banner(
        &self,
        tournament: &Tournament,
        round: &Round,
        matches: &[Match],
        total_rounds: i32,
    ) -> Result<String, BotError> {
        let title = if round.number == total_rounds {
            "⚔️ The final round of the War begins!".to_string()
        } else {
            format!("⚔️ Round {} of {} begins!", round.number, total_rounds)
        };
        let lines: Vec<String> = matches
            .iter()
            .map(|m| {
                format!(
                    "**Match {}**: {} vs {}",
                    m.number,
                    mention(&m.red),
                    mention(&m.blue)
                )
            })
            .collect();
        let embed = CreateEmbed::new()
            .title(title)
            .description(lines.join("\n"))
            .color(Colour::GOLD);

        self.send(tournament, CreateMessage::new().embed(embed)).await
    }

    async fn post_battle_card(
        &self,
        tournament: &Tournament,
        battle: &Battle,
        deadline: i64,
    ) -> Result<String, BotError> {
        let mut embed = CreateEmbed::new()
            .title(format!("{} vs {}", battle.red.name, battle.blue.name))
            .description(format!(
                "🔴 **{}** fighting for <@{}>\n🔵 **{}** fighting for <@{}>\n\nVoting closes <t:{}:R>.",
                battle.red.name, battle.red.owner_id, battle.blue.name, battle.blue.owner_id, deadline
            ))
            .color(Colour::DARK_PURPLE);
        if let Some(url) = &battle.red.image_url {
            embed = embed.thumbnail(url);
        }
        if let Some(url) = &battle.blue.image_url {
            embed = embed.image(url);
        }
        let buttons = CreateActionRow::Buttons(vec![
            CreateButton::new(vote_button_id(battle.battle_id, Side::Red))
                .label(format!("Vote {}", battle.red.name))
                .style(ButtonStyle::Danger),
            CreateButton::new(vote_button_id(battle.battle_id, Side::Blue))
                .label(format!("Vote {}", battle.blue.name))
                .style(ButtonStyle::Primary),
        ]);

        self.send(
            tournament,
            CreateMessage::new().embed(embed).components(vec![buttons]),
        )
        .await
    }

    async fn close_voting_affordance(
        &self,
        tournament: &Tournament,
        battle: &Battle,
    ) -> Result<(), BotError> {
        let Some(message_ref) = &battle.message_ref else {
            return Ok(());
        };
        let channel = self.war_channel(tournament).await?;
        channel
            .edit_message(
                self.http.as_ref(),
                MessageId::from_str(message_ref)?,
                EditMessage::new().components(vec![]),
            )
            .await?;
        Ok(())
    }

    async fn announce_battle_result(
        &self,
        tournament: &Tournament,
        battle: &Battle,
        tally: &BattleTally,
    ) -> Result<(), BotError> {
        let winner = battle.combatant(tally.winner.side);
        let loser = battle.combatant(tally.loser.side);
        let verdict = match tally.result {
            TallyResult::Nil => "Nobody voted, so fate decided.".to_string(),
            TallyResult::Tie => {
                format!("A {}-{} tie was broken by a coin flip.", tally.winner.votes, tally.loser.votes)
            }
            _ => format!("Won {} to {}.", tally.winner.votes, tally.loser.votes),
        };
        let embed = CreateEmbed::new()
            .title(format!("{} defeats {}", winner.name, loser.name))
            .description(verdict)
            .color(Colour::DARK_GREEN);

        self.send(tournament, CreateMessage::new().embed(embed)).await?;
        Ok(())
    }

    async fn announce_match_result(
        &self,
        tournament: &Tournament,
        bracket: &Match,
        winner: &str,
        loser: &str,
    ) -> Result<(), BotError> {
        let embed = CreateEmbed::new()
            .title(format!("Match {} decided", bracket.number))
            .description(format!("<@{}> eliminates <@{}>!", winner, loser))
            .color(Colour::BLUE);

        self.send(tournament, CreateMessage::new().embed(embed)).await?;
        Ok(())
    }

    async fn announce_champion(
        &self,
        tournament: &Tournament,
        champion: Option<&str>,
    ) -> Result<(), BotError> {
        let embed = match champion {
            Some(champion) => CreateEmbed::new()
                .title("🏆 The War is over!")
                .description(format!("<@{}> is the champion!", champion))
                .color(Colour::GOLD),
            None => CreateEmbed::new()
                .title("The War has ended early")
                .description("No champion was declared this time.")
                .color(Colour::RED),
        };

        self.send(tournament, CreateMessage::new().embed(embed)).await?;
        info!("Announced the end of tournament {}", tournament.tournament_id);
        Ok(())
    }
}
