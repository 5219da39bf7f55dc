use chrono::Utc;
use poise::serenity_prelude::{
    self as serenity, ComponentInteraction, CreateInteractionResponse,
    CreateInteractionResponseMessage,
};
use tracing::info;

use crate::{
    database::{
        models::{Battle, Side},
        BattleDatabase, TournamentDatabase, VoteDatabase,
    },
    presentation::{parse_vote_button_id, VOTE_BUTTON_PREFIX},
    BotData, BotError,
};

pub async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, BotData, BotError>,
    data: &BotData,
) -> Result<(), BotError> {
    if let serenity::FullEvent::InteractionCreate {
        interaction: serenity::Interaction::Component(component),
    } = event
    {
        match component.data.custom_id.as_str() {
            vote if vote.starts_with(VOTE_BUTTON_PREFIX) => {
                handle_vote(ctx, data, component).await?;
            }
            _ => {}
        }
    }
    Ok(())
}

async fn reply(
    ctx: &serenity::Context,
    mci: &ComponentInteraction,
    content: impl Into<String>,
) -> Result<(), BotError> {
    let reply = CreateInteractionResponseMessage::new()
        .content(content)
        .ephemeral(true);
    mci.create_response(ctx, CreateInteractionResponse::Message(reply))
        .await?;
    Ok(())
}

/// What became of a ballot.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Ballot {
    /// Counted. `changed` is set when it replaced a vote for the other side.
    Counted { battle: Battle, changed: bool },
    /// The battle is not taking votes.
    Closed,
    /// The battle belongs to no War of this server.
    Elsewhere,
    /// The War has ended.
    Over,
}

/// Records a vote cast from `guild_id`, unless the battle cannot take it.
async fn cast_ballot<DB>(
    database: &DB,
    guild_id: Option<&str>,
    battle_id: i64,
    voter_id: &str,
    side: Side,
    now: i64,
) -> Result<Ballot, BotError>
where
    DB: TournamentDatabase + BattleDatabase + VoteDatabase,
{
    let battle = database.get_battle(battle_id).await?;
    let Some(battle) = battle.filter(|b| b.accepts_votes_at(now)) else {
        return Ok(Ballot::Closed);
    };
    let Some(tournament) = database
        .get_battle_tournament(battle_id)
        .await?
        .filter(|t| Some(t.guild_id.as_str()) == guild_id)
    else {
        return Ok(Ballot::Elsewhere);
    };
    if !tournament.is_open() {
        return Ok(Ballot::Over);
    }

    let previous = database.get_vote(battle_id, voter_id).await?;
    database.record_vote(battle_id, voter_id, side, now).await?;
    Ok(Ballot::Counted {
        battle,
        changed: previous.is_some_and(|vote| vote.choice != side),
    })
}

async fn handle_vote(
    ctx: &serenity::Context,
    data: &BotData,
    mci: &ComponentInteraction,
) -> Result<(), BotError> {
    let Some((battle_id, side)) = parse_vote_button_id(&mci.data.custom_id) else {
        return reply(ctx, mci, "This vote button is broken.").await;
    };
    let guild_id = mci.guild_id.map(|id| id.to_string());
    let voter_id = mci.user.id.to_string();

    let ballot = cast_ballot(
        &data.database,
        guild_id.as_deref(),
        battle_id,
        &voter_id,
        side,
        Utc::now().timestamp(),
    )
    .await?;
    let content = match ballot {
        Ballot::Counted { battle, changed } => {
            info!("{} voted {} in battle {}", voter_id, side, battle_id);
            let name = &battle.combatant(side).name;
            if changed {
                format!("You switched your vote to **{}**.", name)
            } else {
                format!(
                    "Your vote for **{}** has been counted! You can change it until voting closes.",
                    name
                )
            }
        }
        Ballot::Closed => "Voting for this battle is closed.".to_string(),
        Ballot::Elsewhere => "This battle is not part of a War in this server.".to_string(),
        Ballot::Over => "This War is over.".to_string(),
    };
    reply(ctx, mci, content).await
}
