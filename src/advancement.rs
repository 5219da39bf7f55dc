use tracing::{info, instrument};

use crate::bracket::{last_round, next_match_number};
use crate::database::models::{Entrant, Match, Round, Tournament};
use crate::database::{MatchDatabase, Propagation};
use crate::error::WarError;
use crate::BotError;

/// What [`set_match_winner`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advancement {
    /// The match already had this winner. Nothing was written.
    Unchanged,
    /// The winner moved into the given match of the next round.
    Propagated { next_match_id: i64 },
    /// The match was the final and the winner is the champion.
    Champion,
}

/// Records the winner of a match and carries them into the next round.
///
/// The stored match is reloaded first, so a stale `decided` is harmless. Setting the same
/// winner twice is a no-op; setting a different one is a state violation.
#[instrument(skip(database, tournament, round, decided), fields(tournament_id = tournament.tournament_id, round = round.number, bracket = decided.number))]
pub async fn set_match_winner<DB: MatchDatabase>(
    database: &DB,
    tournament: &Tournament,
    round: &Round,
    total_rounds: i32,
    decided: &Match,
    winner: &str,
    now: i64,
) -> Result<Advancement, BotError> {
    if round.end.is_some() {
        return Err(WarError::StateViolation(format!(
            "Round {} has already ended, match {} cannot change",
            round.number, decided.number
        ))
        .into());
    }
    if decided.round_id != round.round_id {
        return Err(WarError::DataIntegrity(format!(
            "Match {} does not belong to round {}",
            decided.match_id, round.round_id
        ))
        .into());
    }

    let current = database
        .get_match_in_round(tournament.tournament_id, round.number, decided.number)
        .await?
        .ok_or_else(|| {
            WarError::DataIntegrity(format!(
                "Match {} of round {} is missing",
                decided.number, round.number
            ))
        })?;
    if !current.has_player(winner) {
        return Err(WarError::StateViolation(format!(
            "{} is not playing in match {} of round {}",
            winner, current.number, round.number
        ))
        .into());
    }
    match current.winner.as_deref() {
        Some(existing) if existing == winner => {
            info!("Match {} already won by {}", current.number, winner);
            return Ok(Advancement::Unchanged);
        }
        Some(existing) => {
            return Err(WarError::StateViolation(format!(
                "Match {} was already won by {}, refusing {}",
                current.number, existing, winner
            ))
            .into());
        }
        None => {}
    }

    let mut updated = current;
    updated.winner = Some(winner.to_string());
    updated.end = Some(now);

    if last_round(round, total_rounds) {
        database
            .commit_match_winner(
                &updated,
                Propagation::Champion {
                    tournament_id: tournament.tournament_id,
                },
            )
            .await?;
        info!("{} won the final of tournament {}", winner, tournament.tournament_id);
        return Ok(Advancement::Champion);
    }

    let target = next_match_number(updated.number);
    let mut next = database
        .get_match_in_round(tournament.tournament_id, round.number + 1, target)
        .await?
        .ok_or_else(|| {
            WarError::DataIntegrity(format!(
                "Match {} of round {} is missing",
                target,
                round.number + 1
            ))
        })?;
    let entrant = Some(Entrant::Player(winner.to_string()));
    if next.red.is_none() {
        next.red = entrant;
    } else if next.blue.is_none() {
        next.blue = entrant;
    } else {
        return Err(WarError::DataIntegrity(format!(
            "Match {} of round {} is already full",
            target,
            round.number + 1
        ))
        .into());
    }

    database
        .commit_match_winner(&updated, Propagation::NextMatch(&next))
        .await?;
    info!(
        "{} advances to match {} of round {}",
        winner,
        target,
        round.number + 1
    );

    Ok(Advancement::Propagated {
        next_match_id: next.match_id,
    })
}
