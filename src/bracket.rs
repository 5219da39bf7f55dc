use std::collections::HashSet;

use crate::database::models::{Entrant, Match, Participant, RankedPlayer, Round};
use crate::error::WarError;
use crate::seed::seed_order;
use crate::BotError;

pub const BYE_NAME: &str = "BYE";

/// A match as laid out by the builder, before it gets an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchPlan {
    pub number: i32,
    pub red: Option<Entrant>,
    pub blue: Option<Entrant>,
}

/// A round as laid out by the builder, before it gets an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundPlan {
    pub number: i32,
    pub start: Option<i64>,
    pub matches: Vec<MatchPlan>,
}

/// The full skeleton of a single-elimination bracket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bracket {
    /// Seeded participants, byes last.
    pub participants: Vec<Participant>,
    pub rounds: Vec<RoundPlan>,
}

impl Bracket {
    pub fn bye_count(&self) -> usize {
        self.participants
            .iter()
            .filter(|p| p.entrant.is_bye())
            .count()
    }
}

/// Number of rounds needed for `participants` entrants: `ceil(log2(participants))`.
pub fn round_count(participants: usize) -> u32 {
    match participants {
        0 | 1 => 0,
        n => usize::BITS - (n - 1).leading_zeros(),
    }
}

/// Builds the bracket for a ranked list of players.
///
/// Players are seeded by ranking (stable for equal rankings) and padded with byes up to the
/// next power of two. Round 1 is fully populated and starts at `now`; later rounds only
/// contain placeholder matches with unset slots.
pub fn build_bracket(mut players: Vec<RankedPlayer>, now: i64) -> Result<Bracket, BotError> {
    if players.len() < 2 {
        return Err(WarError::Configuration(format!(
            "A War needs at least 2 participants, found {}",
            players.len()
        ))
        .into());
    }
    let mut seen = HashSet::new();
    if let Some(duplicate) = players.iter().find(|p| !seen.insert(p.user_id.as_str())) {
        return Err(WarError::Configuration(format!(
            "Player {} is ranked more than once",
            duplicate.user_id
        ))
        .into());
    }

    players.sort_by_key(|p| p.ranking);

    let rounds = round_count(players.len());
    let size = 1usize << rounds;
    let last_ranking = players.last().map(|p| p.ranking).unwrap_or_default();

    let mut participants: Vec<Participant> = players
        .into_iter()
        .map(|p| Participant {
            entrant: Entrant::Player(p.user_id),
            display_name: p.display_name,
            ranking: p.ranking,
        })
        .collect();
    let byes = size - participants.len();
    participants.extend((1..=byes).map(|i| Participant {
        entrant: Entrant::Bye,
        display_name: BYE_NAME.to_string(),
        ranking: last_ranking + i as i32,
    }));

    let order = seed_order(rounds);
    let first_round = order
        .chunks(2)
        .enumerate()
        .map(|(j, pair)| MatchPlan {
            number: j as i32 + 1,
            red: Some(participants[pair[0] - 1].entrant.clone()),
            blue: Some(participants[pair[1] - 1].entrant.clone()),
        })
        .collect();

    let mut plans = vec![RoundPlan {
        number: 1,
        start: Some(now),
        matches: first_round,
    }];
    for number in 2..=rounds as i32 {
        let match_count = size >> number;
        plans.push(RoundPlan {
            number,
            start: None,
            matches: (1..=match_count as i32)
                .map(|m| MatchPlan {
                    number: m,
                    red: None,
                    blue: None,
                })
                .collect(),
        });
    }

    Ok(Bracket {
        participants,
        rounds: plans,
    })
}

/// The match in the following round that receives the winner of match `number`.
pub fn next_match_number(number: i32) -> i32 {
    (number + 1) / 2
}

/// Whether the match is a bye. Byes are always seeded into the blue slot.
pub fn match_has_bye(bracket: &Match) -> bool {
    matches!(bracket.blue, Some(Entrant::Bye))
}

/// Whether every match of a round has a recorded winner.
pub fn round_finished(matches: &[Match]) -> bool {
    !matches.is_empty() && matches.iter().all(Match::is_decided)
}

pub fn last_round(round: &Round, total_rounds: i32) -> bool {
    round.number == total_rounds
}

/// Matches of a round still waiting for a winner.
pub fn ongoing_matches(matches: &[Match]) -> usize {
    matches.iter().filter(|m| !m.is_decided()).count()
}
