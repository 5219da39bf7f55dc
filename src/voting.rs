use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::database::models::{Battle, Side};
use crate::database::VoteDatabase;
use crate::BotError;

/// How a battle was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TallyResult {
    Red,
    Blue,
    /// Equal, nonzero votes. The winner was drawn at random.
    Tie,
    /// Nobody voted. The winner was drawn at random.
    Nil,
}

/// One side of a tallied battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideTally {
    pub side: Side,
    pub votes: i64,
}

/// Outcome of a battle's voting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleTally {
    pub result: TallyResult,
    pub winner: SideTally,
    pub loser: SideTally,
}

impl BattleTally {
    /// The same counts with `side` as the winner. A stored decision outranks a fresh count, so a
    /// battle keeps the outcome it was first given.
    pub fn settle(self, side: Side) -> Self {
        if self.winner.side == side {
            return self;
        }
        let result = match self.result {
            TallyResult::Tie | TallyResult::Nil => self.result,
            _ if side == Side::Red => TallyResult::Red,
            _ => TallyResult::Blue,
        };
        BattleTally {
            result,
            winner: self.loser,
            loser: self.winner,
        }
    }
}

/// Decides a battle from its vote counts. Ties and empty ballots are settled with a coin flip.
pub fn tally<R: Rng + ?Sized>(red_votes: i64, blue_votes: i64, rng: &mut R) -> BattleTally {
    let red = SideTally {
        side: Side::Red,
        votes: red_votes,
    };
    let blue = SideTally {
        side: Side::Blue,
        votes: blue_votes,
    };
    let (result, winner, loser) = if red_votes > blue_votes {
        (TallyResult::Red, red, blue)
    } else if blue_votes > red_votes {
        (TallyResult::Blue, blue, red)
    } else {
        let result = if red_votes == 0 {
            TallyResult::Nil
        } else {
            TallyResult::Tie
        };
        if rng.gen_bool(0.5) {
            (result, red, blue)
        } else {
            (result, blue, red)
        }
    };

    BattleTally {
        result,
        winner,
        loser,
    }
}

/// Counts the live votes of a battle and decides it.
pub async fn count_battle_votes<DB: VoteDatabase>(
    database: &DB,
    battle: &Battle,
) -> Result<BattleTally, BotError> {
    let red_votes = database.count_votes(battle.battle_id, Side::Red).await?;
    let blue_votes = database.count_votes(battle.battle_id, Side::Blue).await?;
    let result = tally(red_votes, blue_votes, &mut rand::thread_rng());
    debug!(
        "Battle {} tallied {}-{}: {:?}",
        battle.battle_id, red_votes, blue_votes, result.result
    );
    Ok(result)
}

/// Voting window, in time units, for a round with `ongoing` undecided matches.
///
/// Busy rounds get longer windows so every battle gets a fair look.
pub fn voting_window(ongoing: usize) -> i64 {
    match ongoing {
        0 | 1 => 1,
        2 => 2,
        _ => 3,
    }
}
