use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use anyhow::anyhow;

use super::models::*;
use super::{
    BattleDatabase, MatchDatabase, Propagation, RoundDatabase, RoundSuccessor, TournamentDatabase,
    VoteDatabase,
};
use crate::bracket::Bracket;
use crate::error::WarError;
use crate::roster::Roster;
use crate::BotError;

/// A store that keeps every record in memory, with the same guarantees as [`super::PgDatabase`].
///
/// It doubles as a roster: players and their characters are registered per guild.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    tournaments: Vec<Tournament>,
    participants: HashMap<i64, Vec<Participant>>,
    rounds: Vec<Round>,
    matches: Vec<Match>,
    battles: Vec<Battle>,
    votes: Vec<Vote>,
    players: HashMap<String, Vec<RankedPlayer>>,
    pools: HashMap<String, Vec<Combatant>>,
    eliminated: HashSet<(i64, i64)>,
    fail_eliminations: bool,
    fail_battle_updates: bool,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

impl MemoryDatabase {
    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap()
    }

    /// Registers a guild member with `characters` characters of their own.
    pub fn add_player(&self, guild_id: &str, user_id: &str, ranking: i32, characters: usize) {
        let mut state = self.lock();
        state
            .players
            .entry(guild_id.to_string())
            .or_default()
            .push(RankedPlayer {
                user_id: user_id.to_string(),
                display_name: user_id.to_uppercase(),
                ranking,
            });
        let pool: Vec<Combatant> = (0..characters)
            .map(|i| Combatant {
                combatant_id: 0,
                owner_id: user_id.to_string(),
                name: format!("{}'s character {}", user_id, i + 1),
                image_url: None,
            })
            .collect();
        for mut combatant in pool {
            combatant.combatant_id = state.next_id();
            state.pools.entry(user_id.to_string()).or_default().push(combatant);
        }
    }

    /// Makes every following `eliminate_combatant` call fail until switched off.
    pub fn fail_eliminations(&self, fail: bool) {
        self.lock().fail_eliminations = fail;
    }

    /// Makes every following `update_battle` call fail until switched off.
    pub fn fail_battle_updates(&self, fail: bool) {
        self.lock().fail_battle_updates = fail;
    }

    pub fn is_eliminated(&self, match_id: i64, combatant: &Combatant) -> bool {
        self.lock()
            .eliminated
            .contains(&(match_id, combatant.combatant_id))
    }

    pub fn battles(&self, match_id: i64) -> Vec<Battle> {
        self.lock()
            .battles
            .iter()
            .filter(|b| b.match_id == match_id)
            .cloned()
            .collect()
    }

    pub fn all_battles(&self) -> Vec<Battle> {
        self.lock().battles.clone()
    }

    pub fn all_matches(&self) -> Vec<Match> {
        self.lock().matches.clone()
    }
}

impl TournamentDatabase for MemoryDatabase {
    async fn create_tournament(
        &self,
        guild_id: &str,
        event_ref: &str,
        now: i64,
    ) -> Result<Tournament, BotError> {
        let mut state = self.lock();
        if state
            .tournaments
            .iter()
            .any(|t| t.guild_id == guild_id && t.is_open())
        {
            return Err(WarError::Configuration(format!(
                "Guild {} already has an open War",
                guild_id
            ))
            .into());
        }
        let tournament = Tournament {
            tournament_id: state.next_id(),
            guild_id: guild_id.to_string(),
            event_ref: event_ref.to_string(),
            start: now,
            end: None,
            status: TournamentStatus::Running,
            champion: None,
        };
        state.tournaments.push(tournament.clone());
        Ok(tournament)
    }

    async fn get_tournament(&self, tournament_id: i64) -> Result<Option<Tournament>, BotError> {
        Ok(self
            .lock()
            .tournaments
            .iter()
            .find(|t| t.tournament_id == tournament_id)
            .cloned())
    }

    async fn get_open_tournament(&self, guild_id: &str) -> Result<Option<Tournament>, BotError> {
        Ok(self
            .lock()
            .tournaments
            .iter()
            .find(|t| t.guild_id == guild_id && t.is_open())
            .cloned())
    }

    async fn get_open_tournaments(&self) -> Result<Vec<Tournament>, BotError> {
        Ok(self
            .lock()
            .tournaments
            .iter()
            .filter(|t| t.is_open())
            .cloned()
            .collect())
    }

    async fn get_battle_tournament(
        &self,
        battle_id: i64,
    ) -> Result<Option<Tournament>, BotError> {
        let state = self.lock();
        let round_id = state
            .battles
            .iter()
            .find(|b| b.battle_id == battle_id)
            .and_then(|b| state.matches.iter().find(|m| m.match_id == b.match_id))
            .map(|m| m.round_id);
        let tournament_id = round_id
            .and_then(|id| state.rounds.iter().find(|r| r.round_id == id))
            .map(|r| r.tournament_id);
        Ok(tournament_id.and_then(|id| {
            state
                .tournaments
                .iter()
                .find(|t| t.tournament_id == id)
                .cloned()
        }))
    }

    async fn close_tournament(
        &self,
        tournament_id: i64,
        status: TournamentStatus,
        champion: Option<&str>,
        now: i64,
    ) -> Result<(), BotError> {
        let mut state = self.lock();
        if let Some(tournament) = state
            .tournaments
            .iter_mut()
            .find(|t| t.tournament_id == tournament_id && t.is_open())
        {
            tournament.end = Some(now);
            tournament.status = status;
            tournament.champion = champion.map(str::to_string);
        }
        Ok(())
    }

    async fn get_participants(&self, tournament_id: i64) -> Result<Vec<Participant>, BotError> {
        Ok(self
            .lock()
            .participants
            .get(&tournament_id)
            .cloned()
            .unwrap_or_default())
    }
}

impl RoundDatabase for MemoryDatabase {
    async fn create_rounds(
        &self,
        tournament_id: i64,
        bracket: &Bracket,
    ) -> Result<Vec<Round>, BotError> {
        let mut state = self.lock();
        if state.rounds.iter().any(|r| r.tournament_id == tournament_id) {
            return Err(WarError::Configuration(format!(
                "The bracket of tournament {} has already been built",
                tournament_id
            ))
            .into());
        }
        state
            .participants
            .insert(tournament_id, bracket.participants.clone());

        let mut rounds = Vec::new();
        for plan in &bracket.rounds {
            let round = Round {
                round_id: state.next_id(),
                tournament_id,
                number: plan.number,
                message_ref: None,
                start: plan.start,
                end: None,
            };
            for bracket_match in &plan.matches {
                let created = Match {
                    match_id: state.next_id(),
                    round_id: round.round_id,
                    number: bracket_match.number,
                    red: bracket_match.red.clone(),
                    blue: bracket_match.blue.clone(),
                    winner: None,
                    start: None,
                    end: None,
                };
                state.matches.push(created);
            }
            state.rounds.push(round.clone());
            rounds.push(round);
        }
        Ok(rounds)
    }

    async fn get_rounds(&self, tournament_id: i64) -> Result<Vec<Round>, BotError> {
        let mut rounds: Vec<Round> = self
            .lock()
            .rounds
            .iter()
            .filter(|r| r.tournament_id == tournament_id)
            .cloned()
            .collect();
        rounds.sort_by_key(|r| r.number);
        Ok(rounds)
    }

    async fn get_current_round(&self, tournament_id: i64) -> Result<Option<Round>, BotError> {
        Ok(self
            .get_rounds(tournament_id)
            .await?
            .into_iter()
            .find(Round::is_current))
    }

    async fn update_round(&self, round: &Round) -> Result<(), BotError> {
        let mut state = self.lock();
        if let Some(stored) = state.rounds.iter_mut().find(|r| r.round_id == round.round_id) {
            *stored = round.clone();
        }
        Ok(())
    }

    async fn start_round_matches(&self, round_id: i64, now: i64) -> Result<(), BotError> {
        let mut state = self.lock();
        if let Some(round) = state.rounds.iter_mut().find(|r| r.round_id == round_id) {
            round.start.get_or_insert(now);
        }
        for bracket_match in state.matches.iter_mut().filter(|m| m.round_id == round_id) {
            bracket_match.start.get_or_insert(now);
        }
        Ok(())
    }

    async fn finish_round(
        &self,
        ended: &Round,
        successor: RoundSuccessor<'_>,
    ) -> Result<(), BotError> {
        let end = ended.end.ok_or_else(|| {
            WarError::StateViolation(format!("Round {} has no end timestamp", ended.round_id))
        })?;
        let mut state = self.lock();
        let round = state
            .rounds
            .iter_mut()
            .find(|r| r.round_id == ended.round_id && r.end.is_none())
            .ok_or_else(|| {
                WarError::StateViolation(format!("Round {} has already ended", ended.round_id))
            })?;
        round.end = Some(end);

        match successor {
            RoundSuccessor::Next(next) => {
                if let Some(round) = state
                    .rounds
                    .iter_mut()
                    .find(|r| r.round_id == next.round_id && r.start.is_none())
                {
                    round.start = next.start;
                }
            }
            RoundSuccessor::Final {
                tournament_id,
                status,
                champion,
            } => {
                if let Some(tournament) = state
                    .tournaments
                    .iter_mut()
                    .find(|t| t.tournament_id == tournament_id && t.is_open())
                {
                    tournament.end = Some(end);
                    tournament.status = status;
                    tournament.champion = champion.map(str::to_string);
                }
            }
        }
        Ok(())
    }
}

impl MatchDatabase for MemoryDatabase {
    async fn get_matches(&self, round_id: i64) -> Result<Vec<Match>, BotError> {
        let mut matches: Vec<Match> = self
            .lock()
            .matches
            .iter()
            .filter(|m| m.round_id == round_id)
            .cloned()
            .collect();
        matches.sort_by_key(|m| m.number);
        Ok(matches)
    }

    async fn get_match_in_round(
        &self,
        tournament_id: i64,
        round_number: i32,
        match_number: i32,
    ) -> Result<Option<Match>, BotError> {
        let state = self.lock();
        let Some(round) = state
            .rounds
            .iter()
            .find(|r| r.tournament_id == tournament_id && r.number == round_number)
        else {
            return Ok(None);
        };
        Ok(state
            .matches
            .iter()
            .find(|m| m.round_id == round.round_id && m.number == match_number)
            .cloned())
    }

    async fn commit_match_winner(
        &self,
        decided: &Match,
        propagation: Propagation<'_>,
    ) -> Result<(), BotError> {
        let winner = decided.winner.clone().ok_or_else(|| {
            WarError::StateViolation(format!("Match {} has no winner to commit", decided.match_id))
        })?;
        let mut state = self.lock();
        let stored = state
            .matches
            .iter_mut()
            .find(|m| m.match_id == decided.match_id && m.winner.is_none())
            .ok_or_else(|| {
                WarError::StateViolation(format!("Match {} already has a winner", decided.match_id))
            })?;
        stored.winner = Some(winner.clone());
        stored.end = decided.end;

        match propagation {
            Propagation::NextMatch(next) => {
                if let Some(stored) = state.matches.iter_mut().find(|m| m.match_id == next.match_id) {
                    stored.red = next.red.clone();
                    stored.blue = next.blue.clone();
                }
            }
            Propagation::Champion { tournament_id } => {
                if let Some(tournament) = state
                    .tournaments
                    .iter_mut()
                    .find(|t| t.tournament_id == tournament_id)
                {
                    tournament.champion = Some(winner);
                }
            }
        }
        Ok(())
    }
}

impl BattleDatabase for MemoryDatabase {
    async fn create_battle(
        &self,
        match_id: i64,
        red: &Combatant,
        blue: &Combatant,
    ) -> Result<Battle, BotError> {
        let mut state = self.lock();
        if state
            .battles
            .iter()
            .any(|b| b.match_id == match_id && b.end.is_none())
        {
            return Err(WarError::StateViolation(format!(
                "Match {} already has an open battle",
                match_id
            ))
            .into());
        }
        let number = state.battles.iter().filter(|b| b.match_id == match_id).count() as i32 + 1;
        let battle = Battle {
            battle_id: state.next_id(),
            match_id,
            number,
            red: red.clone(),
            blue: blue.clone(),
            message_ref: None,
            start: None,
            end: None,
            window_secs: 0,
            winner: None,
        };
        state.battles.push(battle.clone());
        Ok(battle)
    }

    async fn get_battle(&self, battle_id: i64) -> Result<Option<Battle>, BotError> {
        Ok(self
            .lock()
            .battles
            .iter()
            .find(|b| b.battle_id == battle_id)
            .cloned())
    }

    async fn get_open_battle(&self, match_id: i64) -> Result<Option<Battle>, BotError> {
        Ok(self
            .lock()
            .battles
            .iter()
            .find(|b| b.match_id == match_id && b.end.is_none())
            .cloned())
    }

    async fn update_battle(&self, battle: &Battle) -> Result<(), BotError> {
        let mut state = self.lock();
        if state.fail_battle_updates {
            return Err(anyhow!("Lost the connection while updating battle {}", battle.battle_id));
        }
        if let Some(stored) = state
            .battles
            .iter_mut()
            .find(|b| b.battle_id == battle.battle_id)
        {
            let winner = stored.winner.take();
            *stored = battle.clone();
            stored.winner = winner;
        }
        Ok(())
    }

    async fn decide_battle(&self, battle_id: i64, winner: Side) -> Result<Side, BotError> {
        let mut state = self.lock();
        let stored = state
            .battles
            .iter_mut()
            .find(|b| b.battle_id == battle_id)
            .ok_or_else(|| WarError::DataIntegrity(format!("Battle {} does not exist", battle_id)))?;
        Ok(*stored.winner.get_or_insert(winner))
    }
}

impl VoteDatabase for MemoryDatabase {
    async fn record_vote(
        &self,
        battle_id: i64,
        voter_id: &str,
        choice: Side,
        now: i64,
    ) -> Result<(), BotError> {
        let mut state = self.lock();
        state
            .votes
            .retain(|v| !(v.battle_id == battle_id && v.voter_id == voter_id));
        let vote = Vote {
            vote_id: state.next_id(),
            battle_id,
            choice,
            voter_id: voter_id.to_string(),
            cast_at: now,
        };
        state.votes.push(vote);
        Ok(())
    }

    async fn get_vote(&self, battle_id: i64, voter_id: &str) -> Result<Option<Vote>, BotError> {
        Ok(self
            .lock()
            .votes
            .iter()
            .find(|v| v.battle_id == battle_id && v.voter_id == voter_id)
            .cloned())
    }

    async fn count_votes(&self, battle_id: i64, choice: Side) -> Result<i64, BotError> {
        Ok(self
            .lock()
            .votes
            .iter()
            .filter(|v| v.battle_id == battle_id && v.choice == choice)
            .count() as i64)
    }
}

impl Roster for MemoryDatabase {
    async fn rank_participants(&self, guild_id: &str) -> Result<Vec<RankedPlayer>, BotError> {
        let mut players = self
            .lock()
            .players
            .get(guild_id)
            .cloned()
            .unwrap_or_default();
        players.sort_by_key(|p| p.ranking);
        Ok(players)
    }

    async fn has_eligible_combatant(
        &self,
        match_id: i64,
        user_id: &str,
    ) -> Result<bool, BotError> {
        Ok(self.pick_eligible_combatant(match_id, user_id).await?.is_some())
    }

    async fn pick_eligible_combatant(
        &self,
        match_id: i64,
        user_id: &str,
    ) -> Result<Option<Combatant>, BotError> {
        let state = self.lock();
        Ok(state.pools.get(user_id).and_then(|pool| {
            pool.iter()
                .find(|c| !state.eliminated.contains(&(match_id, c.combatant_id)))
                .cloned()
        }))
    }

    async fn eliminate_combatant(
        &self,
        match_id: i64,
        combatant: &Combatant,
    ) -> Result<(), BotError> {
        let mut state = self.lock();
        if state.fail_eliminations {
            return Err(anyhow!("Lost the connection while eliminating {}", combatant.name));
        }
        state.eliminated.insert((match_id, combatant.combatant_id));
        Ok(())
    }
}
