use std::fmt::Display;

use tracing::{error, info, instrument, warn};

use crate::advancement::{set_match_winner, Advancement};
use crate::bracket::{build_bracket, last_round, match_has_bye, ongoing_matches, round_finished};
use crate::config::WarConfig;
use crate::database::models::{
    Battle, Combatant, Entrant, Match, Round, Tournament, TournamentStatus,
};
use crate::database::{RoundSuccessor, TournamentStore};
use crate::error::{ErrorClass, WarError};
use crate::presentation::Presenter;
use crate::roster::Roster;
use crate::voting::{count_battle_votes, voting_window};
use crate::BotError;

/// What the host should do with a tournament after a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Tick again no earlier than `until` (unix seconds).
    Sleep { until: i64 },
    /// The tournament is over. Stop ticking it.
    Finished {
        status: TournamentStatus,
        champion: Option<String>,
    },
}

/// Opens a War for a guild and builds its bracket right away.
///
/// A guild with too few participants gets its tournament cancelled and the configuration
/// error back. Any other failure leaves the tournament open for the ticker to build later.
#[instrument(skip(database, roster))]
pub async fn open_tournament<DB, R>(
    database: &DB,
    roster: &R,
    guild_id: &str,
    event_ref: &str,
    now: i64,
) -> Result<Tournament, BotError>
where
    DB: TournamentStore,
    R: Roster,
{
    let tournament = database.create_tournament(guild_id, event_ref, now).await?;
    info!(
        "Opened tournament {} for guild {}",
        tournament.tournament_id, guild_id
    );

    if let Err(error) = build_tournament_bracket(database, roster, &tournament, now).await {
        if WarError::classify(&error) == ErrorClass::Configuration {
            database
                .close_tournament(
                    tournament.tournament_id,
                    TournamentStatus::Cancelled,
                    None,
                    now,
                )
                .await?;
            return Err(error);
        }
        warn!(
            "Could not build the bracket of tournament {} yet: {:#}",
            tournament.tournament_id, error
        );
    }

    Ok(tournament)
}

/// Force-ends an open War without a champion.
#[instrument(skip(database, presenter))]
pub async fn cancel_tournament<DB, P>(
    database: &DB,
    presenter: &P,
    tournament_id: i64,
    now: i64,
) -> Result<Tournament, BotError>
where
    DB: TournamentStore,
    P: Presenter,
{
    let tournament = database
        .get_tournament(tournament_id)
        .await?
        .ok_or_else(|| {
            WarError::StateViolation(format!("Tournament {} does not exist", tournament_id))
        })?;
    if !tournament.is_open() {
        return Err(WarError::StateViolation(format!(
            "Tournament {} has already ended",
            tournament_id
        ))
        .into());
    }

    database
        .close_tournament(tournament_id, TournamentStatus::Cancelled, None, now)
        .await?;
    info!("Cancelled tournament {}", tournament_id);

    if let Some(round) = database.get_current_round(tournament_id).await? {
        for bracket in database.get_matches(round.round_id).await? {
            let Some(battle) = database.get_open_battle(bracket.match_id).await? else {
                continue;
            };
            if battle.start.is_none() {
                continue;
            }
            if let Err(e) = presenter.close_voting_affordance(&tournament, &battle).await {
                warn!("Could not close voting on battle {}: {:#}", battle.battle_id, e);
            }
        }
    }
    if let Err(e) = presenter.announce_champion(&tournament, None).await {
        warn!("Could not announce the cancellation of {}: {:#}", tournament_id, e);
    }

    Ok(tournament)
}

/// Builds and persists the bracket of a tournament that has none yet.
async fn build_tournament_bracket<DB, R>(
    database: &DB,
    roster: &R,
    tournament: &Tournament,
    now: i64,
) -> Result<Vec<Round>, BotError>
where
    DB: TournamentStore,
    R: Roster,
{
    let players = roster
        .rank_participants(&tournament.guild_id)
        .await
        .map_err(|e| WarError::collaborator("rank_participants", e))?;
    let bracket = build_bracket(players, now)?;

    match database.create_rounds(tournament.tournament_id, &bracket).await {
        Ok(rounds) => Ok(rounds),
        Err(error) => {
            // Someone else built it first.
            let existing = database.get_rounds(tournament.tournament_id).await?;
            if existing.is_empty() {
                return Err(error);
            }
            Ok(existing)
        }
    }
}

/// Skips a failed per-match step when the failure is transient, so one stuck match does not
/// hold back the rest of the round.
fn isolate(result: Result<(), BotError>, step: impl Display) -> Result<(), BotError> {
    match result {
        Err(error) if WarError::classify(&error) == ErrorClass::Transient => {
            warn!("{} failed, retrying next tick: {:#}", step, error);
            Ok(())
        }
        other => other,
    }
}

/// The user ids in both slots of a match that is ready to be played.
fn players(bracket: &Match) -> Result<(&str, &str), BotError> {
    match (
        bracket.red.as_ref().and_then(Entrant::user_id),
        bracket.blue.as_ref().and_then(Entrant::user_id),
    ) {
        (Some(red), Some(blue)) => Ok((red, blue)),
        _ => Err(WarError::DataIntegrity(format!(
            "Match {} is in play without two players ({:?} vs {:?})",
            bracket.match_id, bracket.red, bracket.blue
        ))
        .into()),
    }
}

/// Drives tournaments forward one turn at a time.
///
/// The scheduler keeps no state between ticks: everything is read back from the store, so a
/// tick can be repeated or retried after a crash without creating anything twice.
pub struct RoundScheduler<'a, DB, R, P> {
    database: &'a DB,
    roster: &'a R,
    presenter: &'a P,
    config: &'a WarConfig,
}

impl<'a, DB, R, P> RoundScheduler<'a, DB, R, P>
where
    DB: TournamentStore,
    R: Roster,
    P: Presenter,
{
    pub fn new(database: &'a DB, roster: &'a R, presenter: &'a P, config: &'a WarConfig) -> Self {
        Self {
            database,
            roster,
            presenter,
            config,
        }
    }

    /// Runs one turn of a tournament at time `now`.
    ///
    /// Configuration and data integrity errors end the tournament without a champion. State
    /// violations and transient failures are returned so the host can retry later.
    #[instrument(skip(self))]
    pub async fn tick(&self, tournament_id: i64, now: i64) -> Result<TickOutcome, BotError> {
        let tournament = self
            .database
            .get_tournament(tournament_id)
            .await?
            .ok_or_else(|| {
                WarError::DataIntegrity(format!("Tournament {} does not exist", tournament_id))
            })?;
        if !tournament.is_open() {
            return Ok(TickOutcome::Finished {
                status: tournament.status,
                champion: tournament.champion,
            });
        }

        match self.turn(&tournament, now).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => match WarError::classify(&error) {
                ErrorClass::Configuration => {
                    warn!("Cancelling tournament {}: {:#}", tournament_id, error);
                    self.end_early(&tournament, TournamentStatus::Cancelled, now)
                        .await
                }
                ErrorClass::DataIntegrity => {
                    error!("Aborting tournament {}: {:#}", tournament_id, error);
                    self.end_early(&tournament, TournamentStatus::Aborted, now)
                        .await
                }
                ErrorClass::StateViolation => {
                    error!("Tick of tournament {} refused: {:#}", tournament_id, error);
                    Err(error)
                }
                ErrorClass::Transient => {
                    warn!("Tick of tournament {} failed: {:#}", tournament_id, error);
                    Err(error)
                }
            },
        }
    }

    async fn turn(&self, tournament: &Tournament, now: i64) -> Result<TickOutcome, BotError> {
        let mut rounds = self.database.get_rounds(tournament.tournament_id).await?;
        if rounds.is_empty() {
            rounds = build_tournament_bracket(self.database, self.roster, tournament, now).await?;
        }
        let total_rounds = rounds.len() as i32;

        let Some(mut round) = rounds.iter().find(|r| r.is_current()).cloned() else {
            if rounds.iter().all(|r| r.end.is_some()) {
                return self.complete(tournament, tournament.champion.clone(), now).await;
            }
            return Err(WarError::DataIntegrity(format!(
                "Tournament {} has no round in progress",
                tournament.tournament_id
            ))
            .into());
        };

        if round.message_ref.is_none() {
            self.open_round(tournament, &mut round, total_rounds, now)
                .await?;
        }
        self.resolve_byes(tournament, &round, total_rounds, now)
            .await?;
        self.ensure_battles(tournament, &round, total_rounds, now)
            .await?;
        self.start_battles(tournament, &round, now).await?;
        self.resolve_battles(tournament, &round, total_rounds, now)
            .await?;
        self.advance(tournament, &round, &rounds, now).await
    }

    /// Posts the round banner and starts the clock on the round and its matches.
    async fn open_round(
        &self,
        tournament: &Tournament,
        round: &mut Round,
        total_rounds: i32,
        now: i64,
    ) -> Result<(), BotError> {
        let matches = self.database.get_matches(round.round_id).await?;
        if matches.is_empty() {
            return Err(WarError::DataIntegrity(format!(
                "Round {} of tournament {} has no matches",
                round.number, tournament.tournament_id
            ))
            .into());
        }

        let message_ref = self
            .presenter
            .post_round_banner(tournament, round, &matches, total_rounds)
            .await
            .map_err(|e| WarError::collaborator("post_round_banner", e))?;
        self.database
            .start_round_matches(round.round_id, now)
            .await?;
        round.message_ref = Some(message_ref);
        round.start.get_or_insert(now);
        self.database.update_round(round).await?;

        info!(
            "Round {} of tournament {} is underway",
            round.number, tournament.tournament_id
        );
        Ok(())
    }

    async fn resolve_byes(
        &self,
        tournament: &Tournament,
        round: &Round,
        total_rounds: i32,
        now: i64,
    ) -> Result<(), BotError> {
        for bracket in self.database.get_matches(round.round_id).await? {
            if bracket.is_decided() || !match_has_bye(&bracket) {
                continue;
            }
            let winner = bracket
                .red
                .as_ref()
                .and_then(Entrant::user_id)
                .ok_or_else(|| {
                    WarError::DataIntegrity(format!(
                        "Match {} pairs a bye with no player",
                        bracket.match_id
                    ))
                })?;
            set_match_winner(
                self.database,
                tournament,
                round,
                total_rounds,
                &bracket,
                winner,
                now,
            )
            .await?;
            info!("{} advances on a bye", winner);
        }
        Ok(())
    }

    async fn ensure_battles(
        &self,
        tournament: &Tournament,
        round: &Round,
        total_rounds: i32,
        now: i64,
    ) -> Result<(), BotError> {
        for bracket in self.database.get_matches(round.round_id).await? {
            if bracket.is_decided() {
                continue;
            }
            isolate(
                self.ensure_battle(tournament, round, total_rounds, &bracket, now)
                    .await,
                format!("Preparing match {}", bracket.number),
            )?;
        }
        Ok(())
    }

    /// Creates the next battle of a match, or decides the match when a side has nobody left.
    async fn ensure_battle(
        &self,
        tournament: &Tournament,
        round: &Round,
        total_rounds: i32,
        bracket: &Match,
        now: i64,
    ) -> Result<(), BotError> {
        if self
            .database
            .get_open_battle(bracket.match_id)
            .await?
            .is_some()
        {
            return Ok(());
        }
        let (red, blue) = players(bracket)?;

        let red_ready = self
            .roster
            .has_eligible_combatant(bracket.match_id, red)
            .await
            .map_err(|e| WarError::collaborator("has_eligible_combatant", e))?;
        let blue_ready = self
            .roster
            .has_eligible_combatant(bracket.match_id, blue)
            .await
            .map_err(|e| WarError::collaborator("has_eligible_combatant", e))?;

        if !(red_ready && blue_ready) {
            // Red keeps the better seed, so it also takes a match where nobody can fight.
            let (winner, loser) = if red_ready || !blue_ready {
                (red, blue)
            } else {
                (blue, red)
            };
            info!(
                "{} has no characters left in match {}, {} wins",
                loser, bracket.number, winner
            );
            return self
                .decide_match(tournament, round, total_rounds, bracket, winner, loser, now)
                .await;
        }

        let red_combatant = self.pick(bracket.match_id, red).await?;
        let blue_combatant = self.pick(bracket.match_id, blue).await?;
        let battle = self
            .database
            .create_battle(bracket.match_id, &red_combatant, &blue_combatant)
            .await?;
        info!(
            "Battle {} of match {}: {} vs {}",
            battle.number, bracket.number, red_combatant.name, blue_combatant.name
        );
        Ok(())
    }

    async fn pick(
        &self,
        match_id: i64,
        user_id: &str,
    ) -> Result<Combatant, BotError> {
        self.roster
            .pick_eligible_combatant(match_id, user_id)
            .await
            .map_err(|e| WarError::collaborator("pick_eligible_combatant", e))?
            .ok_or_else(|| {
                WarError::TransientCollaborator(format!(
                    "{} lost their last eligible character in match {}",
                    user_id, match_id
                ))
                .into()
            })
    }

    /// Posts the card of every battle that has not started yet, opening its voting window.
    async fn start_battles(
        &self,
        tournament: &Tournament,
        round: &Round,
        now: i64,
    ) -> Result<(), BotError> {
        let matches = self.database.get_matches(round.round_id).await?;
        let window_secs = voting_window(ongoing_matches(&matches)) * self.config.time_unit_secs();

        for bracket in matches.iter().filter(|m| !m.is_decided()) {
            let Some(mut battle) = self.database.get_open_battle(bracket.match_id).await? else {
                continue;
            };
            if battle.start.is_some() {
                continue;
            }
            match self
                .presenter
                .post_battle_card(tournament, &battle, now + window_secs)
                .await
            {
                Ok(message_ref) => {
                    battle.message_ref = Some(message_ref);
                    battle.start = Some(now);
                    battle.window_secs = window_secs;
                    self.database.update_battle(&battle).await?;
                }
                Err(e) => warn!(
                    "Could not post battle {}, retrying next tick: {:#}",
                    battle.battle_id, e
                ),
            }
        }
        Ok(())
    }

    async fn resolve_battles(
        &self,
        tournament: &Tournament,
        round: &Round,
        total_rounds: i32,
        now: i64,
    ) -> Result<(), BotError> {
        for bracket in self.database.get_matches(round.round_id).await? {
            if bracket.is_decided() {
                continue;
            }
            let Some(battle) = self.database.get_open_battle(bracket.match_id).await? else {
                continue;
            };
            if !battle.expired_at(now) {
                continue;
            }
            isolate(
                self.resolve_battle(tournament, round, total_rounds, &bracket, battle, now)
                    .await,
                format!("Resolving match {}", bracket.number),
            )?;
        }
        Ok(())
    }

    /// Tallies an expired battle, eliminates the loser and decides the match if the loser's
    /// owner has nobody left.
    ///
    /// The winning side is stored before anything acts on it. A retry finishes that same
    /// outcome instead of drawing a new one.
    async fn resolve_battle(
        &self,
        tournament: &Tournament,
        round: &Round,
        total_rounds: i32,
        bracket: &Match,
        mut battle: Battle,
        now: i64,
    ) -> Result<(), BotError> {
        let tally = count_battle_votes(self.database, &battle).await?;
        let side = match battle.winner {
            Some(side) => side,
            None => {
                self.database
                    .decide_battle(battle.battle_id, tally.winner.side)
                    .await?
            }
        };
        let tally = tally.settle(side);
        battle.winner = Some(side);

        self.presenter
            .close_voting_affordance(tournament, &battle)
            .await
            .map_err(|e| WarError::collaborator("close_voting_affordance", e))?;

        let winner = battle.combatant(tally.winner.side).clone();
        let loser = battle.combatant(tally.loser.side).clone();
        self.roster
            .eliminate_combatant(bracket.match_id, &loser)
            .await
            .map_err(|e| WarError::collaborator("eliminate_combatant", e))?;
        battle.end = Some(now);
        self.database.update_battle(&battle).await?;
        info!(
            "{} beat {} in battle {} ({} to {})",
            winner.name, loser.name, battle.battle_id, tally.winner.votes, tally.loser.votes
        );

        if let Err(e) = self
            .presenter
            .announce_battle_result(tournament, &battle, &tally)
            .await
        {
            warn!("Could not announce battle {}: {:#}", battle.battle_id, e);
        }

        let loser_ready = self
            .roster
            .has_eligible_combatant(bracket.match_id, &loser.owner_id)
            .await
            .map_err(|e| WarError::collaborator("has_eligible_combatant", e))?;
        if !loser_ready {
            self.decide_match(
                tournament,
                round,
                total_rounds,
                bracket,
                &winner.owner_id,
                &loser.owner_id,
                now,
            )
            .await?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn decide_match(
        &self,
        tournament: &Tournament,
        round: &Round,
        total_rounds: i32,
        bracket: &Match,
        winner: &str,
        loser: &str,
        now: i64,
    ) -> Result<(), BotError> {
        let advancement = set_match_winner(
            self.database,
            tournament,
            round,
            total_rounds,
            bracket,
            winner,
            now,
        )
        .await?;
        if advancement == Advancement::Unchanged {
            return Ok(());
        }
        if let Err(e) = self
            .presenter
            .announce_match_result(tournament, bracket, winner, loser)
            .await
        {
            warn!("Could not announce match {}: {:#}", bracket.match_id, e);
        }
        Ok(())
    }

    /// Closes the round once every match has a winner, then starts the next one or ends the
    /// tournament.
    async fn advance(
        &self,
        tournament: &Tournament,
        round: &Round,
        rounds: &[Round],
        now: i64,
    ) -> Result<TickOutcome, BotError> {
        let matches = self.database.get_matches(round.round_id).await?;
        if !round_finished(&matches) {
            return Ok(TickOutcome::Sleep {
                until: self.next_wake(&matches, now).await?,
            });
        }

        let mut ended = round.clone();
        ended.end = Some(now);

        if last_round(round, rounds.len() as i32) {
            let champion = matches.first().and_then(|m| m.winner.clone());
            self.database
                .finish_round(
                    &ended,
                    RoundSuccessor::Final {
                        tournament_id: tournament.tournament_id,
                        status: TournamentStatus::Complete,
                        champion: champion.as_deref(),
                    },
                )
                .await?;
            info!(
                "Tournament {} is complete, champion: {:?}",
                tournament.tournament_id, champion
            );
            self.announce_end(tournament, champion.as_deref()).await;
            return Ok(TickOutcome::Finished {
                status: TournamentStatus::Complete,
                champion,
            });
        }

        let mut next = rounds
            .iter()
            .find(|r| r.number == round.number + 1)
            .cloned()
            .ok_or_else(|| {
                WarError::DataIntegrity(format!(
                    "Round {} of tournament {} is missing",
                    round.number + 1,
                    tournament.tournament_id
                ))
            })?;
        next.start = Some(now);
        self.database
            .finish_round(&ended, RoundSuccessor::Next(&next))
            .await?;
        info!(
            "Round {} of tournament {} is over",
            round.number, tournament.tournament_id
        );

        Ok(TickOutcome::Sleep {
            until: now + self.config.min_tick_secs(),
        })
    }

    /// The earliest battle deadline of the round, or the shortest tick delay while some
    /// match still waits for its battle to start.
    async fn next_wake(&self, matches: &[Match], now: i64) -> Result<i64, BotError> {
        let floor = now + self.config.min_tick_secs();
        let mut earliest: Option<i64> = None;
        for bracket in matches.iter().filter(|m| !m.is_decided()) {
            let deadline = self
                .database
                .get_open_battle(bracket.match_id)
                .await?
                .and_then(|b| b.deadline());
            match deadline {
                Some(deadline) => {
                    earliest = Some(earliest.map_or(deadline, |e| e.min(deadline)));
                }
                None => return Ok(floor),
            }
        }
        Ok(earliest.map_or(floor, |deadline| deadline.max(floor)))
    }

    async fn complete(
        &self,
        tournament: &Tournament,
        champion: Option<String>,
        now: i64,
    ) -> Result<TickOutcome, BotError> {
        self.database
            .close_tournament(
                tournament.tournament_id,
                TournamentStatus::Complete,
                champion.as_deref(),
                now,
            )
            .await?;
        self.announce_end(tournament, champion.as_deref()).await;
        Ok(TickOutcome::Finished {
            status: TournamentStatus::Complete,
            champion,
        })
    }

    async fn end_early(
        &self,
        tournament: &Tournament,
        status: TournamentStatus,
        now: i64,
    ) -> Result<TickOutcome, BotError> {
        self.database
            .close_tournament(tournament.tournament_id, status, None, now)
            .await?;
        self.announce_end(tournament, None).await;
        Ok(TickOutcome::Finished {
            status,
            champion: None,
        })
    }

    async fn announce_end(&self, tournament: &Tournament, champion: Option<&str>) {
        if let Err(e) = self.presenter.announce_champion(tournament, champion).await {
            warn!(
                "Could not announce the end of tournament {}: {:#}",
                tournament.tournament_id, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::database::memory::MemoryDatabase;
    use crate::database::models::Side;
    use crate::database::{
        BattleDatabase, MatchDatabase, RoundDatabase, TournamentDatabase, VoteDatabase,
    };
    use crate::presentation::tests::RecordingPresenter;

    const GUILD: &str = "guild";

    fn config() -> WarConfig {
        WarConfig {
            time_unit: Duration::from_secs(100),
            poll_interval: Duration::from_secs(60),
            min_tick: Duration::from_secs(5),
        }
    }

    fn roster(names: &[&str], characters: usize) -> MemoryDatabase {
        let database = MemoryDatabase::default();
        for (i, name) in names.iter().enumerate() {
            database.add_player(GUILD, name, i as i32 + 1, characters);
        }
        database
    }

    /// Ticks until the tournament finishes. After every tick, `between` names the ballots a fan
    /// casts before the clock moves on.
    async fn run_to_end<F>(
        database: &MemoryDatabase,
        presenter: &RecordingPresenter,
        tournament_id: i64,
        mut between: F,
    ) -> TickOutcome
    where
        F: FnMut(i64) -> Vec<(i64, Side)>,
    {
        let config = config();
        let scheduler = RoundScheduler::new(database, database, presenter, &config);
        let mut now = 0;
        for _ in 0..100 {
            let outcome = scheduler.tick(tournament_id, now).await.unwrap();
            for (battle_id, side) in between(now) {
                database
                    .record_vote(battle_id, "fan", side, now)
                    .await
                    .unwrap();
            }
            match outcome {
                TickOutcome::Sleep { until } => {
                    assert!(until > now);
                    now = until;
                }
                finished => return finished,
            }
        }
        panic!("tournament {} never finished", tournament_id);
    }

    #[tokio::test]
    async fn five_players_play_to_a_champion() {
        let names = ["A", "B", "C", "D", "E"];
        let database = roster(&names, 1);
        let presenter = RecordingPresenter::default();
        let tournament = open_tournament(&database, &database, GUILD, "event", 0)
            .await
            .unwrap();

        let outcome = run_to_end(&database, &presenter, tournament.tournament_id, |_| vec![]).await;
        let TickOutcome::Finished { status, champion } = outcome else {
            panic!("unexpected outcome {:?}", outcome);
        };
        assert_eq!(status, TournamentStatus::Complete);
        let champion = champion.unwrap();
        assert!(names.contains(&champion.as_str()));

        let stored = database
            .get_tournament(tournament.tournament_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TournamentStatus::Complete);
        assert_eq!(stored.champion.as_deref(), Some(champion.as_str()));
        assert!(stored.end.is_some());

        let rounds = database.get_rounds(tournament.tournament_id).await.unwrap();
        assert_eq!(rounds.len(), 3);
        assert!(rounds.iter().all(|r| r.start.is_some() && r.end.is_some()));

        // A, B and C advance on byes without a battle; only D and E fight in round 1.
        let first = database.get_matches(rounds[0].round_id).await.unwrap();
        for (bracket, winner) in first.iter().zip(["A", "", "B", "C"]) {
            if winner.is_empty() {
                assert_eq!(database.battles(bracket.match_id).len(), 1);
            } else {
                assert_eq!(bracket.winner.as_deref(), Some(winner));
                assert!(database.battles(bracket.match_id).is_empty());
            }
        }

        assert_eq!(presenter.count("banner"), 3);
        assert_eq!(presenter.count("card"), 4);
        assert_eq!(presenter.count("close"), 4);
        assert_eq!(presenter.count("battle"), 4);
        assert_eq!(presenter.count("match"), 4);
        assert_eq!(presenter.calls().last().unwrap(), &format!("champion {}", champion));
        assert!(database
            .all_battles()
            .iter()
            .all(|b| b.end.is_some() && b.message_ref.is_some()));
    }

    #[tokio::test]
    async fn votes_decide_battles_until_a_side_is_exhausted() {
        let database = roster(&["A", "B"], 2);
        let presenter = RecordingPresenter::default();
        let tournament = open_tournament(&database, &database, GUILD, "event", 0)
            .await
            .unwrap();

        let outcome = run_to_end(&database, &presenter, tournament.tournament_id, |now| {
            database
                .all_battles()
                .into_iter()
                .filter(|b| b.accepts_votes_at(now))
                .map(|b| (b.battle_id, Side::Red))
                .collect()
        })
        .await;

        assert_eq!(
            outcome,
            TickOutcome::Finished {
                status: TournamentStatus::Complete,
                champion: Some("A".to_string()),
            }
        );
        let battles = database.all_battles();
        assert_eq!(battles.len(), 2);
        assert_eq!(battles[0].number, 1);
        assert_eq!(battles[1].number, 2);
        // A keeps their first character since it never lost.
        assert_eq!(battles[0].red, battles[1].red);
        assert_ne!(battles[0].blue, battles[1].blue);
        assert_eq!(presenter.count("battle"), 2);
        assert!(presenter
            .calls()
            .iter()
            .filter(|c| c.starts_with("battle"))
            .all(|c| c.ends_with("Red")));
        assert_eq!(presenter.count("match 1 A beats B"), 1);
    }

    #[tokio::test]
    async fn repeated_ticks_change_nothing() {
        let database = roster(&["A", "B", "C", "D", "E"], 1);
        let presenter = RecordingPresenter::default();
        let config = config();
        let scheduler = RoundScheduler::new(&database, &database, &presenter, &config);
        let tournament = open_tournament(&database, &database, GUILD, "event", 0)
            .await
            .unwrap();

        let first = scheduler.tick(tournament.tournament_id, 0).await.unwrap();
        let matches = database.all_matches();
        let battles = database.all_battles();
        let second = scheduler.tick(tournament.tournament_id, 1).await.unwrap();

        // One battle for D vs E, voting for one time unit.
        assert_eq!(first, TickOutcome::Sleep { until: 100 });
        assert_eq!(second, TickOutcome::Sleep { until: 100 });
        assert_eq!(database.all_matches(), matches);
        assert_eq!(database.all_battles(), battles);
        assert_eq!(battles.len(), 1);
        assert_eq!(presenter.count("banner"), 1);
        assert_eq!(presenter.count("card"), 1);
    }

    #[tokio::test]
    async fn failed_battle_card_is_retried() {
        let database = roster(&["A", "B"], 1);
        let presenter = RecordingPresenter::default();
        let config = config();
        let scheduler = RoundScheduler::new(&database, &database, &presenter, &config);
        let tournament = open_tournament(&database, &database, GUILD, "event", 0)
            .await
            .unwrap();

        *presenter.fail_battle_card.lock().unwrap() = true;
        let outcome = scheduler.tick(tournament.tournament_id, 0).await.unwrap();
        assert_eq!(outcome, TickOutcome::Sleep { until: 5 });
        let battle = database.all_battles().pop().unwrap();
        assert_eq!(battle.start, None);
        assert!(!battle.accepts_votes_at(0));

        *presenter.fail_battle_card.lock().unwrap() = false;
        let outcome = scheduler.tick(tournament.tournament_id, 5).await.unwrap();
        assert_eq!(outcome, TickOutcome::Sleep { until: 105 });
        let battle = database.get_battle(battle.battle_id).await.unwrap().unwrap();
        assert_eq!(battle.start, Some(5));
        assert_eq!(battle.window_secs, 100);
        assert_eq!(battle.message_ref, Some(format!("battle-msg-{}", battle.battle_id)));
        assert_eq!(database.all_battles().len(), 1);
        assert_eq!(presenter.count("card"), 1);
    }

    #[tokio::test]
    async fn failed_banner_holds_the_round() {
        let database = roster(&["A", "B", "C"], 1);
        let presenter = RecordingPresenter::default();
        let config = config();
        let scheduler = RoundScheduler::new(&database, &database, &presenter, &config);
        let tournament = open_tournament(&database, &database, GUILD, "event", 0)
            .await
            .unwrap();

        *presenter.fail_banner.lock().unwrap() = true;
        let error = scheduler.tick(tournament.tournament_id, 0).await.unwrap_err();
        assert_eq!(WarError::classify(&error), ErrorClass::Transient);
        assert!(database.all_matches().iter().all(|m| m.winner.is_none()));
        assert!(database.all_battles().is_empty());

        *presenter.fail_banner.lock().unwrap() = false;
        scheduler.tick(tournament.tournament_id, 5).await.unwrap();
        let round = database
            .get_current_round(tournament.tournament_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(round.message_ref, Some(format!("round-msg-{}", round.round_id)));
        // A advances on a bye.
        let matches = database.get_matches(round.round_id).await.unwrap();
        assert_eq!(matches[0].winner.as_deref(), Some("A"));
        assert_eq!(matches[1].start, Some(5));
    }

    #[tokio::test]
    async fn exhausted_sides_lose_without_a_battle() {
        let database = MemoryDatabase::default();
        database.add_player(GUILD, "A", 1, 2);
        database.add_player(GUILD, "B", 2, 0);
        let presenter = RecordingPresenter::default();
        let tournament = open_tournament(&database, &database, GUILD, "event", 0)
            .await
            .unwrap();

        let outcome = run_to_end(&database, &presenter, tournament.tournament_id, |_| vec![]).await;
        assert_eq!(
            outcome,
            TickOutcome::Finished {
                status: TournamentStatus::Complete,
                champion: Some("A".to_string()),
            }
        );
        assert!(database.all_battles().is_empty());
        assert_eq!(presenter.count("match 1 A beats B"), 1);
    }

    #[tokio::test]
    async fn red_wins_when_nobody_can_fight() {
        let database = MemoryDatabase::default();
        database.add_player(GUILD, "A", 1, 0);
        database.add_player(GUILD, "B", 2, 0);
        let presenter = RecordingPresenter::default();
        let tournament = open_tournament(&database, &database, GUILD, "event", 0)
            .await
            .unwrap();

        let outcome = run_to_end(&database, &presenter, tournament.tournament_id, |_| vec![]).await;
        assert_eq!(
            outcome,
            TickOutcome::Finished {
                status: TournamentStatus::Complete,
                champion: Some("A".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn too_few_players_cancel_the_tournament() {
        let database = roster(&["A"], 1);
        let error = open_tournament(&database, &database, GUILD, "event", 0)
            .await
            .unwrap_err();
        assert_eq!(WarError::classify(&error), ErrorClass::Configuration);
        assert!(database.get_open_tournament(GUILD).await.unwrap().is_none());

        // The guild is free for another War.
        database.add_player(GUILD, "B", 2, 1);
        open_tournament(&database, &database, GUILD, "event", 1)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn tick_cancels_an_unbuildable_tournament() {
        let database = roster(&["A"], 1);
        let presenter = RecordingPresenter::default();
        let config = config();
        let scheduler = RoundScheduler::new(&database, &database, &presenter, &config);
        let tournament = database.create_tournament(GUILD, "event", 0).await.unwrap();

        let outcome = scheduler.tick(tournament.tournament_id, 0).await.unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Finished {
                status: TournamentStatus::Cancelled,
                champion: None,
            }
        );
        assert_eq!(presenter.calls(), vec!["champion none".to_string()]);
        assert!(database
            .get_rounds(tournament.tournament_id)
            .await
            .unwrap()
            .is_empty());

        // Later ticks only report the outcome.
        let again = scheduler.tick(tournament.tournament_id, 10).await.unwrap();
        assert_eq!(again, outcome);
        assert_eq!(presenter.calls().len(), 1);
    }

    #[tokio::test]
    async fn broken_round_chain_aborts() {
        let database = roster(&["A", "B", "C"], 1);
        let presenter = RecordingPresenter::default();
        let config = config();
        let scheduler = RoundScheduler::new(&database, &database, &presenter, &config);
        let tournament = open_tournament(&database, &database, GUILD, "event", 0)
            .await
            .unwrap();

        // Round 1 ends without round 2 ever starting.
        let mut round = database
            .get_current_round(tournament.tournament_id)
            .await
            .unwrap()
            .unwrap();
        round.end = Some(1);
        database.update_round(&round).await.unwrap();

        let outcome = scheduler.tick(tournament.tournament_id, 2).await.unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Finished {
                status: TournamentStatus::Aborted,
                champion: None,
            }
        );
        assert_eq!(presenter.count("champion none"), 1);
    }

    #[tokio::test]
    async fn cancelling_closes_open_voting() {
        let database = roster(&["A", "B"], 1);
        let presenter = RecordingPresenter::default();
        let config = config();
        let scheduler = RoundScheduler::new(&database, &database, &presenter, &config);
        let tournament = open_tournament(&database, &database, GUILD, "event", 0)
            .await
            .unwrap();
        scheduler.tick(tournament.tournament_id, 0).await.unwrap();
        let battle = database.all_battles().pop().unwrap();

        cancel_tournament(&database, &presenter, tournament.tournament_id, 10)
            .await
            .unwrap();
        assert_eq!(presenter.count(&format!("close {}", battle.battle_id)), 1);
        assert_eq!(presenter.count("champion none"), 1);

        let outcome = scheduler.tick(tournament.tournament_id, 200).await.unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Finished {
                status: TournamentStatus::Cancelled,
                champion: None,
            }
        );
        assert!(database.all_battles()[0].end.is_none());

        let error = cancel_tournament(&database, &presenter, tournament.tournament_id, 11)
            .await
            .unwrap_err();
        assert_eq!(WarError::classify(&error), ErrorClass::StateViolation);
    }

    /// Opens a War between A and B with one character each and starts their battle, which
    /// expires at 100.
    async fn single_battle(
        database: &MemoryDatabase,
        presenter: &RecordingPresenter,
        config: &WarConfig,
    ) -> (i64, Battle) {
        database.add_player(GUILD, "A", 1, 1);
        database.add_player(GUILD, "B", 2, 1);
        let tournament = open_tournament(database, database, GUILD, "event", 0)
            .await
            .unwrap();
        let scheduler = RoundScheduler::new(database, database, presenter, config);
        let outcome = scheduler.tick(tournament.tournament_id, 0).await.unwrap();
        assert_eq!(outcome, TickOutcome::Sleep { until: 100 });
        (tournament.tournament_id, database.all_battles().pop().unwrap())
    }

    #[tokio::test]
    async fn battle_outcome_survives_a_failed_end() {
        for _ in 0..20 {
            let database = MemoryDatabase::default();
            let presenter = RecordingPresenter::default();
            let config = config();
            let scheduler = RoundScheduler::new(&database, &database, &presenter, &config);
            let (tournament_id, battle) = single_battle(&database, &presenter, &config).await;

            // The loser is eliminated but the battle cannot be ended.
            database.fail_battle_updates(true);
            let outcome = scheduler.tick(tournament_id, 100).await.unwrap();
            assert_eq!(outcome, TickOutcome::Sleep { until: 105 });
            let stored = database.get_battle(battle.battle_id).await.unwrap().unwrap();
            assert_eq!(stored.end, None);
            let side = stored.winner.unwrap();
            let winner = battle.combatant(side);
            let loser = battle.combatant(if side == Side::Red { Side::Blue } else { Side::Red });
            assert!(database.is_eliminated(battle.match_id, loser));
            assert!(!database.is_eliminated(battle.match_id, winner));

            // Nobody voted, yet the retry keeps the first draw.
            database.fail_battle_updates(false);
            let outcome = scheduler.tick(tournament_id, 105).await.unwrap();
            assert_eq!(
                outcome,
                TickOutcome::Finished {
                    status: TournamentStatus::Complete,
                    champion: Some(winner.owner_id.clone()),
                }
            );
            assert!(!database.is_eliminated(battle.match_id, winner));
            let stored = database.get_battle(battle.battle_id).await.unwrap().unwrap();
            assert_eq!(stored.end, Some(105));
            assert_eq!(stored.winner, Some(side));
            assert_eq!(presenter.count("battle"), 1);
        }
    }

    #[tokio::test]
    async fn failed_elimination_is_retried() {
        let database = MemoryDatabase::default();
        let presenter = RecordingPresenter::default();
        let config = config();
        let scheduler = RoundScheduler::new(&database, &database, &presenter, &config);
        let (tournament_id, battle) = single_battle(&database, &presenter, &config).await;

        database
            .record_vote(battle.battle_id, "fan", Side::Blue, 50)
            .await
            .unwrap();
        database.fail_eliminations(true);
        let outcome = scheduler.tick(tournament_id, 100).await.unwrap();
        assert_eq!(outcome, TickOutcome::Sleep { until: 105 });
        let stored = database.get_battle(battle.battle_id).await.unwrap().unwrap();
        assert_eq!(stored.end, None);
        assert_eq!(stored.winner, Some(Side::Blue));
        assert!(!database.is_eliminated(battle.match_id, &battle.red));
        assert_eq!(presenter.count("battle"), 0);
        assert!(database.all_matches().iter().all(|m| m.winner.is_none()));

        database.fail_eliminations(false);
        let outcome = scheduler.tick(tournament_id, 105).await.unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Finished {
                status: TournamentStatus::Complete,
                champion: Some("B".to_string()),
            }
        );
        assert!(database.is_eliminated(battle.match_id, &battle.red));
        assert!(!database.is_eliminated(battle.match_id, &battle.blue));
        assert_eq!(presenter.count(&format!("battle {} Blue", battle.battle_id)), 1);
        assert_eq!(presenter.count("match 1 B beats A"), 1);
    }

    #[tokio::test]
    async fn failed_voting_close_holds_the_battle() {
        let database = MemoryDatabase::default();
        let presenter = RecordingPresenter::default();
        let config = config();
        let scheduler = RoundScheduler::new(&database, &database, &presenter, &config);
        let (tournament_id, battle) = single_battle(&database, &presenter, &config).await;

        *presenter.fail_close_voting.lock().unwrap() = true;
        let outcome = scheduler.tick(tournament_id, 100).await.unwrap();
        assert_eq!(outcome, TickOutcome::Sleep { until: 105 });
        let stored = database.get_battle(battle.battle_id).await.unwrap().unwrap();
        assert_eq!(stored.end, None);
        let side = stored.winner.unwrap();
        assert!(!database.is_eliminated(battle.match_id, &battle.red));
        assert!(!database.is_eliminated(battle.match_id, &battle.blue));

        *presenter.fail_close_voting.lock().unwrap() = false;
        let outcome = scheduler.tick(tournament_id, 105).await.unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Finished {
                status: TournamentStatus::Complete,
                champion: Some(battle.combatant(side).owner_id.clone()),
            }
        );
        assert_eq!(presenter.count("close"), 1);
        assert_eq!(presenter.count("battle"), 1);
    }

    #[tokio::test]
    async fn next_round_starts_once() {
        let database = roster(&["A", "B", "C"], 1);
        let presenter = RecordingPresenter::default();
        let config = config();
        let scheduler = RoundScheduler::new(&database, &database, &presenter, &config);
        let tournament = open_tournament(&database, &database, GUILD, "event", 0)
            .await
            .unwrap();

        // A has a bye, B and C fight once and the round closes at 100.
        scheduler.tick(tournament.tournament_id, 0).await.unwrap();
        let outcome = scheduler.tick(tournament.tournament_id, 100).await.unwrap();
        assert_eq!(outcome, TickOutcome::Sleep { until: 105 });
        let rounds = database.get_rounds(tournament.tournament_id).await.unwrap();
        assert_eq!(rounds[0].end, Some(100));
        assert_eq!(rounds[1].start, Some(100));

        let mut ended = rounds[0].clone();
        ended.end = Some(200);
        let mut next = rounds[1].clone();
        next.start = Some(200);
        let error = database
            .finish_round(&ended, RoundSuccessor::Next(&next))
            .await
            .unwrap_err();
        assert_eq!(WarError::classify(&error), ErrorClass::StateViolation);

        scheduler.tick(tournament.tournament_id, 105).await.unwrap();
        let rounds = database.get_rounds(tournament.tournament_id).await.unwrap();
        assert_eq!(rounds[0].end, Some(100));
        assert_eq!(rounds[1].start, Some(100));
        assert_eq!(presenter.count("banner"), 2);
    }
}
