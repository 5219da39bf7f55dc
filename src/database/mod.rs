use crate::bracket::Bracket;
use crate::error::WarError;
use crate::BotError;
use models::*;
use sqlx::PgPool;
use tracing::info;

/// Models for the database.
///
/// These models are specific to the current database design and schema.
/// Most if not all are directly mapped to a table in the database.
pub mod models;

/// In-memory store used by the engine tests.
#[cfg(test)]
pub mod memory;

/// Where the winner of a match goes.
#[derive(Debug, Clone, Copy)]
pub enum Propagation<'a> {
    /// The next round's match, with the winner already placed in a slot.
    NextMatch(&'a Match),
    /// The match was the final: the winner becomes the tournament champion.
    Champion { tournament_id: i64 },
}

/// What happens after a round is closed.
#[derive(Debug, Clone, Copy)]
pub enum RoundSuccessor<'a> {
    /// The following round, with its start timestamp set.
    Next(&'a Round),
    /// The tournament ends with the given status.
    Final {
        tournament_id: i64,
        status: TournamentStatus,
        champion: Option<&'a str>,
    },
}

/// The Postgres database used for War tournaments.
#[derive(Debug, Clone)]
pub struct PgDatabase {
    pub pool: PgPool,
}

impl PgDatabase {
    pub async fn connect(db_url: &str) -> Result<Self, BotError> {
        let pool = PgPool::connect(db_url).await?;
        info!("Successfully connected to the database.");

        Ok(PgDatabase { pool })
    }

    pub async fn migrate(&self) -> Result<(), BotError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[allow(async_fn_in_trait)]
pub trait ConfigDatabase {
    /// Sets the War channels for a guild.
    async fn set_config(
        &self,
        guild_id: &str,
        war_channel_id: &str,
        log_channel_id: &str,
    ) -> Result<(), BotError>;

    /// Retrieves the config of a given guild from the database.
    async fn get_config(&self, guild_id: &str) -> Result<Option<GuildConfig>, BotError>;
}

#[allow(async_fn_in_trait)]
pub trait TournamentDatabase {
    /// Opens a tournament. Fails with a configuration error if the guild already has one open.
    async fn create_tournament(
        &self,
        guild_id: &str,
        event_ref: &str,
        now: i64,
    ) -> Result<Tournament, BotError>;

    async fn get_tournament(&self, tournament_id: i64) -> Result<Option<Tournament>, BotError>;

    /// The guild's tournament whose end timestamp is unset, if any.
    async fn get_open_tournament(&self, guild_id: &str) -> Result<Option<Tournament>, BotError>;

    /// Open tournaments across every guild.
    async fn get_open_tournaments(&self) -> Result<Vec<Tournament>, BotError>;

    /// The tournament a battle is fought in.
    async fn get_battle_tournament(&self, battle_id: i64)
        -> Result<Option<Tournament>, BotError>;

    /// Ends a tournament. Does nothing if it has already ended.
    async fn close_tournament(
        &self,
        tournament_id: i64,
        status: TournamentStatus,
        champion: Option<&str>,
        now: i64,
    ) -> Result<(), BotError>;

    /// Seeded participants, byes included, in seed order.
    async fn get_participants(&self, tournament_id: i64) -> Result<Vec<Participant>, BotError>;
}

#[allow(async_fn_in_trait)]
pub trait RoundDatabase {
    /// Persists the whole bracket (participants, rounds and matches) at once.
    ///
    /// Fails with a configuration error if the tournament already has rounds.
    async fn create_rounds(
        &self,
        tournament_id: i64,
        bracket: &Bracket,
    ) -> Result<Vec<Round>, BotError>;

    /// All rounds of a tournament ordered by number.
    async fn get_rounds(&self, tournament_id: i64) -> Result<Vec<Round>, BotError>;

    /// The round that has started but not ended.
    async fn get_current_round(&self, tournament_id: i64) -> Result<Option<Round>, BotError>;

    async fn update_round(&self, round: &Round) -> Result<(), BotError>;

    /// Stamps the start of the round and all of its matches, keeping timestamps already set.
    async fn start_round_matches(&self, round_id: i64, now: i64) -> Result<(), BotError>;

    /// Ends a round and either starts the next one or closes the tournament.
    ///
    /// Fails with a state violation if the round has already ended.
    async fn finish_round(
        &self,
        ended: &Round,
        successor: RoundSuccessor<'_>,
    ) -> Result<(), BotError>;
}

#[allow(async_fn_in_trait)]
pub trait MatchDatabase {
    /// Matches of a round ordered by number.
    async fn get_matches(&self, round_id: i64) -> Result<Vec<Match>, BotError>;

    async fn get_match_in_round(
        &self,
        tournament_id: i64,
        round_number: i32,
        match_number: i32,
    ) -> Result<Option<Match>, BotError>;

    /// Records the winner of `decided` and propagates it, all or nothing.
    ///
    /// Fails with a state violation if the stored match already has a winner.
    async fn commit_match_winner(
        &self,
        decided: &Match,
        propagation: Propagation<'_>,
    ) -> Result<(), BotError>;
}

#[allow(async_fn_in_trait)]
pub trait BattleDatabase {
    /// Creates the next battle of a match. Voting opens once the battle is started.
    async fn create_battle(
        &self,
        match_id: i64,
        red: &Combatant,
        blue: &Combatant,
    ) -> Result<Battle, BotError>;

    async fn get_battle(&self, battle_id: i64) -> Result<Option<Battle>, BotError>;

    /// The battle of a match that has not ended yet.
    async fn get_open_battle(&self, match_id: i64) -> Result<Option<Battle>, BotError>;

    /// Writes the message, timestamps and window of a battle. The winner is only ever written
    /// through [`BattleDatabase::decide_battle`].
    async fn update_battle(&self, battle: &Battle) -> Result<(), BotError>;

    /// Stores the winning side of a battle unless one is already stored, and returns the side
    /// that is stored afterwards.
    async fn decide_battle(&self, battle_id: i64, winner: Side) -> Result<Side, BotError>;
}

#[allow(async_fn_in_trait)]
pub trait VoteDatabase {
    /// Records a ballot, replacing the voter's previous ballot for the same battle.
    async fn record_vote(
        &self,
        battle_id: i64,
        voter_id: &str,
        choice: Side,
        now: i64,
    ) -> Result<(), BotError>;

    async fn get_vote(&self, battle_id: i64, voter_id: &str) -> Result<Option<Vote>, BotError>;

    async fn count_votes(&self, battle_id: i64, choice: Side) -> Result<i64, BotError>;
}

/// Everything the War engine persists.
pub trait TournamentStore:
    TournamentDatabase + RoundDatabase + MatchDatabase + BattleDatabase + VoteDatabase
{
}

impl<T> TournamentStore for T where
    T: TournamentDatabase + RoundDatabase + MatchDatabase + BattleDatabase + VoteDatabase
{
}

impl ConfigDatabase for PgDatabase {
    async fn set_config(
        &self,
        guild_id: &str,
        war_channel_id: &str,
        log_channel_id: &str,
    ) -> Result<(), BotError> {
        sqlx::query(
            r#"
            INSERT INTO war_config (guild_id, war_channel_id, log_channel_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (guild_id)
            DO UPDATE SET
                war_channel_id = $2,
                log_channel_id = $3
            "#,
        )
        .bind(guild_id)
        .bind(war_channel_id)
        .bind(log_channel_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_config(&self, guild_id: &str) -> Result<Option<GuildConfig>, BotError> {
        let config = sqlx::query_as::<_, GuildConfig>(
            r#"
            SELECT guild_id, war_channel_id, log_channel_id FROM war_config WHERE guild_id = $1
            LIMIT 1
            "#,
        )
        .bind(guild_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(config)
    }
}

const TOURNAMENT_COLUMNS: &str =
    r#"tournament_id, guild_id, event_ref, start, "end", status, champion"#;

impl TournamentDatabase for PgDatabase {
    async fn create_tournament(
        &self,
        guild_id: &str,
        event_ref: &str,
        now: i64,
    ) -> Result<Tournament, BotError> {
        let inserted = sqlx::query_as::<_, Tournament>(&format!(
            r#"
            INSERT INTO tournaments (guild_id, event_ref, start, status)
            VALUES ($1, $2, $3, 'running')
            ON CONFLICT (guild_id) WHERE "end" IS NULL DO NOTHING
            RETURNING {}
            "#,
            TOURNAMENT_COLUMNS
        ))
        .bind(guild_id)
        .bind(event_ref)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        inserted.ok_or_else(|| {
            WarError::Configuration(format!("Guild {} already has an open War", guild_id)).into()
        })
    }

    async fn get_tournament(&self, tournament_id: i64) -> Result<Option<Tournament>, BotError> {
        let tournament = sqlx::query_as::<_, Tournament>(&format!(
            "SELECT {} FROM tournaments WHERE tournament_id = $1",
            TOURNAMENT_COLUMNS
        ))
        .bind(tournament_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tournament)
    }

    async fn get_open_tournament(&self, guild_id: &str) -> Result<Option<Tournament>, BotError> {
        let tournament = sqlx::query_as::<_, Tournament>(&format!(
            r#"SELECT {} FROM tournaments WHERE guild_id = $1 AND "end" IS NULL LIMIT 1"#,
            TOURNAMENT_COLUMNS
        ))
        .bind(guild_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tournament)
    }

    async fn get_open_tournaments(&self) -> Result<Vec<Tournament>, BotError> {
        let tournaments = sqlx::query_as::<_, Tournament>(&format!(
            r#"SELECT {} FROM tournaments WHERE "end" IS NULL ORDER BY tournament_id"#,
            TOURNAMENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(tournaments)
    }

    async fn get_battle_tournament(
        &self,
        battle_id: i64,
    ) -> Result<Option<Tournament>, BotError> {
        let tournament = sqlx::query_as::<_, Tournament>(
            r#"
            SELECT t.tournament_id, t.guild_id, t.event_ref, t.start, t."end", t.status, t.champion
            FROM battles b
            JOIN matches m ON m.match_id = b.match_id
            JOIN rounds r ON r.round_id = m.round_id
            JOIN tournaments t ON t.tournament_id = r.tournament_id
            WHERE b.battle_id = $1
            "#,
        )
        .bind(battle_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tournament)
    }

    async fn close_tournament(
        &self,
        tournament_id: i64,
        status: TournamentStatus,
        champion: Option<&str>,
        now: i64,
    ) -> Result<(), BotError> {
        sqlx::query(
            r#"
            UPDATE tournaments
            SET "end" = $1, status = $2, champion = $3
            WHERE tournament_id = $4 AND "end" IS NULL
            "#,
        )
        .bind(now)
        .bind(status)
        .bind(champion)
        .bind(tournament_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_participants(&self, tournament_id: i64) -> Result<Vec<Participant>, BotError> {
        #[derive(sqlx::FromRow)]
        struct ParticipantRow {
            slot: SlotType,
            user_id: Option<String>,
            display_name: String,
            ranking: i32,
        }

        let rows = sqlx::query_as::<_, ParticipantRow>(
            r#"
            SELECT slot, user_id, display_name, ranking
            FROM participants
            WHERE tournament_id = $1
            ORDER BY seed
            "#,
        )
        .bind(tournament_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let entrant = row.slot.decode(row.user_id).ok_or_else(|| {
                    WarError::DataIntegrity(format!(
                        "Participant {} of tournament {} has no entrant",
                        row.display_name, tournament_id
                    ))
                })?;
                Ok(Participant {
                    entrant,
                    display_name: row.display_name,
                    ranking: row.ranking,
                })
            })
            .collect()
    }
}

const ROUND_COLUMNS: &str = r#"round_id, tournament_id, number, message_ref, start, "end""#;

impl RoundDatabase for PgDatabase {
    async fn create_rounds(
        &self,
        tournament_id: i64,
        bracket: &Bracket,
    ) -> Result<Vec<Round>, BotError> {
        let mut tx = self.pool.begin().await?;

        let existing: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM rounds WHERE tournament_id = $1")
                .bind(tournament_id)
                .fetch_one(&mut *tx)
                .await?;
        if existing > 0 {
            return Err(WarError::Configuration(format!(
                "The bracket of tournament {} has already been built",
                tournament_id
            ))
            .into());
        }

        for (seed, participant) in bracket.participants.iter().enumerate() {
            let (slot, user_id) = SlotType::encode(&Some(participant.entrant.clone()));
            sqlx::query(
                r#"
                INSERT INTO participants (tournament_id, seed, slot, user_id, display_name, ranking)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(tournament_id)
            .bind(seed as i32 + 1)
            .bind(slot)
            .bind(user_id)
            .bind(&participant.display_name)
            .bind(participant.ranking)
            .execute(&mut *tx)
            .await?;
        }

        for plan in &bracket.rounds {
            let round_id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO rounds (tournament_id, number, start)
                VALUES ($1, $2, $3)
                RETURNING round_id
                "#,
            )
            .bind(tournament_id)
            .bind(plan.number)
            .bind(plan.start)
            .fetch_one(&mut *tx)
            .await?;

            for bracket_match in &plan.matches {
                let (red_type, red_id) = SlotType::encode(&bracket_match.red);
                let (blue_type, blue_id) = SlotType::encode(&bracket_match.blue);
                sqlx::query(
                    r#"
                    INSERT INTO matches (round_id, number, red_type, red_id, blue_type, blue_id)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(round_id)
                .bind(bracket_match.number)
                .bind(red_type)
                .bind(red_id)
                .bind(blue_type)
                .bind(blue_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        info!(
            "Built bracket for tournament {}: {} rounds, {} byes",
            tournament_id,
            bracket.rounds.len(),
            bracket.bye_count()
        );

        self.get_rounds(tournament_id).await
    }

    async fn get_rounds(&self, tournament_id: i64) -> Result<Vec<Round>, BotError> {
        let rounds = sqlx::query_as::<_, Round>(&format!(
            "SELECT {} FROM rounds WHERE tournament_id = $1 ORDER BY number",
            ROUND_COLUMNS
        ))
        .bind(tournament_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rounds)
    }

    async fn get_current_round(&self, tournament_id: i64) -> Result<Option<Round>, BotError> {
        let round = sqlx::query_as::<_, Round>(&format!(
            r#"
            SELECT {} FROM rounds
            WHERE tournament_id = $1 AND start IS NOT NULL AND "end" IS NULL
            ORDER BY number
            LIMIT 1
            "#,
            ROUND_COLUMNS
        ))
        .bind(tournament_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(round)
    }

    async fn update_round(&self, round: &Round) -> Result<(), BotError> {
        sqlx::query(
            r#"
            UPDATE rounds
            SET message_ref = $1, start = $2, "end" = $3
            WHERE round_id = $4
            "#,
        )
        .bind(&round.message_ref)
        .bind(round.start)
        .bind(round.end)
        .bind(round.round_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn start_round_matches(&self, round_id: i64, now: i64) -> Result<(), BotError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE rounds SET start = COALESCE(start, $1) WHERE round_id = $2")
            .bind(now)
            .bind(round_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE matches SET start = COALESCE(start, $1) WHERE round_id = $2")
            .bind(now)
            .bind(round_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

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
        let mut tx = self.pool.begin().await?;

        let closed = sqlx::query(r#"UPDATE rounds SET "end" = $1 WHERE round_id = $2 AND "end" IS NULL"#)
            .bind(end)
            .bind(ended.round_id)
            .execute(&mut *tx)
            .await?;
        if closed.rows_affected() != 1 {
            return Err(WarError::StateViolation(format!(
                "Round {} has already ended",
                ended.round_id
            ))
            .into());
        }

        match successor {
            RoundSuccessor::Next(next) => {
                sqlx::query("UPDATE rounds SET start = $1 WHERE round_id = $2 AND start IS NULL")
                    .bind(next.start)
                    .bind(next.round_id)
                    .execute(&mut *tx)
                    .await?;
            }
            RoundSuccessor::Final {
                tournament_id,
                status,
                champion,
            } => {
                sqlx::query(
                    r#"
                    UPDATE tournaments
                    SET "end" = $1, status = $2, champion = $3
                    WHERE tournament_id = $4 AND "end" IS NULL
                    "#,
                )
                .bind(end)
                .bind(status)
                .bind(champion)
                .bind(tournament_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

/// Temp struct necessary because slots are spread across two columns each.
#[derive(sqlx::FromRow)]
struct MatchRow {
    match_id: i64,
    round_id: i64,
    number: i32,
    red_type: SlotType,
    red_id: Option<String>,
    blue_type: SlotType,
    blue_id: Option<String>,
    winner: Option<String>,
    start: Option<i64>,
    end: Option<i64>,
}

impl From<MatchRow> for Match {
    fn from(row: MatchRow) -> Self {
        Match {
            match_id: row.match_id,
            round_id: row.round_id,
            number: row.number,
            red: row.red_type.decode(row.red_id),
            blue: row.blue_type.decode(row.blue_id),
            winner: row.winner,
            start: row.start,
            end: row.end,
        }
    }
}

const MATCH_COLUMNS: &str = r#"m.match_id, m.round_id, m.number, m.red_type, m.red_id, m.blue_type, m.blue_id, m.winner, m.start, m."end""#;

impl MatchDatabase for PgDatabase {
    async fn get_matches(&self, round_id: i64) -> Result<Vec<Match>, BotError> {
        let rows = sqlx::query_as::<_, MatchRow>(&format!(
            "SELECT {} FROM matches AS m WHERE m.round_id = $1 ORDER BY m.number",
            MATCH_COLUMNS
        ))
        .bind(round_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Match::from).collect())
    }

    async fn get_match_in_round(
        &self,
        tournament_id: i64,
        round_number: i32,
        match_number: i32,
    ) -> Result<Option<Match>, BotError> {
        let row = sqlx::query_as::<_, MatchRow>(&format!(
            r#"
            SELECT {} FROM matches AS m
            JOIN rounds AS r ON r.round_id = m.round_id
            WHERE r.tournament_id = $1 AND r.number = $2 AND m.number = $3
            "#,
            MATCH_COLUMNS
        ))
        .bind(tournament_id)
        .bind(round_number)
        .bind(match_number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Match::from))
    }

    async fn commit_match_winner(
        &self,
        decided: &Match,
        propagation: Propagation<'_>,
    ) -> Result<(), BotError> {
        let winner = decided.winner.as_deref().ok_or_else(|| {
            WarError::StateViolation(format!("Match {} has no winner to commit", decided.match_id))
        })?;
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE matches
            SET winner = $1, "end" = $2
            WHERE match_id = $3 AND winner IS NULL
            "#,
        )
        .bind(winner)
        .bind(decided.end)
        .bind(decided.match_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() != 1 {
            return Err(WarError::StateViolation(format!(
                "Match {} already has a winner",
                decided.match_id
            ))
            .into());
        }

        match propagation {
            Propagation::NextMatch(next) => {
                let (red_type, red_id) = SlotType::encode(&next.red);
                let (blue_type, blue_id) = SlotType::encode(&next.blue);
                sqlx::query(
                    r#"
                    UPDATE matches
                    SET red_type = $1, red_id = $2, blue_type = $3, blue_id = $4
                    WHERE match_id = $5
                    "#,
                )
                .bind(red_type)
                .bind(red_id)
                .bind(blue_type)
                .bind(blue_id)
                .bind(next.match_id)
                .execute(&mut *tx)
                .await?;
            }
            Propagation::Champion { tournament_id } => {
                sqlx::query("UPDATE tournaments SET champion = $1 WHERE tournament_id = $2")
                    .bind(winner)
                    .bind(tournament_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct BattleRow {
    battle_id: i64,
    match_id: i64,
    number: i32,
    red_combatant_id: i64,
    red_owner_id: String,
    red_name: String,
    red_image_url: Option<String>,
    blue_combatant_id: i64,
    blue_owner_id: String,
    blue_name: String,
    blue_image_url: Option<String>,
    message_ref: Option<String>,
    start: Option<i64>,
    end: Option<i64>,
    window_secs: i64,
    winner: Option<Side>,
}

impl From<BattleRow> for Battle {
    fn from(row: BattleRow) -> Self {
        Battle {
            battle_id: row.battle_id,
            match_id: row.match_id,
            number: row.number,
            red: Combatant {
                combatant_id: row.red_combatant_id,
                owner_id: row.red_owner_id,
                name: row.red_name,
                image_url: row.red_image_url,
            },
            blue: Combatant {
                combatant_id: row.blue_combatant_id,
                owner_id: row.blue_owner_id,
                name: row.blue_name,
                image_url: row.blue_image_url,
            },
            message_ref: row.message_ref,
            start: row.start,
            end: row.end,
            window_secs: row.window_secs,
            winner: row.winner,
        }
    }
}

const BATTLE_COLUMNS: &str = r#"battle_id, match_id, number,
    red_combatant_id, red_owner_id, red_name, red_image_url,
    blue_combatant_id, blue_owner_id, blue_name, blue_image_url,
    message_ref, start, "end", window_secs, winner"#;

impl BattleDatabase for PgDatabase {
    async fn create_battle(
        &self,
        match_id: i64,
        red: &Combatant,
        blue: &Combatant,
    ) -> Result<Battle, BotError> {
        let row = sqlx::query_as::<_, BattleRow>(&format!(
            r#"
            INSERT INTO battles (
                match_id, number,
                red_combatant_id, red_owner_id, red_name, red_image_url,
                blue_combatant_id, blue_owner_id, blue_name, blue_image_url
            )
            VALUES (
                $1, (SELECT COALESCE(MAX(number), 0) + 1 FROM battles WHERE match_id = $1),
                $2, $3, $4, $5,
                $6, $7, $8, $9
            )
            RETURNING {}
            "#,
            BATTLE_COLUMNS
        ))
        .bind(match_id)
        .bind(red.combatant_id)
        .bind(&red.owner_id)
        .bind(&red.name)
        .bind(&red.image_url)
        .bind(blue.combatant_id)
        .bind(&blue.owner_id)
        .bind(&blue.name)
        .bind(&blue.image_url)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn get_battle(&self, battle_id: i64) -> Result<Option<Battle>, BotError> {
        let row = sqlx::query_as::<_, BattleRow>(&format!(
            "SELECT {} FROM battles WHERE battle_id = $1",
            BATTLE_COLUMNS
        ))
        .bind(battle_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Battle::from))
    }

    async fn get_open_battle(&self, match_id: i64) -> Result<Option<Battle>, BotError> {
        let row = sqlx::query_as::<_, BattleRow>(&format!(
            r#"SELECT {} FROM battles WHERE match_id = $1 AND "end" IS NULL LIMIT 1"#,
            BATTLE_COLUMNS
        ))
        .bind(match_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Battle::from))
    }

    async fn update_battle(&self, battle: &Battle) -> Result<(), BotError> {
        sqlx::query(
            r#"
            UPDATE battles
            SET message_ref = $1, start = $2, "end" = $3, window_secs = $4
            WHERE battle_id = $5
            "#,
        )
        .bind(&battle.message_ref)
        .bind(battle.start)
        .bind(battle.end)
        .bind(battle.window_secs)
        .bind(battle.battle_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn decide_battle(&self, battle_id: i64, winner: Side) -> Result<Side, BotError> {
        let stored = sqlx::query_scalar::<_, Option<Side>>(
            r#"
            UPDATE battles
            SET winner = COALESCE(winner, $1)
            WHERE battle_id = $2
            RETURNING winner
            "#,
        )
        .bind(winner)
        .bind(battle_id)
        .fetch_optional(&self.pool)
        .await?
        .flatten();

        stored.ok_or_else(|| {
            WarError::DataIntegrity(format!("Battle {} does not exist", battle_id)).into()
        })
    }
}

impl VoteDatabase for PgDatabase {
    async fn record_vote(
        &self,
        battle_id: i64,
        voter_id: &str,
        choice: Side,
        now: i64,
    ) -> Result<(), BotError> {
        sqlx::query(
            r#"
            INSERT INTO votes (battle_id, choice, voter_id, cast_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (battle_id, voter_id)
            DO UPDATE SET
                choice = EXCLUDED.choice,
                cast_at = EXCLUDED.cast_at
            "#,
        )
        .bind(battle_id)
        .bind(choice)
        .bind(voter_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_vote(&self, battle_id: i64, voter_id: &str) -> Result<Option<Vote>, BotError> {
        let vote = sqlx::query_as::<_, Vote>(
            r#"
            SELECT vote_id, battle_id, choice, voter_id, cast_at
            FROM votes
            WHERE battle_id = $1 AND voter_id = $2
            "#,
        )
        .bind(battle_id)
        .bind(voter_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(vote)
    }

    async fn count_votes(&self, battle_id: i64, choice: Side) -> Result<i64, BotError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM votes WHERE battle_id = $1 AND choice = $2")
                .bind(battle_id)
                .bind(choice)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }
}
