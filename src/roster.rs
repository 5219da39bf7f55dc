use crate::database::models::{Combatant, RankedPlayer};
use crate::database::PgDatabase;
use crate::BotError;

/// The guild economy as seen by War: who takes part, and which characters they can field.
///
/// Eliminations are scoped to a match, so a player's pool is full again at the start of
/// every match.
#[allow(async_fn_in_trait)]
pub trait Roster {
    /// Guild members eligible for a War, best first. Lower ranking is better.
    async fn rank_participants(&self, guild_id: &str) -> Result<Vec<RankedPlayer>, BotError>;

    /// Whether the player still has a character that was not eliminated in this match.
    async fn has_eligible_combatant(&self, match_id: i64, user_id: &str)
        -> Result<bool, BotError>;

    /// The character the player sends into the next battle of this match.
    async fn pick_eligible_combatant(
        &self,
        match_id: i64,
        user_id: &str,
    ) -> Result<Option<Combatant>, BotError>;

    /// Removes a character from the rest of this match.
    async fn eliminate_combatant(
        &self,
        match_id: i64,
        combatant: &Combatant,
    ) -> Result<(), BotError>;
}

impl Roster for PgDatabase {
    async fn rank_participants(&self, guild_id: &str) -> Result<Vec<RankedPlayer>, BotError> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            r#"
            SELECT
                owner_id,
                MAX(owner_name),
                ROW_NUMBER() OVER (ORDER BY SUM(power) DESC, owner_id)
            FROM claims
            WHERE guild_id = $1
            GROUP BY owner_id
            ORDER BY 3
            "#,
        )
        .bind(guild_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(user_id, display_name, ranking)| RankedPlayer {
                user_id,
                display_name,
                ranking: ranking as i32,
            })
            .collect())
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
        let row: Option<(i64, String, String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT c.claim_id, c.owner_id, c.character_name, c.image_url
            FROM claims AS c
            JOIN tournaments AS t ON t.guild_id = c.guild_id
            JOIN rounds AS r ON r.tournament_id = t.tournament_id
            JOIN matches AS m ON m.round_id = r.round_id
            WHERE m.match_id = $1
                AND c.owner_id = $2
                AND NOT EXISTS (
                    SELECT 1 FROM eliminations AS e
                    WHERE e.match_id = $1 AND e.claim_id = c.claim_id
                )
            ORDER BY c.power DESC, c.claim_id
            LIMIT 1
            "#,
        )
        .bind(match_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(combatant_id, owner_id, name, image_url)| Combatant {
            combatant_id,
            owner_id,
            name,
            image_url,
        }))
    }

    async fn eliminate_combatant(
        &self,
        match_id: i64,
        combatant: &Combatant,
    ) -> Result<(), BotError> {
        sqlx::query(
            r#"
            INSERT INTO eliminations (match_id, claim_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(match_id)
        .bind(combatant.combatant_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
