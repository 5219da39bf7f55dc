use serde::{Deserialize, Serialize};
use strum::Display;

/// Per-guild configuration for War announcements.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GuildConfig {
    pub guild_id: String,
    pub war_channel_id: String,
    pub log_channel_id: String,
}

/// The status of a tournament. Anything but `Running` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize, Display, Default)]
#[sqlx(type_name = "tournament_status", rename_all = "snake_case")]
pub enum TournamentStatus {
    #[strum(to_string = "In progress")]
    #[default]
    Running,
    #[strum(to_string = "Complete")]
    Complete,
    #[strum(to_string = "Cancelled")]
    Cancelled,
    #[strum(to_string = "Aborted")]
    Aborted,
}

/// One War elimination event within a guild.
#[derive(Debug, Clone, Serialize, Deserialize, Default, sqlx::FromRow)]
pub struct Tournament {
    pub tournament_id: i64,
    pub guild_id: String,
    /// The external event that opened this tournament.
    pub event_ref: String,
    pub start: i64,
    /// Unset while the tournament is open.
    pub end: Option<i64>,
    pub status: TournamentStatus,
    pub champion: Option<String>,
}

impl Tournament {
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }
}

/// Occupant of a bracket slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Entrant {
    Player(String),
    Bye,
}

impl Entrant {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Entrant::Player(id) => Some(id),
            Entrant::Bye => None,
        }
    }

    pub fn is_bye(&self) -> bool {
        matches!(self, Entrant::Bye)
    }
}

/// How a slot is stored in the database.
///
/// Used to determine if the slot is occupied by a real player, a bye,
/// or is pending (waiting for a player to reach the bracket).
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "slot_type", rename_all = "snake_case")]
pub enum SlotType {
    Player,
    Bye,
    Pending,
}

impl SlotType {
    pub fn encode(slot: &Option<Entrant>) -> (SlotType, Option<String>) {
        match slot {
            Some(Entrant::Player(id)) => (SlotType::Player, Some(id.clone())),
            Some(Entrant::Bye) => (SlotType::Bye, None),
            None => (SlotType::Pending, None),
        }
    }

    pub fn decode(self, user_id: Option<String>) -> Option<Entrant> {
        match (self, user_id) {
            (SlotType::Player, Some(id)) => Some(Entrant::Player(id)),
            (SlotType::Bye, _) => Some(Entrant::Bye),
            _ => None,
        }
    }
}

/// A seed slot of the bracket. Immutable once the bracket is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub entrant: Entrant,
    pub display_name: String,
    /// Lower is better.
    pub ranking: i32,
}

/// One elimination stage of a tournament.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Round {
    pub round_id: i64,
    pub tournament_id: i64,
    /// 1-based.
    pub number: i32,
    /// Message anchoring this round in the guild's war channel.
    pub message_ref: Option<String>,
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl Round {
    /// A round is current while it has started and not yet ended.
    pub fn is_current(&self) -> bool {
        self.start.is_some() && self.end.is_none()
    }
}

/// One bracket cell within a round.
///
/// Also known as a bracket to avoid conflicting with the Rust keyword.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub match_id: i64,
    pub round_id: i64,
    /// 1-based sequence within the round.
    pub number: i32,
    pub red: Option<Entrant>,
    pub blue: Option<Entrant>,
    pub winner: Option<String>,
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl Match {
    pub fn is_decided(&self) -> bool {
        self.winner.is_some()
    }

    /// Whether `user_id` occupies either slot.
    pub fn has_player(&self, user_id: &str) -> bool {
        [&self.red, &self.blue]
            .into_iter()
            .flatten()
            .any(|e| e.user_id() == Some(user_id))
    }
}

/// A character a player sends into battle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Combatant {
    pub combatant_id: i64,
    pub owner_id: String,
    pub name: String,
    pub image_url: Option<String>,
}

/// The two sides of a battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type, Serialize, Deserialize, Display)]
#[sqlx(type_name = "battle_side", rename_all = "snake_case")]
pub enum Side {
    #[strum(to_string = "red")]
    Red,
    #[strum(to_string = "blue")]
    Blue,
}

impl Side {
    pub fn parse(side: &str) -> Option<Self> {
        match side {
            "red" => Some(Side::Red),
            "blue" => Some(Side::Blue),
            _ => None,
        }
    }
}

/// One voted encounter within a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Battle {
    pub battle_id: i64,
    pub match_id: i64,
    /// 1-based sequence within the match.
    pub number: i32,
    pub red: Combatant,
    pub blue: Combatant,
    pub message_ref: Option<String>,
    /// Set once the battle card is posted and voting opens.
    pub start: Option<i64>,
    pub end: Option<i64>,
    /// Voting window in seconds, stamped together with `start`.
    pub window_secs: i64,
    /// The winning side, settled once the window is over and kept through retries.
    pub winner: Option<Side>,
}

impl Battle {
    pub fn combatant(&self, side: Side) -> &Combatant {
        match side {
            Side::Red => &self.red,
            Side::Blue => &self.blue,
        }
    }

    /// When voting closes. `None` until the battle has started.
    pub fn deadline(&self) -> Option<i64> {
        self.start.map(|start| start + self.window_secs)
    }

    pub fn accepts_votes_at(&self, now: i64) -> bool {
        self.end.is_none() && self.deadline().is_some_and(|deadline| now < deadline)
    }

    pub fn expired_at(&self, now: i64) -> bool {
        self.end.is_none() && self.deadline().is_some_and(|deadline| now >= deadline)
    }
}

/// A single user's ballot for a battle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Vote {
    pub vote_id: i64,
    pub battle_id: i64,
    pub choice: Side,
    pub voter_id: String,
    pub cast_at: i64,
}

/// A guild member as ranked by the roster, before seeding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedPlayer {
    pub user_id: String,
    pub display_name: String,
    pub ranking: i32,
}
