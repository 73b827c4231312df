//! Game Session Store: the single source of truth for every game.
//!
//! Two backends implement `SessionStore`: `MemoryStore` (per-session watch
//! channels) and `PgStore` (Postgres with LISTEN/NOTIFY). Both serialize writes
//! per session and accept a move only if the stored position still equals the
//! writer's expected prior position.

pub mod memory;
pub mod poll;
pub mod postgres;

use std::fmt;
use std::str::FromStr;

use chess_core::{Color, Move, MoveError, Position, Terminal};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type SessionId = String;

/// Snapshots of one session, newest state on every change.
pub type SnapshotStream = BoxStream<'static, Result<GameSession, StoreError>>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Game {0} not found")]
    NotFound(SessionId),

    #[error("Game {0} already has two players")]
    AlreadyFull(SessionId),

    /// The joining nick already holds the White seat.
    #[error("{nick} is already seated as white in game {id}")]
    AlreadySeated { id: SessionId, nick: String },

    /// The stored position moved on since the writer read it.
    #[error("Game {id} changed concurrently; current position is {current_fen}")]
    Conflict { id: SessionId, current_fen: String },

    #[error(transparent)]
    IllegalMove(#[from] MoveError),

    #[error("Game {id} is {status}, not active")]
    NotActive { id: SessionId, status: SessionStatus },

    /// The backing store cannot be reached.
    #[error("Session store unavailable: {0}")]
    Unavailable(String),

    #[error("Session store error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Waiting,
    Active,
    Finished,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Waiting => "waiting",
            SessionStatus::Active => "active",
            SessionStatus::Finished => "finished",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(SessionStatus::Waiting),
            "active" => Ok(SessionStatus::Active),
            "finished" => Ok(SessionStatus::Finished),
            other => Err(format!("unknown session status '{other}'")),
        }
    }
}

/// Why a finished game ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Outcome {
    Checkmate { winner: Color },
    Stalemate,
    Draw,
    Resignation { winner: Color },
    /// No writes for longer than the idle timeout.
    Abandoned,
}

/// Advisory clock setting. Stored and shown, never enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeControl {
    #[default]
    #[serde(rename = "unlimited")]
    Unlimited,
    #[serde(rename = "20m")]
    Minutes20,
    #[serde(rename = "10m")]
    Minutes10,
    #[serde(rename = "5m")]
    Minutes5,
}

impl TimeControl {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeControl::Unlimited => "unlimited",
            TimeControl::Minutes20 => "20m",
            TimeControl::Minutes10 => "10m",
            TimeControl::Minutes5 => "5m",
        }
    }
}

impl FromStr for TimeControl {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unlimited" => Ok(TimeControl::Unlimited),
            "20m" => Ok(TimeControl::Minutes20),
            "10m" => Ok(TimeControl::Minutes10),
            "5m" => Ok(TimeControl::Minutes5),
            other => Err(format!("unknown time control '{other}'")),
        }
    }
}

/// A player's seat: nickname plus their points when they sat down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    pub nick: String,
    pub points: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub author: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSession {
    pub id: SessionId,
    pub white: Seat,
    pub black: Option<Seat>,
    pub status: SessionStatus,
    #[serde(rename = "fen")]
    pub position: Position,
    pub last_move: Option<Move>,
    /// Half-moves played.
    pub ply: u32,
    /// Bumped on every write; snapshots with a lower revision are stale.
    pub revision: u64,
    pub outcome: Option<Outcome>,
    pub chat: Vec<ChatMessage>,
    pub time_control: TimeControl,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GameSession {
    pub fn new(
        id: SessionId,
        nick: &str,
        points: u32,
        time_control: TimeControl,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            white: Seat {
                nick: nick.to_string(),
                points,
            },
            black: None,
            status: SessionStatus::Waiting,
            position: Position::initial(),
            last_move: None,
            ply: 0,
            revision: 0,
            outcome: None,
            chat: Vec::new(),
            time_control,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn player(&self, color: Color) -> Option<&Seat> {
        match color {
            Color::White => Some(&self.white),
            Color::Black => self.black.as_ref(),
        }
    }

    /// Color seated under `nick`. The store never seats one nick twice.
    pub fn seat_of(&self, nick: &str) -> Option<Color> {
        if self.white.nick == nick {
            Some(Color::White)
        } else if self.black.as_ref().is_some_and(|s| s.nick == nick) {
            Some(Color::Black)
        } else {
            None
        }
    }

    pub fn side_to_move(&self) -> Color {
        self.position.side_to_move()
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.revision += 1;
        self.updated_at = now;
    }

    // State transitions below validate fully before mutating, so a failed call
    // leaves the session untouched.

    pub(crate) fn seat_black(
        &mut self,
        nick: &str,
        points: u32,
        now: DateTime<Utc>,
    ) -> Result<Color, StoreError> {
        if self.status != SessionStatus::Waiting || self.black.is_some() {
            return Err(StoreError::AlreadyFull(self.id.clone()));
        }
        if self.white.nick == nick {
            return Err(StoreError::AlreadySeated {
                id: self.id.clone(),
                nick: nick.to_string(),
            });
        }
        self.black = Some(Seat {
            nick: nick.to_string(),
            points,
        });
        self.status = SessionStatus::Active;
        self.touch(now);
        Ok(Color::Black)
    }

    pub(crate) fn play(
        &mut self,
        mv: &Move,
        expected_prior: &Position,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if self.status != SessionStatus::Active {
            return Err(StoreError::NotActive {
                id: self.id.clone(),
                status: self.status,
            });
        }
        if self.position != *expected_prior {
            return Err(StoreError::Conflict {
                id: self.id.clone(),
                current_fen: self.position.fen().to_string(),
            });
        }

        let mover = self.position.side_to_move();
        let next = self.position.apply(mv)?;
        let outcome = match next.terminal() {
            Terminal::None => None,
            Terminal::Checkmate => Some(Outcome::Checkmate { winner: mover }),
            Terminal::Stalemate => Some(Outcome::Stalemate),
            Terminal::Draw => Some(Outcome::Draw),
        };

        self.position = next;
        self.last_move = Some(*mv);
        self.ply += 1;
        if let Some(outcome) = outcome {
            self.status = SessionStatus::Finished;
            self.outcome = Some(outcome);
        }
        self.touch(now);
        Ok(())
    }

    pub(crate) fn resign(&mut self, color: Color, now: DateTime<Utc>) -> Result<(), StoreError> {
        if self.status != SessionStatus::Active {
            return Err(StoreError::NotActive {
                id: self.id.clone(),
                status: self.status,
            });
        }
        self.status = SessionStatus::Finished;
        self.outcome = Some(Outcome::Resignation {
            winner: color.opponent(),
        });
        self.touch(now);
        Ok(())
    }

    pub(crate) fn abandon(&mut self, now: DateTime<Utc>) {
        self.status = SessionStatus::Finished;
        self.outcome = Some(Outcome::Abandoned);
        self.touch(now);
    }

    pub(crate) fn push_chat(&mut self, author: &str, text: &str, now: DateTime<Utc>) {
        self.chat.push(ChatMessage {
            author: author.to_string(),
            text: text.to_string(),
            sent_at: now,
        });
        self.touch(now);
    }
}

/// Persistence contract shared by every backend.
///
/// Methods return boxed futures so the store can live behind `Arc<dyn SessionStore>`.
pub trait SessionStore: Send + Sync {
    /// New waiting session with the creator seated as White.
    fn create(
        &self,
        nick: String,
        points: u32,
        time_control: TimeControl,
    ) -> BoxFuture<'_, Result<GameSession, StoreError>>;

    /// Seat a second player as Black and activate the session. At most one
    /// concurrent caller succeeds; the rest get `AlreadyFull`. White's own
    /// nick gets `AlreadySeated`.
    fn join<'a>(
        &'a self,
        id: &'a str,
        nick: String,
        points: u32,
    ) -> BoxFuture<'a, Result<Color, StoreError>>;

    fn read<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<GameSession, StoreError>>;

    /// Compare-and-swap on the position: accepted only while the stored
    /// position equals `expected_prior`, otherwise `Conflict`.
    fn apply_move<'a>(
        &'a self,
        id: &'a str,
        mv: Move,
        expected_prior: Position,
    ) -> BoxFuture<'a, Result<GameSession, StoreError>>;

    /// Append-only; entries keep store arrival order.
    fn append_chat<'a>(
        &'a self,
        id: &'a str,
        author: String,
        text: String,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    fn resign<'a>(&'a self, id: &'a str, color: Color) -> BoxFuture<'a, Result<GameSession, StoreError>>;

    /// Waiting sessions, oldest first.
    fn list_waiting(&self) -> BoxFuture<'_, Result<Vec<GameSession>, StoreError>>;

    /// Finish every unfinished session last written before `cutoff`.
    fn expire_idle(
        &self,
        cutoff: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<SessionId>, StoreError>>;

    /// Drop finished sessions last written before `cutoff`. Open feeds on a
    /// dropped session end, and later reads are `NotFound`.
    fn purge_finished(
        &self,
        cutoff: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<SessionId>, StoreError>>;

    /// Push feed: the current snapshot first, then one per stored change.
    /// Intermediate states may be coalesced; the latest is never skipped.
    fn watch<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<SnapshotStream, StoreError>>;
}
