//! Postgres-backed session store.
//!
//! Every conditional write is a single `UPDATE ... WHERE <precondition>
//! RETURNING`, so Postgres row locking provides per-session serialization.
//! Writers announce changes with `pg_notify`; `watch` listens on the same
//! channel and falls back to polling if LISTEN is unavailable.

use std::sync::Arc;
use std::time::Duration;

use chess_core::{Color, Move, Position};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use sqlx::postgres::{PgListener, PgPool, PgPoolOptions};
use sqlx::types::Json;
use tracing::{debug, info, warn};

use super::poll::poll_snapshots;
use super::{
    ChatMessage, GameSession, Outcome, Seat, SessionId, SessionStatus, SessionStore,
    SnapshotStream, StoreError, TimeControl,
};

const NOTIFY_CHANNEL: &str = "game_sessions";

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS game_sessions (
    id                  TEXT PRIMARY KEY,
    player_white        TEXT NOT NULL,
    player_white_points BIGINT NOT NULL DEFAULT 0,
    player_black        TEXT,
    player_black_points BIGINT,
    status              TEXT NOT NULL DEFAULT 'waiting',
    fen                 TEXT NOT NULL,
    last_move           TEXT,
    ply                 INTEGER NOT NULL DEFAULT 0,
    revision            BIGINT NOT NULL DEFAULT 0,
    outcome             JSONB,
    time_control        TEXT NOT NULL DEFAULT 'unlimited',
    chat                JSONB NOT NULL DEFAULT '[]'::jsonb,
    created_at          TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at          TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_game_sessions_status_created
    ON game_sessions (status, created_at);
CREATE INDEX IF NOT EXISTS idx_game_sessions_updated
    ON game_sessions (updated_at);
"#;

const SESSION_COLUMNS: &str = "id, player_white, player_white_points, player_black, \
     player_black_points, status, fen, last_move, ply, revision, outcome, time_control, \
     chat, created_at, updated_at";

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(e.to_string()),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    id: String,
    player_white: String,
    player_white_points: i64,
    player_black: Option<String>,
    player_black_points: Option<i64>,
    status: String,
    fen: String,
    last_move: Option<String>,
    ply: i32,
    revision: i64,
    outcome: Option<Json<Outcome>>,
    time_control: String,
    chat: Json<Vec<ChatMessage>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for GameSession {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let corrupt = |field: &str, detail: String| {
            StoreError::Backend(format!("game {} has bad {field}: {detail}", row.id))
        };

        let status = row.status.parse().map_err(|e| corrupt("status", e))?;
        let position = Position::from_fen(&row.fen).map_err(|e| corrupt("fen", e.to_string()))?;
        let last_move = row
            .last_move
            .as_deref()
            .map(str::parse::<Move>)
            .transpose()
            .map_err(|e| corrupt("last_move", e.to_string()))?;
        let time_control = row
            .time_control
            .parse()
            .map_err(|e| corrupt("time_control", e))?;
        let white_points = u32::try_from(row.player_white_points)
            .map_err(|e| corrupt("player_white_points", e.to_string()))?;
        let black = match (row.player_black, row.player_black_points) {
            (Some(nick), points) => Some(Seat {
                nick,
                points: u32::try_from(points.unwrap_or(0))
                    .map_err(|e| corrupt("player_black_points", e.to_string()))?,
            }),
            (None, _) => None,
        };
        let ply = u32::try_from(row.ply).map_err(|e| corrupt("ply", e.to_string()))?;
        let revision =
            u64::try_from(row.revision).map_err(|e| corrupt("revision", e.to_string()))?;

        Ok(GameSession {
            id: row.id,
            white: Seat {
                nick: row.player_white,
                points: white_points,
            },
            black,
            status,
            position,
            last_move,
            ply,
            revision,
            outcome: row.outcome.map(|Json(o)| o),
            chat: row.chat.0,
            time_control,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    poll_interval: Duration,
}

impl PgStore {
    pub async fn connect(database_url: &str, poll_interval: Duration) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await?;
        Ok(Self::from_pool(pool, poll_interval))
    }

    pub fn from_pool(pool: PgPool, poll_interval: Duration) -> Self {
        Self {
            pool,
            poll_interval,
        }
    }

    /// Create the sessions table if it does not exist.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn fetch(&self, id: &str) -> Result<Option<GameSession>, StoreError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM game_sessions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(GameSession::try_from).transpose()
    }

    async fn fetch_existing(&self, id: &str) -> Result<GameSession, StoreError> {
        self.fetch(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn notify(&self, id: &str) {
        let sent = sqlx::query("SELECT pg_notify($1, $2)")
            .bind(NOTIFY_CHANNEL)
            .bind(id)
            .execute(&self.pool)
            .await;
        // Watchers still catch up on their next resubscribe.
        if let Err(e) = sent {
            warn!(game_id = %id, error = %e, "pg_notify failed");
        }
    }

    async fn listen(&self, id: &str) -> Result<SnapshotStream, StoreError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(NOTIFY_CHANNEL).await?;
        // Subscribe before reading so no write slips between the two.
        let initial = self.fetch_existing(id).await?;

        let store = self.clone();
        let id = id.to_string();
        let updates = listener.into_stream().filter_map(move |note| {
            let store = store.clone();
            let id = id.clone();
            async move {
                match note {
                    Ok(n) if n.payload() == id => Some(store.fetch_existing(&id).await),
                    Ok(_) => None,
                    Err(e) => Some(Err(StoreError::from(e))),
                }
            }
        });

        Ok(stream::once(async move { Ok(initial) }).chain(updates).boxed())
    }
}

impl SessionStore for PgStore {
    fn create(
        &self,
        nick: String,
        points: u32,
        time_control: TimeControl,
    ) -> BoxFuture<'_, Result<GameSession, StoreError>> {
        Box::pin(async move {
            let session = GameSession::new(
                uuid::Uuid::new_v4().to_string(),
                &nick,
                points,
                time_control,
                Utc::now(),
            );
            sqlx::query(
                r#"INSERT INTO game_sessions
                       (id, player_white, player_white_points, status, fen, time_control, created_at, updated_at)
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $7)"#,
            )
            .bind(&session.id)
            .bind(&session.white.nick)
            .bind(i64::from(session.white.points))
            .bind(session.status.as_str())
            .bind(session.position.fen())
            .bind(session.time_control.as_str())
            .bind(session.created_at)
            .execute(&self.pool)
            .await?;

            info!(game_id = %session.id, white = %nick, "Session created");
            self.notify(&session.id).await;
            Ok(session)
        })
    }

    fn join<'a>(
        &'a self,
        id: &'a str,
        nick: String,
        points: u32,
    ) -> BoxFuture<'a, Result<Color, StoreError>> {
        Box::pin(async move {
            let seated: Option<(String,)> = sqlx::query_as(
                r#"UPDATE game_sessions
                   SET player_black = $2, player_black_points = $3, status = 'active',
                       revision = revision + 1, updated_at = NOW()
                   WHERE id = $1 AND status = 'waiting' AND player_black IS NULL
                     AND player_white <> $2
                   RETURNING id"#,
            )
            .bind(id)
            .bind(&nick)
            .bind(i64::from(points))
            .fetch_optional(&self.pool)
            .await?;

            if seated.is_none() {
                let current = self.fetch_existing(id).await?;
                if current.status == SessionStatus::Waiting && current.white.nick == nick {
                    return Err(StoreError::AlreadySeated {
                        id: id.to_string(),
                        nick,
                    });
                }
                return Err(StoreError::AlreadyFull(id.to_string()));
            }

            info!(game_id = %id, black = %nick, "Session joined");
            self.notify(id).await;
            Ok(Color::Black)
        })
    }

    fn read<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<GameSession, StoreError>> {
        Box::pin(self.fetch_existing(id))
    }

    fn apply_move<'a>(
        &'a self,
        id: &'a str,
        mv: Move,
        expected_prior: Position,
    ) -> BoxFuture<'a, Result<GameSession, StoreError>> {
        Box::pin(async move {
            // Validate against the current row, then write only if the row
            // still holds the expected position.
            let mut next = self.fetch_existing(id).await?;
            next.play(&mv, &expected_prior, Utc::now())?;

            let row = sqlx::query_as::<_, SessionRow>(&format!(
                r#"UPDATE game_sessions
                   SET fen = $3, last_move = $4, ply = ply + 1, status = $5, outcome = $6,
                       revision = revision + 1, updated_at = NOW()
                   WHERE id = $1 AND fen = $2 AND status = 'active'
                   RETURNING {SESSION_COLUMNS}"#
            ))
            .bind(id)
            .bind(expected_prior.fen())
            .bind(next.position.fen())
            .bind(mv.to_string())
            .bind(next.status.as_str())
            .bind(next.outcome.map(Json))
            .fetch_optional(&self.pool)
            .await?;

            let Some(row) = row else {
                // Lost the race: report what the winner left behind.
                let current = self.fetch_existing(id).await?;
                if current.status != SessionStatus::Active {
                    return Err(StoreError::NotActive {
                        id: id.to_string(),
                        status: current.status,
                    });
                }
                return Err(StoreError::Conflict {
                    id: id.to_string(),
                    current_fen: current.position.fen().to_string(),
                });
            };

            let session = GameSession::try_from(row)?;
            debug!(game_id = %id, mv = %mv, revision = session.revision, "Move stored");
            if session.status == SessionStatus::Finished {
                info!(game_id = %id, outcome = ?session.outcome, "Session finished");
            }
            self.notify(id).await;
            Ok(session)
        })
    }

    fn append_chat<'a>(
        &'a self,
        id: &'a str,
        author: String,
        text: String,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let message = ChatMessage {
                author,
                text,
                sent_at: Utc::now(),
            };
            let appended: Option<(String,)> = sqlx::query_as(
                r#"UPDATE game_sessions
                   SET chat = chat || jsonb_build_array($2::jsonb),
                       revision = revision + 1, updated_at = NOW()
                   WHERE id = $1
                   RETURNING id"#,
            )
            .bind(id)
            .bind(Json(message))
            .fetch_optional(&self.pool)
            .await?;

            if appended.is_none() {
                return Err(StoreError::NotFound(id.to_string()));
            }
            self.notify(id).await;
            Ok(())
        })
    }

    fn resign<'a>(&'a self, id: &'a str, color: Color) -> BoxFuture<'a, Result<GameSession, StoreError>> {
        Box::pin(async move {
            let outcome = Outcome::Resignation {
                winner: color.opponent(),
            };
            let row = sqlx::query_as::<_, SessionRow>(&format!(
                r#"UPDATE game_sessions
                   SET status = 'finished', outcome = $2,
                       revision = revision + 1, updated_at = NOW()
                   WHERE id = $1 AND status = 'active'
                   RETURNING {SESSION_COLUMNS}"#
            ))
            .bind(id)
            .bind(Json(outcome))
            .fetch_optional(&self.pool)
            .await?;

            let Some(row) = row else {
                let current = self.fetch_existing(id).await?;
                return Err(StoreError::NotActive {
                    id: id.to_string(),
                    status: current.status,
                });
            };

            info!(game_id = %id, %color, "Player resigned");
            self.notify(id).await;
            GameSession::try_from(row)
        })
    }

    fn list_waiting(&self) -> BoxFuture<'_, Result<Vec<GameSession>, StoreError>> {
        Box::pin(async move {
            let rows = sqlx::query_as::<_, SessionRow>(&format!(
                "SELECT {SESSION_COLUMNS} FROM game_sessions \
                 WHERE status = 'waiting' ORDER BY created_at"
            ))
            .fetch_all(&self.pool)
            .await?;
            rows.into_iter().map(GameSession::try_from).collect()
        })
    }

    fn expire_idle(
        &self,
        cutoff: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<SessionId>, StoreError>> {
        Box::pin(async move {
            let expired: Vec<(String,)> = sqlx::query_as(
                r#"UPDATE game_sessions
                   SET status = 'finished', outcome = $2,
                       revision = revision + 1, updated_at = NOW()
                   WHERE status <> 'finished' AND updated_at < $1
                   RETURNING id"#,
            )
            .bind(cutoff)
            .bind(Json(Outcome::Abandoned))
            .fetch_all(&self.pool)
            .await?;

            let ids: Vec<SessionId> = expired.into_iter().map(|(id,)| id).collect();
            for id in &ids {
                self.notify(id).await;
            }
            Ok(ids)
        })
    }

    fn purge_finished(
        &self,
        cutoff: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<SessionId>, StoreError>> {
        Box::pin(async move {
            let purged: Vec<(String,)> = sqlx::query_as(
                r#"DELETE FROM game_sessions
                   WHERE status = 'finished' AND updated_at < $1
                   RETURNING id"#,
            )
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;

            let ids: Vec<SessionId> = purged.into_iter().map(|(id,)| id).collect();
            // Listeners refetch, see NotFound and end their feeds.
            for id in &ids {
                self.notify(id).await;
            }
            Ok(ids)
        })
    }

    fn watch<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<SnapshotStream, StoreError>> {
        Box::pin(async move {
            match self.listen(id).await {
                Ok(feed) => Ok(feed),
                Err(e @ StoreError::NotFound(_)) => Err(e),
                Err(e) => {
                    warn!(game_id = %id, error = %e, "LISTEN unavailable, polling instead");
                    self.fetch_existing(id).await?;
                    let store: Arc<dyn SessionStore> = Arc::new(self.clone());
                    Ok(poll_snapshots(store, id.to_string(), self.poll_interval))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> SessionRow {
        let now = Utc::now();
        SessionRow {
            id: "g1".into(),
            player_white: "alice".into(),
            player_white_points: 20,
            player_black: Some("bob".into()),
            player_black_points: Some(10),
            status: "active".into(),
            fen: "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1".into(),
            last_move: Some("e2e4".into()),
            ply: 1,
            revision: 2,
            outcome: None,
            time_control: "10m".into(),
            chat: Json(vec![]),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_row_to_session() {
        let s = GameSession::try_from(row()).unwrap();
        assert_eq!(s.status, SessionStatus::Active);
        assert_eq!(s.side_to_move(), Color::Black);
        assert_eq!(s.black.unwrap().points, 10);
        assert_eq!(s.last_move.unwrap().to_string(), "e2e4");
        assert_eq!(s.time_control, TimeControl::Minutes10);
    }

    #[test]
    fn test_corrupt_row_is_backend_error() {
        let mut bad = row();
        bad.fen = "garbage".into();
        assert!(matches!(GameSession::try_from(bad), Err(StoreError::Backend(_))));

        let mut bad = row();
        bad.status = "paused".into();
        assert!(matches!(GameSession::try_from(bad), Err(StoreError::Backend(_))));
    }

    #[test]
    fn test_out_of_range_counters_are_backend_errors() {
        let mut bad = row();
        bad.player_white_points = -1;
        assert!(matches!(GameSession::try_from(bad), Err(StoreError::Backend(_))));

        let mut bad = row();
        bad.player_black_points = Some(i64::from(u32::MAX) + 1);
        assert!(matches!(GameSession::try_from(bad), Err(StoreError::Backend(_))));

        let mut big = row();
        big.player_white_points = i64::from(u32::MAX);
        assert_eq!(GameSession::try_from(big).unwrap().white.points, u32::MAX);
    }

    #[test]
    fn test_connection_errors_map_to_unavailable() {
        assert!(matches!(
            StoreError::from(sqlx::Error::PoolTimedOut),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            StoreError::from(sqlx::Error::RowNotFound),
            StoreError::Backend(_)
        ));
    }
}
