//! Session Synchronizer: one per connected client.
//!
//! Holds the client's context (game, nick, seat, last-known session) and keeps
//! it in step with the store. Local state is only ever replaced by a snapshot
//! from the store, either from the watch feed or from an accepted write; it is
//! never derived locally. The store's compare-and-swap is the final arbiter of
//! every move.

use std::sync::Arc;
use std::time::Duration;

use chess_core::{Color, Move, MoveError, ParseError};
use futures::StreamExt;
use thiserror::Error;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::profile::ProfileBook;
use crate::store::{GameSession, SessionId, SessionStatus, SessionStore, SnapshotStream, StoreError};

const BACKOFF_START: Duration = Duration::from_millis(250);
const BACKOFF_MAX: Duration = Duration::from_secs(10);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Illegal(MoveError),

    #[error("Not your turn: {to_move} to move")]
    NotYourTurn { to_move: Color },

    #[error("Spectators cannot {0}")]
    Spectator(&'static str),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::IllegalMove(MoveError::Parse(p)) => SyncError::Parse(p),
            StoreError::IllegalMove(m) => SyncError::Illegal(m),
            other => SyncError::Store(other),
        }
    }
}

/// What the presentation layer should hear about next.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The stored session moved past the local copy.
    Updated(GameSession),
    /// The feed dropped; the next call retries after `retry_in`.
    Reconnecting { attempt: u32, retry_in: Duration },
    /// The session no longer exists.
    Gone,
}

/// Per-client state. Created on connect, dropped on disconnect.
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub game_id: SessionId,
    pub nick: String,
    /// `None` for spectators.
    pub color: Option<Color>,
    pub session: GameSession,
}

pub struct Synchronizer {
    store: Arc<dyn SessionStore>,
    profiles: Arc<ProfileBook>,
    ctx: ClientContext,
    feed: Option<SnapshotStream>,
    attempt: u32,
    retry_at: Option<Instant>,
}

impl Synchronizer {
    /// Read the session and take the seat held by `nick`, if any.
    pub async fn connect(
        store: Arc<dyn SessionStore>,
        profiles: Arc<ProfileBook>,
        game_id: &str,
        nick: &str,
    ) -> Result<Self, SyncError> {
        let session = store.read(game_id).await?;
        let color = session.seat_of(nick);
        info!(game_id, nick, color = ?color, "Client connected");

        Ok(Self {
            store,
            profiles,
            ctx: ClientContext {
                game_id: game_id.to_string(),
                nick: nick.to_string(),
                color,
                session,
            },
            feed: None,
            attempt: 0,
            retry_at: None,
        })
    }

    pub fn context(&self) -> &ClientContext {
        &self.ctx
    }

    pub fn session(&self) -> &GameSession {
        &self.ctx.session
    }

    pub fn color(&self) -> Option<Color> {
        self.ctx.color
    }

    /// Adopt `snapshot` if it is newer than the local copy.
    pub fn reconcile(&mut self, snapshot: GameSession) -> bool {
        if snapshot.id != self.ctx.game_id || snapshot.revision <= self.ctx.session.revision {
            return false;
        }
        // A seat can be filled after connect (spectator-turned-black).
        if self.ctx.color.is_none() {
            self.ctx.color = snapshot.seat_of(&self.ctx.nick);
        }
        self.ctx.session = snapshot;
        true
    }

    fn seat(&self, action: &'static str) -> Result<Color, SyncError> {
        self.ctx.color.ok_or(SyncError::Spectator(action))
    }

    /// Parse, check turn ownership, pre-validate against the local position
    /// and submit with that position as the expected prior.
    pub async fn submit_move(&mut self, text: &str) -> Result<GameSession, SyncError> {
        let mv: Move = text.parse()?;
        let color = self.seat("move")?;

        let local = &self.ctx.session;
        if local.status != SessionStatus::Active {
            return Err(StoreError::NotActive {
                id: local.id.clone(),
                status: local.status,
            }
            .into());
        }
        let to_move = local.side_to_move();
        if to_move != color {
            return Err(SyncError::NotYourTurn { to_move });
        }
        local.position.apply(&mv).map_err(SyncError::Illegal)?;

        let expected = local.position.clone();
        let stored = self.store.apply_move(&self.ctx.game_id, mv, expected).await;
        match stored {
            Ok(session) => {
                debug!(game_id = %self.ctx.game_id, nick = %self.ctx.nick, mv = %mv, "Move accepted");
                self.profiles.record_move_outcome(&session);
                self.reconcile(session.clone());
                Ok(session)
            }
            Err(e @ StoreError::Conflict { .. }) => {
                // Resync so the caller can decide against the real position.
                let current = self.store.read(&self.ctx.game_id).await;
                match current {
                    Ok(current) => {
                        self.reconcile(current);
                    }
                    Err(read_err) => {
                        warn!(game_id = %self.ctx.game_id, error = %read_err, "Resync after conflict failed");
                    }
                }
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn send_chat(&mut self, text: &str) -> Result<(), SyncError> {
        self.seat("chat")?;
        self.store
            .append_chat(&self.ctx.game_id, self.ctx.nick.clone(), text.to_string())
            .await?;
        Ok(())
    }

    pub async fn resign(&mut self) -> Result<GameSession, SyncError> {
        let color = self.seat("resign")?;
        let session = self.store.resign(&self.ctx.game_id, color).await?;
        self.reconcile(session.clone());
        Ok(session)
    }

    fn schedule_retry(&mut self) -> SyncEvent {
        self.feed = None;
        self.attempt += 1;
        let retry_in = BACKOFF_START
            .saturating_mul(1u32 << (self.attempt - 1).min(16))
            .min(BACKOFF_MAX);
        self.retry_at = Some(Instant::now() + retry_in);
        SyncEvent::Reconnecting {
            attempt: self.attempt,
            retry_in,
        }
    }

    /// Wait for the next thing worth telling the client about. Snapshots that
    /// are not newer than the local copy are absorbed silently.
    ///
    /// Cancel-safe: dropping the future keeps the subscription and any
    /// pending retry deadline.
    pub async fn next_event(&mut self) -> SyncEvent {
        loop {
            if self.feed.is_none() {
                if let Some(at) = self.retry_at {
                    sleep_until(at).await;
                    self.retry_at = None;
                }
                let subscribed = self.store.watch(&self.ctx.game_id).await;
                match subscribed {
                    Ok(feed) => self.feed = Some(feed),
                    Err(StoreError::NotFound(_)) => return SyncEvent::Gone,
                    Err(e) => {
                        warn!(game_id = %self.ctx.game_id, error = %e, "Subscribe failed");
                        return self.schedule_retry();
                    }
                }
            }

            let Some(feed) = self.feed.as_mut() else {
                continue;
            };
            let next = feed.next().await;
            match next {
                Some(Ok(snapshot)) => {
                    if self.attempt > 0 {
                        info!(game_id = %self.ctx.game_id, attempts = self.attempt, "Feed restored");
                        self.attempt = 0;
                    }
                    if self.reconcile(snapshot) {
                        return SyncEvent::Updated(self.ctx.session.clone());
                    }
                }
                Some(Err(StoreError::NotFound(_))) => return SyncEvent::Gone,
                Some(Err(e)) => {
                    warn!(game_id = %self.ctx.game_id, error = %e, "Feed failed");
                    return self.schedule_retry();
                }
                None => {
                    warn!(game_id = %self.ctx.game_id, "Feed closed");
                    return self.schedule_retry();
                }
            }
        }
    }
}
