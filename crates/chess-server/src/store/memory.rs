//! In-process session store.
//!
//! Each session lives in its own `tokio::sync::watch` channel. Writes go
//! through `send_if_modified`, which holds the channel's write lock for the
//! whole read-check-write, so writers to one session are serialized while
//! different sessions never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chess_core::{Color, Move, Position};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tracing::{debug, info};

use super::{
    GameSession, SessionId, SessionStatus, SessionStore, SnapshotStream, StoreError, TimeControl,
};

type Slot = Arc<watch::Sender<GameSession>>;

#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<SessionId, Slot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: &str) -> Result<Slot, StoreError> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn slots(&self) -> Vec<Slot> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Run `change` under the session's write lock. Subscribers are notified
    /// only when it succeeds; the returned snapshot is the state it produced.
    fn mutate<T>(
        &self,
        id: &str,
        change: impl FnOnce(&mut GameSession) -> Result<T, StoreError>,
    ) -> Result<(T, GameSession), StoreError> {
        let slot = self.slot(id)?;
        let mut outcome = None;
        slot.send_if_modified(|session| match change(session) {
            Ok(value) => {
                outcome = Some(Ok((value, session.clone())));
                true
            }
            Err(e) => {
                outcome = Some(Err(e));
                false
            }
        });
        outcome.unwrap_or_else(|| Err(StoreError::Backend("session write did not run".into())))
    }
}

impl SessionStore for MemoryStore {
    fn create(
        &self,
        nick: String,
        points: u32,
        time_control: TimeControl,
    ) -> BoxFuture<'_, Result<GameSession, StoreError>> {
        Box::pin(async move {
            let id = uuid::Uuid::new_v4().to_string();
            let session = GameSession::new(id.clone(), &nick, points, time_control, Utc::now());
            let (tx, _rx) = watch::channel(session.clone());
            self.sessions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(id.clone(), Arc::new(tx));
            info!(game_id = %id, white = %nick, "Session created");
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
            let (color, _) = self.mutate(id, |s| s.seat_black(&nick, points, Utc::now()))?;
            info!(game_id = %id, black = %nick, "Session joined");
            Ok(color)
        })
    }

    fn read<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<GameSession, StoreError>> {
        Box::pin(async move { Ok(self.slot(id)?.borrow().clone()) })
    }

    fn apply_move<'a>(
        &'a self,
        id: &'a str,
        mv: Move,
        expected_prior: Position,
    ) -> BoxFuture<'a, Result<GameSession, StoreError>> {
        Box::pin(async move {
            let ((), session) = self.mutate(id, |s| s.play(&mv, &expected_prior, Utc::now()))?;
            debug!(game_id = %id, mv = %mv, revision = session.revision, "Move stored");
            if session.status == SessionStatus::Finished {
                info!(game_id = %id, outcome = ?session.outcome, "Session finished");
            }
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
            self.mutate(id, |s| {
                s.push_chat(&author, &text, Utc::now());
                Ok(())
            })?;
            Ok(())
        })
    }

    fn resign<'a>(&'a self, id: &'a str, color: Color) -> BoxFuture<'a, Result<GameSession, StoreError>> {
        Box::pin(async move {
            let ((), session) = self.mutate(id, |s| s.resign(color, Utc::now()))?;
            info!(game_id = %id, %color, "Player resigned");
            Ok(session)
        })
    }

    fn list_waiting(&self) -> BoxFuture<'_, Result<Vec<GameSession>, StoreError>> {
        Box::pin(async move {
            let mut waiting: Vec<GameSession> = self
                .slots()
                .iter()
                .map(|slot| slot.borrow().clone())
                .filter(|s| s.status == SessionStatus::Waiting)
                .collect();
            waiting.sort_by_key(|s| s.created_at);
            Ok(waiting)
        })
    }

    fn expire_idle(
        &self,
        cutoff: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<SessionId>, StoreError>> {
        Box::pin(async move {
            let mut expired = Vec::new();
            for slot in self.slots() {
                slot.send_if_modified(|s| {
                    if s.status == SessionStatus::Finished || s.updated_at >= cutoff {
                        return false;
                    }
                    s.abandon(Utc::now());
                    expired.push(s.id.clone());
                    true
                });
            }
            Ok(expired)
        })
    }

    fn purge_finished(
        &self,
        cutoff: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<SessionId>, StoreError>> {
        Box::pin(async move {
            let mut purged = Vec::new();
            // Dropping the last sender closes every receiver on that session.
            self.sessions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|id, slot| {
                    let session = slot.borrow();
                    let stale =
                        session.status == SessionStatus::Finished && session.updated_at < cutoff;
                    if stale {
                        purged.push(id.clone());
                    }
                    !stale
                });
            for id in &purged {
                debug!(game_id = %id, "Finished session evicted");
            }
            Ok(purged)
        })
    }

    fn watch<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<SnapshotStream, StoreError>> {
        Box::pin(async move {
            let rx = self.slot(id)?.subscribe();
            let feed = stream::unfold((rx, true), |(mut rx, first)| async move {
                if !first && rx.changed().await.is_err() {
                    return None;
                }
                let snapshot = rx.borrow_and_update().clone();
                Some((Ok(snapshot), (rx, false)))
            });
            Ok(feed.boxed())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn active_game(store: &MemoryStore) -> GameSession {
        let created = store
            .create("alice".into(), 0, TimeControl::Unlimited)
            .await
            .unwrap();
        store.join(&created.id, "bob".into(), 0).await.unwrap();
        store.read(&created.id).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_and_join() {
        let store = MemoryStore::new();
        let s = store
            .create("alice".into(), 30, TimeControl::Minutes10)
            .await
            .unwrap();
        assert_eq!(s.status, SessionStatus::Waiting);
        assert!(s.black.is_none());
        assert_eq!(s.white.points, 30);

        assert_eq!(store.join(&s.id, "bob".into(), 5).await, Ok(Color::Black));
        let joined = store.read(&s.id).await.unwrap();
        assert_eq!(joined.status, SessionStatus::Active);
        assert_eq!(joined.black.as_ref().map(|b| b.nick.as_str()), Some("bob"));
    }

    #[tokio::test]
    async fn test_join_active_session_is_rejected_and_unchanged() {
        let store = MemoryStore::new();
        let s = active_game(&store).await;
        let err = store.join(&s.id, "carol".into(), 0).await.unwrap_err();
        assert_eq!(err, StoreError::AlreadyFull(s.id.clone()));
        assert_eq!(store.read(&s.id).await.unwrap(), s);
    }

    #[tokio::test]
    async fn test_creator_cannot_take_black_seat() {
        let store = MemoryStore::new();
        let s = store
            .create("alice".into(), 0, TimeControl::Unlimited)
            .await
            .unwrap();

        let err = store.join(&s.id, "alice".into(), 0).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadySeated { ref nick, .. } if nick == "alice"));
        assert_eq!(store.read(&s.id).await.unwrap(), s);

        // The seat stays open for a real opponent
        assert_eq!(store.join(&s.id, "bob".into(), 0).await, Ok(Color::Black));
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let store = MemoryStore::new();
        assert!(matches!(store.read("nope").await, Err(StoreError::NotFound(_))));
        assert!(matches!(
            store.join("nope", "bob".into(), 0).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(store.watch("nope").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_concurrent_moves_with_same_prior_position() {
        let store = Arc::new(MemoryStore::new());
        let s = active_game(&store).await;
        let prior = s.position.clone();

        let a = {
            let store = store.clone();
            let (id, prior) = (s.id.clone(), prior.clone());
            tokio::spawn(async move { store.apply_move(&id, "e2e4".parse().unwrap(), prior).await })
        };
        let b = {
            let store = store.clone();
            let (id, prior) = (s.id.clone(), prior.clone());
            tokio::spawn(async move { store.apply_move(&id, "d2d4".parse().unwrap(), prior).await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(StoreError::Conflict { .. })))
            .count();
        assert_eq!((ok, conflicts), (1, 1));
        assert_eq!(store.read(&s.id).await.unwrap().ply, 1);
    }

    #[tokio::test]
    async fn test_illegal_move_leaves_session_unchanged() {
        let store = MemoryStore::new();
        let s = active_game(&store).await;
        let err = store
            .apply_move(&s.id, "e2e5".parse().unwrap(), s.position.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::IllegalMove(_)));
        assert_eq!(store.read(&s.id).await.unwrap(), s);
    }

    #[tokio::test]
    async fn test_chat_is_append_only() {
        let store = MemoryStore::new();
        let s = active_game(&store).await;
        let mut seen: Vec<String> = Vec::new();
        for (author, text) in [("alice", "hi"), ("bob", "hello"), ("alice", "gl")] {
            store
                .append_chat(&s.id, author.into(), text.into())
                .await
                .unwrap();
            let chat = store.read(&s.id).await.unwrap().chat;
            assert_eq!(chat.len(), seen.len() + 1);
            assert!(chat.iter().zip(&seen).all(|(m, t)| &m.text == t));
            seen.push(text.to_string());
        }
    }

    #[tokio::test]
    async fn test_watch_yields_current_then_changes() {
        let store = MemoryStore::new();
        let s = active_game(&store).await;
        let mut feed = store.watch(&s.id).await.unwrap();

        let first = feed.next().await.unwrap().unwrap();
        assert_eq!(first.revision, s.revision);

        store
            .apply_move(&s.id, "e2e4".parse().unwrap(), s.position.clone())
            .await
            .unwrap();
        let next = tokio::time::timeout(Duration::from_secs(1), feed.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(next.last_move.map(|m| m.to_string()).as_deref(), Some("e2e4"));
        assert!(next.revision > first.revision);
    }

    #[tokio::test]
    async fn test_list_waiting_and_expire_idle() {
        let store = MemoryStore::new();
        let waiting = store
            .create("alice".into(), 0, TimeControl::Unlimited)
            .await
            .unwrap();
        let _active = active_game(&store).await;

        let listed = store.list_waiting().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, waiting.id);

        let expired = store
            .expire_idle(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(expired.len(), 2);
        assert!(store.list_waiting().await.unwrap().is_empty());
        let reaped = store.read(&waiting.id).await.unwrap();
        assert_eq!(reaped.outcome, Some(super::super::Outcome::Abandoned));

        // Already finished sessions are left alone
        let again = store
            .expire_idle(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_purge_finished_evicts_and_closes_feeds() {
        let store = MemoryStore::new();
        let s = active_game(&store).await;
        let waiting = store
            .create("carol".into(), 0, TimeControl::Unlimited)
            .await
            .unwrap();
        let mut feed = store.watch(&s.id).await.unwrap();
        feed.next().await.unwrap().unwrap();

        // Active and waiting sessions are never purged
        let later = Utc::now() + chrono::Duration::seconds(1);
        assert!(store.purge_finished(later).await.unwrap().is_empty());

        store.resign(&s.id, Color::White).await.unwrap();
        feed.next().await.unwrap().unwrap();

        // Inside the grace period it stays readable
        assert!(store
            .purge_finished(Utc::now() - chrono::Duration::seconds(60))
            .await
            .unwrap()
            .is_empty());
        assert!(store.read(&s.id).await.is_ok());

        let purged = store
            .purge_finished(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(purged, vec![s.id.clone()]);
        assert_eq!(store.read(&s.id).await, Err(StoreError::NotFound(s.id.clone())));
        assert!(store.read(&waiting.id).await.is_ok());

        let closed = tokio::time::timeout(Duration::from_secs(1), feed.next())
            .await
            .unwrap();
        assert!(closed.is_none());
    }
}
