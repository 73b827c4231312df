//! Single-queue matchmaking over the session store.

use std::sync::Arc;

use chess_core::Color;
use serde::Serialize;
use tracing::{debug, info};

use crate::store::{SessionId, SessionStore, StoreError, TimeControl};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assignment {
    pub game_id: SessionId,
    pub color: Color,
}

pub struct Matchmaker {
    store: Arc<dyn SessionStore>,
    attempts: u32,
}

impl Matchmaker {
    pub fn new(store: Arc<dyn SessionStore>, attempts: u32) -> Self {
        Self {
            store,
            attempts: attempts.max(1),
        }
    }

    /// Join the oldest waiting session, or create one and wait in it as White.
    ///
    /// A player already waiting in a session gets that seat back instead of a
    /// second game. Losing a join race to another player moves on to the next
    /// candidate; after `attempts` rounds of lost races a fresh session is
    /// created.
    pub async fn find_or_create(
        &self,
        nick: &str,
        points: u32,
        time_control: TimeControl,
    ) -> Result<Assignment, StoreError> {
        for round in 1..=self.attempts {
            let waiting = self.store.list_waiting().await?;

            if let Some(own) = waiting.iter().find(|s| s.white.nick == nick) {
                debug!(game_id = %own.id, nick, "Returning existing waiting seat");
                return Ok(Assignment {
                    game_id: own.id.clone(),
                    color: Color::White,
                });
            }
            if waiting.is_empty() {
                break;
            }

            for candidate in &waiting {
                let joined = self.store.join(&candidate.id, nick.to_string(), points).await;
                match joined {
                    Ok(color) => {
                        info!(game_id = %candidate.id, nick, "Matched");
                        return Ok(Assignment {
                            game_id: candidate.id.clone(),
                            color,
                        });
                    }
                    Err(
                        StoreError::AlreadyFull(_)
                        | StoreError::AlreadySeated { .. }
                        | StoreError::NotFound(_),
                    ) => {
                        debug!(game_id = %candidate.id, nick, round, "Join race lost");
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let session = self
            .store
            .create(nick.to_string(), points, time_control)
            .await?;
        info!(game_id = %session.id, nick, "No opponent waiting, created session");
        Ok(Assignment {
            game_id: session.id,
            color: Color::White,
        })
    }
}
