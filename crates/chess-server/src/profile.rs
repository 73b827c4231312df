//! Per-nickname points ledger.
//!
//! Points are advisory: they are copied onto a seat when a player sits down
//! and grow when a player delivers checkmate.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::Serialize;
use tracing::info;

use crate::store::{GameSession, Outcome};

/// Points awarded for delivering checkmate.
pub const CHECKMATE_REWARD: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    pub nick: String,
    pub points: u32,
    pub wins: u32,
}

#[derive(Default)]
pub struct ProfileBook {
    profiles: RwLock<HashMap<String, Profile>>,
}

impl ProfileBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, nick: &str) -> Profile {
        self.profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(nick)
            .cloned()
            .unwrap_or_else(|| Profile {
                nick: nick.to_string(),
                points: 0,
                wins: 0,
            })
    }

    pub fn points(&self, nick: &str) -> u32 {
        self.get(nick).points
    }

    /// Credit `nick` with a checkmate win. Returns the new total.
    pub fn award_checkmate(&self, nick: &str) -> u32 {
        let mut profiles = self.profiles.write().unwrap_or_else(PoisonError::into_inner);
        let profile = profiles.entry(nick.to_string()).or_insert_with(|| Profile {
            nick: nick.to_string(),
            points: 0,
            wins: 0,
        });
        profile.points = profile.points.saturating_add(CHECKMATE_REWARD);
        profile.wins = profile.wins.saturating_add(1);
        profile.points
    }

    /// Award points if the write that produced `session` ended it in checkmate.
    pub fn record_move_outcome(&self, session: &GameSession) {
        let Some(Outcome::Checkmate { winner }) = session.outcome else {
            return;
        };
        if let Some(seat) = session.player(winner) {
            let total = self.award_checkmate(&seat.nick);
            info!(game_id = %session.id, nick = %seat.nick, total, "Checkmate points awarded");
        }
    }
}
