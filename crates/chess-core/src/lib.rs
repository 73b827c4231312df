//! Chess rules for the session engine.
//!
//! `position` validates and applies moves on immutable snapshots, `notation`
//! parses coordinate move text, `bot` implements the three bot tiers. Legality
//! and move generation come from shakmaty; nothing here does I/O.

pub mod bot;
pub mod error;
pub mod notation;
pub mod position;

pub use bot::{choose_move, play_vs_bot, BotTurn, Tier};
pub use error::{MoveError, ParseError};
pub use notation::{Color, Move};
pub use position::{Position, Terminal, STARTING_FEN};
