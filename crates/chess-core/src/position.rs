//! Move validation over an immutable position snapshot.
//!
//! A `Position` is never mutated in place: `apply` derives a new one. Legal
//! move enumeration order is the rules library's generation order, which is
//! stable for a given position and is what the deterministic bot tier relies on.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use shakmaty::fen::Fen;
use shakmaty::{CastlingMode, Chess, EnPassantMode, Position as _, Role};

use crate::error::MoveError;
use crate::notation::{Color, Move};

pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Halfmove clock value at which the fifty-move rule ends the game.
const FIFTY_MOVE_HALFMOVES: u32 = 100;

/// Game-ending state of a position, from the side to move's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminal {
    None,
    /// The side to move is mated.
    Checkmate,
    Stalemate,
    /// Insufficient material or the fifty-move rule.
    Draw,
}

impl Terminal {
    pub fn is_over(self) -> bool {
        self != Terminal::None
    }
}

#[derive(Clone)]
pub struct Position {
    inner: Chess,
    fen: String,
}

impl Position {
    pub fn initial() -> Self {
        Self::from_chess(Chess::default())
    }

    pub fn from_fen(fen: &str) -> Result<Self, MoveError> {
        let invalid = |reason: String| MoveError::InvalidPosition {
            fen: fen.to_string(),
            reason,
        };
        let parsed: Fen = fen.parse().map_err(|e| invalid(format!("{e}")))?;
        let chess = parsed
            .into_position::<Chess>(CastlingMode::Standard)
            .map_err(|e| invalid(format!("{e}")))?;
        Ok(Self::from_chess(chess))
    }

    fn from_chess(inner: Chess) -> Self {
        let fen = Fen::from_position(&inner, EnPassantMode::Legal).to_string();
        Self { inner, fen }
    }

    /// Canonical FEN of this position.
    pub fn fen(&self) -> &str {
        &self.fen
    }

    pub fn side_to_move(&self) -> Color {
        self.inner.turn().into()
    }

    pub fn halfmove_clock(&self) -> u32 {
        self.inner.halfmoves()
    }

    /// All legal moves in generation order.
    pub fn legal_moves(&self) -> Vec<Move> {
        self.inner.legal_moves().iter().map(Move::from_raw).collect()
    }

    /// Legal moves that capture a piece (en passant included).
    pub fn captures(&self) -> Vec<Move> {
        self.inner
            .legal_moves()
            .iter()
            .filter(|m| m.is_capture())
            .map(Move::from_raw)
            .collect()
    }

    fn find_legal(&self, mv: &Move) -> Option<shakmaty::Move> {
        self.inner
            .legal_moves()
            .into_iter()
            .find(|m| Move::from_raw(m) == *mv)
    }

    pub fn is_legal(&self, mv: &Move) -> bool {
        self.find_legal(mv).is_some()
    }

    /// Derive the position after `mv`. Fails without touching `self` when the
    /// move is not in `legal_moves()`.
    pub fn apply(&self, mv: &Move) -> Result<Position, MoveError> {
        let legal = self.find_legal(mv).ok_or_else(|| MoveError::Illegal {
            mv: mv.to_string(),
            fen: self.fen.clone(),
        })?;
        let mut next = self.inner.clone();
        next.play_unchecked(legal.clone());
        Ok(Self::from_chess(next))
    }

    /// Parse coordinate text and apply it. Malformed text and illegal moves
    /// surface as different `MoveError` variants.
    pub fn apply_text(&self, text: &str) -> Result<(Move, Position), MoveError> {
        let mv: Move = text.parse()?;
        let next = self.apply(&mv)?;
        Ok((mv, next))
    }

    pub fn terminal(&self) -> Terminal {
        if self.inner.is_checkmate() {
            Terminal::Checkmate
        } else if self.inner.is_stalemate() {
            Terminal::Stalemate
        } else if self.inner.is_insufficient_material()
            || self.inner.halfmoves() >= FIFTY_MOVE_HALFMOVES
        {
            Terminal::Draw
        } else {
            Terminal::None
        }
    }

    /// Sum of standard piece values for one side; kings count zero.
    pub fn material(&self, color: Color) -> i32 {
        let board = self.inner.board();
        let side = board.by_color(color.into());
        [
            (Role::Pawn, 1),
            (Role::Knight, 3),
            (Role::Bishop, 3),
            (Role::Rook, 5),
            (Role::Queen, 9),
        ]
        .iter()
        .map(|&(role, value)| (board.by_role(role) & side).count() as i32 * value)
        .sum()
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::initial()
    }
}

impl PartialEq for Position {
    fn eq(&self, other: &Self) -> bool {
        self.fen == other.fen
    }
}

impl Eq for Position {}

impl fmt::Debug for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Position").field(&self.fen).finish()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fen)
    }
}

impl Serialize for Position {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.fen)
    }
}

impl<'de> Deserialize<'de> for Position {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let fen = String::deserialize(deserializer)?;
        Position::from_fen(&fen).map_err(serde::de::Error::custom)
    }
}
