//! Coordinate move notation (`e2e4`, `e7e8q`) and side colors.
//!
//! Castling is written as the king's two-square step (`e1g1`), never as
//! king-takes-rook.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use shakmaty::{File, Rank, Role, Square};

use crate::error::ParseError;

static MOVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-h][1-8][a-h][1-8][qrbn]?$").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    pub fn opponent(self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Color::White => "white",
            Color::Black => "black",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Color {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "white" => Ok(Color::White),
            "black" => Ok(Color::Black),
            other => Err(format!("unknown color '{other}'")),
        }
    }
}

impl From<shakmaty::Color> for Color {
    fn from(c: shakmaty::Color) -> Self {
        match c {
            shakmaty::Color::White => Color::White,
            shakmaty::Color::Black => Color::Black,
        }
    }
}

impl From<Color> for shakmaty::Color {
    fn from(c: Color) -> Self {
        match c {
            Color::White => shakmaty::Color::White,
            Color::Black => shakmaty::Color::Black,
        }
    }
}

/// A candidate move: source square, destination square, optional promotion.
/// Only meaningful relative to a specific position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Move {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<Role>,
}

impl Move {
    pub fn new(from: Square, to: Square, promotion: Option<Role>) -> Self {
        Self { from, to, promotion }
    }

    /// Coordinate form of a move produced by the rules library.
    pub(crate) fn from_raw(m: &shakmaty::Move) -> Self {
        match m {
            shakmaty::Move::Castle { king, rook } => {
                let to_file = if rook.file() > king.file() { 6u32 } else { 2u32 };
                Move {
                    from: *king,
                    to: Square::from_coords(File::new(to_file), king.rank()),
                    promotion: None,
                }
            }
            other => Move {
                from: other.from().unwrap_or_else(|| other.to()),
                to: other.to(),
                promotion: other.promotion(),
            },
        }
    }
}

fn square_at(file: u8, rank: u8) -> Square {
    Square::from_coords(
        File::new(u32::from(file - b'a')),
        Rank::new(u32::from(rank - b'1')),
    )
}

fn promotion_char(role: Role) -> char {
    match role {
        Role::Queen => 'q',
        Role::Rook => 'r',
        Role::Bishop => 'b',
        Role::Knight => 'n',
        Role::King => 'k',
        Role::Pawn => 'p',
    }
}

impl FromStr for Move {
    type Err = ParseError;

    /// Strict: exactly four or five characters, lowercase, no surrounding whitespace.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if !MOVE_RE.is_match(text) {
            return Err(ParseError {
                text: text.to_string(),
            });
        }

        let b = text.as_bytes();
        let promotion = match b.get(4) {
            None => None,
            Some(b'q') => Some(Role::Queen),
            Some(b'r') => Some(Role::Rook),
            Some(b'b') => Some(Role::Bishop),
            Some(b'n') => Some(Role::Knight),
            Some(_) => {
                return Err(ParseError {
                    text: text.to_string(),
                })
            }
        };

        Ok(Move {
            from: square_at(b[0], b[1]),
            to: square_at(b[2], b[3]),
            promotion,
        })
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.from, self.to)?;
        if let Some(role) = self.promotion {
            write!(f, "{}", promotion_char(role))?;
        }
        Ok(())
    }
}

impl Serialize for Move {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Move {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_and_promotion() {
        let mv: Move = "e2e4".parse().unwrap();
        assert_eq!(mv.from, Square::E2);
        assert_eq!(mv.to, Square::E4);
        assert_eq!(mv.promotion, None);

        let promo: Move = "e7e8q".parse().unwrap();
        assert_eq!(promo.promotion, Some(Role::Queen));
        assert_eq!(promo.to_string(), "e7e8q");
    }

    #[test]
    fn test_parse_rejects_malformed_text() {
        for bad in [
            "", "e2", "e2e", "e2e4 ", " e2e4", "E2E4", "e2e4Q", "e2e4k", "e9e4", "i2e4",
            "e2-e4", "e2e4qq", "Nf3", "0000",
        ] {
            assert!(bad.parse::<Move>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_move_serde_as_string() {
        let mv: Move = "g1f3".parse().unwrap();
        let json = serde_json::to_string(&mv).unwrap();
        assert_eq!(json, "\"g1f3\"");
        let back: Move = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mv);
        assert!(serde_json::from_str::<Move>("\"g1 f3\"").is_err());
    }

    #[test]
    fn test_color_opponent() {
        assert_eq!(Color::White.opponent(), Color::Black);
        assert_eq!("black".parse::<Color>(), Ok(Color::Black));
    }
}
