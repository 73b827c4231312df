//! Rule-level error types

use thiserror::Error;

/// Move text that is not of the form `<from><to>[promotion]`, e.g. `e2e4` or `e7e8q`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed move '{text}': expected coordinates like e2e4 or e7e8q")]
pub struct ParseError {
    pub text: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MoveError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Well-formed, but not in the legal move set of the position.
    #[error("Illegal move {mv} in position {fen}")]
    Illegal { mv: String, fen: String },

    #[error("Invalid position '{fen}': {reason}")]
    InvalidPosition { fen: String, reason: String },
}
