use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chess_core::{MoveError, ParseError};
use serde_json::json;

use crate::store::StoreError;
use crate::sync::SyncError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Parse(ParseError),

    #[error("{0}")]
    IllegalMove(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    AlreadyFull(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotYourTurn(String),

    #[error("{0}")]
    NotActive(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Machine-readable error kind, shared by HTTP bodies and WebSocket frames.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "bad_request",
            AppError::Parse(_) => "parse",
            AppError::IllegalMove(_) => "illegal_move",
            AppError::NotFound(_) => "not_found",
            AppError::AlreadyFull(_) => "already_full",
            AppError::Conflict(_) => "conflict",
            AppError::NotYourTurn(_) => "not_your_turn",
            AppError::NotActive(_) => "not_active",
            AppError::Forbidden(_) => "forbidden",
            AppError::Unavailable(_) => "unavailable",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::Parse(_) => StatusCode::BAD_REQUEST,
            AppError::IllegalMove(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::AlreadyFull(_)
            | AppError::Conflict(_)
            | AppError::NotYourTurn(_)
            | AppError::NotActive(_) => StatusCode::CONFLICT,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show the client. Internal details only go to the log.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {msg}");
                "Internal server error".to_string()
            }
            AppError::Unavailable(msg) => {
                tracing::warn!("Store unavailable: {msg}");
                "Game store unavailable, retry shortly".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<MoveError> for AppError {
    fn from(e: MoveError) -> Self {
        match e {
            MoveError::Parse(p) => AppError::Parse(p),
            MoveError::Illegal { .. } => AppError::IllegalMove(e.to_string()),
            MoveError::InvalidPosition { .. } => AppError::BadRequest(e.to_string()),
        }
    }
}

impl From<ParseError> for AppError {
    fn from(e: ParseError) -> Self {
        AppError::Parse(e)
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        let msg = e.to_string();
        match e {
            StoreError::NotFound(_) => AppError::NotFound(msg),
            StoreError::AlreadyFull(_) => AppError::AlreadyFull(msg),
            StoreError::AlreadySeated { .. } => AppError::BadRequest(msg),
            StoreError::Conflict { .. } => AppError::Conflict(msg),
            StoreError::IllegalMove(m) => m.into(),
            StoreError::NotActive { .. } => AppError::NotActive(msg),
            StoreError::Unavailable(_) => AppError::Unavailable(msg),
            StoreError::Backend(_) => AppError::Internal(msg),
        }
    }
}

impl From<SyncError> for AppError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Parse(p) => AppError::Parse(p),
            SyncError::Illegal(m) => m.into(),
            SyncError::NotYourTurn { .. } => AppError::NotYourTurn(e.to_string()),
            SyncError::Spectator(_) => AppError::Forbidden(e.to_string()),
            SyncError::Store(s) => s.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({ "detail": self.public_message(), "kind": self.kind() });
        (status, Json(body)).into_response()
    }
}
