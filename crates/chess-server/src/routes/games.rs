use std::sync::Arc;

use axum::{extract::Path, Extension, Json};
use chess_core::{Color, Move, Position};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::info;

use crate::error::AppError;
use crate::profile::ProfileBook;
use crate::routes::extract::{ApiJson, ApiQuery};
use crate::routes::{validate_chat, validate_nick};
use crate::store::{GameSession, SessionStatus, SessionStore, TimeControl};

#[derive(Deserialize)]
pub struct CreateGameRequest {
    pub nick: String,
    #[serde(default)]
    pub time_control: TimeControl,
}

#[derive(Deserialize)]
pub struct ListGamesQuery {
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct NickRequest {
    pub nick: String,
}

#[derive(Deserialize)]
pub struct MoveRequest {
    pub nick: String,
    #[serde(rename = "move")]
    pub mv: String,
    /// Position the client believes is current. Defaults to the stored one.
    pub expected_fen: Option<String>,
}

#[derive(Deserialize)]
pub struct ChatRequest {
    pub nick: String,
    pub text: String,
}

fn seated(session: &GameSession, nick: &str, action: &str) -> Result<Color, AppError> {
    session
        .seat_of(nick)
        .ok_or_else(|| AppError::Forbidden(format!("{nick} is not seated and cannot {action}")))
}

/// POST /api/games
pub async fn create_game(
    Extension(store): Extension<Arc<dyn SessionStore>>,
    Extension(profiles): Extension<Arc<ProfileBook>>,
    ApiJson(req): ApiJson<CreateGameRequest>,
) -> Result<Json<JsonValue>, AppError> {
    validate_nick(&req.nick)?;
    let points = profiles.points(&req.nick);
    let session = store.create(req.nick, points, req.time_control).await?;

    Ok(Json(json!({
        "game_id": session.id,
        "color": Color::White,
        "session": session,
    })))
}

/// GET /api/games?status=waiting
pub async fn list_games(
    Extension(store): Extension<Arc<dyn SessionStore>>,
    ApiQuery(q): ApiQuery<ListGamesQuery>,
) -> Result<Json<JsonValue>, AppError> {
    match q.status.as_deref() {
        None | Some("waiting") => {}
        Some(other) => {
            return Err(AppError::BadRequest(format!(
                "Only waiting games can be listed, not '{other}'"
            )))
        }
    }
    let games = store.list_waiting().await?;
    Ok(Json(json!({ "total": games.len(), "games": games })))
}

/// GET /api/games/{game_id}
pub async fn get_game(
    Extension(store): Extension<Arc<dyn SessionStore>>,
    Path(game_id): Path<String>,
) -> Result<Json<GameSession>, AppError> {
    Ok(Json(store.read(&game_id).await?))
}

/// POST /api/games/{game_id}/join
pub async fn join_game(
    Extension(store): Extension<Arc<dyn SessionStore>>,
    Extension(profiles): Extension<Arc<ProfileBook>>,
    Path(game_id): Path<String>,
    ApiJson(req): ApiJson<NickRequest>,
) -> Result<Json<JsonValue>, AppError> {
    validate_nick(&req.nick)?;
    let points = profiles.points(&req.nick);
    let color = store.join(&game_id, req.nick, points).await?;
    let session = store.read(&game_id).await?;

    Ok(Json(json!({ "color": color, "session": session })))
}

/// POST /api/games/{game_id}/moves
///
/// Same checks as a WebSocket move, but stateless: the client names the
/// position it moved from and the store rejects the move if that position is
/// no longer current.
pub async fn submit_move(
    Extension(store): Extension<Arc<dyn SessionStore>>,
    Extension(profiles): Extension<Arc<ProfileBook>>,
    Path(game_id): Path<String>,
    ApiJson(req): ApiJson<MoveRequest>,
) -> Result<Json<GameSession>, AppError> {
    let mv: Move = req.mv.parse()?;
    let current = store.read(&game_id).await?;
    let color = seated(&current, &req.nick, "move")?;

    if current.status != SessionStatus::Active {
        return Err(AppError::NotActive(format!(
            "Game {game_id} is {}, not active",
            current.status
        )));
    }
    let expected = match req.expected_fen.as_deref() {
        Some(fen) => Position::from_fen(fen)?,
        None => current.position.clone(),
    };
    let to_move = expected.side_to_move();
    if to_move != color {
        return Err(AppError::NotYourTurn(format!(
            "Not your turn: {to_move} to move"
        )));
    }

    let session = store.apply_move(&game_id, mv, expected).await?;
    profiles.record_move_outcome(&session);
    info!(game_id = %game_id, nick = %req.nick, mv = %mv, "Move played over HTTP");
    Ok(Json(session))
}

/// POST /api/games/{game_id}/chat
pub async fn post_chat(
    Extension(store): Extension<Arc<dyn SessionStore>>,
    Path(game_id): Path<String>,
    ApiJson(req): ApiJson<ChatRequest>,
) -> Result<Json<GameSession>, AppError> {
    let text = validate_chat(&req.text)?;
    let current = store.read(&game_id).await?;
    seated(&current, &req.nick, "chat")?;

    store.append_chat(&game_id, req.nick, text).await?;
    Ok(Json(store.read(&game_id).await?))
}

/// POST /api/games/{game_id}/resign
pub async fn resign(
    Extension(store): Extension<Arc<dyn SessionStore>>,
    Path(game_id): Path<String>,
    ApiJson(req): ApiJson<NickRequest>,
) -> Result<Json<GameSession>, AppError> {
    let current = store.read(&game_id).await?;
    let color = seated(&current, &req.nick, "resign")?;
    Ok(Json(store.resign(&game_id, color).await?))
}
