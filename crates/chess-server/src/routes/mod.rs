//! HTTP and WebSocket surface.

pub mod bot;
pub mod extract;
pub mod games;
pub mod matchmaking;
pub mod profiles;
pub mod session_ws;

use std::sync::{Arc, LazyLock};

use axum::{
    routing::{get, post},
    Extension, Json, Router,
};
use regex::Regex;
use serde_json::{json, Value as JsonValue};
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::AppError;
use crate::matchmaker::Matchmaker;
use crate::profile::ProfileBook;
use crate::store::SessionStore;

pub const MAX_CHAT_CHARS: usize = 500;

static NICK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,24}$").expect("static regex"));

pub fn validate_nick(nick: &str) -> Result<(), AppError> {
    if NICK_RE.is_match(nick) {
        Ok(())
    } else {
        Err(AppError::BadRequest(
            "Nickname must be 1-24 letters, numbers, '_' or '-'".into(),
        ))
    }
}

/// Trimmed chat text, or an error if it is empty or too long.
pub fn validate_chat(text: &str) -> Result<String, AppError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::BadRequest("Chat message is empty".into()));
    }
    if text.chars().count() > MAX_CHAT_CHARS {
        return Err(AppError::BadRequest(format!(
            "Chat message longer than {MAX_CHAT_CHARS} characters"
        )));
    }
    Ok(text.to_string())
}

/// GET /health
pub async fn health_check() -> Json<JsonValue> {
    Json(json!({ "status": "ok" }))
}

pub fn router(store: Arc<dyn SessionStore>, profiles: Arc<ProfileBook>, config: Config) -> Router {
    let matchmaker = Arc::new(Matchmaker::new(store.clone(), config.matchmaking_attempts));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        // Games
        .route("/api/games", get(games::list_games).post(games::create_game))
        .route("/api/games/{game_id}", get(games::get_game))
        .route("/api/games/{game_id}/join", post(games::join_game))
        .route("/api/games/{game_id}/moves", post(games::submit_move))
        .route("/api/games/{game_id}/chat", post(games::post_chat))
        .route("/api/games/{game_id}/resign", post(games::resign))
        .route("/api/games/{game_id}/ws", get(session_ws::ws_handler))
        // Matchmaking
        .route("/api/matchmaking", post(matchmaking::find_or_create))
        // Bot games
        .route("/api/bot/move", post(bot::bot_move))
        // Profiles
        .route("/api/profiles/{nick}", get(profiles::get_profile))
        // Shared state
        .layer(Extension(store))
        .layer(Extension(profiles))
        .layer(Extension(matchmaker))
        .layer(Extension(config))
        .layer(cors)
}
