use axum::Json;
use chess_core::{play_vs_bot, BotTurn, Position, Tier};
use serde::Deserialize;

use crate::error::AppError;
use crate::routes::extract::ApiJson;

#[derive(Deserialize)]
pub struct BotMoveRequest {
    /// Position before the human move; the starting position if absent.
    pub fen: Option<String>,
    #[serde(rename = "move")]
    pub mv: String,
    pub tier: Tier,
}

/// POST /api/bot/move
///
/// Bot games never touch the session store: the client owns the position.
pub async fn bot_move(ApiJson(req): ApiJson<BotMoveRequest>) -> Result<Json<BotTurn>, AppError> {
    let position = match req.fen.as_deref() {
        Some(fen) => Position::from_fen(fen)?,
        None => Position::initial(),
    };
    let turn = {
        let mut rng = rand::thread_rng();
        play_vs_bot(&position, &req.mv, req.tier, &mut rng)?
    };
    Ok(Json(turn))
}
