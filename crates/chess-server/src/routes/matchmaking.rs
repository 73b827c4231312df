use std::sync::Arc;

use axum::{Extension, Json};
use serde::Deserialize;

use crate::error::AppError;
use crate::matchmaker::{Assignment, Matchmaker};
use crate::profile::ProfileBook;
use crate::routes::extract::ApiJson;
use crate::routes::validate_nick;
use crate::store::TimeControl;

#[derive(Deserialize)]
pub struct MatchRequest {
    pub nick: String,
    /// Used only when a new session has to be created.
    #[serde(default)]
    pub time_control: TimeControl,
}

/// POST /api/matchmaking
pub async fn find_or_create(
    Extension(matchmaker): Extension<Arc<Matchmaker>>,
    Extension(profiles): Extension<Arc<ProfileBook>>,
    ApiJson(req): ApiJson<MatchRequest>,
) -> Result<Json<Assignment>, AppError> {
    validate_nick(&req.nick)?;
    let points = profiles.points(&req.nick);
    let assignment = matchmaker
        .find_or_create(&req.nick, points, req.time_control)
        .await?;
    Ok(Json(assignment))
}
