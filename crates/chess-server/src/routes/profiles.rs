use std::sync::Arc;

use axum::{extract::Path, Extension, Json};

use crate::error::AppError;
use crate::profile::{Profile, ProfileBook};
use crate::routes::validate_nick;

/// GET /api/profiles/{nick}
pub async fn get_profile(
    Extension(profiles): Extension<Arc<ProfileBook>>,
    Path(nick): Path<String>,
) -> Result<Json<Profile>, AppError> {
    validate_nick(&nick)?;
    Ok(Json(profiles.get(&nick)))
}
