//! Achievement handlers
//!
//! Every `{id}` is an achievement reference id.

use crate::extract::{AppJson, AppPath, AppQuery};
use crate::AppState;
use achievo_common::{
    achievements::{
        Achievement, AchievementListQuery, CreateAchievementRequest, CreatedAchievement,
        VerifyRequest,
    },
    auth::AuthContext,
    errors::Result,
    store::Paged,
};
use axum::{extract::State, http::StatusCode, Json};
use uuid::Uuid;

/// Store a new draft
pub async fn create(
    State(state): State<AppState>,
    auth: AuthContext,
    AppJson(request): AppJson<CreateAchievementRequest>,
) -> Result<(StatusCode, Json<CreatedAchievement>)> {
    let created = state.achievements.create(&auth, request).await?;

    tracing::info!(
        reference_id = %created.reference_id,
        user_id = %auth.user_id,
        request_id = %auth.request_id,
        "Achievement created"
    );

    Ok((StatusCode::CREATED, Json(created)))
}

/// The caller's own achievements
pub async fn list_mine(
    State(state): State<AppState>,
    auth: AuthContext,
    AppQuery(query): AppQuery<AchievementListQuery>,
) -> Result<Json<Paged<Achievement>>> {
    Ok(Json(state.achievements.list_mine(&auth, &query).await?))
}

pub async fn detail(
    State(state): State<AppState>,
    auth: AuthContext,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Achievement>> {
    Ok(Json(state.achievements.detail(&auth, id).await?))
}

/// Send a draft to the advisor
pub async fn submit(
    State(state): State<AppState>,
    auth: AuthContext,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Achievement>> {
    Ok(Json(state.achievements.submit(&auth, id).await?))
}

/// Approve or reject a submitted achievement
pub async fn verify(
    State(state): State<AppState>,
    auth: AuthContext,
    AppPath(id): AppPath<Uuid>,
    AppJson(request): AppJson<VerifyRequest>,
) -> Result<Json<Achievement>> {
    Ok(Json(state.achievements.verify(&auth, id, request).await?))
}

/// Soft delete a draft
pub async fn delete(
    State(state): State<AppState>,
    auth: AuthContext,
    AppPath(id): AppPath<Uuid>,
) -> Result<StatusCode> {
    state.achievements.delete(&auth, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
