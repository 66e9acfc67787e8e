//! Lecturer handlers

use crate::extract::AppQuery;
use crate::AppState;
use achievo_common::{
    achievements::{Achievement, AchievementListQuery},
    auth::AuthContext,
    errors::Result,
    store::Paged,
};
use axum::{extract::State, Json};

/// Achievements of the caller's advisees
pub async fn advisee_achievements(
    State(state): State<AppState>,
    auth: AuthContext,
    AppQuery(query): AppQuery<AchievementListQuery>,
) -> Result<Json<Paged<Achievement>>> {
    Ok(Json(state.achievements.list_advisees(&auth, &query).await?))
}
