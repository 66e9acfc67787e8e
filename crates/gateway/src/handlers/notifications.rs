//! Notification inbox handlers

use crate::extract::{AppPath, AppQuery};
use crate::AppState;
use achievo_common::{
    auth::AuthContext,
    db::models::Notification,
    errors::Result,
    notifications::NotificationQuery,
};
use axum::{extract::State, http::StatusCode, Json};
use uuid::Uuid;

pub async fn list(
    State(state): State<AppState>,
    auth: AuthContext,
    AppQuery(query): AppQuery<NotificationQuery>,
) -> Result<Json<Vec<Notification>>> {
    Ok(Json(state.notifications.list(&auth, &query).await?))
}

pub async fn mark_read(
    State(state): State<AppState>,
    auth: AuthContext,
    AppPath(id): AppPath<Uuid>,
) -> Result<StatusCode> {
    state.notifications.mark_read(&auth, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
