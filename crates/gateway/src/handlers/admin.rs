//! Administration handlers
//!
//! Every handler here requires the `admin` role; the check lives in the
//! services so that it runs after request validation.

use crate::extract::{AppJson, AppPath, AppQuery};
use crate::AppState;
use achievo_common::{
    accounts::{
        CreateLecturerRequest, CreateStudentRequest, CreateUserRequest, PageQuery,
        SetAdvisorRequest, UpdateUserRequest,
    },
    achievements::{Achievement, AchievementListQuery},
    auth::AuthContext,
    db::models::{Lecturer, Role, Student, User},
    errors::Result,
    store::Paged,
};
use axum::{extract::State, http::StatusCode, Json};
use uuid::Uuid;

pub async fn list_users(
    State(state): State<AppState>,
    auth: AuthContext,
    AppQuery(query): AppQuery<PageQuery>,
) -> Result<Json<Paged<User>>> {
    Ok(Json(state.accounts.list_users(&auth, &query).await?))
}

pub async fn create_user(
    State(state): State<AppState>,
    auth: AuthContext,
    AppJson(request): AppJson<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>)> {
    let user = state.accounts.create_user(&auth, request).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthContext,
    AppPath(id): AppPath<Uuid>,
    AppJson(request): AppJson<UpdateUserRequest>,
) -> Result<Json<User>> {
    Ok(Json(state.accounts.update_user(&auth, id, request).await?))
}

/// Deactivates; accounts are kept for the audit trail of their achievements
pub async fn deactivate_user(
    State(state): State<AppState>,
    auth: AuthContext,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<User>> {
    Ok(Json(state.accounts.deactivate_user(&auth, id).await?))
}

pub async fn list_roles(State(state): State<AppState>, auth: AuthContext) -> Result<Json<Vec<Role>>> {
    Ok(Json(state.accounts.list_roles(&auth).await?))
}

pub async fn create_student(
    State(state): State<AppState>,
    auth: AuthContext,
    AppJson(request): AppJson<CreateStudentRequest>,
) -> Result<(StatusCode, Json<Student>)> {
    let student = state.accounts.create_student(&auth, request).await?;
    Ok((StatusCode::CREATED, Json(student)))
}

pub async fn create_lecturer(
    State(state): State<AppState>,
    auth: AuthContext,
    AppJson(request): AppJson<CreateLecturerRequest>,
) -> Result<(StatusCode, Json<Lecturer>)> {
    let lecturer = state.accounts.create_lecturer(&auth, request).await?;
    Ok((StatusCode::CREATED, Json(lecturer)))
}

pub async fn set_advisor(
    State(state): State<AppState>,
    auth: AuthContext,
    AppPath(id): AppPath<Uuid>,
    AppJson(request): AppJson<SetAdvisorRequest>,
) -> Result<Json<Student>> {
    Ok(Json(state.accounts.set_advisor(&auth, id, request).await?))
}

pub async fn all_achievements(
    State(state): State<AppState>,
    auth: AuthContext,
    AppQuery(query): AppQuery<AchievementListQuery>,
) -> Result<Json<Paged<Achievement>>> {
    Ok(Json(state.achievements.list_all(&auth, &query).await?))
}
