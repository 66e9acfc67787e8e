//! Authentication handlers

use crate::extract::AppJson;
use crate::AppState;
use achievo_common::{
    accounts::{LoginRequest, LoginResponse},
    auth::AuthContext,
    errors::Result,
};
use axum::{extract::State, Json};

/// Exchange credentials for a token
pub async fn login(
    State(state): State<AppState>,
    AppJson(request): AppJson<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    let response = state.accounts.login(request).await?;
    Ok(Json(response))
}

/// Issue a new token with the current role and permissions
pub async fn refresh(State(state): State<AppState>, auth: AuthContext) -> Result<Json<LoginResponse>> {
    let response = state.accounts.refresh(&auth).await?;
    Ok(Json(response))
}

/// Identity carried by the presented token
pub async fn profile(auth: AuthContext) -> Json<AuthContext> {
    Json(auth)
}
