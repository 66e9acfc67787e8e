//! Reporting handlers

use crate::extract::AppQuery;
use crate::AppState;
use achievo_common::{
    auth::AuthContext,
    errors::Result,
    statistics::{StatisticsQuery, StatisticsReport},
};
use axum::{extract::State, Json};

pub async fn statistics(
    State(state): State<AppState>,
    auth: AuthContext,
    AppQuery(query): AppQuery<StatisticsQuery>,
) -> Result<Json<StatisticsReport>> {
    Ok(Json(state.statistics.report(&auth, &query).await?))
}
