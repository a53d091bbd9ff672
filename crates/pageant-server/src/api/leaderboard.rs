//! Leaderboard API handlers

use crate::aggregation;
use crate::api::auth::require_auth;
use crate::error::Result;
use crate::models::{LeaderboardEntry, TieBreak};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<usize>,
    /// Overrides the configured tie-break rule
    pub tie_break: Option<TieBreak>,
}

pub async fn get_leaderboard(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(subcategory_id): Path<Uuid>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Vec<LeaderboardEntry>>> {
    require_auth(&state, &headers).await?;

    let tie_break = query.tie_break.unwrap_or(state.config.tie_break);
    let mut entries = aggregation::leaderboard(state.store(), subcategory_id, tie_break).await?;
    if let Some(limit) = query.limit {
        entries.truncate(limit);
    }
    Ok(Json(entries))
}
