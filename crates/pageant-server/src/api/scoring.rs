//! Scoring API handlers (judges)

use crate::aggregation;
use crate::api::auth::{require_auth, require_role};
use crate::error::Result;
use crate::ledger;
use crate::models::{ContestantTotal, Role, Score, SubmitScoreRequest};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

pub async fn submit_score(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SubmitScoreRequest>,
) -> Result<(StatusCode, Json<Score>)> {
    let judge = require_role(&state, &headers, Role::Judge).await?;
    let score = ledger::submit_score(&state, &judge, req).await?;
    Ok((StatusCode::CREATED, Json(score)))
}

pub async fn sign_score(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(score_id): Path<Uuid>,
) -> Result<Json<Score>> {
    let judge = require_role(&state, &headers, Role::Judge).await?;
    Ok(Json(ledger::sign_score(&state, &judge, score_id).await?))
}

pub async fn unsign_score(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(score_id): Path<Uuid>,
) -> Result<Json<Score>> {
    let judge = require_role(&state, &headers, Role::Judge).await?;
    Ok(Json(ledger::unsign_score(&state, &judge, score_id).await?))
}

pub async fn contestant_total(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((contestant_id, subcategory_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ContestantTotal>> {
    require_auth(&state, &headers).await?;
    let total =
        aggregation::contestant_total(state.store(), contestant_id, subcategory_id).await?;
    Ok(Json(total))
}

pub async fn judge_scores(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(subcategory_id): Path<Uuid>,
) -> Result<Json<Vec<Score>>> {
    let judge = require_role(&state, &headers, Role::Judge).await?;
    Ok(Json(
        ledger::judge_scores(&state, &judge, subcategory_id).await?,
    ))
}
