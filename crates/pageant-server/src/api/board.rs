//! Board API handlers: score removal override and deductions

use crate::api::auth::{require_auth, require_role};
use crate::certification;
use crate::deductions;
use crate::error::Result;
use crate::models::{
    AddDeductionRequest, Deduction, RemoveJudgeScoresRequest, RemoveJudgeScoresResponse, Role,
};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

pub async fn remove_judge_scores(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RemoveJudgeScoresRequest>,
) -> Result<Json<RemoveJudgeScoresResponse>> {
    let actor = require_role(&state, &headers, Role::Board).await?;
    Ok(Json(
        certification::remove_judge_scores(&state, &actor, req).await?,
    ))
}

pub async fn add_deduction(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<AddDeductionRequest>,
) -> Result<(StatusCode, Json<Deduction>)> {
    let actor = require_role(&state, &headers, Role::Board).await?;
    let deduction = deductions::add_deduction(&state, &actor, req).await?;
    Ok((StatusCode::CREATED, Json(deduction)))
}

pub async fn contestant_deductions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((contestant_id, subcategory_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<Deduction>>> {
    require_auth(&state, &headers).await?;
    Ok(Json(
        deductions::contestant_deductions(&state, contestant_id, subcategory_id).await?,
    ))
}
