//! Tally master and auditor API handlers

use crate::api::auth::{require_auth, require_role};
use crate::certification;
use crate::error::Result;
use crate::models::{
    CertificationStatus, CertifyTotalsRequest, CertifyTotalsResponse, FinalCertification,
    FinalCertificationRequest, JudgeAssignment, Role, UncertifyRequest,
};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub subcategory_id: Uuid,
}

pub async fn certify_totals(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CertifyTotalsRequest>,
) -> Result<Json<CertifyTotalsResponse>> {
    let actor = require_role(&state, &headers, Role::TallyMaster).await?;
    Ok(Json(certification::certify_totals(&state, &actor, req).await?))
}

pub async fn uncertify(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<UncertifyRequest>,
) -> Result<Json<JudgeAssignment>> {
    let actor = require_role(&state, &headers, Role::TallyMaster).await?;
    Ok(Json(
        certification::revoke_certification(&state, &actor, req).await?,
    ))
}

pub async fn final_certification_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<StatusQuery>,
) -> Result<Json<CertificationStatus>> {
    require_role(&state, &headers, Role::Auditor).await?;
    Ok(Json(
        certification::certification_status(state.store(), query.subcategory_id).await?,
    ))
}

pub async fn final_certify(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<FinalCertificationRequest>,
) -> Result<(StatusCode, Json<FinalCertification>)> {
    let actor = require_role(&state, &headers, Role::Auditor).await?;
    let certification = certification::perform_final_certification(&state, &actor, req).await?;
    Ok((StatusCode::CREATED, Json(certification)))
}

pub async fn list_final_certifications(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<FinalCertification>>> {
    require_role(&state, &headers, Role::Auditor).await?;
    Ok(Json(
        certification::list_final_certifications(state.store()).await?,
    ))
}

pub async fn subcategory_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(subcategory_id): Path<Uuid>,
) -> Result<Json<CertificationStatus>> {
    require_auth(&state, &headers).await?;
    Ok(Json(
        certification::certification_status(state.store(), subcategory_id).await?,
    ))
}
