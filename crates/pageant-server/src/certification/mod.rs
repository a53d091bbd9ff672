//! Certification Workflow
//!
//! judge signing -> tally master certification -> auditor final certification.
//! Only the final certification is stored as a state; everything before it
//! is derived from assignments and scores on every read. Readiness checks
//! run inside the store's atomic section (see [`readiness`]).

pub mod readiness;

use crate::error::{Result, ScoringError};
use crate::db::ScoringStore;
use crate::models::{
    CertificationEvent, CertificationStatus, CertifyTotalsRequest, CertifyTotalsResponse,
    FinalCertification, FinalCertificationEvent, FinalCertificationRequest, JudgeAssignment,
    RemoveJudgeScoresRequest, RemoveJudgeScoresResponse, RemovedScores, ScoreFilter,
    ScoresRemovedEvent, Subcategory, UncertifyRequest, User, WsEvent,
};
use crate::observability::{AuditEntry, AuditEventType, AuditLogger, OperationTimer};
use crate::rule_engine::Validate;
use crate::state::AppState;
use chrono::Utc;
use readiness::ReadinessCounts;
use std::collections::BTreeMap;
use tracing::info;
use uuid::Uuid;

async fn load_subcategory(store: &dyn ScoringStore, id: Uuid) -> Result<Subcategory> {
    store
        .get_subcategory(id)
        .await?
        .ok_or_else(|| ScoringError::not_found("subcategory", id))
}

/// Derived workflow position of a subcategory
pub async fn certification_status(
    store: &dyn ScoringStore,
    subcategory_id: Uuid,
) -> Result<CertificationStatus> {
    load_subcategory(store, subcategory_id).await?;

    let assignments = store.list_assignments(subcategory_id).await?;
    let scores = store
        .list_scores(&ScoreFilter::subcategory(subcategory_id))
        .await?;
    let final_certification = store.get_final_certification(subcategory_id).await?;

    let counts = ReadinessCounts::tally(&assignments, &scores);
    Ok(CertificationStatus {
        subcategory_id,
        state: counts.state(final_certification.is_some()),
        total_judges: counts.total_judges,
        certified_judges: counts.certified_judges,
        total_scores: counts.total_scores,
        signed_scores: counts.signed_scores,
        ready: final_certification.is_none() && counts.is_ready(),
        final_certification,
    })
}

pub async fn certify_totals(
    state: &AppState,
    actor: &User,
    req: CertifyTotalsRequest,
) -> Result<CertifyTotalsResponse> {
    let store = state.store();

    let mut judge_ids = Vec::with_capacity(req.judge_ids.len());
    for id in &req.judge_ids {
        if !judge_ids.contains(id) {
            judge_ids.push(*id);
        }
    }

    let timer = OperationTimer::start();
    let result: Result<(Subcategory, Vec<JudgeAssignment>)> = async {
        req.validate()?;
        let subcategory = load_subcategory(store, req.subcategory_id).await?;
        let certified = store
            .certify_judges(subcategory.id, &judge_ids, actor.id, Utc::now())
            .await?;
        Ok((subcategory, certified))
    }
    .await;

    AuditLogger::log(
        store,
        AuditEntry::new(AuditEventType::TotalsCertified)
            .entity("subcategory", req.subcategory_id)
            .actor(actor.id, actor.role)
            .with_payload(serde_json::json!({ "judge_ids": judge_ids }))
            .with_duration(timer.elapsed_ms())
            .outcome(&result),
    )
    .await;
    let (subcategory, certified) = result?;

    info!(
        subcategory_id = %subcategory.id,
        judges = certified.len(),
        actor = %actor.id,
        "Judge totals certified"
    );
    state.publish_to(
        &subcategory,
        WsEvent::CertificationUpdated(CertificationEvent {
            subcategory_id: subcategory.id,
            judge_ids: judge_ids.clone(),
            is_certified: true,
            actor_id: actor.id,
        }),
    );

    let status = certification_status(store, subcategory.id).await?;
    Ok(CertifyTotalsResponse {
        subcategory_id: subcategory.id,
        certified,
        state: status.state,
    })
}

/// Clear a judge's certification so their scores can be corrected
pub async fn revoke_certification(
    state: &AppState,
    actor: &User,
    req: UncertifyRequest,
) -> Result<JudgeAssignment> {
    let store = state.store();

    let timer = OperationTimer::start();
    let result: Result<(Subcategory, JudgeAssignment)> = async {
        req.validate()?;
        let subcategory = load_subcategory(store, req.subcategory_id).await?;
        let assignment = store
            .revoke_certification(subcategory.id, req.judge_id)
            .await?;
        Ok((subcategory, assignment))
    }
    .await;

    AuditLogger::log(
        store,
        AuditEntry::new(AuditEventType::CertificationRevoked)
            .entity("subcategory", req.subcategory_id)
            .actor(actor.id, actor.role)
            .with_payload(serde_json::json!({ "judge_id": req.judge_id }))
            .with_duration(timer.elapsed_ms())
            .outcome(&result),
    )
    .await;
    let (subcategory, assignment) = result?;

    info!(
        subcategory_id = %subcategory.id,
        judge_id = %req.judge_id,
        actor = %actor.id,
        "Judge certification revoked"
    );
    state.publish_to(
        &subcategory,
        WsEvent::CertificationUpdated(CertificationEvent {
            subcategory_id: subcategory.id,
            judge_ids: vec![req.judge_id],
            is_certified: false,
            actor_id: actor.id,
        }),
    );
    Ok(assignment)
}

pub async fn perform_final_certification(
    state: &AppState,
    actor: &User,
    req: FinalCertificationRequest,
) -> Result<FinalCertification> {
    let store = state.store();

    let timer = OperationTimer::start();
    let result: Result<(Subcategory, FinalCertification)> = async {
        req.validate()?;
        let subcategory = load_subcategory(store, req.subcategory_id).await?;
        let certification = store
            .finalize_certification(subcategory.id, actor.id, req.notes.clone(), Utc::now())
            .await?;
        Ok((subcategory, certification))
    }
    .await;

    AuditLogger::log(
        store,
        AuditEntry::new(AuditEventType::FinalCertified)
            .entity("subcategory", req.subcategory_id)
            .actor(actor.id, actor.role)
            .with_duration(timer.elapsed_ms())
            .outcome(&result),
    )
    .await;
    let (subcategory, certification) = result?;

    info!(
        subcategory_id = %subcategory.id,
        certification_id = %certification.id,
        actor = %actor.id,
        "Subcategory final-certified"
    );
    state.publish_to(
        &subcategory,
        WsEvent::CertificationFinalized(FinalCertificationEvent {
            certification_id: certification.id,
            subcategory_id: subcategory.id,
            certified_by: certification.certified_by,
            certified_at: certification.certified_at,
        }),
    );
    Ok(certification)
}

pub async fn list_final_certifications(store: &dyn ScoringStore) -> Result<Vec<FinalCertification>> {
    store.list_final_certifications().await
}

/// Board override: delete a judge's scores and revoke the certifications
/// they backed
pub async fn remove_judge_scores(
    state: &AppState,
    actor: &User,
    req: RemoveJudgeScoresRequest,
) -> Result<RemoveJudgeScoresResponse> {
    let store = state.store();

    let timer = OperationTimer::start();
    let result: Result<RemovedScores> = async {
        req.validate()?;
        store
            .get_user(req.judge_id)
            .await?
            .ok_or_else(|| ScoringError::not_found("judge", req.judge_id))?;
        if let Some(id) = req.subcategory_id {
            load_subcategory(store, id).await?;
        }
        store
            .delete_judge_scores(req.judge_id, req.subcategory_id)
            .await
    }
    .await;

    AuditLogger::log(
        store,
        AuditEntry::new(AuditEventType::JudgeScoresRemoved)
            .entity("judge", req.judge_id)
            .actor(actor.id, actor.role)
            .with_payload(serde_json::json!({
                "subcategory_id": req.subcategory_id,
                "deleted_count": result.as_ref().map(|r| r.deleted.len()).unwrap_or(0),
            }))
            .with_duration(timer.elapsed_ms())
            .outcome(&result),
    )
    .await;
    let removed = result?;

    let mut per_subcategory: BTreeMap<Uuid, usize> = BTreeMap::new();
    for score in &removed.deleted {
        *per_subcategory.entry(score.subcategory_id).or_default() += 1;
    }

    info!(
        judge_id = %req.judge_id,
        deleted = removed.deleted.len(),
        revoked = removed.revoked_certifications.len(),
        actor = %actor.id,
        "Judge scores removed"
    );

    for (subcategory_id, deleted_count) in per_subcategory {
        state
            .publish(
                subcategory_id,
                WsEvent::ScoresRemoved(ScoresRemovedEvent {
                    judge_id: req.judge_id,
                    subcategory_id,
                    deleted_count,
                    certification_revoked: removed
                        .revoked_certifications
                        .contains(&subcategory_id),
                }),
            )
            .await;
    }

    Ok(RemoveJudgeScoresResponse {
        deleted_count: removed.deleted.len(),
        revoked_certifications: removed.revoked_certifications,
    })
}
