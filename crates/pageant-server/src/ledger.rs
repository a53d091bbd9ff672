//! Score ledger and signing state machine
//!
//! `Unsubmitted -> Submitted -> Signed -> Submitted (unsign)`. Every
//! transition is a conditional write in the store; the service only
//! interprets a refused write into the right error.

use crate::error::{Result, ScoringError};
use crate::models::{
    NewScore, Score, ScoreEvent, ScoreFilter, ScoreUpsert, Subcategory, SubmitScoreRequest, User,
    WsEvent,
};
use crate::observability::{AuditEntry, AuditEventType, AuditLogger, OperationTimer};
use crate::rule_engine::Validate;
use crate::state::AppState;
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

pub async fn submit_score(state: &AppState, judge: &User, req: SubmitScoreRequest) -> Result<Score> {
    if let Err(e) = state.rules.check_rate_limit(judge.id) {
        AuditLogger::security(
            state.store(),
            AuditEventType::RateLimitExceeded,
            Some(judge.id),
            "score submission rate limit exceeded",
        )
        .await;
        return Err(e);
    }

    let store = state.store();
    let timer = OperationTimer::start();
    let outcome: Result<(Score, Subcategory)> = async {
        req.validate()?;

        let criterion = store
            .get_criterion(req.criterion_id)
            .await?
            .ok_or_else(|| ScoringError::not_found("criterion", req.criterion_id))?;
        store
            .get_contestant(req.contestant_id)
            .await?
            .ok_or_else(|| ScoringError::not_found("contestant", req.contestant_id))?;
        let subcategory = store
            .get_subcategory(criterion.subcategory_id)
            .await?
            .ok_or_else(|| ScoringError::not_found("subcategory", criterion.subcategory_id))?;

        if req.score > criterion.max_score {
            return Err(ScoringError::validation(format!(
                "score {} exceeds maximum {} for criterion {}",
                req.score, criterion.max_score, criterion.name
            )));
        }

        let competing = store
            .list_contestants(subcategory.id)
            .await?
            .iter()
            .any(|c| c.id == req.contestant_id);
        if !competing {
            return Err(ScoringError::validation(
                "contestant is not competing in this subcategory",
            ));
        }

        let upsert = store
            .upsert_score(
                NewScore {
                    judge_id: judge.id,
                    criterion_id: criterion.id,
                    contestant_id: req.contestant_id,
                    subcategory_id: subcategory.id,
                    value: req.score,
                    comment: req.comments.clone(),
                },
                Utc::now(),
            )
            .await?;
        match upsert {
            ScoreUpsert::Written(score) => Ok((score, subcategory)),
            ScoreUpsert::Locked(_) => Err(ScoringError::conflict(
                "score is signed; unsign it before editing",
            )),
        }
    }
    .await;

    AuditLogger::log(
        store,
        AuditEntry::new(AuditEventType::ScoreSubmitted)
            .entity("criterion", req.criterion_id)
            .actor(judge.id, judge.role)
            .with_payload(serde_json::json!({
                "contestant_id": req.contestant_id,
                "value": req.score,
            }))
            .with_duration(timer.elapsed_ms())
            .outcome(&outcome),
    )
    .await;

    let (score, subcategory) = outcome?;
    info!(
        score_id = %score.id,
        judge_id = %judge.id,
        contestant_id = %score.contestant_id,
        value = score.value,
        "Score submitted"
    );
    state.publish_to(&subcategory, WsEvent::ScoreSubmitted(ScoreEvent::from(&score)));
    Ok(score)
}

/// Re-read a score whose conditional write was refused
async fn refused(state: &AppState, score_id: Uuid, judge_id: Uuid) -> Result<Score> {
    let score = state
        .store()
        .get_score(score_id)
        .await?
        .ok_or_else(|| ScoringError::not_found("score", score_id))?;
    if score.judge_id != judge_id {
        return Err(ScoringError::forbidden("score belongs to another judge"));
    }
    Ok(score)
}

pub async fn sign_score(state: &AppState, judge: &User, score_id: Uuid) -> Result<Score> {
    let store = state.store();
    let timer = OperationTimer::start();

    // (score, whether this call changed it)
    let outcome: Result<(Score, bool)> = async {
        match store.sign_score(score_id, judge.id, Utc::now()).await? {
            Some(score) => Ok((score, true)),
            None => refused(state, score_id, judge.id).await.map(|s| (s, false)),
        }
    }
    .await;

    AuditLogger::log(
        store,
        AuditEntry::new(AuditEventType::ScoreSigned)
            .entity("score", score_id)
            .actor(judge.id, judge.role)
            .with_payload(serde_json::json!({
                "already_signed": matches!(outcome, Ok((_, false))),
            }))
            .with_duration(timer.elapsed_ms())
            .outcome(&outcome),
    )
    .await;

    let (signed, changed) = outcome?;
    if !changed {
        debug!(score_id = %score_id, "Score already signed");
        return Ok(signed);
    }

    info!(score_id = %signed.id, judge_id = %judge.id, "Score signed");
    state
        .publish(signed.subcategory_id, WsEvent::ScoreSigned(ScoreEvent::from(&signed)))
        .await;
    Ok(signed)
}

pub async fn unsign_score(state: &AppState, judge: &User, score_id: Uuid) -> Result<Score> {
    let store = state.store();
    let timer = OperationTimer::start();

    let outcome: Result<(Score, bool)> = async {
        match store.unsign_score(score_id, judge.id, Utc::now()).await? {
            Some(score) => Ok((score, true)),
            None => {
                let score = refused(state, score_id, judge.id).await?;
                if !score.is_signed {
                    return Ok((score, false));
                }
                Err(ScoringError::conflict(
                    "judge totals are certified; the tally master must revoke certification first",
                ))
            }
        }
    }
    .await;

    AuditLogger::log(
        store,
        AuditEntry::new(AuditEventType::ScoreUnsigned)
            .entity("score", score_id)
            .actor(judge.id, judge.role)
            .with_payload(serde_json::json!({
                "already_unsigned": matches!(outcome, Ok((_, false))),
            }))
            .with_duration(timer.elapsed_ms())
            .outcome(&outcome),
    )
    .await;

    let (unsigned, changed) = outcome?;
    if !changed {
        debug!(score_id = %score_id, "Score already unsigned");
        return Ok(unsigned);
    }

    info!(score_id = %unsigned.id, judge_id = %judge.id, "Score unsigned");
    state
        .publish(unsigned.subcategory_id, WsEvent::ScoreUnsigned(ScoreEvent::from(&unsigned)))
        .await;
    Ok(unsigned)
}

/// A judge's own scores in one subcategory
pub async fn judge_scores(state: &AppState, judge: &User, subcategory_id: Uuid) -> Result<Vec<Score>> {
    let store = state.store();
    store
        .get_subcategory(subcategory_id)
        .await?
        .ok_or_else(|| ScoringError::not_found("subcategory", subcategory_id))?;

    store
        .list_scores(&ScoreFilter {
            subcategory_id: Some(subcategory_id),
            judge_id: Some(judge.id),
            ..Default::default()
        })
        .await
}
