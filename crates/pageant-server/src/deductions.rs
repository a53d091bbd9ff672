//! Append-only contestant penalties

use crate::error::{Result, ScoringError};
use crate::models::{
    AddDeductionRequest, Contestant, Deduction, DeductionEvent, NewDeduction, Subcategory, User,
    WsEvent,
};
use crate::observability::{AuditEntry, AuditEventType, AuditLogger, OperationTimer};
use crate::rule_engine::Validate;
use crate::state::AppState;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

pub async fn add_deduction(state: &AppState, actor: &User, req: AddDeductionRequest) -> Result<Deduction> {
    let store = state.store();

    let timer = OperationTimer::start();
    let result: Result<(Subcategory, Deduction)> = async {
        req.validate()?;
        let subcategory = load_subcategory(state, req.subcategory_id).await?;
        load_contestant(state, req.contestant_id).await?;

        let deduction = store
            .add_deduction(
                NewDeduction {
                    subcategory_id: subcategory.id,
                    contestant_id: req.contestant_id,
                    amount: req.amount,
                    reason: req.reason.trim().to_string(),
                    comment: req.comment.clone(),
                    created_by: actor.id,
                },
                Utc::now(),
            )
            .await?;
        Ok((subcategory, deduction))
    }
    .await;

    AuditLogger::log(
        store,
        AuditEntry::new(AuditEventType::DeductionAdded)
            .entity("contestant", req.contestant_id)
            .actor(actor.id, actor.role)
            .with_payload(serde_json::json!({
                "subcategory_id": req.subcategory_id,
                "amount": req.amount,
            }))
            .with_duration(timer.elapsed_ms())
            .outcome(&result),
    )
    .await;
    let (subcategory, deduction) = result?;

    info!(
        deduction_id = %deduction.id,
        contestant_id = %deduction.contestant_id,
        amount = deduction.amount,
        "Deduction added"
    );
    state.publish_to(
        &subcategory,
        WsEvent::DeductionAdded(DeductionEvent {
            deduction_id: deduction.id,
            subcategory_id: deduction.subcategory_id,
            contestant_id: deduction.contestant_id,
            amount: deduction.amount,
        }),
    );
    Ok(deduction)
}

async fn load_subcategory(state: &AppState, id: Uuid) -> Result<Subcategory> {
    state
        .store()
        .get_subcategory(id)
        .await?
        .ok_or_else(|| ScoringError::not_found("subcategory", id))
}

async fn load_contestant(state: &AppState, id: Uuid) -> Result<Contestant> {
    state
        .store()
        .get_contestant(id)
        .await?
        .ok_or_else(|| ScoringError::not_found("contestant", id))
}

pub async fn contestant_deductions(
    state: &AppState,
    contestant_id: Uuid,
    subcategory_id: Uuid,
) -> Result<Vec<Deduction>> {
    load_subcategory(state, subcategory_id).await?;
    load_contestant(state, contestant_id).await?;

    state
        .store()
        .list_deductions(subcategory_id, Some(contestant_id))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::db::MemoryStore;
    use crate::models::{NewScore, Role, ScoreUpsert};
    use std::sync::Arc;

    struct Setup {
        state: AppState,
        board: User,
        judge: Uuid,
        subcategory: Uuid,
        contestant: Uuid,
    }

    fn setup() -> Setup {
        let store = MemoryStore::new();
        let subcategory = Uuid::new_v4();
        let contestant = Uuid::new_v4();
        let judge = Uuid::new_v4();
        store.insert_subcategory(Subcategory {
            id: subcategory,
            event_id: None,
            name: "Interview".to_string(),
        });
        store.insert_contestant(
            subcategory,
            Contestant {
                id: contestant,
                contestant_number: 2,
                name: "Contestant Two".to_string(),
            },
        );
        store.assign_judge(subcategory, judge);

        Setup {
            state: AppState::new(Arc::new(store), ServerConfig::default()),
            board: User {
                id: Uuid::new_v4(),
                name: "Board".to_string(),
                role: Role::Board,
                is_active: true,
            },
            judge,
            subcategory,
            contestant,
        }
    }

    fn request(s: &Setup, contestant: Uuid, amount: f64) -> AddDeductionRequest {
        AddDeductionRequest {
            subcategory_id: s.subcategory,
            contestant_id: contestant,
            amount,
            reason: " over time ".to_string(),
            comment: None,
        }
    }

    #[tokio::test]
    async fn test_deductions_accumulate() {
        let s = setup();
        add_deduction(&s.state, &s.board, request(&s, s.contestant, 1.0))
            .await
            .unwrap();
        let second = add_deduction(&s.state, &s.board, request(&s, s.contestant, 2.5))
            .await
            .unwrap();
        assert_eq!(second.reason, "over time");
        assert_eq!(second.created_by, s.board.id);

        let all = contestant_deductions(&s.state, s.contestant, s.subcategory)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_contestant() {
        let s = setup();
        let err = add_deduction(&s.state, &s.board, request(&s, Uuid::new_v4(), 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, ScoringError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_listing_unknown_ids_is_not_found() {
        let s = setup();
        let err = contestant_deductions(&s.state, Uuid::new_v4(), s.subcategory)
            .await
            .unwrap_err();
        assert!(matches!(err, ScoringError::NotFound(ref m) if m.starts_with("contestant")));

        let err = contestant_deductions(&s.state, s.contestant, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, ScoringError::NotFound(ref m) if m.starts_with("subcategory")));
    }

    #[tokio::test]
    async fn test_rejected_after_final_certification() {
        let s = setup();
        let store = s.state.store();

        let upsert = store
            .upsert_score(
                NewScore {
                    judge_id: s.judge,
                    criterion_id: Uuid::new_v4(),
                    contestant_id: s.contestant,
                    subcategory_id: s.subcategory,
                    value: 5.0,
                    comment: None,
                },
                Utc::now(),
            )
            .await
            .unwrap();
        let ScoreUpsert::Written(score) = upsert else {
            panic!("fresh score cannot be locked");
        };
        store.sign_score(score.id, s.judge, Utc::now()).await.unwrap();
        store
            .certify_judges(s.subcategory, &[s.judge], s.board.id, Utc::now())
            .await
            .unwrap();
        store
            .finalize_certification(s.subcategory, s.board.id, None, Utc::now())
            .await
            .unwrap();

        let err = add_deduction(&s.state, &s.board, request(&s, s.contestant, 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, ScoringError::Conflict(_)));
    }
}
