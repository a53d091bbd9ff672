//! End-to-end workflow through the HTTP router and the fan-out registry

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use pageant_server::api::auth::generate_token;
use pageant_server::models::{Contestant, Criterion, Role, Subcategory, User, WsEvent};
use pageant_server::websocket::Room;
use pageant_server::{router, AppState, MemoryStore, ServerConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "workflow-test-secret";

struct Contest {
    app: Router,
    state: Arc<AppState>,
    event: Uuid,
    subcategory: Uuid,
    criteria: Vec<Uuid>,
    contestants: Vec<Uuid>,
    judges: Vec<Uuid>,
    tally: Uuid,
    auditor: Uuid,
    board: Uuid,
    admin: Uuid,
    viewer: Uuid,
    inactive: Uuid,
}

fn user(store: &MemoryStore, role: Role, is_active: bool) -> Uuid {
    let id = Uuid::new_v4();
    store.insert_user(User {
        id,
        name: format!("{} {}", role, &id.to_string()[..8]),
        role,
        is_active,
    });
    id
}

fn contest(judge_count: usize, criterion_count: usize, contestant_count: i32) -> Contest {
    let store = MemoryStore::new();
    let event = Uuid::new_v4();
    let subcategory = Uuid::new_v4();

    store.insert_subcategory(Subcategory {
        id: subcategory,
        event_id: Some(event),
        name: "Talent".to_string(),
    });

    let criteria = (0..criterion_count)
        .map(|i| {
            let id = Uuid::new_v4();
            store.insert_criterion(Criterion {
                id,
                subcategory_id: subcategory,
                name: format!("Criterion {}", i + 1),
                max_score: 10.0,
                order_index: i as i32,
            });
            id
        })
        .collect();

    let contestants = (1..=contestant_count)
        .map(|n| {
            let id = Uuid::new_v4();
            store.insert_contestant(
                subcategory,
                Contestant {
                    id,
                    contestant_number: n,
                    name: format!("Contestant {}", n),
                },
            );
            id
        })
        .collect();

    let judges: Vec<Uuid> = (0..judge_count)
        .map(|_| user(&store, Role::Judge, true))
        .collect();
    for judge in &judges {
        store.assign_judge(subcategory, *judge);
    }

    let tally = user(&store, Role::TallyMaster, true);
    let auditor = user(&store, Role::Auditor, true);
    let board = user(&store, Role::Board, true);
    let admin = user(&store, Role::Admin, true);
    let viewer = user(&store, Role::Viewer, true);
    let inactive = user(&store, Role::Judge, false);

    let config = ServerConfig {
        jwt_secret: SECRET.to_string(),
        in_memory: true,
        ..ServerConfig::default()
    };
    let state = Arc::new(AppState::new(Arc::new(store), config));

    Contest {
        app: router(state.clone()),
        state,
        event,
        subcategory,
        criteria,
        contestants,
        judges,
        tally,
        auditor,
        board,
        admin,
        viewer,
        inactive,
    }
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    as_user: Option<Uuid>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(id) = as_user {
        let token = generate_token(id, SECRET, 3600).unwrap();
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn submit(c: &Contest, judge: Uuid, criterion: Uuid, contestant: Uuid, score: f64) -> (StatusCode, Value) {
    call(
        &c.app,
        "POST",
        "/scoring/submit",
        Some(judge),
        Some(json!({
            "criterion_id": criterion,
            "contestant_id": contestant,
            "score": score,
        })),
    )
    .await
}

async fn sign(c: &Contest, judge: Uuid, score_id: &str) -> (StatusCode, Value) {
    call(&c.app, "PUT", &format!("/scoring/{}/sign", score_id), Some(judge), None).await
}

async fn certify(c: &Contest, judges: &[Uuid]) -> (StatusCode, Value) {
    call(
        &c.app,
        "POST",
        "/tally-master/certify-totals",
        Some(c.tally),
        Some(json!({ "subcategory_id": c.subcategory, "judge_ids": judges })),
    )
    .await
}

async fn finalize(c: &Contest) -> (StatusCode, Value) {
    call(
        &c.app,
        "POST",
        "/auditor/final-certification",
        Some(c.auditor),
        Some(json!({ "subcategory_id": c.subcategory, "notes": "all verified" })),
    )
    .await
}

#[tokio::test]
async fn test_single_judge_scenario() {
    let c = contest(1, 1, 1);
    let (judge, criterion, contestant) = (c.judges[0], c.criteria[0], c.contestants[0]);

    let (status, score) = submit(&c, judge, criterion, contestant, 9.0).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(score["is_signed"], false);
    let score_id = score["id"].as_str().unwrap().to_string();

    let (status, signed) = sign(&c, judge, &score_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(signed["is_signed"], true);

    let (status, body) = certify(&c, &[judge]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "ready_for_final");

    let (status, cert) = finalize(&c).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(cert["subcategory_id"], json!(c.subcategory));
    assert_eq!(cert["certified_by"], json!(c.auditor));

    let (status, total) = call(
        &c.app,
        "GET",
        &format!(
            "/scoring/contestant/{}/subcategory/{}/total",
            contestant, c.subcategory
        ),
        Some(c.viewer),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(total["totalScore"], 9.0);
    assert_eq!(total["maxPossibleScore"], 10.0);
    assert_eq!(total["percentage"], 90.0);

    let (status, report) = call(
        &c.app,
        "GET",
        &format!("/certification/subcategory/{}/status", c.subcategory),
        Some(c.viewer),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["state"], "final_certified");
}

#[tokio::test]
async fn test_submit_after_sign_is_conflict() {
    let c = contest(1, 1, 1);
    let (judge, criterion, contestant) = (c.judges[0], c.criteria[0], c.contestants[0]);

    let (_, score) = submit(&c, judge, criterion, contestant, 7.0).await;
    let score_id = score["id"].as_str().unwrap().to_string();
    sign(&c, judge, &score_id).await;

    let (status, body) = submit(&c, judge, criterion, contestant, 8.0).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (_, scores) = call(
        &c.app,
        "GET",
        &format!("/scoring/judge/subcategory/{}", c.subcategory),
        Some(judge),
        None,
    )
    .await;
    assert_eq!(scores[0]["value"], 7.0);
}

#[tokio::test]
async fn test_submit_out_of_range_is_validation_error() {
    let c = contest(1, 1, 1);
    let (status, body) = submit(&c, c.judges[0], c.criteria[0], c.contestants[0], 11.0).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn test_final_certification_is_unique() {
    let c = contest(1, 1, 1);
    let judge = c.judges[0];
    let (_, score) = submit(&c, judge, c.criteria[0], c.contestants[0], 5.0).await;
    sign(&c, judge, score["id"].as_str().unwrap()).await;
    certify(&c, &[judge]).await;

    assert_eq!(finalize(&c).await.0, StatusCode::CREATED);
    let (status, body) = finalize(&c).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["message"].as_str().unwrap().contains("already final-certified"));
}

#[tokio::test]
async fn test_final_certification_requires_every_judge() {
    let c = contest(2, 1, 1);
    for judge in &c.judges {
        let (_, score) = submit(&c, *judge, c.criteria[0], c.contestants[0], 6.0).await;
        sign(&c, *judge, score["id"].as_str().unwrap()).await;
    }
    assert_eq!(certify(&c, &c.judges[..1]).await.0, StatusCode::OK);

    let (status, body) = finalize(&c).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("not all judges certified"));
}

#[tokio::test]
async fn test_certify_with_unsigned_scores_is_conflict() {
    let c = contest(1, 1, 1);
    submit(&c, c.judges[0], c.criteria[0], c.contestants[0], 6.0).await;

    let (status, _) = certify(&c, &c.judges).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_role_enforcement() {
    let c = contest(1, 1, 1);

    let (status, _) = call(
        &c.app,
        "POST",
        "/scoring/submit",
        None,
        Some(json!({
            "criterion_id": c.criteria[0],
            "contestant_id": c.contestants[0],
            "score": 5.0,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = submit(&c, c.viewer, c.criteria[0], c.contestants[0], 5.0).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = submit(&c, c.admin, c.criteria[0], c.contestants[0], 5.0).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = submit(&c, c.inactive, c.criteria[0], c.contestants[0], 5.0).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(
        &c.app,
        "GET",
        "/auditor/final-certifications",
        Some(c.judges[0]),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(
        &c.app,
        "GET",
        "/auditor/final-certifications",
        Some(c.admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_board_removal() {
    let c = contest(1, 2, 1);
    let judge = c.judges[0];
    for criterion in &c.criteria {
        let (_, score) = submit(&c, judge, *criterion, c.contestants[0], 4.0).await;
        sign(&c, judge, score["id"].as_str().unwrap()).await;
    }
    certify(&c, &[judge]).await;

    let (status, _) = call(
        &c.app,
        "POST",
        "/board/remove-judge-scores",
        Some(c.board),
        Some(json!({ "judge_id": judge, "subcategory_id": c.subcategory })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        &c.app,
        "POST",
        "/board/remove-judge-scores",
        Some(c.board),
        Some(json!({ "judge_id": judge, "subcategory_id": c.subcategory, "confirm": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted_count"], 2);
    assert_eq!(body["revoked_certifications"], json!([c.subcategory]));
}

#[tokio::test]
async fn test_leaderboard_with_deduction() {
    let c = contest(1, 1, 3);
    let judge = c.judges[0];
    let values = [8.0, 9.0, 8.0];
    for (contestant, value) in c.contestants.iter().zip(values) {
        let (_, score) = submit(&c, judge, c.criteria[0], *contestant, value).await;
        sign(&c, judge, score["id"].as_str().unwrap()).await;
    }

    let (status, _) = call(
        &c.app,
        "POST",
        "/deductions",
        Some(c.board),
        Some(json!({
            "subcategory_id": c.subcategory,
            "contestant_id": c.contestants[1],
            "amount": 2.0,
            "reason": "costume violation",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, board) = call(
        &c.app,
        "GET",
        &format!("/results/subcategory/{}/leaderboard", c.subcategory),
        Some(c.viewer),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let numbers: Vec<i64> = board
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["contestantNumber"].as_i64().unwrap())
        .collect();
    // 8 (#1), 7 after deduction (#2), 8 (#3): tie between #1 and #3 goes to #1
    assert_eq!(numbers, vec![1, 3, 2]);
}

#[tokio::test]
async fn test_fan_out_reaches_room_members_only() {
    let c = contest(1, 1, 1);
    let rooms = &c.state.rooms;

    let (scoring_conn, mut scoring_rx) = rooms.register(c.tally, Role::TallyMaster);
    let (event_conn, mut event_rx) = rooms.register(c.auditor, Role::Auditor);
    let (_idle_conn, mut idle_rx) = rooms.register(c.viewer, Role::Viewer);
    rooms.join(scoring_conn, Room::Scoring(c.subcategory));
    rooms.join(event_conn, Room::Event(c.event));

    let (status, _) = submit(&c, c.judges[0], c.criteria[0], c.contestants[0], 9.0).await;
    assert_eq!(status, StatusCode::CREATED);

    match scoring_rx.try_recv() {
        Ok(WsEvent::ScoreSubmitted(event)) => {
            assert_eq!(event.subcategory_id, c.subcategory);
            assert_eq!(event.value, 9.0);
        }
        other => panic!("expected score_submitted, got {:?}", other),
    }
    assert!(matches!(event_rx.try_recv(), Ok(WsEvent::ScoreSubmitted(_))));
    assert!(idle_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_health() {
    let c = contest(0, 0, 0);
    let (status, body) = call(&c.app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
