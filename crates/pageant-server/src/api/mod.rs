//! API handlers and router

pub mod auth;
pub mod board;
pub mod certification;
pub mod leaderboard;
pub mod scoring;

use crate::state::AppState;
use crate::websocket::ws_handler;
use axum::{
    routing::{get, post, put},
    Json, Router,
};
use std::sync::Arc;

async fn health(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "connections": state.rooms.connection_count(),
    }))
}

/// All scoring core routes. Transport layers (CORS, tracing) are added by
/// the binary.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        // Judges
        .route("/scoring/submit", post(scoring::submit_score))
        .route("/scoring/:id/sign", put(scoring::sign_score))
        .route("/scoring/:id/unsign", put(scoring::unsign_score))
        .route(
            "/scoring/contestant/:contestant_id/subcategory/:subcategory_id/total",
            get(scoring::contestant_total),
        )
        .route(
            "/scoring/judge/subcategory/:subcategory_id",
            get(scoring::judge_scores),
        )
        // Tally master
        .route(
            "/tally-master/certify-totals",
            post(certification::certify_totals),
        )
        .route("/tally-master/uncertify", post(certification::uncertify))
        // Auditor
        .route(
            "/auditor/final-certification",
            get(certification::final_certification_status).post(certification::final_certify),
        )
        .route(
            "/auditor/final-certifications",
            get(certification::list_final_certifications),
        )
        // Board
        .route(
            "/board/remove-judge-scores",
            post(board::remove_judge_scores),
        )
        .route("/deductions", post(board::add_deduction))
        .route(
            "/deductions/contestant/:contestant_id/subcategory/:subcategory_id",
            get(board::contestant_deductions),
        )
        // Results
        .route(
            "/results/subcategory/:subcategory_id/leaderboard",
            get(leaderboard::get_leaderboard),
        )
        .route(
            "/certification/subcategory/:subcategory_id/status",
            get(certification::subcategory_status),
        )
        // Real-time fan-out
        .route("/ws", get(ws_handler))
        .with_state(state)
}
