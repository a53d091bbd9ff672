//! Pageant Server - scoring, signing and certification core
//!
//! Architecture:
//! - Score Ledger: one score per (judge, criterion, contestant), editable until signed
//! - Aggregation Engine: totals over signed scores minus deductions
//! - Certification Workflow: judge sign-off -> tally master -> auditor
//! - Real-time fan-out: per-subcategory and per-event rooms over WebSocket
//!
//! Key invariants:
//! - Unsigned scores never contribute to a total
//! - A judge is certified only when every one of their scores is signed
//! - Final certification re-checks readiness in the same atomic unit as the insert
//! - Fan-out is best-effort and never blocks a mutation

pub mod aggregation;
pub mod api;
pub mod certification;
pub mod config;
pub mod db;
pub mod deductions;
pub mod error;
pub mod ledger;
pub mod models;
pub mod observability;
pub mod rule_engine;
pub mod state;
pub mod websocket;

pub use api::router;
pub use config::ServerConfig;
pub use db::{DbPool, MemoryStore, PgStore, ScoringStore};
pub use error::{Result, ScoringError};
pub use observability::{init_sentry, AuditEventType, AuditLogger};
pub use rule_engine::RuleEngine;
pub use state::AppState;
pub use websocket::RoomRegistry;
