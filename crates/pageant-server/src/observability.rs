//! Observability - Sentry integration and audit trail
//!
//! Provides:
//! - Sentry error tracking (enabled via SENTRY_DSN env var)
//! - Structured audit logging for every scoring and certification mutation

use crate::db::ScoringStore;
use crate::models::Role;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{error, info, span, warn, Level};
use uuid::Uuid;

/// Initialize Sentry if SENTRY_DSN is set
pub fn init_sentry() -> Option<sentry::ClientInitGuard> {
    let dsn = std::env::var("SENTRY_DSN").ok()?;

    if dsn.is_empty() {
        info!("Sentry DSN is empty, error tracking disabled");
        return None;
    }

    let guard = sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: std::env::var("ENVIRONMENT").ok().map(|s| s.into()),
            traces_sample_rate: 0.1,
            ..Default::default()
        },
    ));

    info!("Sentry initialized for error tracking");
    Some(guard)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Authentication
    AuthFailed,
    UnauthorizedAccess,
    PolicyViolation,
    RateLimitExceeded,

    // Score ledger
    ScoreSubmitted,
    ScoreSigned,
    ScoreUnsigned,

    // Certification workflow
    TotalsCertified,
    CertificationRevoked,
    FinalCertified,
    JudgeScoresRemoved,

    // Deductions
    DeductionAdded,
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_string(self).unwrap_or_else(|_| "unknown".to_string());
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// Structured audit entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub event_type: AuditEventType,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub actor_id: Option<Uuid>,
    pub actor_role: Option<Role>,
    pub payload: Option<serde_json::Value>,
    pub duration_ms: Option<u64>,
    pub success: bool,
    pub error_message: Option<String>,
}

impl AuditEntry {
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_type,
            entity_type: None,
            entity_id: None,
            actor_id: None,
            actor_role: None,
            payload: None,
            duration_ms: None,
            success: true,
            error_message: None,
        }
    }

    pub fn entity(mut self, entity_type: &str, entity_id: impl ToString) -> Self {
        self.entity_type = Some(entity_type.to_string());
        self.entity_id = Some(entity_id.to_string());
        self
    }

    pub fn actor(mut self, actor_id: Uuid, role: Role) -> Self {
        self.actor_id = Some(actor_id);
        self.actor_role = Some(role);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn failed(mut self, error: &str) -> Self {
        self.success = false;
        self.error_message = Some(error.to_string());
        self
    }

    /// Mark the entry failed when the operation it describes failed
    pub fn outcome<T, E: std::fmt::Display>(self, result: &Result<T, E>) -> Self {
        match result {
            Ok(_) => self,
            Err(e) => self.failed(&e.to_string()),
        }
    }
}

/// Audit logger for structured logging and persistence
pub struct AuditLogger;

impl AuditLogger {
    /// Log an audit event to tracing and the store. Persistence failures are
    /// logged and swallowed.
    pub async fn log(store: &dyn ScoringStore, entry: AuditEntry) {
        let span = span!(
            Level::INFO,
            "audit",
            event_type = %entry.event_type,
            entity_type = ?entry.entity_type,
            entity_id = ?entry.entity_id,
            actor = ?entry.actor_id,
            success = entry.success,
        );
        // Entered guards are !Send; keep this one out of the await below.
        {
            let _guard = span.enter();

            if entry.success {
                info!(
                    event = %entry.event_type,
                    entity = ?entry.entity_id,
                    actor = ?entry.actor_id,
                    duration_ms = ?entry.duration_ms,
                    "Audit event"
                );
            } else {
                warn!(
                    event = %entry.event_type,
                    entity = ?entry.entity_id,
                    actor = ?entry.actor_id,
                    error = ?entry.error_message,
                    "Audit event failed"
                );
            }
        }

        if let Err(e) = store.record_audit(&entry).await {
            error!(error = %e, "Failed to persist audit event");
        }
    }

    /// Log security event and report it to Sentry
    pub async fn security(
        store: &dyn ScoringStore,
        event: AuditEventType,
        actor_id: Option<Uuid>,
        details: &str,
    ) {
        let mut entry = AuditEntry::new(event).failed(details);
        entry.actor_id = actor_id;

        Self::log(store, entry).await;

        sentry::capture_message(
            &format!("Security event: {} - {:?} - {}", event, actor_id, details),
            sentry::Level::Warning,
        );
    }
}

/// Timer for measuring operation duration
pub struct OperationTimer {
    start: Instant,
}

impl OperationTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}
