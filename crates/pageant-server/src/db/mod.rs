//! Storage for the score ledger and certification tables
//!
//! Two backends implement [`ScoringStore`]:
//! 1. [`PgStore`] - PostgreSQL through a deadpool connection pool
//! 2. [`MemoryStore`] - process-local tables for development and tests
//!
//! Every mutating method is a single atomic unit: the check and the write
//! happen under the same row locks (Postgres) or the same mutex guard (memory).

pub mod memory;
pub mod postgres;
pub mod schema;

use crate::error::Result;
use crate::models::{
    Contestant, Criterion, Deduction, FinalCertification, JudgeAssignment, NewDeduction,
    NewScore, RemovedScores, Score, ScoreFilter, ScoreUpsert, Subcategory, User,
};
use crate::observability::AuditEntry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, Pool, Runtime};
use tokio_postgres::NoTls;
use tracing::info;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type DbPool = Pool;

#[async_trait]
pub trait ScoringStore: Send + Sync {
    // ---- reference data -------------------------------------------------

    async fn get_user(&self, id: Uuid) -> Result<Option<User>>;

    async fn get_subcategory(&self, id: Uuid) -> Result<Option<Subcategory>>;

    async fn get_criterion(&self, id: Uuid) -> Result<Option<Criterion>>;

    async fn list_criteria(&self, subcategory_id: Uuid) -> Result<Vec<Criterion>>;

    async fn get_contestant(&self, id: Uuid) -> Result<Option<Contestant>>;

    /// Contestants competing in a subcategory
    async fn list_contestants(&self, subcategory_id: Uuid) -> Result<Vec<Contestant>>;

    async fn list_assignments(&self, subcategory_id: Uuid) -> Result<Vec<JudgeAssignment>>;

    // ---- score ledger ---------------------------------------------------

    /// Create or overwrite the score for (judge, criterion, contestant),
    /// only while the stored row is unsigned.
    async fn upsert_score(&self, score: NewScore, at: DateTime<Utc>) -> Result<ScoreUpsert>;

    async fn get_score(&self, id: Uuid) -> Result<Option<Score>>;

    async fn list_scores(&self, filter: &ScoreFilter) -> Result<Vec<Score>>;

    /// Mark signed if owned by `judge_id` and currently unsigned.
    /// Returns `None` when the condition did not hold.
    async fn sign_score(&self, id: Uuid, judge_id: Uuid, at: DateTime<Utc>)
        -> Result<Option<Score>>;

    /// Clear the signature if owned, signed, and the judge is not certified
    /// for the score's subcategory. Returns `None` when the condition did not hold.
    async fn unsign_score(&self, id: Uuid, judge_id: Uuid, at: DateTime<Utc>)
        -> Result<Option<Score>>;

    // ---- certification --------------------------------------------------

    /// Certify each named judge. All-or-nothing: every judge must be assigned
    /// and have only signed scores, and the subcategory must not be finalized.
    async fn certify_judges(
        &self,
        subcategory_id: Uuid,
        judge_ids: &[Uuid],
        certified_by: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Vec<JudgeAssignment>>;

    async fn revoke_certification(
        &self,
        subcategory_id: Uuid,
        judge_id: Uuid,
    ) -> Result<JudgeAssignment>;

    /// Re-derive readiness and insert the final certification in one unit.
    async fn finalize_certification(
        &self,
        subcategory_id: Uuid,
        certified_by: Uuid,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<FinalCertification>;

    async fn get_final_certification(
        &self,
        subcategory_id: Uuid,
    ) -> Result<Option<FinalCertification>>;

    async fn list_final_certifications(&self) -> Result<Vec<FinalCertification>>;

    /// Delete a judge's scores (optionally within one subcategory) and revoke
    /// that judge's certification wherever scores were removed.
    async fn delete_judge_scores(
        &self,
        judge_id: Uuid,
        subcategory_id: Option<Uuid>,
    ) -> Result<RemovedScores>;

    // ---- deductions -----------------------------------------------------

    async fn add_deduction(&self, deduction: NewDeduction, at: DateTime<Utc>)
        -> Result<Deduction>;

    async fn list_deductions(
        &self,
        subcategory_id: Uuid,
        contestant_id: Option<Uuid>,
    ) -> Result<Vec<Deduction>>;

    // ---- audit ----------------------------------------------------------

    async fn record_audit(&self, entry: &AuditEntry) -> Result<()>;
}

/// Initialize the scoring database, creating it if needed, and run migrations
pub async fn init_db(base_url: &str) -> anyhow::Result<DbPool> {
    let db_name = "pageant_scoring";

    // Strip trailing database name if present (e.g., /postgres)
    let base_url = base_url
        .trim_end_matches(|c: char| c != '/')
        .trim_end_matches('/');

    let admin_pool = create_pool(&format!("{}/postgres", base_url))?;
    let admin_client = admin_pool.get().await?;

    let row = admin_client
        .query_opt("SELECT 1 FROM pg_database WHERE datname = $1", &[&db_name])
        .await?;

    if row.is_none() {
        admin_client
            .execute(&format!("CREATE DATABASE {}", db_name), &[])
            .await?;
        info!("Created database: {}", db_name);
    }

    let pool = create_pool(&format!("{}/{}", base_url, db_name))?;

    let client = pool.get().await?;
    schema::run_migrations(&client).await?;

    info!("Scoring database initialized: {}", db_name);
    Ok(pool)
}

fn create_pool(database_url: &str) -> anyhow::Result<DbPool> {
    let mut cfg = Config::new();
    cfg.url = Some(database_url.to_string());
    let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;
    Ok(pool)
}
