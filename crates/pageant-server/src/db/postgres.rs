//! PostgreSQL implementation of [`ScoringStore`]
//!
//! Lock order is always assignment rows before score rows so concurrent
//! certification, submission and unsigning cannot deadlock each other.

use super::{DbPool, ScoringStore};
use crate::certification::readiness::{ensure_judges_certifiable, ReadinessCounts};
use crate::error::{Result, ScoringError};
use crate::models::{
    Contestant, Criterion, Deduction, FinalCertification, JudgeAssignment, NewDeduction,
    NewScore, RemovedScores, Role, Score, ScoreFilter, ScoreUpsert, Subcategory, User,
};
use crate::observability::AuditEntry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use tokio_postgres::Row;
use uuid::Uuid;

const SCORE_COLUMNS: &str = "id, judge_id, criterion_id, contestant_id, subcategory_id, value, \
     comment, is_signed, signed_at, created_at, updated_at";

const ASSIGNMENT_COLUMNS: &str =
    "subcategory_id, judge_id, is_certified, certified_at, certified_by";

const DEDUCTION_COLUMNS: &str =
    "id, subcategory_id, contestant_id, amount, reason, comment, created_by, created_at";

const FINAL_COLUMNS: &str = "id, subcategory_id, certified_by, notes, certified_at";

fn score_from_row(row: &Row) -> Score {
    Score {
        id: row.get(0),
        judge_id: row.get(1),
        criterion_id: row.get(2),
        contestant_id: row.get(3),
        subcategory_id: row.get(4),
        value: row.get(5),
        comment: row.get(6),
        is_signed: row.get(7),
        signed_at: row.get(8),
        created_at: row.get(9),
        updated_at: row.get(10),
    }
}

fn assignment_from_row(row: &Row) -> JudgeAssignment {
    JudgeAssignment {
        subcategory_id: row.get(0),
        judge_id: row.get(1),
        is_certified: row.get(2),
        certified_at: row.get(3),
        certified_by: row.get(4),
    }
}

fn deduction_from_row(row: &Row) -> Deduction {
    Deduction {
        id: row.get(0),
        subcategory_id: row.get(1),
        contestant_id: row.get(2),
        amount: row.get(3),
        reason: row.get(4),
        comment: row.get(5),
        created_by: row.get(6),
        created_at: row.get(7),
    }
}

fn final_from_row(row: &Row) -> FinalCertification {
    FinalCertification {
        id: row.get(0),
        subcategory_id: row.get(1),
        certified_by: row.get(2),
        notes: row.get(3),
        certified_at: row.get(4),
    }
}

pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

async fn ensure_not_finalized(
    tx: &deadpool_postgres::Transaction<'_>,
    subcategory_id: Uuid,
) -> Result<()> {
    let row = tx
        .query_opt(
            "SELECT 1 FROM final_certifications WHERE subcategory_id = $1",
            &[&subcategory_id],
        )
        .await?;
    if row.is_some() {
        return Err(ScoringError::conflict("subcategory already final-certified"));
    }
    Ok(())
}

#[async_trait]
impl ScoringStore for PgStore {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT id, name, role, is_active FROM users WHERE id = $1",
                &[&id],
            )
            .await?;

        Ok(row.map(|row| User {
            id: row.get(0),
            name: row.get(1),
            role: Role::from(row.get::<_, String>(2).as_str()),
            is_active: row.get(3),
        }))
    }

    async fn get_subcategory(&self, id: Uuid) -> Result<Option<Subcategory>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT id, event_id, name FROM subcategories WHERE id = $1",
                &[&id],
            )
            .await?;

        Ok(row.map(|row| Subcategory {
            id: row.get(0),
            event_id: row.get(1),
            name: row.get(2),
        }))
    }

    async fn get_criterion(&self, id: Uuid) -> Result<Option<Criterion>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT id, subcategory_id, name, max_score, order_index
                 FROM criteria WHERE id = $1",
                &[&id],
            )
            .await?;

        Ok(row.map(|row| Criterion {
            id: row.get(0),
            subcategory_id: row.get(1),
            name: row.get(2),
            max_score: row.get(3),
            order_index: row.get(4),
        }))
    }

    async fn list_criteria(&self, subcategory_id: Uuid) -> Result<Vec<Criterion>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, subcategory_id, name, max_score, order_index
                 FROM criteria WHERE subcategory_id = $1 ORDER BY order_index, id",
                &[&subcategory_id],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| Criterion {
                id: row.get(0),
                subcategory_id: row.get(1),
                name: row.get(2),
                max_score: row.get(3),
                order_index: row.get(4),
            })
            .collect())
    }

    async fn get_contestant(&self, id: Uuid) -> Result<Option<Contestant>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT id, contestant_number, name FROM contestants WHERE id = $1",
                &[&id],
            )
            .await?;

        Ok(row.map(|row| Contestant {
            id: row.get(0),
            contestant_number: row.get(1),
            name: row.get(2),
        }))
    }

    async fn list_contestants(&self, subcategory_id: Uuid) -> Result<Vec<Contestant>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT c.id, c.contestant_number, c.name
                 FROM contestants c
                 JOIN subcategory_contestants sc ON sc.contestant_id = c.id
                 WHERE sc.subcategory_id = $1
                 ORDER BY c.contestant_number, c.id",
                &[&subcategory_id],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| Contestant {
                id: row.get(0),
                contestant_number: row.get(1),
                name: row.get(2),
            })
            .collect())
    }

    async fn list_assignments(&self, subcategory_id: Uuid) -> Result<Vec<JudgeAssignment>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM judge_assignments WHERE subcategory_id = $1 ORDER BY judge_id",
                    ASSIGNMENT_COLUMNS
                ),
                &[&subcategory_id],
            )
            .await?;
        Ok(rows.iter().map(assignment_from_row).collect())
    }

    async fn upsert_score(&self, new: NewScore, at: DateTime<Utc>) -> Result<ScoreUpsert> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let assignment = tx
            .query_opt(
                "SELECT is_certified FROM judge_assignments
                 WHERE subcategory_id = $1 AND judge_id = $2 FOR SHARE",
                &[&new.subcategory_id, &new.judge_id],
            )
            .await?;
        match assignment {
            None => {
                return Err(ScoringError::forbidden(
                    "judge is not assigned to this subcategory",
                ))
            }
            Some(row) if row.get::<_, bool>(0) => {
                return Err(ScoringError::conflict(
                    "judge totals are certified for this subcategory",
                ))
            }
            Some(_) => {}
        }

        let written = tx
            .query_opt(
                &format!(
                    "INSERT INTO scores (judge_id, criterion_id, contestant_id, subcategory_id,
                                         value, comment, created_at, updated_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
                     ON CONFLICT (judge_id, criterion_id, contestant_id) DO UPDATE SET
                        value = EXCLUDED.value,
                        comment = EXCLUDED.comment,
                        updated_at = EXCLUDED.updated_at
                     WHERE scores.is_signed = FALSE
                     RETURNING {}",
                    SCORE_COLUMNS
                ),
                &[
                    &new.judge_id,
                    &new.criterion_id,
                    &new.contestant_id,
                    &new.subcategory_id,
                    &new.value,
                    &new.comment,
                    &at,
                ],
            )
            .await?;

        let outcome = match written {
            Some(row) => ScoreUpsert::Written(score_from_row(&row)),
            None => {
                let row = tx
                    .query_one(
                        &format!(
                            "SELECT {} FROM scores
                             WHERE judge_id = $1 AND criterion_id = $2 AND contestant_id = $3",
                            SCORE_COLUMNS
                        ),
                        &[&new.judge_id, &new.criterion_id, &new.contestant_id],
                    )
                    .await?;
                ScoreUpsert::Locked(score_from_row(&row))
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn get_score(&self, id: Uuid) -> Result<Option<Score>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {} FROM scores WHERE id = $1", SCORE_COLUMNS),
                &[&id],
            )
            .await?;
        Ok(row.as_ref().map(score_from_row))
    }

    async fn list_scores(&self, filter: &ScoreFilter) -> Result<Vec<Score>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM scores
                     WHERE ($1::uuid IS NULL OR subcategory_id = $1)
                       AND ($2::uuid IS NULL OR contestant_id = $2)
                       AND ($3::uuid IS NULL OR judge_id = $3)
                       AND (NOT $4 OR is_signed)
                     ORDER BY created_at, id",
                    SCORE_COLUMNS
                ),
                &[
                    &filter.subcategory_id,
                    &filter.contestant_id,
                    &filter.judge_id,
                    &filter.signed_only,
                ],
            )
            .await?;
        Ok(rows.iter().map(score_from_row).collect())
    }

    async fn sign_score(
        &self,
        id: Uuid,
        judge_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Score>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "UPDATE scores SET is_signed = TRUE, signed_at = $3, updated_at = $3
                     WHERE id = $1 AND judge_id = $2 AND is_signed = FALSE
                     RETURNING {}",
                    SCORE_COLUMNS
                ),
                &[&id, &judge_id, &at],
            )
            .await?;
        Ok(row.as_ref().map(score_from_row))
    }

    async fn unsign_score(
        &self,
        id: Uuid,
        judge_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Score>> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let Some(row) = tx
            .query_opt(
                "SELECT subcategory_id FROM scores WHERE id = $1 AND judge_id = $2",
                &[&id, &judge_id],
            )
            .await?
        else {
            return Ok(None);
        };
        let subcategory_id: Uuid = row.get(0);

        let certified = tx
            .query_opt(
                "SELECT is_certified FROM judge_assignments
                 WHERE subcategory_id = $1 AND judge_id = $2 FOR SHARE",
                &[&subcategory_id, &judge_id],
            )
            .await?
            .map(|row| row.get::<_, bool>(0))
            .unwrap_or(false);
        if certified {
            return Ok(None);
        }

        let row = tx
            .query_opt(
                &format!(
                    "UPDATE scores SET is_signed = FALSE, signed_at = NULL, updated_at = $3
                     WHERE id = $1 AND judge_id = $2 AND is_signed = TRUE
                     RETURNING {}",
                    SCORE_COLUMNS
                ),
                &[&id, &judge_id, &at],
            )
            .await?;

        tx.commit().await?;
        Ok(row.as_ref().map(score_from_row))
    }

    async fn certify_judges(
        &self,
        subcategory_id: Uuid,
        judge_ids: &[Uuid],
        certified_by: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Vec<JudgeAssignment>> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let assignments: Vec<JudgeAssignment> = tx
            .query(
                &format!(
                    "SELECT {} FROM judge_assignments WHERE subcategory_id = $1
                     ORDER BY judge_id FOR UPDATE",
                    ASSIGNMENT_COLUMNS
                ),
                &[&subcategory_id],
            )
            .await?
            .iter()
            .map(assignment_from_row)
            .collect();

        ensure_not_finalized(&tx, subcategory_id).await?;

        let scores: Vec<Score> = tx
            .query(
                &format!(
                    "SELECT {} FROM scores WHERE subcategory_id = $1 AND judge_id = ANY($2)
                     FOR SHARE",
                    SCORE_COLUMNS
                ),
                &[&subcategory_id, &judge_ids],
            )
            .await?
            .iter()
            .map(score_from_row)
            .collect();

        ensure_judges_certifiable(judge_ids, &assignments, &scores)?;

        let mut certified = Vec::with_capacity(judge_ids.len());
        for judge_id in judge_ids {
            let row = tx
                .query_one(
                    &format!(
                        "UPDATE judge_assignments
                         SET is_certified = TRUE, certified_at = $3, certified_by = $4
                         WHERE subcategory_id = $1 AND judge_id = $2
                         RETURNING {}",
                        ASSIGNMENT_COLUMNS
                    ),
                    &[&subcategory_id, judge_id, &at, &certified_by],
                )
                .await?;
            certified.push(assignment_from_row(&row));
        }

        tx.commit().await?;
        Ok(certified)
    }

    async fn revoke_certification(
        &self,
        subcategory_id: Uuid,
        judge_id: Uuid,
    ) -> Result<JudgeAssignment> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let locked = tx
            .query_opt(
                "SELECT 1 FROM judge_assignments
                 WHERE subcategory_id = $1 AND judge_id = $2 FOR UPDATE",
                &[&subcategory_id, &judge_id],
            )
            .await?;
        if locked.is_none() {
            return Err(ScoringError::validation(format!(
                "judge {} is not assigned to this subcategory",
                judge_id
            )));
        }

        ensure_not_finalized(&tx, subcategory_id).await?;

        let row = tx
            .query_one(
                &format!(
                    "UPDATE judge_assignments
                     SET is_certified = FALSE, certified_at = NULL, certified_by = NULL
                     WHERE subcategory_id = $1 AND judge_id = $2
                     RETURNING {}",
                    ASSIGNMENT_COLUMNS
                ),
                &[&subcategory_id, &judge_id],
            )
            .await?;

        tx.commit().await?;
        Ok(assignment_from_row(&row))
    }

    async fn finalize_certification(
        &self,
        subcategory_id: Uuid,
        certified_by: Uuid,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<FinalCertification> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let assignments: Vec<JudgeAssignment> = tx
            .query(
                &format!(
                    "SELECT {} FROM judge_assignments WHERE subcategory_id = $1
                     ORDER BY judge_id FOR UPDATE",
                    ASSIGNMENT_COLUMNS
                ),
                &[&subcategory_id],
            )
            .await?
            .iter()
            .map(assignment_from_row)
            .collect();

        ensure_not_finalized(&tx, subcategory_id).await?;

        let scores: Vec<Score> = tx
            .query(
                &format!(
                    "SELECT {} FROM scores WHERE subcategory_id = $1 FOR SHARE",
                    SCORE_COLUMNS
                ),
                &[&subcategory_id],
            )
            .await?
            .iter()
            .map(score_from_row)
            .collect();

        ReadinessCounts::tally(&assignments, &scores).ensure_ready()?;

        let row = tx
            .query_opt(
                &format!(
                    "INSERT INTO final_certifications (subcategory_id, certified_by, notes, certified_at)
                     VALUES ($1, $2, $3, $4)
                     ON CONFLICT (subcategory_id) DO NOTHING
                     RETURNING {}",
                    FINAL_COLUMNS
                ),
                &[&subcategory_id, &certified_by, &notes, &at],
            )
            .await?
            .ok_or_else(|| ScoringError::conflict("subcategory already final-certified"))?;

        tx.commit().await?;
        Ok(final_from_row(&row))
    }

    async fn get_final_certification(
        &self,
        subcategory_id: Uuid,
    ) -> Result<Option<FinalCertification>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {} FROM final_certifications WHERE subcategory_id = $1",
                    FINAL_COLUMNS
                ),
                &[&subcategory_id],
            )
            .await?;
        Ok(row.as_ref().map(final_from_row))
    }

    async fn list_final_certifications(&self) -> Result<Vec<FinalCertification>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM final_certifications ORDER BY certified_at",
                    FINAL_COLUMNS
                ),
                &[],
            )
            .await?;
        Ok(rows.iter().map(final_from_row).collect())
    }

    async fn delete_judge_scores(
        &self,
        judge_id: Uuid,
        subcategory_id: Option<Uuid>,
    ) -> Result<RemovedScores> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        tx.query(
            "SELECT 1 FROM judge_assignments
             WHERE judge_id = $1 AND ($2::uuid IS NULL OR subcategory_id = $2)
             FOR UPDATE",
            &[&judge_id, &subcategory_id],
        )
        .await?;

        if let Some(id) = subcategory_id {
            ensure_not_finalized(&tx, id).await?;
        }

        let deleted: Vec<Score> = tx
            .query(
                &format!(
                    "DELETE FROM scores
                     WHERE judge_id = $1
                       AND ($2::uuid IS NULL OR subcategory_id = $2)
                       AND subcategory_id NOT IN (SELECT subcategory_id FROM final_certifications)
                     RETURNING {}",
                    SCORE_COLUMNS
                ),
                &[&judge_id, &subcategory_id],
            )
            .await?
            .iter()
            .map(score_from_row)
            .collect();

        let touched: Vec<Uuid> = deleted
            .iter()
            .map(|s| s.subcategory_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let revoked: Vec<Uuid> = tx
            .query(
                "UPDATE judge_assignments
                 SET is_certified = FALSE, certified_at = NULL, certified_by = NULL
                 WHERE judge_id = $1 AND subcategory_id = ANY($2) AND is_certified = TRUE
                 RETURNING subcategory_id",
                &[&judge_id, &touched],
            )
            .await?
            .iter()
            .map(|row| row.get(0))
            .collect::<BTreeSet<Uuid>>()
            .into_iter()
            .collect();

        tx.commit().await?;
        Ok(RemovedScores {
            deleted,
            revoked_certifications: revoked,
        })
    }

    async fn add_deduction(&self, new: NewDeduction, at: DateTime<Utc>) -> Result<Deduction> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "INSERT INTO deductions (subcategory_id, contestant_id, amount, reason,
                                             comment, created_by, created_at)
                     SELECT $1, $2, $3, $4, $5, $6, $7
                     WHERE NOT EXISTS (
                        SELECT 1 FROM final_certifications WHERE subcategory_id = $1
                     )
                     RETURNING {}",
                    DEDUCTION_COLUMNS
                ),
                &[
                    &new.subcategory_id,
                    &new.contestant_id,
                    &new.amount,
                    &new.reason,
                    &new.comment,
                    &new.created_by,
                    &at,
                ],
            )
            .await?
            .ok_or_else(|| ScoringError::conflict("subcategory already final-certified"))?;
        Ok(deduction_from_row(&row))
    }

    async fn list_deductions(
        &self,
        subcategory_id: Uuid,
        contestant_id: Option<Uuid>,
    ) -> Result<Vec<Deduction>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM deductions
                     WHERE subcategory_id = $1 AND ($2::uuid IS NULL OR contestant_id = $2)
                     ORDER BY created_at, id",
                    DEDUCTION_COLUMNS
                ),
                &[&subcategory_id, &contestant_id],
            )
            .await?;
        Ok(rows.iter().map(deduction_from_row).collect())
    }

    async fn record_audit(&self, entry: &AuditEntry) -> Result<()> {
        let client = self.pool.get().await?;
        let event_type = entry.event_type.to_string();
        let actor_role = entry.actor_role.map(|r| r.as_str().to_string());
        client
            .execute(
                "INSERT INTO audit_events (event_type, entity_type, entity_id, actor_id,
                                           actor_role, payload, success, error_message)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                &[
                    &event_type,
                    &entry.entity_type,
                    &entry.entity_id,
                    &entry.actor_id,
                    &actor_role,
                    &entry.payload,
                    &entry.success,
                    &entry.error_message,
                ],
            )
            .await?;
        Ok(())
    }
}
