//! Process-local implementation of [`ScoringStore`]
//!
//! All tables sit behind one mutex. Each trait method takes the guard once
//! and performs its read-check-write without releasing it, which gives the
//! same compare-and-set guarantees the Postgres backend gets from row locks.

use super::ScoringStore;
use crate::certification::readiness::{ensure_judges_certifiable, ReadinessCounts};
use crate::error::{Result, ScoringError};
use crate::models::{
    Contestant, Criterion, Deduction, FinalCertification, JudgeAssignment, NewDeduction,
    NewScore, RemovedScores, Score, ScoreFilter, ScoreUpsert, Subcategory, User,
};
use crate::observability::AuditEntry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    subcategories: HashMap<Uuid, Subcategory>,
    criteria: HashMap<Uuid, Criterion>,
    contestants: HashMap<Uuid, Contestant>,
    /// subcategory -> competing contestants
    entries: HashMap<Uuid, Vec<Uuid>>,
    /// (subcategory, judge) -> assignment
    assignments: HashMap<(Uuid, Uuid), JudgeAssignment>,
    scores: HashMap<Uuid, Score>,
    /// (judge, criterion, contestant) -> score id
    score_keys: HashMap<(Uuid, Uuid, Uuid), Uuid>,
    deductions: Vec<Deduction>,
    final_certifications: HashMap<Uuid, FinalCertification>,
    audit: Vec<AuditEntry>,
}

impl Tables {
    fn subcategory_assignments(&self, subcategory_id: Uuid) -> Vec<JudgeAssignment> {
        let mut rows: Vec<JudgeAssignment> = self
            .assignments
            .values()
            .filter(|a| a.subcategory_id == subcategory_id)
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.judge_id);
        rows
    }

    fn subcategory_scores(&self, subcategory_id: Uuid) -> Vec<Score> {
        self.scores
            .values()
            .filter(|s| s.subcategory_id == subcategory_id)
            .cloned()
            .collect()
    }

    fn ensure_not_finalized(&self, subcategory_id: Uuid) -> Result<()> {
        if self.final_certifications.contains_key(&subcategory_id) {
            return Err(ScoringError::conflict("subcategory already final-certified"));
        }
        Ok(())
    }

    fn clear_certification(&mut self, subcategory_id: Uuid, judge_id: Uuid) -> bool {
        match self.assignments.get_mut(&(subcategory_id, judge_id)) {
            Some(a) if a.is_certified => {
                a.is_certified = false;
                a.certified_at = None;
                a.certified_by = None;
                true
            }
            _ => false,
        }
    }
}

pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
        }
    }

    pub fn insert_user(&self, user: User) {
        self.tables.lock().users.insert(user.id, user);
    }

    pub fn insert_subcategory(&self, subcategory: Subcategory) {
        self.tables
            .lock()
            .subcategories
            .insert(subcategory.id, subcategory);
    }

    pub fn insert_criterion(&self, criterion: Criterion) {
        self.tables.lock().criteria.insert(criterion.id, criterion);
    }

    /// Register a contestant and enter it into a subcategory
    pub fn insert_contestant(&self, subcategory_id: Uuid, contestant: Contestant) {
        let mut tables = self.tables.lock();
        let entries = tables.entries.entry(subcategory_id).or_default();
        if !entries.contains(&contestant.id) {
            entries.push(contestant.id);
        }
        tables.contestants.insert(contestant.id, contestant);
    }

    pub fn assign_judge(&self, subcategory_id: Uuid, judge_id: Uuid) {
        self.tables
            .lock()
            .assignments
            .entry((subcategory_id, judge_id))
            .or_insert_with(|| JudgeAssignment::new(subcategory_id, judge_id));
    }

    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.tables.lock().audit.clone()
    }

    /// Build a store seeded from a JSON fixture file
    pub fn from_fixture_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let fixture: Fixture = serde_json::from_str(&raw)?;
        let store = Self::new();
        store.load_fixture(fixture);
        info!(path = %path.display(), "Loaded scoring fixture");
        Ok(store)
    }

    pub fn load_fixture(&self, fixture: Fixture) {
        for user in fixture.users {
            self.insert_user(user);
        }
        for subcategory in fixture.subcategories {
            self.insert_subcategory(subcategory);
        }
        for criterion in fixture.criteria {
            self.insert_criterion(criterion);
        }
        for entry in fixture.contestants {
            for subcategory_id in &entry.subcategory_ids {
                self.insert_contestant(*subcategory_id, entry.contestant.clone());
            }
        }
        for assignment in fixture.assignments {
            self.assign_judge(assignment.subcategory_id, assignment.judge_id);
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Seed data for the in-memory backend
#[derive(Debug, Default, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub subcategories: Vec<Subcategory>,
    #[serde(default)]
    pub criteria: Vec<Criterion>,
    #[serde(default)]
    pub contestants: Vec<FixtureContestant>,
    #[serde(default)]
    pub assignments: Vec<FixtureAssignment>,
}

#[derive(Debug, Deserialize)]
pub struct FixtureContestant {
    #[serde(flatten)]
    pub contestant: Contestant,
    #[serde(default)]
    pub subcategory_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct FixtureAssignment {
    pub subcategory_id: Uuid,
    pub judge_id: Uuid,
}

#[async_trait]
impl ScoringStore for MemoryStore {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.tables.lock().users.get(&id).cloned())
    }

    async fn get_subcategory(&self, id: Uuid) -> Result<Option<Subcategory>> {
        Ok(self.tables.lock().subcategories.get(&id).cloned())
    }

    async fn get_criterion(&self, id: Uuid) -> Result<Option<Criterion>> {
        Ok(self.tables.lock().criteria.get(&id).cloned())
    }

    async fn list_criteria(&self, subcategory_id: Uuid) -> Result<Vec<Criterion>> {
        let tables = self.tables.lock();
        let mut rows: Vec<Criterion> = tables
            .criteria
            .values()
            .filter(|c| c.subcategory_id == subcategory_id)
            .cloned()
            .collect();
        rows.sort_by_key(|c| (c.order_index, c.id));
        Ok(rows)
    }

    async fn get_contestant(&self, id: Uuid) -> Result<Option<Contestant>> {
        Ok(self.tables.lock().contestants.get(&id).cloned())
    }

    async fn list_contestants(&self, subcategory_id: Uuid) -> Result<Vec<Contestant>> {
        let tables = self.tables.lock();
        let mut rows: Vec<Contestant> = tables
            .entries
            .get(&subcategory_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| tables.contestants.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by_key(|c| (c.contestant_number, c.id));
        Ok(rows)
    }

    async fn list_assignments(&self, subcategory_id: Uuid) -> Result<Vec<JudgeAssignment>> {
        Ok(self.tables.lock().subcategory_assignments(subcategory_id))
    }

    async fn upsert_score(&self, new: NewScore, at: DateTime<Utc>) -> Result<ScoreUpsert> {
        let mut tables = self.tables.lock();

        match tables.assignments.get(&(new.subcategory_id, new.judge_id)) {
            None => {
                return Err(ScoringError::forbidden(
                    "judge is not assigned to this subcategory",
                ))
            }
            Some(a) if a.is_certified => {
                return Err(ScoringError::conflict(
                    "judge totals are certified for this subcategory",
                ))
            }
            Some(_) => {}
        }

        let key = (new.judge_id, new.criterion_id, new.contestant_id);
        if let Some(id) = tables.score_keys.get(&key).copied() {
            let score = tables
                .scores
                .get_mut(&id)
                .ok_or_else(|| ScoringError::Internal("score index out of sync".to_string()))?;
            if score.is_signed {
                return Ok(ScoreUpsert::Locked(score.clone()));
            }
            score.value = new.value;
            score.comment = new.comment;
            score.updated_at = at;
            return Ok(ScoreUpsert::Written(score.clone()));
        }

        let score = Score {
            id: Uuid::new_v4(),
            judge_id: new.judge_id,
            criterion_id: new.criterion_id,
            contestant_id: new.contestant_id,
            subcategory_id: new.subcategory_id,
            value: new.value,
            comment: new.comment,
            is_signed: false,
            signed_at: None,
            created_at: at,
            updated_at: at,
        };
        tables.score_keys.insert(key, score.id);
        tables.scores.insert(score.id, score.clone());
        Ok(ScoreUpsert::Written(score))
    }

    async fn get_score(&self, id: Uuid) -> Result<Option<Score>> {
        Ok(self.tables.lock().scores.get(&id).cloned())
    }

    async fn list_scores(&self, filter: &ScoreFilter) -> Result<Vec<Score>> {
        let tables = self.tables.lock();
        let mut rows: Vec<Score> = tables
            .scores
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        rows.sort_by_key(|s| (s.created_at, s.id));
        Ok(rows)
    }

    async fn sign_score(
        &self,
        id: Uuid,
        judge_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Score>> {
        let mut tables = self.tables.lock();
        match tables.scores.get_mut(&id) {
            Some(score) if score.judge_id == judge_id && !score.is_signed => {
                score.is_signed = true;
                score.signed_at = Some(at);
                score.updated_at = at;
                Ok(Some(score.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn unsign_score(
        &self,
        id: Uuid,
        judge_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Score>> {
        let mut tables = self.tables.lock();
        let subcategory_id = match tables.scores.get(&id) {
            Some(score) if score.judge_id == judge_id && score.is_signed => score.subcategory_id,
            _ => return Ok(None),
        };
        let certified = tables
            .assignments
            .get(&(subcategory_id, judge_id))
            .map(|a| a.is_certified)
            .unwrap_or(false);
        if certified {
            return Ok(None);
        }

        match tables.scores.get_mut(&id) {
            Some(score) => {
                score.is_signed = false;
                score.signed_at = None;
                score.updated_at = at;
                Ok(Some(score.clone()))
            }
            None => Ok(None),
        }
    }

    async fn certify_judges(
        &self,
        subcategory_id: Uuid,
        judge_ids: &[Uuid],
        certified_by: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Vec<JudgeAssignment>> {
        let mut tables = self.tables.lock();
        tables.ensure_not_finalized(subcategory_id)?;

        let assignments = tables.subcategory_assignments(subcategory_id);
        let scores = tables.subcategory_scores(subcategory_id);
        ensure_judges_certifiable(judge_ids, &assignments, &scores)?;

        let mut certified = Vec::with_capacity(judge_ids.len());
        for judge_id in judge_ids {
            if let Some(a) = tables.assignments.get_mut(&(subcategory_id, *judge_id)) {
                a.is_certified = true;
                a.certified_at = Some(at);
                a.certified_by = Some(certified_by);
                certified.push(a.clone());
            }
        }
        Ok(certified)
    }

    async fn revoke_certification(
        &self,
        subcategory_id: Uuid,
        judge_id: Uuid,
    ) -> Result<JudgeAssignment> {
        let mut tables = self.tables.lock();
        tables.ensure_not_finalized(subcategory_id)?;

        if !tables.assignments.contains_key(&(subcategory_id, judge_id)) {
            return Err(ScoringError::validation(format!(
                "judge {} is not assigned to this subcategory",
                judge_id
            )));
        }
        tables.clear_certification(subcategory_id, judge_id);
        tables
            .assignments
            .get(&(subcategory_id, judge_id))
            .cloned()
            .ok_or_else(|| ScoringError::Internal("assignment vanished".to_string()))
    }

    async fn finalize_certification(
        &self,
        subcategory_id: Uuid,
        certified_by: Uuid,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<FinalCertification> {
        let mut tables = self.tables.lock();
        tables.ensure_not_finalized(subcategory_id)?;

        let counts = ReadinessCounts::tally(
            &tables.subcategory_assignments(subcategory_id),
            &tables.subcategory_scores(subcategory_id),
        );
        counts.ensure_ready()?;

        let certification = FinalCertification {
            id: Uuid::new_v4(),
            subcategory_id,
            certified_by,
            notes,
            certified_at: at,
        };
        tables
            .final_certifications
            .insert(subcategory_id, certification.clone());
        Ok(certification)
    }

    async fn get_final_certification(
        &self,
        subcategory_id: Uuid,
    ) -> Result<Option<FinalCertification>> {
        Ok(self
            .tables
            .lock()
            .final_certifications
            .get(&subcategory_id)
            .cloned())
    }

    async fn list_final_certifications(&self) -> Result<Vec<FinalCertification>> {
        let mut rows: Vec<FinalCertification> = self
            .tables
            .lock()
            .final_certifications
            .values()
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.certified_at);
        Ok(rows)
    }

    async fn delete_judge_scores(
        &self,
        judge_id: Uuid,
        subcategory_id: Option<Uuid>,
    ) -> Result<RemovedScores> {
        let mut tables = self.tables.lock();
        if let Some(id) = subcategory_id {
            tables.ensure_not_finalized(id)?;
        }

        let doomed: Vec<Uuid> = tables
            .scores
            .values()
            .filter(|s| s.judge_id == judge_id)
            .filter(|s| subcategory_id.map_or(true, |id| s.subcategory_id == id))
            .filter(|s| !tables.final_certifications.contains_key(&s.subcategory_id))
            .map(|s| s.id)
            .collect();

        let mut removed = RemovedScores::default();
        let mut touched = BTreeSet::new();
        for id in doomed {
            if let Some(score) = tables.scores.remove(&id) {
                tables
                    .score_keys
                    .remove(&(score.judge_id, score.criterion_id, score.contestant_id));
                touched.insert(score.subcategory_id);
                removed.deleted.push(score);
            }
        }

        for subcategory_id in touched {
            if tables.clear_certification(subcategory_id, judge_id) {
                removed.revoked_certifications.push(subcategory_id);
            }
        }
        Ok(removed)
    }

    async fn add_deduction(&self, new: NewDeduction, at: DateTime<Utc>) -> Result<Deduction> {
        let mut tables = self.tables.lock();
        tables.ensure_not_finalized(new.subcategory_id)?;

        let deduction = Deduction {
            id: Uuid::new_v4(),
            subcategory_id: new.subcategory_id,
            contestant_id: new.contestant_id,
            amount: new.amount,
            reason: new.reason,
            comment: new.comment,
            created_by: new.created_by,
            created_at: at,
        };
        tables.deductions.push(deduction.clone());
        Ok(deduction)
    }

    async fn list_deductions(
        &self,
        subcategory_id: Uuid,
        contestant_id: Option<Uuid>,
    ) -> Result<Vec<Deduction>> {
        Ok(self
            .tables
            .lock()
            .deductions
            .iter()
            .filter(|d| d.subcategory_id == subcategory_id)
            .filter(|d| contestant_id.map_or(true, |id| d.contestant_id == id))
            .cloned()
            .collect())
    }

    async fn record_audit(&self, entry: &AuditEntry) -> Result<()> {
        self.tables.lock().audit.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use std::io::Write;

    struct Seed {
        store: MemoryStore,
        subcategory: Uuid,
        criterion: Uuid,
        contestant: Uuid,
        judge: Uuid,
    }

    fn seed() -> Seed {
        let store = MemoryStore::new();
        let subcategory = Uuid::new_v4();
        let criterion = Uuid::new_v4();
        let contestant = Uuid::new_v4();
        let judge = Uuid::new_v4();

        store.insert_subcategory(Subcategory {
            id: subcategory,
            event_id: None,
            name: "Evening Gown".into(),
        });
        store.insert_criterion(Criterion {
            id: criterion,
            subcategory_id: subcategory,
            name: "Poise".into(),
            max_score: 10.0,
            order_index: 0,
        });
        store.insert_contestant(
            subcategory,
            Contestant {
                id: contestant,
                contestant_number: 7,
                name: "X".into(),
            },
        );
        store.assign_judge(subcategory, judge);

        Seed {
            store,
            subcategory,
            criterion,
            contestant,
            judge,
        }
    }

    fn new_score(s: &Seed, value: f64) -> NewScore {
        NewScore {
            judge_id: s.judge,
            criterion_id: s.criterion,
            contestant_id: s.contestant,
            subcategory_id: s.subcategory,
            value,
            comment: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_overwrites_instead_of_duplicating() {
        let s = seed();
        let first = match s.store.upsert_score(new_score(&s, 6.0), Utc::now()).await.unwrap() {
            ScoreUpsert::Written(score) => score,
            other => panic!("unexpected {:?}", other),
        };
        let second = match s.store.upsert_score(new_score(&s, 8.0), Utc::now()).await.unwrap() {
            ScoreUpsert::Written(score) => score,
            other => panic!("unexpected {:?}", other),
        };

        assert_eq!(first.id, second.id);
        assert_eq!(second.value, 8.0);
        let all = s.store.list_scores(&ScoreFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_locked_when_signed() {
        let s = seed();
        let ScoreUpsert::Written(score) =
            s.store.upsert_score(new_score(&s, 6.0), Utc::now()).await.unwrap()
        else {
            panic!("expected write");
        };
        s.store
            .sign_score(score.id, s.judge, Utc::now())
            .await
            .unwrap()
            .unwrap();

        let outcome = s.store.upsert_score(new_score(&s, 9.0), Utc::now()).await.unwrap();
        match outcome {
            ScoreUpsert::Locked(current) => assert_eq!(current.value, 6.0),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_upsert_requires_assignment() {
        let s = seed();
        let mut new = new_score(&s, 5.0);
        new.judge_id = Uuid::new_v4();
        let err = s.store.upsert_score(new, Utc::now()).await.unwrap_err();
        assert!(matches!(err, ScoringError::Authorization(_)));
    }

    #[tokio::test]
    async fn test_sign_is_conditional_on_owner() {
        let s = seed();
        let ScoreUpsert::Written(score) =
            s.store.upsert_score(new_score(&s, 6.0), Utc::now()).await.unwrap()
        else {
            panic!("expected write");
        };
        assert!(s
            .store
            .sign_score(score.id, Uuid::new_v4(), Utc::now())
            .await
            .unwrap()
            .is_none());
        assert!(s
            .store
            .sign_score(score.id, s.judge, Utc::now())
            .await
            .unwrap()
            .is_some());
        // second sign does not match the unsigned condition
        assert!(s
            .store
            .sign_score(score.id, s.judge, Utc::now())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_unsign_blocked_after_certification() {
        let s = seed();
        let ScoreUpsert::Written(score) =
            s.store.upsert_score(new_score(&s, 6.0), Utc::now()).await.unwrap()
        else {
            panic!("expected write");
        };
        s.store.sign_score(score.id, s.judge, Utc::now()).await.unwrap();
        s.store
            .certify_judges(s.subcategory, &[s.judge], Uuid::new_v4(), Utc::now())
            .await
            .unwrap();

        assert!(s
            .store
            .unsign_score(score.id, s.judge, Utc::now())
            .await
            .unwrap()
            .is_none());

        s.store
            .revoke_certification(s.subcategory, s.judge)
            .await
            .unwrap();
        let unsigned = s
            .store
            .unsign_score(score.id, s.judge, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert!(!unsigned.is_signed);
        assert!(unsigned.signed_at.is_none());
    }

    #[tokio::test]
    async fn test_finalize_once() {
        let s = seed();
        let ScoreUpsert::Written(score) =
            s.store.upsert_score(new_score(&s, 9.0), Utc::now()).await.unwrap()
        else {
            panic!("expected write");
        };
        s.store.sign_score(score.id, s.judge, Utc::now()).await.unwrap();

        let early = s
            .store
            .finalize_certification(s.subcategory, Uuid::new_v4(), None, Utc::now())
            .await;
        assert!(matches!(early, Err(ScoringError::Conflict(_))));

        s.store
            .certify_judges(s.subcategory, &[s.judge], Uuid::new_v4(), Utc::now())
            .await
            .unwrap();
        s.store
            .finalize_certification(s.subcategory, Uuid::new_v4(), None, Utc::now())
            .await
            .unwrap();

        let repeat = s
            .store
            .finalize_certification(s.subcategory, Uuid::new_v4(), None, Utc::now())
            .await;
        assert!(matches!(repeat, Err(ScoringError::Conflict(_))));
        assert_eq!(s.store.list_final_certifications().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_judge_scores_revokes_certification() {
        let s = seed();
        let ScoreUpsert::Written(score) =
            s.store.upsert_score(new_score(&s, 9.0), Utc::now()).await.unwrap()
        else {
            panic!("expected write");
        };
        s.store.sign_score(score.id, s.judge, Utc::now()).await.unwrap();
        s.store
            .certify_judges(s.subcategory, &[s.judge], Uuid::new_v4(), Utc::now())
            .await
            .unwrap();

        let removed = s
            .store
            .delete_judge_scores(s.judge, Some(s.subcategory))
            .await
            .unwrap();
        assert_eq!(removed.deleted.len(), 1);
        assert_eq!(removed.revoked_certifications, vec![s.subcategory]);

        let assignments = s.store.list_assignments(s.subcategory).await.unwrap();
        assert!(!assignments[0].is_certified);
        assert!(s.store.get_score(score.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fixture_file_loading() {
        let subcategory = Uuid::new_v4();
        let judge = Uuid::new_v4();
        let contestant = Uuid::new_v4();
        let json = serde_json::json!({
            "users": [{"id": judge, "name": "Judge A", "role": "judge", "is_active": true}],
            "subcategories": [{"id": subcategory, "event_id": null, "name": "Talent"}],
            "criteria": [{"id": Uuid::new_v4(), "subcategory_id": subcategory,
                          "name": "Skill", "max_score": 10.0, "order_index": 1}],
            "contestants": [{"id": contestant, "contestant_number": 3, "name": "C",
                             "subcategory_ids": [subcategory]}],
            "assignments": [{"subcategory_id": subcategory, "judge_id": judge}]
        });

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.to_string().as_bytes()).unwrap();

        let store = MemoryStore::from_fixture_file(file.path()).unwrap();
        let user = store.get_user(judge).await.unwrap().unwrap();
        assert_eq!(user.role, Role::Judge);
        assert_eq!(store.list_criteria(subcategory).await.unwrap().len(), 1);
        assert_eq!(store.list_contestants(subcategory).await.unwrap()[0].id, contestant);
        assert_eq!(store.list_assignments(subcategory).await.unwrap().len(), 1);
    }
}
