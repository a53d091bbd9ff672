//! Readiness derivation shared by both storage backends
//!
//! These checks run inside the store's atomic section so the decision and
//! the write observe the same snapshot.

use crate::error::{Result, ScoringError};
use crate::models::{JudgeAssignment, Score, WorkflowState};
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadinessCounts {
    pub total_judges: usize,
    pub certified_judges: usize,
    pub total_scores: usize,
    pub signed_scores: usize,
}

impl ReadinessCounts {
    pub fn tally(assignments: &[JudgeAssignment], scores: &[Score]) -> Self {
        Self {
            total_judges: assignments.len(),
            certified_judges: assignments.iter().filter(|a| a.is_certified).count(),
            total_scores: scores.len(),
            signed_scores: scores.iter().filter(|s| s.is_signed).count(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.total_judges > 0
            && self.certified_judges == self.total_judges
            && self.signed_scores == self.total_scores
    }

    /// First matching rule wins; a stored final certification overrides all.
    pub fn state(&self, finalized: bool) -> WorkflowState {
        if finalized {
            WorkflowState::FinalCertified
        } else if self.total_scores == 0 {
            WorkflowState::Scoring
        } else if self.signed_scores < self.total_scores {
            WorkflowState::AwaitingSignOff
        } else if self.total_judges == 0 || self.certified_judges < self.total_judges {
            WorkflowState::AwaitingTallyCertification
        } else {
            WorkflowState::ReadyForFinal
        }
    }

    pub fn ensure_ready(&self) -> Result<()> {
        if self.total_judges == 0 {
            return Err(ScoringError::conflict("no judges assigned to subcategory"));
        }
        if self.certified_judges != self.total_judges {
            return Err(ScoringError::conflict(format!(
                "not all judges certified ({}/{})",
                self.certified_judges, self.total_judges
            )));
        }
        if self.signed_scores != self.total_scores {
            return Err(ScoringError::conflict(format!(
                "not all scores signed ({}/{})",
                self.signed_scores, self.total_scores
            )));
        }
        Ok(())
    }
}

/// Check that every named judge may be certified for the subcategory.
/// `scores` must hold the subcategory's scores (any judge).
pub fn ensure_judges_certifiable(
    judge_ids: &[Uuid],
    assignments: &[JudgeAssignment],
    scores: &[Score],
) -> Result<()> {
    let assigned: HashSet<Uuid> = assignments.iter().map(|a| a.judge_id).collect();

    for judge_id in judge_ids {
        if !assigned.contains(judge_id) {
            return Err(ScoringError::validation(format!(
                "judge {} is not assigned to this subcategory",
                judge_id
            )));
        }
    }

    for judge_id in judge_ids {
        let own: Vec<&Score> = scores.iter().filter(|s| s.judge_id == *judge_id).collect();
        if own.is_empty() {
            return Err(ScoringError::conflict(format!(
                "judge {} has no scores in this subcategory",
                judge_id
            )));
        }
        let unsigned = own.iter().filter(|s| !s.is_signed).count();
        if unsigned > 0 {
            return Err(ScoringError::conflict(format!(
                "judge {} has {} unsigned score(s)",
                judge_id, unsigned
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn score(judge_id: Uuid, signed: bool) -> Score {
        let now = Utc::now();
        Score {
            id: Uuid::new_v4(),
            judge_id,
            criterion_id: Uuid::new_v4(),
            contestant_id: Uuid::new_v4(),
            subcategory_id: Uuid::nil(),
            value: 5.0,
            comment: None,
            is_signed: signed,
            signed_at: signed.then(Utc::now),
            created_at: now,
            updated_at: now,
        }
    }

    fn assignment(judge_id: Uuid, certified: bool) -> JudgeAssignment {
        JudgeAssignment {
            is_certified: certified,
            ..JudgeAssignment::new(Uuid::nil(), judge_id)
        }
    }

    #[test]
    fn test_state_progression() {
        let judge = Uuid::new_v4();

        let counts = ReadinessCounts::tally(&[assignment(judge, false)], &[]);
        assert_eq!(counts.state(false), WorkflowState::Scoring);

        let counts = ReadinessCounts::tally(&[assignment(judge, false)], &[score(judge, false)]);
        assert_eq!(counts.state(false), WorkflowState::AwaitingSignOff);

        let counts = ReadinessCounts::tally(&[assignment(judge, false)], &[score(judge, true)]);
        assert_eq!(counts.state(false), WorkflowState::AwaitingTallyCertification);

        let counts = ReadinessCounts::tally(&[assignment(judge, true)], &[score(judge, true)]);
        assert_eq!(counts.state(false), WorkflowState::ReadyForFinal);
        assert!(counts.is_ready());
        assert_eq!(counts.state(true), WorkflowState::FinalCertified);
    }

    #[test]
    fn test_uncertified_judge_blocks_final_even_when_all_signed() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let counts = ReadinessCounts::tally(
            &[assignment(a, true), assignment(b, false)],
            &[score(a, true), score(b, true)],
        );
        let err = counts.ensure_ready().unwrap_err();
        assert!(matches!(err, ScoringError::Conflict(ref m) if m.contains("judges certified")));
    }

    #[test]
    fn test_unsigned_score_blocks_final() {
        let a = Uuid::new_v4();
        let counts =
            ReadinessCounts::tally(&[assignment(a, true)], &[score(a, true), score(a, false)]);
        let err = counts.ensure_ready().unwrap_err();
        assert!(matches!(err, ScoringError::Conflict(ref m) if m.contains("scores signed")));
    }

    #[test]
    fn test_no_judges_never_ready() {
        let counts = ReadinessCounts::tally(&[], &[]);
        assert!(!counts.is_ready());
        assert!(counts.ensure_ready().is_err());
    }

    #[test]
    fn test_certifiable_requires_assignment() {
        let a = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let err =
            ensure_judges_certifiable(&[stranger], &[assignment(a, false)], &[score(a, true)])
                .unwrap_err();
        assert!(matches!(err, ScoringError::Validation(_)));
    }

    #[test]
    fn test_certifiable_requires_signed_scores() {
        let a = Uuid::new_v4();
        let err = ensure_judges_certifiable(
            &[a],
            &[assignment(a, false)],
            &[score(a, true), score(a, false)],
        )
        .unwrap_err();
        assert!(matches!(err, ScoringError::Conflict(ref m) if m.contains("unsigned")));

        assert!(
            ensure_judges_certifiable(&[a], &[assignment(a, false)], &[score(a, true)]).is_ok()
        );
    }

    #[test]
    fn test_certifiable_requires_some_scores() {
        let a = Uuid::new_v4();
        let err = ensure_judges_certifiable(&[a], &[assignment(a, false)], &[]).unwrap_err();
        assert!(matches!(err, ScoringError::Conflict(_)));
    }
}
