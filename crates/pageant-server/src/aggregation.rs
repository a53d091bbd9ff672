//! Aggregation Engine - contestant totals and rankings
//!
//! Only signed scores count. A criterion contributes to the maximum only
//! when it has a signed score, so partially judged contestants are scored
//! against what has actually been judged.

use crate::db::ScoringStore;
use crate::error::{Result, ScoringError};
use crate::models::{
    Contestant, ContestantTotal, Criterion, Deduction, LeaderboardEntry, Score, ScoreFilter,
    TieBreak,
};
use std::cmp::Ordering;
use std::collections::HashMap;
use uuid::Uuid;

/// Pure total over already-loaded rows. Rows belonging to other contestants,
/// other subcategories, or unsigned scores are ignored.
pub fn calculate_total(
    contestant_id: Uuid,
    subcategory_id: Uuid,
    criteria: &[Criterion],
    scores: &[Score],
    deductions: &[Deduction],
) -> ContestantTotal {
    let max_by_criterion: HashMap<Uuid, f64> = criteria
        .iter()
        .filter(|c| c.subcategory_id == subcategory_id)
        .map(|c| (c.id, c.max_score))
        .collect();

    let counted: Vec<Score> = scores
        .iter()
        .filter(|s| s.is_signed && s.contestant_id == contestant_id)
        .filter(|s| max_by_criterion.contains_key(&s.criterion_id))
        .cloned()
        .collect();

    let raw: f64 = counted.iter().map(|s| s.value).sum();
    let max_possible_score: f64 = counted
        .iter()
        .map(|s| max_by_criterion[&s.criterion_id])
        .sum();
    let deducted: f64 = deductions
        .iter()
        .filter(|d| d.contestant_id == contestant_id && d.subcategory_id == subcategory_id)
        .map(|d| d.amount)
        .sum();

    let total_score = (raw - deducted).max(0.0);
    let percentage = if max_possible_score > 0.0 {
        total_score * 100.0 / max_possible_score
    } else {
        0.0
    };

    ContestantTotal {
        contestant_id,
        subcategory_id,
        total_score,
        max_possible_score,
        percentage,
        deductions: deducted,
        scores: counted,
    }
}

pub async fn contestant_total(
    store: &dyn ScoringStore,
    contestant_id: Uuid,
    subcategory_id: Uuid,
) -> Result<ContestantTotal> {
    store
        .get_subcategory(subcategory_id)
        .await?
        .ok_or_else(|| ScoringError::not_found("subcategory", subcategory_id))?;
    store
        .get_contestant(contestant_id)
        .await?
        .ok_or_else(|| ScoringError::not_found("contestant", contestant_id))?;

    let criteria = store.list_criteria(subcategory_id).await?;
    let scores = store
        .list_scores(&ScoreFilter {
            subcategory_id: Some(subcategory_id),
            contestant_id: Some(contestant_id),
            signed_only: true,
            ..Default::default()
        })
        .await?;
    let deductions = store
        .list_deductions(subcategory_id, Some(contestant_id))
        .await?;

    Ok(calculate_total(
        contestant_id,
        subcategory_id,
        &criteria,
        &scores,
        &deductions,
    ))
}

/// Order by total descending, then by the tie-break rule. Ranks are 1-based
/// positions in the resulting order.
pub fn rank(mut rows: Vec<(Contestant, ContestantTotal)>, tie_break: TieBreak) -> Vec<LeaderboardEntry> {
    rows.sort_by(|(ca, ta), (cb, tb)| {
        let by_total = tb.total_score.total_cmp(&ta.total_score);
        if by_total != Ordering::Equal {
            return by_total;
        }
        match tie_break {
            TieBreak::ContestantNumber => ca
                .contestant_number
                .cmp(&cb.contestant_number)
                .then(ca.id.cmp(&cb.id)),
            TieBreak::None => ca.id.cmp(&cb.id),
        }
    });

    rows.into_iter()
        .enumerate()
        .map(|(i, (contestant, total))| LeaderboardEntry {
            rank: i as u32 + 1,
            contestant_id: contestant.id,
            contestant_number: contestant.contestant_number,
            name: contestant.name,
            total_score: total.total_score,
            max_possible_score: total.max_possible_score,
            percentage: total.percentage,
        })
        .collect()
}

pub async fn leaderboard(
    store: &dyn ScoringStore,
    subcategory_id: Uuid,
    tie_break: TieBreak,
) -> Result<Vec<LeaderboardEntry>> {
    store
        .get_subcategory(subcategory_id)
        .await?
        .ok_or_else(|| ScoringError::not_found("subcategory", subcategory_id))?;

    let contestants = store.list_contestants(subcategory_id).await?;
    let criteria = store.list_criteria(subcategory_id).await?;
    let scores = store
        .list_scores(&ScoreFilter {
            subcategory_id: Some(subcategory_id),
            signed_only: true,
            ..Default::default()
        })
        .await?;
    let deductions = store.list_deductions(subcategory_id, None).await?;

    let rows = contestants
        .into_iter()
        .map(|contestant| {
            let total = calculate_total(
                contestant.id,
                subcategory_id,
                &criteria,
                &scores,
                &deductions,
            );
            (contestant, total)
        })
        .collect();

    Ok(rank(rows, tie_break))
}
