//! Data models for the scoring core

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// USERS & ROLES
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Organizer,
    Judge,
    TallyMaster,
    Auditor,
    Board,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Organizer => "organizer",
            Role::Judge => "judge",
            Role::TallyMaster => "tally_master",
            Role::Auditor => "auditor",
            Role::Board => "board",
            Role::Viewer => "viewer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Role {
    fn from(s: &str) -> Self {
        match s {
            "admin" => Role::Admin,
            "organizer" => Role::Organizer,
            "judge" => Role::Judge,
            "tally_master" => Role::TallyMaster,
            "auditor" => Role::Auditor,
            "board" => Role::Board,
            _ => Role::Viewer,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
    pub is_active: bool,
}

// ============================================================================
// CONTEST STRUCTURE (owned by the CRUD layer, consumed by reference)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subcategory {
    pub id: Uuid,
    /// Event this subcategory ultimately belongs to, when known
    pub event_id: Option<Uuid>,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Criterion {
    pub id: Uuid,
    pub subcategory_id: Uuid,
    pub name: String,
    pub max_score: f64,
    pub order_index: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contestant {
    pub id: Uuid,
    pub contestant_number: i32,
    pub name: String,
}

// ============================================================================
// SCORES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
    pub id: Uuid,
    pub judge_id: Uuid,
    pub criterion_id: Uuid,
    pub contestant_id: Uuid,
    /// Denormalized from the criterion; a criterion never changes subcategory
    pub subcategory_id: Uuid,
    pub value: f64,
    pub comment: Option<String>,
    pub is_signed: bool,
    pub signed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewScore {
    pub judge_id: Uuid,
    pub criterion_id: Uuid,
    pub contestant_id: Uuid,
    pub subcategory_id: Uuid,
    pub value: f64,
    pub comment: Option<String>,
}

/// Outcome of a conditional score write
#[derive(Debug, Clone)]
pub enum ScoreUpsert {
    /// Row created or overwritten, now in the submitted state
    Written(Score),
    /// Row exists and is signed; nothing was written
    Locked(Score),
}

#[derive(Debug, Clone, Default)]
pub struct ScoreFilter {
    pub subcategory_id: Option<Uuid>,
    pub contestant_id: Option<Uuid>,
    pub judge_id: Option<Uuid>,
    pub signed_only: bool,
}

impl ScoreFilter {
    pub fn subcategory(subcategory_id: Uuid) -> Self {
        Self {
            subcategory_id: Some(subcategory_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, score: &Score) -> bool {
        self.subcategory_id.map_or(true, |id| score.subcategory_id == id)
            && self.contestant_id.map_or(true, |id| score.contestant_id == id)
            && self.judge_id.map_or(true, |id| score.judge_id == id)
            && (!self.signed_only || score.is_signed)
    }
}

// ============================================================================
// CERTIFICATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeAssignment {
    pub subcategory_id: Uuid,
    pub judge_id: Uuid,
    pub is_certified: bool,
    pub certified_at: Option<DateTime<Utc>>,
    pub certified_by: Option<Uuid>,
}

impl JudgeAssignment {
    pub fn new(subcategory_id: Uuid, judge_id: Uuid) -> Self {
        Self {
            subcategory_id,
            judge_id,
            is_certified: false,
            certified_at: None,
            certified_by: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalCertification {
    pub id: Uuid,
    pub subcategory_id: Uuid,
    pub certified_by: Uuid,
    pub notes: Option<String>,
    pub certified_at: DateTime<Utc>,
}

/// Derived workflow position of a subcategory. Only `FinalCertified` is stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Scoring,
    AwaitingSignOff,
    AwaitingTallyCertification,
    ReadyForFinal,
    FinalCertified,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificationStatus {
    pub subcategory_id: Uuid,
    pub state: WorkflowState,
    pub total_judges: usize,
    pub certified_judges: usize,
    pub total_scores: usize,
    pub signed_scores: usize,
    pub ready: bool,
    pub final_certification: Option<FinalCertification>,
}

/// Result of deleting a judge's scores through the board override
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemovedScores {
    pub deleted: Vec<Score>,
    /// Subcategories where the judge's certification was cleared
    pub revoked_certifications: Vec<Uuid>,
}

// ============================================================================
// DEDUCTIONS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deduction {
    pub id: Uuid,
    pub subcategory_id: Uuid,
    pub contestant_id: Uuid,
    pub amount: f64,
    pub reason: String,
    pub comment: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDeduction {
    pub subcategory_id: Uuid,
    pub contestant_id: Uuid,
    pub amount: f64,
    pub reason: String,
    pub comment: Option<String>,
    pub created_by: Uuid,
}

// ============================================================================
// RESULTS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContestantTotal {
    pub contestant_id: Uuid,
    pub subcategory_id: Uuid,
    pub total_score: f64,
    pub max_possible_score: f64,
    pub percentage: f64,
    pub deductions: f64,
    pub scores: Vec<Score>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub contestant_id: Uuid,
    pub contestant_number: i32,
    pub name: String,
    pub total_score: f64,
    pub max_possible_score: f64,
    pub percentage: f64,
}

/// Secondary ordering for contestants with equal totals
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    #[default]
    ContestantNumber,
    None,
}

impl std::str::FromStr for TieBreak {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contestant_number" => Ok(TieBreak::ContestantNumber),
            "none" => Ok(TieBreak::None),
            other => Err(format!("unknown tie-break rule: {}", other)),
        }
    }
}

// ============================================================================
// REQUESTS / RESPONSES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitScoreRequest {
    pub criterion_id: Uuid,
    pub contestant_id: Uuid,
    pub score: f64,
    pub comments: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertifyTotalsRequest {
    pub subcategory_id: Uuid,
    pub judge_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertifyTotalsResponse {
    pub subcategory_id: Uuid,
    pub certified: Vec<JudgeAssignment>,
    pub state: WorkflowState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UncertifyRequest {
    pub subcategory_id: Uuid,
    pub judge_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalCertificationRequest {
    pub subcategory_id: Uuid,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveJudgeScoresRequest {
    pub judge_id: Uuid,
    pub subcategory_id: Option<Uuid>,
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveJudgeScoresResponse {
    pub deleted_count: usize,
    pub revoked_certifications: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddDeductionRequest {
    pub subcategory_id: Uuid,
    pub contestant_id: Uuid,
    pub amount: f64,
    pub reason: String,
    pub comment: Option<String>,
}

// ============================================================================
// WEBSOCKET EVENTS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsUser {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
}

impl From<&User> for WsUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            role: user.role,
        }
    }
}

/// Server to client frames
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsEvent {
    Connected { user: WsUser },
    Joined { room: String },
    Left { room: String },
    Pong,
    Error { message: String },

    ScoreSubmitted(ScoreEvent),
    ScoreSigned(ScoreEvent),
    ScoreUnsigned(ScoreEvent),
    ScoresRemoved(ScoresRemovedEvent),
    DeductionAdded(DeductionEvent),
    CertificationUpdated(CertificationEvent),
    CertificationFinalized(FinalCertificationEvent),
}

impl WsEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            WsEvent::Connected { .. } => "connected",
            WsEvent::Joined { .. } => "joined",
            WsEvent::Left { .. } => "left",
            WsEvent::Pong => "pong",
            WsEvent::Error { .. } => "error",
            WsEvent::ScoreSubmitted(_) => "score_submitted",
            WsEvent::ScoreSigned(_) => "score_signed",
            WsEvent::ScoreUnsigned(_) => "score_unsigned",
            WsEvent::ScoresRemoved(_) => "scores_removed",
            WsEvent::DeductionAdded(_) => "deduction_added",
            WsEvent::CertificationUpdated(_) => "certification_updated",
            WsEvent::CertificationFinalized(_) => "certification_finalized",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreEvent {
    pub score_id: Uuid,
    pub judge_id: Uuid,
    pub criterion_id: Uuid,
    pub contestant_id: Uuid,
    pub subcategory_id: Uuid,
    pub value: f64,
    pub is_signed: bool,
}

impl From<&Score> for ScoreEvent {
    fn from(score: &Score) -> Self {
        Self {
            score_id: score.id,
            judge_id: score.judge_id,
            criterion_id: score.criterion_id,
            contestant_id: score.contestant_id,
            subcategory_id: score.subcategory_id,
            value: score.value,
            is_signed: score.is_signed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoresRemovedEvent {
    pub judge_id: Uuid,
    pub subcategory_id: Uuid,
    pub deleted_count: usize,
    pub certification_revoked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeductionEvent {
    pub deduction_id: Uuid,
    pub subcategory_id: Uuid,
    pub contestant_id: Uuid,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificationEvent {
    pub subcategory_id: Uuid,
    pub judge_ids: Vec<Uuid>,
    pub is_certified: bool,
    pub actor_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalCertificationEvent {
    pub certification_id: Uuid,
    pub subcategory_id: Uuid,
    pub certified_by: Uuid,
    pub certified_at: DateTime<Utc>,
}

/// Client to server frames
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Join { room: String },
    Leave { room: String },
    Ping,
}
