//! Rule Engine - boundary validation and rate limiting
//!
//! Every request body implements [`Validate`]; handlers call it before the
//! store is touched. The [`RuleEngine`] additionally throttles score
//! submission per judge.

use crate::error::{Result, ScoringError};
use crate::models::{
    AddDeductionRequest, CertifyTotalsRequest, FinalCertificationRequest,
    RemoveJudgeScoresRequest, SubmitScoreRequest, UncertifyRequest,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::warn;
use uuid::Uuid;

/// Upper bound for free-text fields (comments, notes, reasons)
pub const MAX_TEXT_LEN: usize = 2000;

/// Shape checks that need no store access
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

fn check_text(field: &str, value: Option<&str>) -> Result<()> {
    match value {
        Some(text) if text.chars().count() > MAX_TEXT_LEN => Err(ScoringError::validation(
            format!("{} exceeds {} characters", field, MAX_TEXT_LEN),
        )),
        _ => Ok(()),
    }
}

impl Validate for SubmitScoreRequest {
    fn validate(&self) -> Result<()> {
        if !self.score.is_finite() {
            return Err(ScoringError::validation("score must be a finite number"));
        }
        if self.score < 0.0 {
            return Err(ScoringError::validation("score must not be negative"));
        }
        check_text("comments", self.comments.as_deref())
    }
}

impl Validate for CertifyTotalsRequest {
    fn validate(&self) -> Result<()> {
        if self.judge_ids.is_empty() {
            return Err(ScoringError::validation("judge_ids must not be empty"));
        }
        Ok(())
    }
}

impl Validate for UncertifyRequest {
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

impl Validate for FinalCertificationRequest {
    fn validate(&self) -> Result<()> {
        check_text("notes", self.notes.as_deref())
    }
}

impl Validate for RemoveJudgeScoresRequest {
    fn validate(&self) -> Result<()> {
        if !self.confirm {
            return Err(ScoringError::validation(
                "confirm must be true to remove judge scores",
            ));
        }
        Ok(())
    }
}

impl Validate for AddDeductionRequest {
    fn validate(&self) -> Result<()> {
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(ScoringError::validation(
                "deduction amount must be greater than zero",
            ));
        }
        if self.reason.trim().is_empty() {
            return Err(ScoringError::validation("reason is required"));
        }
        check_text("reason", Some(&self.reason))?;
        check_text("comment", self.comment.as_deref())
    }
}

/// Rate limit configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per window
    pub max_requests: u32,
    /// Window duration
    pub window_duration: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 120,
            window_duration: Duration::from_secs(60),
        }
    }
}

/// Fixed-window limiter keyed by acting user
pub struct RuleEngine {
    rate_limits: RwLock<HashMap<Uuid, RateLimitEntry>>,
    config: RateLimitConfig,
}

struct RateLimitEntry {
    count: u32,
    window_start: Instant,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self::with_config(RateLimitConfig::default())
    }

    pub fn with_config(config: RateLimitConfig) -> Self {
        Self {
            rate_limits: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Returns Ok(()) if allowed, Err if rate limited
    pub fn check_rate_limit(&self, user_id: Uuid) -> Result<()> {
        let mut limits = self.rate_limits.write();
        let now = Instant::now();

        let entry = limits.entry(user_id).or_insert(RateLimitEntry {
            count: 0,
            window_start: now,
        });

        if now.duration_since(entry.window_start) > self.config.window_duration {
            entry.count = 0;
            entry.window_start = now;
        }

        if entry.count >= self.config.max_requests {
            warn!(user_id = %user_id, "Rate limit exceeded");
            return Err(ScoringError::validation("rate limit exceeded"));
        }

        entry.count += 1;
        Ok(())
    }

    /// Drop windows that have already expired
    pub fn cleanup_expired(&self) {
        let mut limits = self.rate_limits.write();
        let now = Instant::now();
        limits.retain(|_, entry| {
            now.duration_since(entry.window_start) <= self.config.window_duration
        });
    }

    pub fn tracked_users(&self) -> usize {
        self.rate_limits.read().len()
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}
