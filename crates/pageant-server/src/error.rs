//! Error taxonomy for the scoring core

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScoringError>;

#[derive(Error, Debug)]
pub enum ScoringError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    Authorization(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ScoringError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ScoringError::Validation(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        ScoringError::Authorization(msg.into())
    }

    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        ScoringError::NotFound(format!("{} not found: {}", what, id))
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        ScoringError::Conflict(msg.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ScoringError::Validation(_) => "validation_error",
            ScoringError::Unauthenticated(_) => "unauthenticated",
            ScoringError::Authorization(_) => "authorization_error",
            ScoringError::NotFound(_) => "not_found",
            ScoringError::Conflict(_) => "conflict",
            ScoringError::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ScoringError::Validation(_) => StatusCode::BAD_REQUEST,
            ScoringError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ScoringError::Authorization(_) => StatusCode::FORBIDDEN,
            ScoringError::NotFound(_) => StatusCode::NOT_FOUND,
            ScoringError::Conflict(_) => StatusCode::CONFLICT,
            ScoringError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ScoringError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed");
        }
        let body = Json(serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

impl From<tokio_postgres::Error> for ScoringError {
    fn from(err: tokio_postgres::Error) -> Self {
        ScoringError::Internal(format!("database: {}", err))
    }
}

impl From<deadpool_postgres::PoolError> for ScoringError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        ScoringError::Internal(format!("database pool: {}", err))
    }
}

impl From<serde_json::Error> for ScoringError {
    fn from(err: serde_json::Error) -> Self {
        ScoringError::Internal(format!("serialization: {}", err))
    }
}
