use thiserror::Error;
use ulid::Ulid;

use crate::model::RecordError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("time slot already taken by reservation {0}")]
    Conflict(Ulid),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("court {0} is not accepting reservations")]
    CourtInactive(Ulid),
    #[error("cannot {action} {id}: it is {from}")]
    InvalidTransition {
        id: Ulid,
        from: &'static str,
        action: &'static str,
    },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<RecordError> for EngineError {
    fn from(e: RecordError) -> Self {
        EngineError::Validation(e.to_string())
    }
}

impl EngineError {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::Conflict(_) => "conflict",
            EngineError::NotFound(_) => "not_found",
            EngineError::CourtInactive(_) => "court_inactive",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Storage(_) => "storage",
        }
    }
}
