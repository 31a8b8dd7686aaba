use thiserror::Error;
use ulid::Ulid;

/// Persistence failures. Never retried by the scheduler.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("WAL error: {0}")]
    Wal(String),
    #[error("store rejected write: {0}")]
    Rejected(&'static str),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("time conflict")]
    Conflict,
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SchedulerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        SchedulerError::Validation(msg.into())
    }

    /// Stable machine-readable code for the API boundary.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Validation(_) => "validation_failed",
            SchedulerError::Conflict => "time_conflict",
            SchedulerError::NotFound(_) => "not_found",
            SchedulerError::Store(_) => "internal_error",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            SchedulerError::Validation(_) => 400,
            SchedulerError::Conflict => 409,
            SchedulerError::NotFound(_) => 404,
            SchedulerError::Store(_) => 500,
        }
    }
}
