use thiserror::Error;
use tonic::Status;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Wraps a store error, translating unique-constraint violations into a
    /// typed conflict instead of a raw constraint message.
    pub fn from_db(err: sqlx::Error) -> Self {
        if is_unique_violation(&err) {
            AppError::Conflict("serial or asset tag already registered".to_string())
        } else {
            AppError::Database(err)
        }
    }
}

/// Postgres SQLSTATE 23505 (unique_violation).
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

impl From<AppError> for Status {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Database(e) => Status::internal(format!("Database error: {}", e)),
            AppError::NotFound(msg) => Status::not_found(msg),
            AppError::Forbidden(msg) => Status::permission_denied(msg),
            AppError::InvalidState(msg) => Status::failed_precondition(msg),
            AppError::Validation(msg) => Status::invalid_argument(msg),
            AppError::Conflict(msg) => Status::already_exists(msg),
            AppError::Internal(msg) => Status::internal(msg),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
