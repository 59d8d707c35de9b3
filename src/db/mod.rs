pub mod audit;
pub mod history;
pub mod items;
pub mod pool;
pub mod requests;
pub mod users;

pub use pool::create_pool;

use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Parses a client-supplied id, failing with a validation error instead of a
/// database error on malformed input.
pub fn parse_uuid(s: &str) -> AppResult<Uuid> {
    Uuid::parse_str(s).map_err(|_| AppError::Validation(format!("invalid id: {}", s)))
}
