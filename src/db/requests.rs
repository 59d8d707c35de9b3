use sqlx::prelude::FromRow;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::request::{STATUS_APPROVED, STATUS_PENDING, STATUS_REJECTED};
use crate::models::PendingRequestModel;

const REQUEST_COLUMNS: &str = "id::text, request_type, status, data::text, item_id::text, \
                               user_id::text, admin_notes, created_at::text, updated_at::text";

pub async fn insert(
    conn: &mut PgConnection,
    request_type: &str,
    data: &str,
    item_id: Option<Uuid>,
    user_id: Uuid,
) -> AppResult<PendingRequestModel> {
    let request: PendingRequestModel = sqlx::query_as(&format!(
        "INSERT INTO pending_requests (request_type, status, data, item_id, user_id) \
         VALUES ($1, '{}', $2::jsonb, $3, $4) \
         RETURNING {}",
        STATUS_PENDING, REQUEST_COLUMNS
    ))
    .bind(request_type)
    .bind(data)
    .bind(item_id)
    .bind(user_id)
    .fetch_one(conn)
    .await
    .map_err(AppError::Database)?;
    Ok(request)
}

/// Most recent requests submitted by one user, newest first.
pub async fn list_by_user(pool: &PgPool, user_id: Uuid) -> AppResult<Vec<PendingRequestModel>> {
    let requests: Vec<PendingRequestModel> = sqlx::query_as(&format!(
        "SELECT {} FROM pending_requests WHERE user_id = $1 \
         ORDER BY created_at DESC LIMIT 20",
        REQUEST_COLUMNS
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await
    .map_err(AppError::Database)?;
    Ok(requests)
}

#[derive(Debug, Clone, FromRow)]
pub struct PendingWithUser {
    pub id: String,
    pub request_type: String,
    pub status: String,
    pub data: String,
    pub item_id: Option<String>,
    pub user_id: String,
    pub user_name: Option<String>,
    pub created_at: String,
}

/// All requests still awaiting a decision, oldest first, with the submitter's
/// name joined in for the admin feed.
pub async fn list_pending(pool: &PgPool) -> AppResult<Vec<PendingWithUser>> {
    let requests: Vec<PendingWithUser> = sqlx::query_as(&format!(
        "SELECT p.id::text, p.request_type, p.status, p.data::text, p.item_id::text, \
         p.user_id::text, u.name AS user_name, p.created_at::text \
         FROM pending_requests p \
         LEFT JOIN users u ON u.id = p.user_id \
         WHERE p.status = '{}' \
         ORDER BY p.created_at ASC",
        STATUS_PENDING
    ))
    .fetch_all(pool)
    .await
    .map_err(AppError::Database)?;
    Ok(requests)
}

pub async fn find_by_id(
    conn: &mut PgConnection,
    id: Uuid,
) -> AppResult<Option<PendingRequestModel>> {
    let request: Option<PendingRequestModel> = sqlx::query_as(&format!(
        "SELECT {} FROM pending_requests WHERE id = $1",
        REQUEST_COLUMNS
    ))
    .bind(id)
    .fetch_optional(conn)
    .await
    .map_err(AppError::Database)?;
    Ok(request)
}

/// Flips a request to APPROVED only if it is still PENDING, returning the
/// claimed row. Two admins racing on the same request means exactly one wins;
/// the loser sees the already-resolved status.
pub async fn claim_for_approval(
    conn: &mut PgConnection,
    id: Uuid,
    admin_notes: Option<&str>,
) -> AppResult<PendingRequestModel> {
    let claimed: Option<PendingRequestModel> = sqlx::query_as(&format!(
        "UPDATE pending_requests \
         SET status = '{}', admin_notes = $2, updated_at = NOW() \
         WHERE id = $1 AND status = '{}' \
         RETURNING {}",
        STATUS_APPROVED, STATUS_PENDING, REQUEST_COLUMNS
    ))
    .bind(id)
    .bind(admin_notes)
    .fetch_optional(&mut *conn)
    .await
    .map_err(AppError::Database)?;

    match claimed {
        Some(request) => Ok(request),
        None => Err(not_pending(conn, id).await?),
    }
}

/// Same conditional transition as approval, but to REJECTED with the reason
/// recorded in the admin notes.
pub async fn claim_for_rejection(
    conn: &mut PgConnection,
    id: Uuid,
    reason: &str,
) -> AppResult<PendingRequestModel> {
    let claimed: Option<PendingRequestModel> = sqlx::query_as(&format!(
        "UPDATE pending_requests \
         SET status = '{}', admin_notes = $2, updated_at = NOW() \
         WHERE id = $1 AND status = '{}' \
         RETURNING {}",
        STATUS_REJECTED, STATUS_PENDING, REQUEST_COLUMNS
    ))
    .bind(id)
    .bind(reason)
    .fetch_optional(&mut *conn)
    .await
    .map_err(AppError::Database)?;

    match claimed {
        Some(request) => Ok(request),
        None => Err(not_pending(conn, id).await?),
    }
}

/// Distinguishes "never existed" from "someone already resolved it" after a
/// conditional update matched zero rows.
async fn not_pending(conn: &mut PgConnection, id: Uuid) -> AppResult<AppError> {
    let status: Option<(String,)> =
        sqlx::query_as("SELECT status FROM pending_requests WHERE id = $1")
            .bind(id)
            .fetch_optional(conn)
            .await
            .map_err(AppError::Database)?;

    Ok(match status {
        Some((status,)) => AppError::InvalidState(format!(
            "request {} was already resolved ({})",
            id, status
        )),
        None => AppError::NotFound(format!("request {} not found", id)),
    })
}
