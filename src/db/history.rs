use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::HistoryModel;

/// Appends one immutable event record to an item's history. Always called on
/// the same connection/transaction as the item mutation that caused it.
pub async fn append(
    conn: &mut PgConnection,
    item_id: Uuid,
    action: &str,
    description: &str,
    location: Option<&str>,
    user_id: Option<Uuid>,
) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO history (item_id, action, description, location, user_id) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(item_id)
    .bind(action)
    .bind(description)
    .bind(location)
    .bind(user_id)
    .execute(conn)
    .await
    .map_err(AppError::Database)?;
    Ok(())
}

pub async fn list_for_item(pool: &PgPool, item_id: Uuid) -> AppResult<Vec<HistoryModel>> {
    let rows: Vec<HistoryModel> = sqlx::query_as(
        "SELECT h.id::text, h.item_id::text, h.action, h.description, h.location, \
         u.name AS user_name, h.created_at::text \
         FROM history h \
         LEFT JOIN users u ON u.id = h.user_id \
         WHERE h.item_id = $1 \
         ORDER BY h.created_at DESC",
    )
    .bind(item_id)
    .fetch_all(pool)
    .await
    .map_err(AppError::Database)?;
    Ok(rows)
}
