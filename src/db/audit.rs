use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::AuditLogModel;

/// Appends one audit log entry. Workflow mutations call this on the same
/// transaction as the mutation itself.
pub async fn log(
    conn: &mut PgConnection,
    user_id: Uuid,
    action: &str,
    resource: &str,
    details: &str,
) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO audit_logs (user_id, action, resource, details) VALUES ($1, $2, $3, $4)",
    )
    .bind(user_id)
    .bind(action)
    .bind(resource)
    .bind(details)
    .execute(conn)
    .await
    .map_err(AppError::Database)?;
    Ok(())
}

/// Audit entries with the given actions newer than `days` days, newest first.
pub async fn recent_by_actions(
    conn: &mut PgConnection,
    actions: &[&str],
    days: i32,
) -> AppResult<Vec<AuditLogModel>> {
    let actions: Vec<String> = actions.iter().map(|a| a.to_string()).collect();
    let rows: Vec<AuditLogModel> = sqlx::query_as(
        "SELECT a.id::text, a.user_id::text, a.action, a.resource, a.details, \
         u.name AS user_name, a.created_at::text \
         FROM audit_logs a \
         LEFT JOIN users u ON u.id = a.user_id \
         WHERE a.action = ANY($1) AND a.created_at >= NOW() - ($2 || ' days')::interval \
         ORDER BY a.created_at DESC",
    )
    .bind(&actions)
    .bind(days.to_string())
    .fetch_all(conn)
    .await
    .map_err(AppError::Database)?;
    Ok(rows)
}
