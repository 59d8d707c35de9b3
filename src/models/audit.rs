use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AuditLogModel {
    pub id: String,
    pub user_id: Option<String>,
    pub action: String,
    pub resource: String,
    pub details: String,
    pub user_name: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct HistoryModel {
    pub id: String,
    pub item_id: String,
    pub action: String,
    pub description: String,
    pub location: Option<String>,
    pub user_name: Option<String>,
    pub created_at: String,
}
