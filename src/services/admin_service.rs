use sqlx::PgPool;
use tonic::{Request, Response, Status};
use uuid::Uuid;

use crate::db;
use crate::error::AppError;
use crate::middleware::require_admin;
use crate::proto::admin::admin_service_server::AdminService;
use crate::proto::admin::DestructiveReq;
use crate::proto::common::Empty;

pub struct AdminServiceImpl {
    pool: PgPool,
}

impl AdminServiceImpl {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn verify_caller(&self, user_id: Uuid, password: &str) -> Result<(), Status> {
        let account = db::users::find_by_id(&self.pool, user_id)
            .await
            .map_err(Status::from)?
            .ok_or_else(|| Status::unauthenticated("User not found"))?;
        if !db::users::verify_password(password, &account.password_hash) {
            return Err(Status::permission_denied("Senha incorreta"));
        }
        Ok(())
    }
}

#[tonic::async_trait]
impl AdminService for AdminServiceImpl {
    /// Deletes all items and their history, keeping users and the audit trail.
    async fn clear_inventory(
        &self,
        request: Request<DestructiveReq>,
    ) -> Result<Response<Empty>, Status> {
        let admin = require_admin(&request)?;
        let req = request.into_inner();
        let admin_id = db::parse_uuid(&admin.user_id).map_err(Status::from)?;
        self.verify_caller(admin_id, &req.password).await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;

        sqlx::query("DELETE FROM history")
            .execute(&mut *tx)
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;
        sqlx::query("DELETE FROM pending_requests")
            .execute(&mut *tx)
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;
        sqlx::query("DELETE FROM items")
            .execute(&mut *tx)
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;
        db::audit::log(&mut tx, admin_id, "LIMPEZA", "items", "Inventário limpo")
            .await
            .map_err(Status::from)?;

        tx.commit()
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;

        tracing::warn!("Inventory cleared by {}", admin.name);
        Ok(Response::new(Empty {}))
    }

    /// Factory reset: wipes everything except the calling admin's account.
    async fn reset_system(
        &self,
        request: Request<DestructiveReq>,
    ) -> Result<Response<Empty>, Status> {
        let admin = require_admin(&request)?;
        let req = request.into_inner();
        let admin_id = db::parse_uuid(&admin.user_id).map_err(Status::from)?;
        self.verify_caller(admin_id, &req.password).await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;

        sqlx::query("DELETE FROM history")
            .execute(&mut *tx)
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;
        sqlx::query("DELETE FROM pending_requests")
            .execute(&mut *tx)
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;
        sqlx::query("DELETE FROM items")
            .execute(&mut *tx)
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;
        sqlx::query("DELETE FROM audit_logs")
            .execute(&mut *tx)
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;
        sqlx::query("DELETE FROM users WHERE id <> $1")
            .bind(admin_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;
        db::audit::log(&mut tx, admin_id, "RESET_TOTAL", "system", "Reset de fábrica")
            .await
            .map_err(Status::from)?;

        tx.commit()
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;

        tracing::warn!("System reset by {}", admin.name);
        Ok(Response::new(Empty {}))
    }
}
