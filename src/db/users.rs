use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::UserModel;

const USER_COLUMNS: &str = "id::text, username, password_hash, name, role, active, \
                            last_login::text, created_at::text";

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> AppResult<Option<UserModel>> {
    let user: Option<UserModel> =
        sqlx::query_as(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)?;
    Ok(user)
}

pub async fn find_by_username(pool: &PgPool, username: &str) -> AppResult<Option<UserModel>> {
    let user: Option<UserModel> = sqlx::query_as(&format!(
        "SELECT {} FROM users WHERE username = $1",
        USER_COLUMNS
    ))
    .bind(username)
    .fetch_optional(pool)
    .await
    .map_err(AppError::Database)?;
    Ok(user)
}

pub async fn update_last_login(pool: &PgPool, id: Uuid) -> AppResult<()> {
    sqlx::query("UPDATE users SET last_login = NOW() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;
    Ok(())
}

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AppError::Internal(format!("password hashing failed: {}", e)))
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    match PasswordHash::new(password_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Seeds the default admin account on an empty database.
pub async fn ensure_admin(pool: &PgPool) -> AppResult<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;
    if count > 0 {
        return Ok(());
    }

    tracing::info!("No users found, creating default admin account");
    let hash = hash_password("admin123")?;
    sqlx::query(
        "INSERT INTO users (username, password_hash, name, role) \
         VALUES ('admin', $1, 'Administrador', 'admin')",
    )
    .bind(&hash)
    .execute(pool)
    .await
    .map_err(AppError::Database)?;
    Ok(())
}
