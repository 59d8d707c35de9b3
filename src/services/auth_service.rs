use chrono::Utc;
use jsonwebtoken::{encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tonic::{Request, Response, Status};

use crate::db;
use crate::proto::auth::auth_service_server::AuthService;
use crate::proto::auth::{
    AuthResponse, LoginRequest, ValidateTokenRequest, ValidateTokenResponse,
};

/// Default passwords that force a change prompt on login.
const DEFAULT_PASSWORDS: &[&str] = &["admin123", "mudar123"];

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub name: String,
    pub role: String,
    pub exp: i64,
    pub iat: i64,
}

pub struct AuthServiceImpl {
    pool: PgPool,
    jwt_secret: String,
}

impl AuthServiceImpl {
    pub fn new(pool: PgPool, jwt_secret: String) -> Self {
        Self { pool, jwt_secret }
    }

    fn issue_jwt(
        &self,
        user_id: &str,
        name: &str,
        role: &str,
    ) -> Result<(String, chrono::DateTime<Utc>), Status> {
        let now = Utc::now();
        let exp = now + chrono::Duration::hours(24);
        let claims = Claims {
            sub: user_id.to_string(),
            name: name.to_string(),
            role: role.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| Status::internal(format!("JWT error: {}", e)))?;
        Ok((token, exp))
    }
}

#[tonic::async_trait]
impl AuthService for AuthServiceImpl {
    async fn login(
        &self,
        request: Request<LoginRequest>,
    ) -> Result<Response<AuthResponse>, Status> {
        let req = request.into_inner();
        let username = req.username.trim().to_lowercase();

        let user = db::users::find_by_username(&self.pool, &username)
            .await
            .map_err(Status::from)?
            .ok_or_else(|| Status::unauthenticated("Invalid credentials"))?;

        if !user.active {
            return Err(Status::permission_denied("Account is inactive"));
        }

        if !db::users::verify_password(&req.password, &user.password_hash) {
            tracing::warn!("Failed login attempt for {}", username);
            return Err(Status::unauthenticated("Invalid credentials"));
        }

        let user_id = db::parse_uuid(&user.id).map_err(Status::from)?;
        db::users::update_last_login(&self.pool, user_id)
            .await
            .map_err(Status::from)?;

        let (token, exp) = self.issue_jwt(&user.id, &user.name, &user.role)?;
        let must_change_password = DEFAULT_PASSWORDS.contains(&req.password.as_str());

        tracing::info!("User {} logged in", username);

        Ok(Response::new(AuthResponse {
            token,
            expires_at: exp.to_rfc3339(),
            user_id: user.id,
            name: user.name,
            role: user.role,
            must_change_password,
        }))
    }

    async fn validate_token(
        &self,
        request: Request<ValidateTokenRequest>,
    ) -> Result<Response<ValidateTokenResponse>, Status> {
        let req = request.into_inner();

        let claims = jsonwebtoken::decode::<Claims>(
            &req.token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims);

        let response = match claims {
            Ok(claims) => ValidateTokenResponse {
                valid: true,
                user_id: claims.sub,
                role: claims.role,
            },
            Err(_) => ValidateTokenResponse {
                valid: false,
                user_id: String::new(),
                role: String::new(),
            },
        };

        Ok(Response::new(response))
    }
}
