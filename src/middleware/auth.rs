use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use http::header::HeaderValue;
use http::Request as HttpRequest;
use http::Response as HttpResponse;
use http_body_util::combinators::UnsyncBoxBody;
use jsonwebtoken::{DecodingKey, Validation};
use sqlx::PgPool;
use tonic::Status;
use tower::{Layer, Service};

use crate::services::auth_service::Claims;

/// Authenticated user info injected by the auth middleware into request extensions.
#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub name: String,
    pub role: String,
}

/// Role check used everywhere a decision depends on privilege. Roles are
/// stored lowercase but tokens from older deployments may carry "ADMIN".
pub fn is_admin(role: &str) -> bool {
    role.eq_ignore_ascii_case("admin")
}

/// Extracts the authenticated user from a request, failing unless it carries
/// the admin role.
pub fn require_admin<T>(req: &tonic::Request<T>) -> Result<AuthenticatedUser, Status> {
    let user = req
        .extensions()
        .get::<AuthenticatedUser>()
        .cloned()
        .ok_or_else(|| Status::unauthenticated("Missing authentication"))?;
    if !is_admin(&user.role) {
        return Err(Status::permission_denied("Administrator role required"));
    }
    Ok(user)
}

pub fn current_user<T>(req: &tonic::Request<T>) -> Result<AuthenticatedUser, Status> {
    req.extensions()
        .get::<AuthenticatedUser>()
        .cloned()
        .ok_or_else(|| Status::unauthenticated("Missing authentication"))
}

/// Public paths that do not require JWT authentication
const PUBLIC_PATHS: &[&str] = &[
    "/estoque.auth.AuthService/Login",
    "/estoque.auth.AuthService/ValidateToken",
    "/grpc.health.v1.Health/Check",
    "/grpc.health.v1.Health/Watch",
    "/grpc.reflection.v1.ServerReflection/ServerReflectionInfo",
    "/grpc.reflection.v1alpha.ServerReflection/ServerReflectionInfo",
];

#[derive(Clone)]
pub struct AuthLayer {
    pool: PgPool,
    jwt_secret: String,
}

impl AuthLayer {
    pub fn new(pool: PgPool, jwt_secret: String) -> Self {
        Self { pool, jwt_secret }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            pool: self.pool.clone(),
            jwt_secret: self.jwt_secret.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    pool: PgPool,
    jwt_secret: String,
}

type BoxBody = UnsyncBoxBody<bytes::Bytes, Status>;

fn grpc_status_response(status: Status) -> HttpResponse<BoxBody> {
    let code = status.code() as i32;
    let message = status.message().to_string();

    let mut response = HttpResponse::new(UnsyncBoxBody::default());
    response.headers_mut().insert(
        "content-type",
        HeaderValue::from_static("application/grpc"),
    );
    if let Ok(val) = HeaderValue::from_str(&code.to_string()) {
        response.headers_mut().insert("grpc-status", val);
    }
    if !message.is_empty() {
        if let Ok(val) = HeaderValue::from_str(&message) {
            response.headers_mut().insert("grpc-message", val);
        }
    }
    response
}

impl<S, ReqBody> Service<HttpRequest<ReqBody>> for AuthMiddleware<S>
where
    S: Service<HttpRequest<ReqBody>, Response = HttpResponse<BoxBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = HttpResponse<BoxBody>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: HttpRequest<ReqBody>) -> Self::Future {
        let mut inner = self.inner.clone();
        std::mem::swap(&mut self.inner, &mut inner);

        let pool = self.pool.clone();
        let jwt_secret = self.jwt_secret.clone();

        Box::pin(async move {
            let path = req.uri().path().to_string();

            if PUBLIC_PATHS.iter().any(|p| path == *p) {
                return inner.call(req).await;
            }

            let token = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|s| s.to_string());

            let Some(token) = token else {
                return Ok(grpc_status_response(Status::unauthenticated(
                    "Missing authorization token",
                )));
            };

            let claims = match jsonwebtoken::decode::<Claims>(
                &token,
                &DecodingKey::from_secret(jwt_secret.as_bytes()),
                &Validation::default(),
            ) {
                Ok(data) => data.claims,
                Err(e) => {
                    tracing::debug!("Token rejected for {}: {}", path, e);
                    return Ok(grpc_status_response(Status::unauthenticated(
                        "Invalid or expired token",
                    )));
                }
            };

            // Tokens outlive account changes, so check the user still exists
            // and has not been deactivated.
            match verify_active(&pool, &claims.sub).await {
                Ok(true) => {}
                Ok(false) => {
                    return Ok(grpc_status_response(Status::unauthenticated(
                        "Account is inactive",
                    )));
                }
                Err(e) => {
                    tracing::error!("Auth lookup failed: {}", e);
                    return Ok(grpc_status_response(Status::internal(
                        "Authentication check failed",
                    )));
                }
            }

            req.extensions_mut().insert(AuthenticatedUser {
                user_id: claims.sub,
                name: claims.name,
                role: claims.role,
            });

            inner.call(req).await
        })
    }
}

async fn verify_active(pool: &PgPool, user_id: &str) -> Result<bool, sqlx::Error> {
    let active: Option<bool> =
        sqlx::query_scalar("SELECT active FROM users WHERE id = $1::uuid")
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
    Ok(active.unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_check_ignores_case() {
        assert!(is_admin("admin"));
        assert!(is_admin("ADMIN"));
        assert!(is_admin("Admin"));
        assert!(!is_admin("tecnico"));
        assert!(!is_admin(""));
        assert!(!is_admin("administrador"));
    }

    #[test]
    fn login_and_health_are_public() {
        assert!(PUBLIC_PATHS.contains(&"/estoque.auth.AuthService/Login"));
        assert!(PUBLIC_PATHS.contains(&"/grpc.health.v1.Health/Check"));
        assert!(!PUBLIC_PATHS.contains(&"/estoque.items.ItemsService/ListItems"));
    }
}
