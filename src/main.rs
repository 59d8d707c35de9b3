use std::net::SocketAddr;

use rust_estoque::config::Config;
use rust_estoque::db::{self, create_pool};
use rust_estoque::middleware::AuthLayer;
use rust_estoque::notify::Notifier;
use rust_estoque::proto::admin::admin_service_server::AdminServiceServer;
use rust_estoque::proto::auth::auth_service_server::AuthServiceServer;
use rust_estoque::proto::health::health_server::HealthServer;
use rust_estoque::proto::importer::import_service_server::ImportServiceServer;
use rust_estoque::proto::items::items_service_server::ItemsServiceServer;
use rust_estoque::proto::requests::requests_service_server::RequestsServiceServer;
use rust_estoque::services::{
    AdminServiceImpl, AuthServiceImpl, HealthServiceImpl, ImportServiceImpl, ItemsServiceImpl,
    RequestsServiceImpl,
};

use tonic::transport::Server;
use tonic_reflection::server::Builder as ReflectionBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Include file descriptor for gRPC reflection
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("estoque_descriptor");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_estoque=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env().expect("Failed to load configuration");

    tracing::info!("Starting rust-estoque gRPC server...");
    tracing::info!("Connecting to database...");

    // Create database pool and bring the schema up to date
    let pool = create_pool(&config.database_url).await?;
    sqlx::migrate!().run(&pool).await?;
    db::users::ensure_admin(&pool).await?;
    tracing::info!("Database connection established");

    let notifier = Notifier::new(config.webhook_url.clone());
    if config.webhook_url.is_some() {
        tracing::info!("Webhook notifications enabled");
    } else {
        tracing::info!("Webhook notifications disabled (WEBHOOK_URL not set)");
    }

    // Create services
    let auth_service = AuthServiceImpl::new(pool.clone(), config.jwt_secret.clone());
    let items_service = ItemsServiceImpl::new(pool.clone(), notifier.clone());
    let requests_service = RequestsServiceImpl::new(pool.clone(), notifier.clone());
    let import_service = ImportServiceImpl::new(pool.clone());
    let admin_service = AdminServiceImpl::new(pool.clone());
    let health_service = HealthServiceImpl::new();

    // CORS layer for gRPC-Web
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods(Any)
        .expose_headers(Any);

    // Build reflection service
    let reflection_service = ReflectionBuilder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    // Parse server address
    let addr: SocketAddr = config.server_addr().parse()?;
    tracing::info!("Listening on {}", addr);

    // Build and run server with gRPC-Web support
    Server::builder()
        .accept_http1(true) // Required for gRPC-Web
        .layer(cors)
        .layer(tonic_web::GrpcWebLayer::new()) // Enable gRPC-Web
        .layer(AuthLayer::new(pool.clone(), config.jwt_secret.clone()))
        .add_service(reflection_service)
        .add_service(AuthServiceServer::new(auth_service))
        .add_service(ItemsServiceServer::new(items_service))
        .add_service(RequestsServiceServer::new(requests_service))
        .add_service(ImportServiceServer::new(import_service))
        .add_service(AdminServiceServer::new(admin_service))
        .add_service(HealthServer::new(health_service))
        .serve(addr)
        .await?;

    Ok(())
}
