pub mod admin_service;
pub mod auth_service;
pub mod health_service;
pub mod import_service;
pub mod items_service;
pub mod requests_service;

pub use admin_service::AdminServiceImpl;
pub use auth_service::AuthServiceImpl;
pub use health_service::HealthServiceImpl;
pub use import_service::ImportServiceImpl;
pub use items_service::ItemsServiceImpl;
pub use requests_service::RequestsServiceImpl;
