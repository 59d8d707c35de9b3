pub mod config;
pub mod consolidate;
pub mod db;
pub mod error;
pub mod http_client;
pub mod middleware;
pub mod models;
pub mod notify;
pub mod proto;
pub mod services;

pub use config::Config;
pub use error::{AppError, AppResult};
