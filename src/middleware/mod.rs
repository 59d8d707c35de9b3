pub mod auth;

pub use auth::{current_user, is_admin, require_admin, AuthLayer, AuthenticatedUser};
