pub mod auth;
pub mod error;
pub mod time_format;

pub use auth::{User, UserRole};
pub use error::AppError;
