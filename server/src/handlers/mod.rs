pub mod admin;
pub mod attendance;
pub mod auth;
pub mod events;
pub mod health;
pub mod payments;

pub use auth::AuthUser;
pub use health::health_check;
