pub mod auth_api;
pub mod cors;
pub mod jwt;
pub mod password;

pub use auth_api::{AuthError, AuthenticatedUser, RequireRole};
pub use cors::create_cors_layer;
pub use jwt::{SessionClaims, SessionManager, SessionPayload};
pub use password::{hash_password, verify_password};
