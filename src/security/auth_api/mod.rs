//! Session verification and role gating for the JSON API.

pub mod error;
pub mod middleware;
#[cfg(test)]
mod tests;
pub mod types;
pub mod utils;

pub use error::AuthError;
pub use middleware::{require_role, RequireRole};
pub use types::{
    AnyRole, AuthenticatedUser, CompanyManagers, RequestAssigners, RequestCreators, RolePolicy,
    SuperAdminOnly,
};
pub use utils::{
    clear_auth_cookie, create_auth_cookie, extract_bearer_token, extract_session_from_cookies,
    extract_token, AUTH_COOKIE,
};
