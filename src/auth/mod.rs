//! Sign-in endpoints.
//!
//! Customers and agents sign in with a login code, or with their company
//! code plus email. Only super_admin accounts carry a password.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_cookies::Cookies;
use tracing::{info, warn};

use crate::core::error::{ApiError, ApiResult};
use crate::core::shared::models::{ApiResponse, Role, User};
use crate::core::shared::state::AppState;
use crate::core::shared::utils::normalize_email;
use crate::core::store::Store;
use crate::security::auth_api::{
    clear_auth_cookie, create_auth_cookie, AuthError, AuthenticatedUser,
};
use crate::security::jwt::SessionPayload;
use crate::security::password::verify_password;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeLoginRequest {
    #[serde(default)]
    pub login_code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyLoginRequest {
    #[serde(default)]
    pub company_code: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct AdminLoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
    pub expires_in: i64,
    pub user: AuthenticatedUser,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
    pub message: String,
}

fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Inactive users, and agents whose agent record is inactive, cannot sign in.
fn ensure_active(store: &dyn Store, user: &User) -> ApiResult<()> {
    if !user.is_active {
        return Err(AuthError::AccountDisabled.into());
    }
    if user.role == Role::Agent {
        let active = store
            .find_agent_by_user(user.id)?
            .is_some_and(|agent| agent.is_active);
        if !active {
            return Err(AuthError::AccountDisabled.into());
        }
    }
    Ok(())
}

pub fn authenticate_login_code(store: &dyn Store, code: &str) -> ApiResult<User> {
    let code = normalize_code(code);
    if code.is_empty() {
        return Err(ApiError::field("loginCode", "loginCode is required"));
    }
    let user = store
        .find_user_by_login_code(&code)?
        .filter(|u| u.role != Role::SuperAdmin)
        .ok_or(AuthError::InvalidCredentials)?;
    ensure_active(store, &user)?;
    Ok(user)
}

pub fn authenticate_company_member(
    store: &dyn Store,
    company_code: &str,
    email: &str,
) -> ApiResult<User> {
    let code = normalize_code(company_code);
    let email = normalize_email(email);
    if code.is_empty() || email.is_empty() {
        return Err(ApiError::validation("companyCode and email are required"));
    }
    let company = store
        .find_company_by_code(&code)?
        .ok_or(AuthError::InvalidCredentials)?;
    let user = store
        .find_user_by_email(&email)?
        .filter(|u| u.company_id == Some(company.id))
        .ok_or(AuthError::InvalidCredentials)?;
    ensure_active(store, &user)?;
    Ok(user)
}

/// The super_admin whose stored hash matches. Argon2 runs on the blocking
/// pool.
pub async fn authenticate_admin(store: &dyn Store, email: &str, password: &str) -> ApiResult<User> {
    let email = normalize_email(email);
    if email.is_empty() || password.is_empty() {
        return Err(ApiError::validation("email and password are required"));
    }
    let user = store
        .find_user_by_email(&email)?
        .filter(|u| u.role == Role::SuperAdmin)
        .ok_or(AuthError::InvalidCredentials)?;
    let hash = user
        .password_hash
        .clone()
        .ok_or(AuthError::InvalidCredentials)?;
    let password = password.to_string();
    let matches = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(ApiError::internal)?
        .map_err(ApiError::internal)?;
    if !matches {
        return Err(AuthError::InvalidCredentials.into());
    }
    ensure_active(store, &user)?;
    Ok(user)
}

fn start_session(state: &AppState, cookies: &Cookies, user: &User) -> ApiResult<LoginResponse> {
    let payload = SessionPayload::from(user);
    let token = state.sessions.issue(&payload).map_err(ApiError::internal)?;
    let ttl_hours = state.sessions.ttl_hours();
    cookies.add(create_auth_cookie(&token, ttl_hours, state.secure_cookies()));
    info!("Signed in {} ({})", user.email, user.role);
    Ok(LoginResponse {
        success: true,
        token,
        expires_in: ttl_hours * 3600,
        user: AuthenticatedUser {
            user_id: payload.user_id,
            email: payload.email,
            role: payload.role,
            company_id: payload.company_id,
            first_name: payload.first_name,
            last_name: payload.last_name,
        },
    })
}

fn log_failure<T>(kind: &str, result: ApiResult<T>) -> ApiResult<T> {
    if let Err(err) = &result {
        warn!("{kind} login rejected: {err}");
    }
    result
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Json(req): Json<CodeLoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let user = log_failure(
        "Login code",
        authenticate_login_code(state.store.as_ref(), &req.login_code),
    )?;
    Ok(Json(start_session(&state, &cookies, &user)?))
}

pub async fn company_login(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Json(req): Json<CompanyLoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let user = log_failure(
        "Company code",
        authenticate_company_member(state.store.as_ref(), &req.company_code, &req.email),
    )?;
    Ok(Json(start_session(&state, &cookies, &user)?))
}

pub async fn admin_login(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Json(req): Json<AdminLoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let user = log_failure(
        "Admin",
        authenticate_admin(state.store.as_ref(), &req.email, &req.password).await,
    )?;
    Ok(Json(start_session(&state, &cookies, &user)?))
}

pub async fn logout(State(state): State<Arc<AppState>>, cookies: Cookies) -> Json<LogoutResponse> {
    cookies.add(clear_auth_cookie(state.secure_cookies()));
    Json(LogoutResponse {
        success: true,
        message: "Logged out successfully".to_string(),
    })
}

pub async fn get_current_user(user: AuthenticatedUser) -> Json<ApiResponse<AuthenticatedUser>> {
    Json(ApiResponse::ok(user))
}

pub fn configure_auth_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/company-login", post(company_login))
        .route("/api/auth/admin-login", post(admin_login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(get_current_user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared::models::{Agent, Company};
    use crate::core::store::MemoryStore;
    use crate::security::password::hash_password;
    use chrono::Utc;
    use uuid::Uuid;

    fn user(email: &str, role: Role, company_id: Option<Uuid>, code: Option<&str>) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            first_name: "Sam".into(),
            last_name: "Park".into(),
            email: email.into(),
            login_code: code.map(str::to_string),
            password_hash: None,
            role,
            company_id,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn seeded() -> (MemoryStore, Company, User) {
        let store = MemoryStore::new();
        let now = Utc::now();
        let company = Company {
            id: Uuid::new_v4(),
            company_name: "Acme".into(),
            company_code: "ACME234".into(),
            primary_contact: "Sam Park".into(),
            phone: None,
            email: "sam@acme.com".into(),
            created_at: now,
            updated_at: now,
        };
        let admin = user(
            "sam@acme.com",
            Role::CustomerAdmin,
            Some(company.id),
            Some("SAMP2345"),
        );
        store.insert_company_with_user(&company, &admin).unwrap();
        (store, company, admin)
    }

    #[test]
    fn test_login_code_is_case_insensitive() {
        let (store, _, admin) = seeded();
        let found = authenticate_login_code(&store, " samp2345 ").unwrap();
        assert_eq!(found.id, admin.id);
        assert!(matches!(
            authenticate_login_code(&store, "NOPE2345"),
            Err(ApiError::Auth(AuthError::InvalidCredentials))
        ));
    }

    #[test]
    fn test_inactive_user_is_rejected() {
        let (store, _, mut admin) = seeded();
        admin.is_active = false;
        store.update_user(&admin).unwrap();
        let err = authenticate_login_code(&store, "SAMP2345").unwrap_err();
        assert!(matches!(err, ApiError::Auth(AuthError::AccountDisabled)));
        assert_eq!(err.status_code(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_inactive_agent_record_is_rejected() {
        let (store, _, _) = seeded();
        let agent_user = user("alex@desk.io", Role::Agent, None, Some("AGNT2345"));
        let now = Utc::now();
        let agent = Agent {
            id: Uuid::new_v4(),
            user_id: agent_user.id,
            assigned_company_ids: Vec::new(),
            is_active: false,
            created_at: now,
            updated_at: now,
        };
        store.insert_agent_with_user(&agent, &agent_user).unwrap();
        assert!(matches!(
            authenticate_login_code(&store, "AGNT2345"),
            Err(ApiError::Auth(AuthError::AccountDisabled))
        ));
    }

    #[test]
    fn test_company_login_requires_membership() {
        let (store, _, admin) = seeded();
        let found = authenticate_company_member(&store, "acme234", "SAM@acme.com").unwrap();
        assert_eq!(found.id, admin.id);

        let outsider = user("kim@else.com", Role::SuperAdmin, None, None);
        store.insert_user(&outsider).unwrap();
        assert!(matches!(
            authenticate_company_member(&store, "ACME234", "kim@else.com"),
            Err(ApiError::Auth(AuthError::InvalidCredentials))
        ));
    }

    #[tokio::test]
    async fn test_admin_login_checks_password() {
        let store = MemoryStore::new();
        let mut root = user("root@desk.io", Role::SuperAdmin, None, None);
        root.password_hash = Some(hash_password("correct horse 42").unwrap());
        store.insert_user(&root).unwrap();

        let found = authenticate_admin(&store, "Root@Desk.io", "correct horse 42")
            .await
            .unwrap();
        assert_eq!(found.id, root.id);
        assert!(matches!(
            authenticate_admin(&store, "root@desk.io", "wrong password 1").await,
            Err(ApiError::Auth(AuthError::InvalidCredentials))
        ));
    }

    #[test]
    fn test_super_admin_cannot_use_login_code() {
        let store = MemoryStore::new();
        let root = user("root@desk.io", Role::SuperAdmin, None, Some("ROOT2345"));
        store.insert_user(&root).unwrap();
        assert!(authenticate_login_code(&store, "ROOT2345").is_err());
    }
}
