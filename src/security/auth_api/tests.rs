use super::types::*;
use super::utils::*;
use super::*;
use crate::core::shared::models::Role;
use crate::security::jwt::{SessionManager, SessionPayload};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use uuid::Uuid;

fn headers(pairs: &[(header::HeaderName, &str)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in pairs {
        map.append(name.clone(), HeaderValue::from_str(value).unwrap());
    }
    map
}

#[test]
fn test_bearer_token_extraction() {
    let h = headers(&[(header::AUTHORIZATION, "Bearer abc.def.ghi")]);
    assert_eq!(extract_bearer_token(&h), Some("abc.def.ghi".to_string()));

    let basic = headers(&[(header::AUTHORIZATION, "Basic dXNlcjpwYXNz")]);
    assert_eq!(extract_bearer_token(&basic), None);
}

#[test]
fn test_cookie_extraction() {
    let h = headers(&[(header::COOKIE, "theme=dark; auth_token=tok123; lang=en")]);
    assert_eq!(
        extract_session_from_cookies(&h, AUTH_COOKIE),
        Some("tok123".to_string())
    );
    let empty = headers(&[(header::COOKIE, "auth_token=")]);
    assert_eq!(extract_session_from_cookies(&empty, AUTH_COOKIE), None);
}

#[test]
fn test_bearer_takes_precedence_over_cookie() {
    let h = headers(&[
        (header::COOKIE, "auth_token=from-cookie"),
        (header::AUTHORIZATION, "Bearer from-header"),
    ]);
    assert_eq!(extract_token(&h), Some("from-header".to_string()));
    let cookie_only = headers(&[(header::COOKIE, "auth_token=from-cookie")]);
    assert_eq!(extract_token(&cookie_only), Some("from-cookie".to_string()));
}

#[test]
fn test_auth_cookie_attributes() {
    let cookie = create_auth_cookie("tok", 24, true);
    assert_eq!(cookie.name(), AUTH_COOKIE);
    assert_eq!(cookie.http_only(), Some(true));
    assert_eq!(cookie.secure(), Some(true));
    assert_eq!(cookie.path(), Some("/"));
    assert_eq!(
        cookie.same_site(),
        Some(tower_cookies::cookie::SameSite::Lax)
    );
    assert_eq!(
        cookie.max_age(),
        Some(tower_cookies::cookie::time::Duration::hours(24))
    );
    assert_eq!(create_auth_cookie("tok", 24, false).secure(), Some(false));
}

#[test]
fn test_role_policies() {
    assert_eq!(SuperAdminOnly::ALLOWED, &[Role::SuperAdmin]);
    assert!(CompanyManagers::ALLOWED.contains(&Role::CustomerAdmin));
    assert!(!CompanyManagers::ALLOWED.contains(&Role::Agent));
    assert!(RequestCreators::ALLOWED.contains(&Role::Customer));
    assert!(!RequestCreators::ALLOWED.contains(&Role::Agent));
    assert!(RequestAssigners::ALLOWED.contains(&Role::Agent));
    assert!(!RequestAssigners::ALLOWED.contains(&Role::Customer));
    assert_eq!(AnyRole::ALLOWED.len(), 4);
}

#[test]
fn test_require_role_maps_to_forbidden() {
    let manager = SessionManager::new("unit-test-secret-unit-test-secret-000", 24);
    let token = manager
        .issue(&SessionPayload {
            user_id: Uuid::new_v4(),
            email: "cust@acme.com".into(),
            role: Role::Customer,
            company_id: Some(Uuid::new_v4()),
            first_name: "Cus".into(),
            last_name: "Tomer".into(),
        })
        .unwrap();
    let user = AuthenticatedUser::from_claims(manager.verify(&token).unwrap()).unwrap();

    assert!(require_role(&user, RequestCreators::ALLOWED).is_ok());
    let err = require_role(&user, SuperAdminOnly::ALLOWED).unwrap_err();
    assert_eq!(err, AuthError::InsufficientPermissions);
    assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    assert_eq!(AuthError::MissingToken.status_code(), StatusCode::UNAUTHORIZED);
}

#[test]
fn test_tenant_role_without_company_is_rejected() {
    let manager = SessionManager::new("unit-test-secret-unit-test-secret-000", 24);
    let token = manager
        .issue(&SessionPayload {
            user_id: Uuid::new_v4(),
            email: "orphan@acme.com".into(),
            role: Role::CustomerAdmin,
            company_id: None,
            first_name: "Or".into(),
            last_name: "Phan".into(),
        })
        .unwrap();
    let claims = manager.verify(&token).unwrap();
    assert_eq!(
        AuthenticatedUser::from_claims(claims).unwrap_err(),
        AuthError::InvalidToken
    );
}
