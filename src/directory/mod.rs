//! Tenant directory: companies, their customer users, and agents.

pub mod agents;
pub mod companies;
pub mod router;
pub mod users;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::core::error::{ApiError, ApiResult};
use crate::core::shared::models::{Role, User};
use crate::core::shared::utils::{is_valid_email, normalize_email};

pub use router::configure_directory_routes;

pub const MAX_NAME_LEN: usize = 120;

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub search: Option<String>,
}

impl SearchQuery {
    pub fn term(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

pub(crate) fn required_name(field: &str, value: &str) -> ApiResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::field(field, format!("{field} is required")));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(ApiError::field(
            field,
            format!("{field} must be at most {MAX_NAME_LEN} characters"),
        ));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn validated_email(value: &str) -> ApiResult<String> {
    let email = normalize_email(value);
    if !is_valid_email(&email) {
        return Err(ApiError::field("email", "Invalid email address"));
    }
    Ok(email)
}

/// Splits "Jane van Dyke" into ("Jane", "van Dyke").
pub(crate) fn split_contact_name(contact: &str) -> (String, String) {
    let contact = contact.trim();
    match contact.split_once(char::is_whitespace) {
        Some((first, rest)) => (first.to_string(), rest.trim().to_string()),
        None => (contact.to_string(), String::new()),
    }
}

/// A fresh active user; the login code is filled in by the insert loop.
pub(crate) fn new_user(
    first_name: String,
    last_name: String,
    email: String,
    role: Role,
    company_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> User {
    User {
        id: Uuid::new_v4(),
        first_name,
        last_name,
        email,
        login_code: None,
        password_hash: None,
        role,
        company_id,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::Utc;
    use uuid::Uuid;

    use crate::core::shared::models::{Company, Role, User};
    use crate::core::store::{MemoryStore, Store};
    use crate::security::auth_api::AuthenticatedUser;

    pub fn identity(user: &User) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: user.id,
            email: user.email.clone(),
            role: user.role,
            company_id: user.company_id,
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
        }
    }

    pub fn super_admin(store: &MemoryStore) -> User {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            first_name: "Root".into(),
            last_name: "Admin".into(),
            email: "root@desk.io".into(),
            login_code: None,
            password_hash: None,
            role: Role::SuperAdmin,
            company_id: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        store.insert_user(&user).unwrap();
        user
    }

    pub fn company_with_admin(store: &MemoryStore, name: &str, code: &str) -> (Company, User) {
        let now = Utc::now();
        let domain = name.to_lowercase();
        let company = Company {
            id: Uuid::new_v4(),
            company_name: name.into(),
            company_code: code.into(),
            primary_contact: "Dana Whit".into(),
            phone: None,
            email: format!("ops@{domain}.com"),
            created_at: now,
            updated_at: now,
        };
        let admin = User {
            id: Uuid::new_v4(),
            first_name: "Dana".into(),
            last_name: "Whit".into(),
            email: company.email.clone(),
            login_code: Some(format!("{code}Z")),
            password_hash: None,
            role: Role::CustomerAdmin,
            company_id: Some(company.id),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        store.insert_company_with_user(&company, &admin).unwrap();
        (company, admin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_contact_name() {
        assert_eq!(
            split_contact_name(" Jane van Dyke "),
            ("Jane".to_string(), "van Dyke".to_string())
        );
        assert_eq!(
            split_contact_name("Cher"),
            ("Cher".to_string(), String::new())
        );
    }

    #[test]
    fn test_email_is_normalized_and_checked() {
        assert_eq!(validated_email(" Ops@Acme.COM ").unwrap(), "ops@acme.com");
        assert!(validated_email("not-an-email").is_err());
    }
}
