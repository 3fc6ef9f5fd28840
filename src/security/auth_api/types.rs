use serde::Serialize;
use uuid::Uuid;

use super::error::AuthError;
use crate::core::shared::models::Role;
use crate::security::jwt::SessionClaims;

/// Identity injected into every guarded handler.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    pub company_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
}

impl AuthenticatedUser {
    pub fn from_claims(claims: SessionClaims) -> Result<Self, AuthError> {
        let user_id = claims.user_id().map_err(|_| AuthError::InvalidToken)?;
        if claims.role.is_tenant_bound() && claims.company_id.is_none() {
            return Err(AuthError::InvalidToken);
        }
        Ok(Self {
            user_id,
            email: claims.email,
            role: claims.role,
            company_id: claims.company_id,
            first_name: claims.first_name,
            last_name: claims.last_name,
        })
    }

    pub fn has_role(&self, allowed: &[Role]) -> bool {
        allowed.contains(&self.role)
    }

    pub fn is_super_admin(&self) -> bool {
        self.role == Role::SuperAdmin
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// Names the fixed role set a guarded handler accepts.
pub trait RolePolicy: Send + Sync + 'static {
    const ALLOWED: &'static [Role];
}

pub struct SuperAdminOnly;
impl RolePolicy for SuperAdminOnly {
    const ALLOWED: &'static [Role] = &[Role::SuperAdmin];
}

/// super_admin and customer_admin.
pub struct CompanyManagers;
impl RolePolicy for CompanyManagers {
    const ALLOWED: &'static [Role] = &[Role::SuperAdmin, Role::CustomerAdmin];
}

/// Roles that may open service requests.
pub struct RequestCreators;
impl RolePolicy for RequestCreators {
    const ALLOWED: &'static [Role] = &[Role::SuperAdmin, Role::CustomerAdmin, Role::Customer];
}

/// Roles that may assign service requests.
pub struct RequestAssigners;
impl RolePolicy for RequestAssigners {
    const ALLOWED: &'static [Role] = &[Role::SuperAdmin, Role::CustomerAdmin, Role::Agent];
}

pub struct AnyRole;
impl RolePolicy for AnyRole {
    const ALLOWED: &'static [Role] = &Role::ALL;
}
