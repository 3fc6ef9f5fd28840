//! Tenant scoping for service requests.
//!
//! Every read or write of a request goes through a `RequestScope` resolved
//! from the caller's identity. Rows outside the scope are reported as not
//! found, never as forbidden.

use uuid::Uuid;

use crate::core::error::{ApiError, ApiResult};
use crate::core::shared::models::{Role, ServiceRequest};
use crate::core::store::Store;
use crate::security::auth_api::types::AuthenticatedUser;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestScope {
    /// super_admin: every company.
    All,
    /// Serviced companies plus anything assigned directly to the agent.
    Agent {
        user_id: Uuid,
        company_ids: Vec<Uuid>,
    },
    /// customer and customer_admin: their own company only.
    Company(Uuid),
}

impl RequestScope {
    pub fn for_user(store: &dyn Store, user: &AuthenticatedUser) -> ApiResult<Self> {
        match user.role {
            Role::SuperAdmin => Ok(Self::All),
            Role::Agent => {
                let company_ids = store
                    .find_agent_by_user(user.user_id)?
                    .filter(|agent| agent.is_active)
                    .map(|agent| agent.assigned_company_ids)
                    .unwrap_or_default();
                Ok(Self::Agent {
                    user_id: user.user_id,
                    company_ids,
                })
            }
            Role::CustomerAdmin | Role::Customer => user
                .company_id
                .map(Self::Company)
                .ok_or_else(|| ApiError::Forbidden("Account is not linked to a company".into())),
        }
    }

    pub fn permits(&self, request: &ServiceRequest) -> bool {
        match self {
            Self::All => true,
            Self::Agent {
                user_id,
                company_ids,
            } => {
                company_ids.contains(&request.company_id)
                    || request.assigned_to_id == Some(*user_id)
            }
            Self::Company(company_id) => request.company_id == *company_id,
        }
    }

    /// Whether every request of `company_id` is visible, not just assigned ones.
    pub fn covers_company(&self, company_id: Uuid) -> bool {
        match self {
            Self::All => true,
            Self::Agent { company_ids, .. } => company_ids.contains(&company_id),
            Self::Company(own) => *own == company_id,
        }
    }

    /// Loads a request, mapping out-of-scope rows to the same 404 as absent ones.
    pub fn load_request(&self, store: &dyn Store, id: Uuid) -> ApiResult<ServiceRequest> {
        store
            .find_request(id)?
            .filter(|request| self.permits(request))
            .ok_or(ApiError::NotFound("Service request"))
    }
}
