//! Customer users, managed by super_admin anywhere and by customer_admin
//! inside their own company.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::codes::{insert_with_unique_code, login_code};
use crate::core::error::{ApiError, ApiResult};
use crate::core::shared::models::{ApiResponse, Role, User};
use crate::core::shared::state::AppState;
use crate::core::store::{Store, UniqueField, UserFilter};
use crate::notifications::{Outcome, WorkflowEvent};
use crate::security::auth_api::{AuthenticatedUser, CompanyManagers, RequireRole};

use super::{new_user, required_name, validated_email};

const CUSTOMER_ROLES: [Role; 2] = [Role::CustomerAdmin, Role::Customer];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
    pub company_id: Option<Uuid>,
    pub role: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserBody {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    pub role: Option<String>,
    pub company_id: Option<Uuid>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserBody {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<bool>,
}

fn customer_role(raw: &str) -> ApiResult<Role> {
    let role: Role = raw.parse().map_err(|e: String| ApiError::field("role", e))?;
    if !role.is_customer_facing() {
        return Err(ApiError::field(
            "role",
            "Role must be customer or customer_admin",
        ));
    }
    Ok(role)
}

/// The company an actor may manage users in.
fn managed_company(actor: &AuthenticatedUser, requested: Option<Uuid>) -> ApiResult<Uuid> {
    match actor.role {
        Role::SuperAdmin => {
            requested.ok_or_else(|| ApiError::field("companyId", "companyId is required"))
        }
        Role::CustomerAdmin => {
            let own = actor
                .company_id
                .ok_or_else(|| ApiError::Forbidden("Account is not linked to a company".into()))?;
            match requested {
                Some(other) if other != own => Err(ApiError::NotFound("Company")),
                _ => Ok(own),
            }
        }
        Role::Agent | Role::Customer => {
            Err(ApiError::Forbidden("Not allowed to manage users".into()))
        }
    }
}

/// Loads a customer user the actor may see; anything else reads as absent.
pub fn load_managed_user(
    store: &dyn Store,
    actor: &AuthenticatedUser,
    id: Uuid,
) -> ApiResult<User> {
    let user = store
        .find_user(id)?
        .filter(|u| u.role.is_customer_facing())
        .ok_or(ApiError::NotFound("User"))?;
    match actor.role {
        Role::SuperAdmin => Ok(user),
        Role::CustomerAdmin if actor.company_id.is_some() && user.company_id == actor.company_id => {
            Ok(user)
        }
        _ => Err(ApiError::NotFound("User")),
    }
}

pub fn list_users(
    store: &dyn Store,
    actor: &AuthenticatedUser,
    query: UserQuery,
) -> ApiResult<Vec<User>> {
    let company_id = match actor.role {
        Role::SuperAdmin => query.company_id,
        _ => Some(managed_company(actor, query.company_id)?),
    };
    let roles = match query.role.as_deref() {
        Some(raw) => vec![customer_role(raw)?],
        None => CUSTOMER_ROLES.to_vec(),
    };
    let filter = UserFilter {
        company_id,
        roles,
        search: query
            .search
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
    };
    Ok(store.list_users(&filter)?)
}

pub fn create_user(
    store: &dyn Store,
    actor: &AuthenticatedUser,
    body: CreateUserBody,
    now: DateTime<Utc>,
) -> ApiResult<Outcome<User>> {
    let first_name = required_name("firstName", &body.first_name)?;
    let last_name = body.last_name.trim().to_string();
    let email = validated_email(&body.email)?;
    let role = match body.role.as_deref() {
        Some(raw) => customer_role(raw)?,
        None => Role::Customer,
    };
    let company_id = managed_company(actor, body.company_id)?;
    if store.find_company(company_id)?.is_none() {
        return Err(ApiError::NotFound("Company"));
    }

    let mut user = new_user(first_name, last_name, email, role, Some(company_id), now);
    insert_with_unique_code(UniqueField::LoginCode, login_code, |code| {
        user.login_code = Some(code.to_string());
        store.insert_user(&user)
    })?;

    Ok(Outcome::new(user.clone()).with_event(WorkflowEvent::UserCreated {
        user,
        actor_id: actor.user_id,
    }))
}

pub fn update_user(
    store: &dyn Store,
    actor: &AuthenticatedUser,
    id: Uuid,
    body: UpdateUserBody,
    now: DateTime<Utc>,
) -> ApiResult<Outcome<User>> {
    let mut user = load_managed_user(store, actor, id)?;
    let is_self = user.id == actor.user_id;
    // the company's primary contact is the user holding the company email
    let primary_of = match user.company_id {
        Some(company_id) => store
            .find_company(company_id)?
            .filter(|company| company.email == user.email),
        None => None,
    };

    if let Some(first) = body.first_name {
        user.first_name = required_name("firstName", &first)?;
    }
    if let Some(last) = body.last_name {
        user.last_name = last.trim().to_string();
    }
    if let Some(email) = body.email {
        user.email = validated_email(&email)?;
    }
    if let Some(raw) = body.role {
        let role = customer_role(&raw)?;
        if is_self && role != user.role {
            return Err(ApiError::validation("You cannot change your own role"));
        }
        user.role = role;
    }
    if let Some(active) = body.is_active {
        if is_self && !active {
            return Err(ApiError::validation("You cannot deactivate your own account"));
        }
        user.is_active = active;
    }
    user.updated_at = now;

    let mut outcome = Outcome::new(user.clone());
    match primary_of {
        Some(mut company) if company.email != user.email => {
            company.email = user.email.clone();
            company.updated_at = now;
            store.update_company_with_user(&company, Some(&user))?;
            outcome = outcome.with_event(WorkflowEvent::CompanyUpdated {
                company,
                actor_id: actor.user_id,
            });
        }
        _ => store.update_user(&user)?,
    }

    Ok(outcome.with_event(WorkflowEvent::UserUpdated {
        user,
        actor_id: actor.user_id,
    }))
}

pub fn delete_user(
    store: &dyn Store,
    actor: &AuthenticatedUser,
    id: Uuid,
) -> ApiResult<Outcome<()>> {
    let user = load_managed_user(store, actor, id)?;
    if user.id == actor.user_id {
        return Err(ApiError::validation("You cannot delete your own account"));
    }
    if store.user_has_authored_records(user.id)? {
        return Err(ApiError::Blocked(
            "User has created requests, notes or attachments; deactivate the account instead"
                .into(),
        ));
    }
    if !store.delete_user(user.id)? {
        return Err(ApiError::NotFound("User"));
    }
    Ok(Outcome::new(()).with_event(WorkflowEvent::UserDeleted {
        user,
        actor_id: actor.user_id,
    }))
}

/// Issues a fresh login code, invalidating the old one.
pub fn regenerate_login_code(
    store: &dyn Store,
    actor: &AuthenticatedUser,
    user: &User,
) -> ApiResult<Outcome<User>> {
    insert_with_unique_code(UniqueField::LoginCode, login_code, |code| {
        store.update_login_code(user.id, code)
    })?;
    let user = store.find_user(user.id)?.ok_or(ApiError::NotFound("User"))?;
    Ok(Outcome::new(user.clone()).with_event(WorkflowEvent::LoginCodeIssued {
        user,
        actor_id: actor.user_id,
    }))
}

pub async fn list_users_handler(
    State(state): State<Arc<AppState>>,
    user: RequireRole<CompanyManagers>,
    Query(query): Query<UserQuery>,
) -> ApiResult<Json<ApiResponse<Vec<User>>>> {
    let users = list_users(state.store.as_ref(), &user, query)?;
    Ok(Json(ApiResponse::ok(users)))
}

pub async fn get_user_handler(
    State(state): State<Arc<AppState>>,
    user: RequireRole<CompanyManagers>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<User>>> {
    let found = load_managed_user(state.store.as_ref(), &user, id)?;
    Ok(Json(ApiResponse::ok(found)))
}

pub async fn create_user_handler(
    State(state): State<Arc<AppState>>,
    user: RequireRole<CompanyManagers>,
    Json(body): Json<CreateUserBody>,
) -> ApiResult<(StatusCode, Json<ApiResponse<User>>)> {
    let outcome = create_user(state.store.as_ref(), &user, body, Utc::now())?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(state.dispatcher.complete(outcome)).with_message("User created")),
    ))
}

pub async fn update_user_handler(
    State(state): State<Arc<AppState>>,
    user: RequireRole<CompanyManagers>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateUserBody>,
) -> ApiResult<Json<ApiResponse<User>>> {
    let outcome = update_user(state.store.as_ref(), &user, id, body, Utc::now())?;
    Ok(Json(
        ApiResponse::ok(state.dispatcher.complete(outcome)).with_message("User updated"),
    ))
}

pub async fn delete_user_handler(
    State(state): State<Arc<AppState>>,
    user: RequireRole<CompanyManagers>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Uuid>>> {
    let outcome = delete_user(state.store.as_ref(), &user, id)?;
    state.dispatcher.complete(outcome);
    Ok(Json(ApiResponse::ok(id).with_message("User deleted")))
}

pub async fn regenerate_login_code_handler(
    State(state): State<Arc<AppState>>,
    user: RequireRole<CompanyManagers>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<User>>> {
    let store = state.store.as_ref();
    let target = load_managed_user(store, &user, id)?;
    let outcome = regenerate_login_code(store, &user, &target)?;
    Ok(Json(
        ApiResponse::ok(state.dispatcher.complete(outcome))
            .with_message("Login code regenerated"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::MemoryStore;
    use crate::directory::fixtures::{company_with_admin, identity, super_admin};

    fn body(email: &str, company_id: Option<Uuid>) -> CreateUserBody {
        CreateUserBody {
            first_name: "Pat".into(),
            last_name: "Lee".into(),
            email: email.into(),
            role: None,
            company_id,
        }
    }

    #[test]
    fn test_customer_admin_creates_in_own_company_only() {
        let store = MemoryStore::new();
        let (acme, admin) = company_with_admin(&store, "Acme", "ACME234");
        let (globex, _) = company_with_admin(&store, "Globex", "GLBX234");
        let actor = identity(&admin);

        let created = create_user(&store, &actor, body("pat@acme.com", None), Utc::now())
            .unwrap()
            .value;
        assert_eq!(created.company_id, Some(acme.id));
        assert_eq!(created.role, Role::Customer);
        assert!(created.login_code.is_some());

        let err = create_user(
            &store,
            &actor,
            body("kim@globex.com", Some(globex.id)),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::NotFound("Company")));
    }

    #[test]
    fn test_super_admin_must_name_company_and_cannot_create_agents_here() {
        let store = MemoryStore::new();
        let (acme, _) = company_with_admin(&store, "Acme", "ACME234");
        let root = identity(&super_admin(&store));

        assert!(matches!(
            create_user(&store, &root, body("pat@acme.com", None), Utc::now()),
            Err(ApiError::Validation { .. })
        ));

        let mut as_agent = body("pat@acme.com", Some(acme.id));
        as_agent.role = Some("agent".into());
        assert!(matches!(
            create_user(&store, &root, as_agent, Utc::now()),
            Err(ApiError::Validation { .. })
        ));
    }

    #[test]
    fn test_users_of_other_companies_read_as_missing() {
        let store = MemoryStore::new();
        let (_, admin) = company_with_admin(&store, "Acme", "ACME234");
        let (_, other_admin) = company_with_admin(&store, "Globex", "GLBX234");

        assert!(matches!(
            load_managed_user(&store, &identity(&admin), other_admin.id),
            Err(ApiError::NotFound("User"))
        ));
        let listed = list_users(&store, &identity(&admin), UserQuery::default()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, admin.id);
    }

    #[test]
    fn test_self_delete_refused_and_others_deleted() {
        let store = MemoryStore::new();
        let (_, admin) = company_with_admin(&store, "Acme", "ACME234");
        let actor = identity(&admin);

        assert!(matches!(
            delete_user(&store, &actor, admin.id),
            Err(ApiError::Validation { .. })
        ));

        let pat = create_user(&store, &actor, body("pat@acme.com", None), Utc::now())
            .unwrap()
            .value;
        let outcome = delete_user(&store, &actor, pat.id).unwrap();
        assert!(matches!(
            outcome.events.as_slice(),
            [WorkflowEvent::UserDeleted { .. }]
        ));
        assert!(store.find_user(pat.id).unwrap().is_none());
    }

    #[test]
    fn test_cannot_deactivate_self() {
        let store = MemoryStore::new();
        let (_, admin) = company_with_admin(&store, "Acme", "ACME234");
        let update = UpdateUserBody {
            is_active: Some(false),
            ..Default::default()
        };
        assert!(update_user(&store, &identity(&admin), admin.id, update, Utc::now()).is_err());
    }

    #[test]
    fn test_primary_contact_email_change_moves_company_email() {
        let store = MemoryStore::new();
        let (acme, admin) = company_with_admin(&store, "Acme", "ACME234");
        let update = UpdateUserBody {
            email: Some("Dana@Acme.com".into()),
            ..Default::default()
        };

        let outcome = update_user(&store, &identity(&admin), admin.id, update, Utc::now()).unwrap();
        assert_eq!(outcome.value.email, "dana@acme.com");
        assert!(matches!(
            outcome.events.as_slice(),
            [WorkflowEvent::CompanyUpdated { .. }, WorkflowEvent::UserUpdated { .. }]
        ));
        let company = store.find_company(acme.id).unwrap().unwrap();
        assert_eq!(company.email, "dana@acme.com");
        assert_eq!(
            store.find_user_by_email("dana@acme.com").unwrap().map(|u| u.id),
            Some(admin.id)
        );
    }

    #[test]
    fn test_other_users_email_change_leaves_company_alone() {
        let store = MemoryStore::new();
        let (acme, admin) = company_with_admin(&store, "Acme", "ACME234");
        let actor = identity(&admin);
        let pat = create_user(&store, &actor, body("pat@acme.com", None), Utc::now())
            .unwrap()
            .value;
        let update = UpdateUserBody {
            email: Some("patricia@acme.com".into()),
            ..Default::default()
        };

        let outcome = update_user(&store, &actor, pat.id, update, Utc::now()).unwrap();
        assert!(matches!(
            outcome.events.as_slice(),
            [WorkflowEvent::UserUpdated { .. }]
        ));
        assert_eq!(store.find_company(acme.id).unwrap().unwrap().email, "ops@acme.com");
    }

    #[test]
    fn test_regenerated_code_replaces_old_one() {
        let store = MemoryStore::new();
        let (_, admin) = company_with_admin(&store, "Acme", "ACME234");
        let actor = identity(&admin);
        let pat = create_user(&store, &actor, body("pat@acme.com", None), Utc::now())
            .unwrap()
            .value;
        let old = pat.login_code.clone().unwrap();

        let refreshed = regenerate_login_code(&store, &actor, &pat).unwrap().value;
        let new = refreshed.login_code.clone().unwrap();
        assert_ne!(old, new);
        assert!(store.find_user_by_login_code(&old).unwrap().is_none());
        assert_eq!(
            store.find_user_by_login_code(&new).unwrap().map(|u| u.id),
            Some(pat.id)
        );
    }
}
