use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::codes::{insert_with_unique_code, login_code};
use crate::core::error::{ApiError, ApiResult};
use crate::core::shared::models::{Agent, ApiResponse, Role, User};
use crate::core::shared::state::AppState;
use crate::core::store::{Store, UniqueField};
use crate::notifications::{Outcome, WorkflowEvent};
use crate::security::auth_api::{AuthenticatedUser, RequireRole, SuperAdminOnly};

use super::{new_user, required_name, validated_email};

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgentBody {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub assigned_company_ids: Vec<Uuid>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAgentBody {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub assigned_company_ids: Option<Vec<Uuid>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentProfile {
    #[serde(flatten)]
    pub agent: Agent,
    pub user: User,
}

/// Deduplicates the list and checks every company exists.
fn company_assignments(store: &dyn Store, ids: Vec<Uuid>) -> ApiResult<Vec<Uuid>> {
    let mut unique = Vec::with_capacity(ids.len());
    for id in ids {
        if unique.contains(&id) {
            continue;
        }
        if store.find_company(id)?.is_none() {
            return Err(ApiError::field(
                "assignedCompanyIds",
                format!("Company {id} does not exist"),
            ));
        }
        unique.push(id);
    }
    Ok(unique)
}

fn load_profile(store: &dyn Store, id: Uuid) -> ApiResult<AgentProfile> {
    let agent = store.find_agent(id)?.ok_or(ApiError::NotFound("Agent"))?;
    let user = store
        .find_user(agent.user_id)?
        .ok_or(ApiError::NotFound("Agent"))?;
    Ok(AgentProfile { agent, user })
}

pub fn create_agent(
    store: &dyn Store,
    actor: &AuthenticatedUser,
    body: CreateAgentBody,
    now: DateTime<Utc>,
) -> ApiResult<Outcome<AgentProfile>> {
    let first_name = required_name("firstName", &body.first_name)?;
    let last_name = body.last_name.trim().to_string();
    let email = validated_email(&body.email)?;
    let assigned_company_ids = company_assignments(store, body.assigned_company_ids)?;

    let mut user = new_user(first_name, last_name, email, Role::Agent, None, now);
    let agent = Agent {
        id: Uuid::new_v4(),
        user_id: user.id,
        assigned_company_ids,
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    insert_with_unique_code(UniqueField::LoginCode, login_code, |code| {
        user.login_code = Some(code.to_string());
        store.insert_agent_with_user(&agent, &user)
    })?;

    Ok(Outcome::new(AgentProfile {
        agent,
        user: user.clone(),
    })
    .with_event(WorkflowEvent::AgentCreated {
        user,
        actor_id: actor.user_id,
    }))
}

pub fn update_agent(
    store: &dyn Store,
    actor: &AuthenticatedUser,
    id: Uuid,
    body: UpdateAgentBody,
    now: DateTime<Utc>,
) -> ApiResult<Outcome<AgentProfile>> {
    let AgentProfile {
        mut agent,
        mut user,
    } = load_profile(store, id)?;

    if let Some(first) = body.first_name {
        user.first_name = required_name("firstName", &first)?;
    }
    if let Some(last) = body.last_name {
        user.last_name = last.trim().to_string();
    }
    if let Some(email) = body.email {
        user.email = validated_email(&email)?;
    }
    if let Some(ids) = body.assigned_company_ids {
        agent.assigned_company_ids = company_assignments(store, ids)?;
    }
    if let Some(active) = body.is_active {
        agent.is_active = active;
    }
    agent.updated_at = now;
    user.updated_at = now;
    store.update_agent_with_user(&agent, &user)?;

    Ok(Outcome::new(AgentProfile {
        agent,
        user: user.clone(),
    })
    .with_event(WorkflowEvent::AgentUpdated {
        user,
        actor_id: actor.user_id,
    }))
}

/// Open assignments are released first; agents who wrote notes or
/// attachments must be deactivated instead.
pub fn delete_agent(
    store: &dyn Store,
    actor: &AuthenticatedUser,
    id: Uuid,
) -> ApiResult<Outcome<()>> {
    let AgentProfile { agent, user } = load_profile(store, id)?;
    if store.user_has_authored_records(user.id)? {
        return Err(ApiError::Blocked(
            "Agent has written notes or attachments; deactivate the agent instead".into(),
        ));
    }
    if !store.delete_agent(agent.id)? {
        return Err(ApiError::NotFound("Agent"));
    }
    Ok(Outcome::new(()).with_event(WorkflowEvent::AgentDeleted {
        user,
        actor_id: actor.user_id,
    }))
}

pub async fn list_agents(
    State(state): State<Arc<AppState>>,
    _user: RequireRole<SuperAdminOnly>,
) -> ApiResult<Json<ApiResponse<Vec<AgentProfile>>>> {
    let agents = state
        .store
        .list_agents()?
        .into_iter()
        .map(|(agent, user)| AgentProfile { agent, user })
        .collect();
    Ok(Json(ApiResponse::ok(agents)))
}

pub async fn get_agent(
    State(state): State<Arc<AppState>>,
    _user: RequireRole<SuperAdminOnly>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<AgentProfile>>> {
    Ok(Json(ApiResponse::ok(load_profile(state.store.as_ref(), id)?)))
}

pub async fn create_agent_handler(
    State(state): State<Arc<AppState>>,
    user: RequireRole<SuperAdminOnly>,
    Json(body): Json<CreateAgentBody>,
) -> ApiResult<(StatusCode, Json<ApiResponse<AgentProfile>>)> {
    let outcome = create_agent(state.store.as_ref(), &user, body, Utc::now())?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(state.dispatcher.complete(outcome)).with_message("Agent created")),
    ))
}

pub async fn update_agent_handler(
    State(state): State<Arc<AppState>>,
    user: RequireRole<SuperAdminOnly>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateAgentBody>,
) -> ApiResult<Json<ApiResponse<AgentProfile>>> {
    let outcome = update_agent(state.store.as_ref(), &user, id, body, Utc::now())?;
    Ok(Json(
        ApiResponse::ok(state.dispatcher.complete(outcome)).with_message("Agent updated"),
    ))
}

pub async fn delete_agent_handler(
    State(state): State<Arc<AppState>>,
    user: RequireRole<SuperAdminOnly>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Uuid>>> {
    let outcome = delete_agent(state.store.as_ref(), &user, id)?;
    state.dispatcher.complete(outcome);
    Ok(Json(ApiResponse::ok(id).with_message("Agent deleted")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared::models::{RequestCategory, ServiceRequest, TaskStatus};
    use crate::core::store::MemoryStore;
    use crate::directory::fixtures::{company_with_admin, identity, super_admin};

    fn body(email: &str, companies: Vec<Uuid>) -> CreateAgentBody {
        CreateAgentBody {
            first_name: "Alex".into(),
            last_name: "Morgan".into(),
            email: email.into(),
            assigned_company_ids: companies,
        }
    }

    #[test]
    fn test_create_requires_existing_companies() {
        let store = MemoryStore::new();
        let root = identity(&super_admin(&store));
        let (acme, _) = company_with_admin(&store, "Acme", "ACME234");

        let err = create_agent(
            &store,
            &root,
            body("alex@desk.io", vec![acme.id, Uuid::new_v4()]),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation { .. }));
        assert!(store.list_agents().unwrap().is_empty());

        let profile = create_agent(
            &store,
            &root,
            body("alex@desk.io", vec![acme.id, acme.id]),
            Utc::now(),
        )
        .unwrap()
        .value;
        assert_eq!(profile.agent.assigned_company_ids, vec![acme.id]);
        assert_eq!(profile.user.role, Role::Agent);
        assert!(profile.user.company_id.is_none());
        assert!(profile.user.login_code.is_some());
    }

    #[test]
    fn test_update_reassigns_and_deactivates() {
        let store = MemoryStore::new();
        let root = identity(&super_admin(&store));
        let (acme, _) = company_with_admin(&store, "Acme", "ACME234");
        let (globex, _) = company_with_admin(&store, "Globex", "GLBX234");
        let profile = create_agent(&store, &root, body("alex@desk.io", vec![acme.id]), Utc::now())
            .unwrap()
            .value;

        let update = UpdateAgentBody {
            assigned_company_ids: Some(vec![globex.id]),
            is_active: Some(false),
            ..Default::default()
        };
        let updated = update_agent(&store, &root, profile.agent.id, update, Utc::now())
            .unwrap()
            .value;
        assert_eq!(updated.agent.assigned_company_ids, vec![globex.id]);
        assert!(!updated.agent.is_active);
    }

    #[test]
    fn test_delete_releases_assignments() {
        let store = MemoryStore::new();
        let root_user = super_admin(&store);
        let root = identity(&root_user);
        let (acme, _) = company_with_admin(&store, "Acme", "ACME234");
        let profile = create_agent(&store, &root, body("alex@desk.io", vec![acme.id]), Utc::now())
            .unwrap()
            .value;

        let now = Utc::now();
        let request = ServiceRequest {
            id: Uuid::new_v4(),
            service_queue_id: "SR-260101-QWERT".into(),
            client: "Jordan".into(),
            company_id: acme.id,
            task_status: TaskStatus::Open,
            service_request_narrative: "Certificate for landlord".into(),
            service_queue_category: RequestCategory::CertificateRequest,
            assigned_to_id: Some(profile.user.id),
            assigned_by_id: root_user.id,
            due_date: None,
            modified_by_id: None,
            created_at: now,
            updated_at: now,
        };
        store.insert_request(&request).unwrap();

        delete_agent(&store, &root, profile.agent.id).unwrap();
        assert!(store.find_agent(profile.agent.id).unwrap().is_none());
        assert!(store.find_user(profile.user.id).unwrap().is_none());
        assert_eq!(
            store.find_request(request.id).unwrap().unwrap().assigned_to_id,
            None
        );
    }

    #[test]
    fn test_missing_agent_is_not_found() {
        let store = MemoryStore::new();
        let root = identity(&super_admin(&store));
        assert!(matches!(
            delete_agent(&store, &root, Uuid::new_v4()),
            Err(ApiError::NotFound("Agent"))
        ));
    }
}
