//! Service-request rules.
//!
//! Each operation validates its input, checks the caller against the tenant
//! scope and the role rules, performs the store write, and hands back the
//! events the write should trigger. Nothing in here sends mail or writes audit
//! rows directly.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::core::codes::{insert_with_unique_code, service_queue_id};
use crate::core::error::{ApiError, ApiResult};
use crate::core::scope::RequestScope;
use crate::core::shared::models::{
    Company, RequestAttachment, RequestCategory, RequestNote, Role, ServiceRequest, TaskStatus,
    User,
};
use crate::core::store::{Store, UniqueField};
use crate::notifications::{Outcome, WorkflowEvent};
use crate::security::auth_api::AuthenticatedUser;

pub const MAX_CLIENT_LEN: usize = 255;
pub const MAX_TEXT_LEN: usize = 10_000;

#[derive(Debug, Clone)]
pub struct NewRequest {
    pub client: String,
    pub narrative: String,
    pub category: RequestCategory,
    pub due_date: Option<DateTime<Utc>>,
    /// Required for super_admin; ignored unless it matches for tenant roles.
    pub company_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct RequestEdit {
    pub client: Option<String>,
    pub narrative: Option<String>,
    pub category: Option<RequestCategory>,
    /// `Some(None)` clears the due date.
    pub due_date: Option<Option<DateTime<Utc>>>,
}

fn required_text(field: &str, value: &str, max: usize) -> ApiResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::field(field, format!("{field} is required")));
    }
    if trimmed.chars().count() > max {
        return Err(ApiError::field(
            field,
            format!("{field} must be at most {max} characters"),
        ));
    }
    Ok(trimmed.to_string())
}

/// The company a new request belongs to.
fn owning_company(
    store: &dyn Store,
    actor: &AuthenticatedUser,
    requested: Option<Uuid>,
) -> ApiResult<Company> {
    let company_id = match actor.role {
        Role::SuperAdmin => requested
            .ok_or_else(|| ApiError::field("companyId", "companyId is required"))?,
        Role::CustomerAdmin | Role::Customer => {
            let own = actor
                .company_id
                .ok_or_else(|| ApiError::Forbidden("Account is not linked to a company".into()))?;
            match requested {
                Some(other) if other != own => return Err(ApiError::NotFound("Company")),
                _ => own,
            }
        }
        Role::Agent => {
            return Err(ApiError::Forbidden(
                "Agents cannot open service requests".into(),
            ))
        }
    };
    store
        .find_company(company_id)?
        .ok_or(ApiError::NotFound("Company"))
}

/// The company's primary contact, when it maps to an active user of that
/// company.
fn primary_contact(store: &dyn Store, company: &Company) -> ApiResult<Option<Uuid>> {
    Ok(store
        .find_user_by_email(&company.email)?
        .filter(|u| u.company_id == Some(company.id) && u.is_active)
        .map(|u| u.id))
}

pub fn create_request(
    store: &dyn Store,
    actor: &AuthenticatedUser,
    input: NewRequest,
    now: DateTime<Utc>,
) -> ApiResult<Outcome<ServiceRequest>> {
    let client = required_text("client", &input.client, MAX_CLIENT_LEN)?;
    let narrative = required_text("narrative", &input.narrative, MAX_TEXT_LEN)?;
    let company = owning_company(store, actor, input.company_id)?;
    let assigned_to_id = primary_contact(store, &company)?;

    let mut request = ServiceRequest {
        id: Uuid::new_v4(),
        service_queue_id: String::new(),
        client,
        company_id: company.id,
        task_status: TaskStatus::New,
        service_request_narrative: narrative,
        service_queue_category: input.category,
        assigned_to_id,
        assigned_by_id: actor.user_id,
        due_date: input.due_date,
        modified_by_id: None,
        created_at: now,
        updated_at: now,
    };

    insert_with_unique_code(
        UniqueField::ServiceQueueId,
        || service_queue_id(now),
        |code| {
            request.service_queue_id = code.to_string();
            store.insert_request(&request)
        },
    )?;

    tracing::info!(
        "Service request {} created by {} for company {}",
        request.service_queue_id,
        actor.email,
        company.company_name
    );
    Ok(Outcome::new(request.clone()).with_event(WorkflowEvent::RequestCreated {
        request,
        actor_id: actor.user_id,
    }))
}

/// Who may take a request: an active member of its company, an active agent
/// servicing that company, or a super_admin.
fn check_assignee(store: &dyn Store, request: &ServiceRequest, user_id: Uuid) -> ApiResult<User> {
    let invalid = || ApiError::field("assignedToId", "Assignee cannot take this request");
    let user = store
        .find_user(user_id)?
        .filter(|u| u.is_active)
        .ok_or_else(invalid)?;
    let eligible = match user.role {
        Role::SuperAdmin => true,
        Role::CustomerAdmin | Role::Customer => user.company_id == Some(request.company_id),
        Role::Agent => store
            .find_agent_by_user(user.id)?
            .is_some_and(|agent| agent.is_active && agent.services_company(request.company_id)),
    };
    if eligible {
        Ok(user)
    } else {
        Err(invalid())
    }
}

pub fn assign_request(
    store: &dyn Store,
    actor: &AuthenticatedUser,
    scope: &RequestScope,
    id: Uuid,
    assignee: Option<Uuid>,
    now: DateTime<Utc>,
) -> ApiResult<Outcome<ServiceRequest>> {
    if actor.role == Role::Customer {
        return Err(ApiError::Forbidden(
            "Customers cannot assign service requests".into(),
        ));
    }
    let mut request = scope.load_request(store, id)?;
    if let Some(user_id) = assignee {
        check_assignee(store, &request, user_id)?;
    }
    if request.assigned_to_id == assignee {
        return Ok(Outcome::new(request));
    }

    request.assigned_to_id = assignee;
    request.modified_by_id = Some(actor.user_id);
    request.updated_at = now;
    store.update_request(&request)?;

    Ok(Outcome::new(request.clone()).with_event(WorkflowEvent::RequestAssigned {
        request,
        actor_id: actor.user_id,
    }))
}

/// Status moves each role may make.
///
/// | role           | forward        | backward |
/// |----------------|----------------|----------|
/// | super_admin    | yes            | yes      |
/// | customer_admin | yes            | yes      |
/// | agent          | yes            | no       |
/// | customer       | only to closed | no       |
pub fn transition_allowed(role: Role, from: TaskStatus, to: TaskStatus) -> bool {
    let forward = to.rank() > from.rank();
    match role {
        Role::SuperAdmin | Role::CustomerAdmin => from != to,
        Role::Agent => forward,
        Role::Customer => forward && to == TaskStatus::Closed,
    }
}

pub fn change_status(
    store: &dyn Store,
    actor: &AuthenticatedUser,
    scope: &RequestScope,
    id: Uuid,
    to: TaskStatus,
    now: DateTime<Utc>,
) -> ApiResult<Outcome<ServiceRequest>> {
    let mut request = scope.load_request(store, id)?;
    let from = request.task_status;
    if from == to {
        return Ok(Outcome::new(request));
    }
    if !transition_allowed(actor.role, from, to) {
        return Err(ApiError::Forbidden(format!(
            "A {} cannot move a request from {} to {}",
            actor.role,
            from.label(),
            to.label()
        )));
    }

    request.task_status = to;
    request.modified_by_id = Some(actor.user_id);
    request.updated_at = now;
    store.update_request(&request)?;

    Ok(Outcome::new(request.clone()).with_event(WorkflowEvent::StatusChanged {
        request,
        actor_id: actor.user_id,
        from,
    }))
}

pub fn edit_request(
    store: &dyn Store,
    actor: &AuthenticatedUser,
    scope: &RequestScope,
    id: Uuid,
    edit: RequestEdit,
    now: DateTime<Utc>,
) -> ApiResult<Outcome<ServiceRequest>> {
    let mut request = scope.load_request(store, id)?;
    let may_edit = match actor.role {
        Role::SuperAdmin | Role::CustomerAdmin => true,
        Role::Agent | Role::Customer => request.assigned_by_id == actor.user_id,
    };
    if !may_edit {
        return Err(ApiError::Forbidden(
            "Only administrators or the creator can edit this request".into(),
        ));
    }

    let before = request.clone();
    if let Some(client) = edit.client {
        request.client = required_text("client", &client, MAX_CLIENT_LEN)?;
    }
    if let Some(narrative) = edit.narrative {
        request.service_request_narrative = required_text("narrative", &narrative, MAX_TEXT_LEN)?;
    }
    if let Some(category) = edit.category {
        request.service_queue_category = category;
    }
    if let Some(due_date) = edit.due_date {
        request.due_date = due_date;
    }
    if request == before {
        return Ok(Outcome::new(request));
    }

    request.modified_by_id = Some(actor.user_id);
    request.updated_at = now;
    store.update_request(&request)?;

    Ok(Outcome::new(request.clone()).with_event(WorkflowEvent::RequestUpdated {
        request,
        actor_id: actor.user_id,
    }))
}

pub fn add_note(
    store: &dyn Store,
    actor: &AuthenticatedUser,
    scope: &RequestScope,
    id: Uuid,
    content: &str,
    is_internal: bool,
    now: DateTime<Utc>,
) -> ApiResult<Outcome<RequestNote>> {
    let request = scope.load_request(store, id)?;
    let note_content = required_text("noteContent", content, MAX_TEXT_LEN)?;
    if is_internal && actor.role.is_customer_facing() {
        return Err(ApiError::Forbidden(
            "Customers cannot write internal notes".into(),
        ));
    }

    let note = RequestNote {
        id: Uuid::new_v4(),
        request_id: request.id,
        author_id: actor.user_id,
        note_content,
        is_internal,
        created_at: now,
    };
    store.insert_note(&note)?;

    Ok(Outcome::new(note.clone()).with_event(WorkflowEvent::NoteAdded { request, note }))
}

/// Notes the caller may read; customer roles never see internal ones.
pub fn visible_notes(
    store: &dyn Store,
    actor: &AuthenticatedUser,
    scope: &RequestScope,
    id: Uuid,
) -> ApiResult<Vec<RequestNote>> {
    let request = scope.load_request(store, id)?;
    Ok(store.list_notes(request.id, !actor.role.is_customer_facing())?)
}

pub fn delete_request(
    store: &dyn Store,
    actor: &AuthenticatedUser,
    scope: &RequestScope,
    id: Uuid,
) -> ApiResult<Outcome<Vec<RequestAttachment>>> {
    if !actor.is_super_admin() {
        return Err(ApiError::Forbidden(
            "Only super admins can delete service requests".into(),
        ));
    }
    let request = scope.load_request(store, id)?;
    let attachments = store.delete_request(request.id)?;
    tracing::info!(
        "Service request {} deleted by {}",
        request.service_queue_id,
        actor.email
    );
    Ok(Outcome::new(attachments).with_event(WorkflowEvent::RequestDeleted {
        request,
        actor_id: actor.user_id,
    }))
}
