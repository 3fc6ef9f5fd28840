use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::core::codes::{
    company_code, insert_with_unique_code, insert_with_unique_codes, login_code,
};
use crate::core::error::{ApiError, ApiResult};
use crate::core::shared::models::{ApiResponse, Company, Role, User};
use crate::core::shared::state::AppState;
use crate::core::store::{CompanyDeletion, Store, UniqueField};
use crate::notifications::{Outcome, WorkflowEvent};
use crate::security::auth_api::{AuthenticatedUser, RequireRole, SuperAdminOnly};

use super::{new_user, required_name, split_contact_name, validated_email, SearchQuery};

const MAX_PHONE_LEN: usize = 40;

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyBody {
    #[serde(default)]
    pub company_name: String,
    #[serde(default)]
    pub primary_contact: String,
    pub phone: Option<String>,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyUpdateBody {
    pub company_name: Option<String>,
    pub primary_contact: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedCompany {
    #[serde(flatten)]
    pub company: Company,
    pub primary_user: User,
}

fn phone(value: Option<String>) -> ApiResult<Option<String>> {
    let value = value
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty());
    match value {
        Some(p) if p.chars().count() > MAX_PHONE_LEN => {
            Err(ApiError::field("phone", "Phone number is too long"))
        }
        other => Ok(other),
    }
}

/// Creates the company and its primary contact as a customer_admin in one
/// write, regenerating whichever code collides.
pub fn create_company(
    store: &dyn Store,
    actor: &AuthenticatedUser,
    body: CompanyBody,
    now: DateTime<Utc>,
) -> ApiResult<Outcome<CreatedCompany>> {
    let company_name = required_name("companyName", &body.company_name)?;
    let primary_contact = required_name("primaryContact", &body.primary_contact)?;
    let email = validated_email(&body.email)?;
    let phone = phone(body.phone)?;

    let company = Company {
        id: Uuid::new_v4(),
        company_name,
        company_code: company_code(),
        primary_contact,
        phone,
        email: email.clone(),
        created_at: now,
        updated_at: now,
    };
    let (first_name, last_name) = split_contact_name(&company.primary_contact);
    let mut primary = new_user(
        first_name,
        last_name,
        email,
        Role::CustomerAdmin,
        Some(company.id),
        now,
    );
    primary.login_code = Some(login_code());

    let mut pair = (company, primary);
    insert_with_unique_codes(
        &[UniqueField::CompanyCode, UniqueField::LoginCode],
        &mut pair,
        |(company, primary), field| match field {
            UniqueField::CompanyCode => company.company_code = company_code(),
            _ => primary.login_code = Some(login_code()),
        },
        |(company, primary)| store.insert_company_with_user(company, primary),
    )?;
    let (company, primary) = pair;
    info!(
        "Created company {} ({})",
        company.company_name, company.company_code
    );

    Ok(Outcome::new(CreatedCompany {
        company: company.clone(),
        primary_user: primary.clone(),
    })
    .with_event(WorkflowEvent::CompanyCreated {
        company,
        primary,
        actor_id: actor.user_id,
    }))
}

/// Updates the profile and keeps the primary contact's user in step.
pub fn update_company(
    store: &dyn Store,
    actor: &AuthenticatedUser,
    id: Uuid,
    body: CompanyUpdateBody,
    now: DateTime<Utc>,
) -> ApiResult<Outcome<Company>> {
    let existing = store.find_company(id)?.ok_or(ApiError::NotFound("Company"))?;
    let mut company = existing.clone();
    if let Some(name) = body.company_name {
        company.company_name = required_name("companyName", &name)?;
    }
    if let Some(contact) = body.primary_contact {
        company.primary_contact = required_name("primaryContact", &contact)?;
    }
    if body.phone.is_some() {
        company.phone = phone(body.phone)?;
    }
    if let Some(email) = body.email {
        company.email = validated_email(&email)?;
    }
    company.updated_at = now;

    let primary = store
        .find_user_by_email(&existing.email)?
        .filter(|u| u.company_id == Some(id))
        .map(|mut user| {
            if company.primary_contact != existing.primary_contact {
                let (first, last) = split_contact_name(&company.primary_contact);
                user.first_name = first;
                user.last_name = last;
            }
            user.email = company.email.clone();
            user.updated_at = now;
            user
        });
    store.update_company_with_user(&company, primary.as_ref())?;

    Ok(Outcome::new(company.clone()).with_event(WorkflowEvent::CompanyUpdated {
        company,
        actor_id: actor.user_id,
    }))
}

pub fn delete_company(
    store: &dyn Store,
    actor: &AuthenticatedUser,
    id: Uuid,
) -> ApiResult<Outcome<Vec<Uuid>>> {
    let company = store.find_company(id)?.ok_or(ApiError::NotFound("Company"))?;
    match store.delete_company(id)? {
        CompanyDeletion::Deleted(user_ids) => {
            info!(
                "Deleted company {} with {} users",
                company.company_code,
                user_ids.len()
            );
            Ok(Outcome::new(user_ids).with_event(WorkflowEvent::CompanyDeleted {
                company,
                actor_id: actor.user_id,
            }))
        }
        CompanyDeletion::HasRequests(count) => Err(ApiError::Blocked(format!(
            "Company has {count} service request(s) and cannot be deleted"
        ))),
        CompanyDeletion::NotFound => Err(ApiError::NotFound("Company")),
    }
}

pub fn regenerate_code(
    store: &dyn Store,
    actor: &AuthenticatedUser,
    id: Uuid,
) -> ApiResult<Outcome<Company>> {
    if store.find_company(id)?.is_none() {
        return Err(ApiError::NotFound("Company"));
    }
    insert_with_unique_code(UniqueField::CompanyCode, company_code, |code| {
        store.update_company_code(id, code)
    })?;
    let company = store.find_company(id)?.ok_or(ApiError::NotFound("Company"))?;
    Ok(Outcome::new(company.clone()).with_event(WorkflowEvent::CompanyUpdated {
        company,
        actor_id: actor.user_id,
    }))
}

pub async fn list_companies(
    State(state): State<Arc<AppState>>,
    _user: RequireRole<SuperAdminOnly>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<ApiResponse<Vec<Company>>>> {
    let companies = state.store.list_companies(query.term())?;
    Ok(Json(ApiResponse::ok(companies)))
}

pub async fn get_company(
    State(state): State<Arc<AppState>>,
    _user: RequireRole<SuperAdminOnly>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Company>>> {
    let company = state
        .store
        .find_company(id)?
        .ok_or(ApiError::NotFound("Company"))?;
    Ok(Json(ApiResponse::ok(company)))
}

pub async fn create_company_handler(
    State(state): State<Arc<AppState>>,
    user: RequireRole<SuperAdminOnly>,
    Json(body): Json<CompanyBody>,
) -> ApiResult<(StatusCode, Json<ApiResponse<CreatedCompany>>)> {
    let outcome = create_company(state.store.as_ref(), &user, body, Utc::now())?;
    let created = state.dispatcher.complete(outcome);
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(created).with_message("Company created")),
    ))
}

pub async fn update_company_handler(
    State(state): State<Arc<AppState>>,
    user: RequireRole<SuperAdminOnly>,
    Path(id): Path<Uuid>,
    Json(body): Json<CompanyUpdateBody>,
) -> ApiResult<Json<ApiResponse<Company>>> {
    let outcome = update_company(state.store.as_ref(), &user, id, body, Utc::now())?;
    Ok(Json(
        ApiResponse::ok(state.dispatcher.complete(outcome)).with_message("Company updated"),
    ))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedCompany {
    pub id: Uuid,
    pub removed_user_ids: Vec<Uuid>,
}

pub async fn delete_company_handler(
    State(state): State<Arc<AppState>>,
    user: RequireRole<SuperAdminOnly>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<DeletedCompany>>> {
    let outcome = delete_company(state.store.as_ref(), &user, id)?;
    let removed_user_ids = state.dispatcher.complete(outcome);
    Ok(Json(
        ApiResponse::ok(DeletedCompany {
            id,
            removed_user_ids,
        })
        .with_message("Company deleted"),
    ))
}

pub async fn regenerate_code_handler(
    State(state): State<Arc<AppState>>,
    user: RequireRole<SuperAdminOnly>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Company>>> {
    let outcome = regenerate_code(state.store.as_ref(), &user, id)?;
    Ok(Json(
        ApiResponse::ok(state.dispatcher.complete(outcome))
            .with_message("Company code regenerated"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codes::{COMPANY_CODE_LEN, LOGIN_CODE_LEN};
    use crate::core::shared::models::{RequestCategory, ServiceRequest, TaskStatus};
    use crate::core::store::MemoryStore;
    use crate::directory::fixtures::{identity, super_admin};

    fn acme() -> CompanyBody {
        CompanyBody {
            company_name: "Acme".into(),
            primary_contact: "Wile E. Coyote".into(),
            phone: Some(" 555-0100 ".into()),
            email: "Acme@X.com".into(),
        }
    }

    #[test]
    fn test_create_issues_codes_and_primary_admin() {
        let store = MemoryStore::new();
        let root = identity(&super_admin(&store));
        let outcome = create_company(&store, &root, acme(), Utc::now()).unwrap();

        let created = &outcome.value;
        assert_eq!(created.company.company_code.len(), COMPANY_CODE_LEN);
        assert_eq!(created.company.email, "acme@x.com");
        assert_eq!(created.company.phone.as_deref(), Some("555-0100"));
        assert_eq!(created.primary_user.role, Role::CustomerAdmin);
        assert_eq!(created.primary_user.first_name, "Wile");
        assert_eq!(created.primary_user.last_name, "E. Coyote");
        assert_eq!(
            created.primary_user.login_code.as_ref().map(String::len),
            Some(LOGIN_CODE_LEN)
        );
        assert!(matches!(
            outcome.events.as_slice(),
            [WorkflowEvent::CompanyCreated { .. }]
        ));
        assert!(store
            .find_user_by_email("acme@x.com")
            .unwrap()
            .is_some_and(|u| u.company_id == Some(created.company.id)));
    }

    #[test]
    fn test_duplicate_email_already_exists() {
        let store = MemoryStore::new();
        let root = identity(&super_admin(&store));
        create_company(&store, &root, acme(), Utc::now()).unwrap();

        let mut again = acme();
        again.company_name = "Acme Two".into();
        let err = create_company(&store, &root, again, Utc::now()).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("already exists"));
        assert_eq!(store.list_companies(None).unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_email_rejected_before_insert() {
        let store = MemoryStore::new();
        let root = identity(&super_admin(&store));
        let mut body = acme();
        body.email = "acme".into();
        assert!(matches!(
            create_company(&store, &root, body, Utc::now()),
            Err(ApiError::Validation { .. })
        ));
        assert!(store.list_companies(None).unwrap().is_empty());
    }

    #[test]
    fn test_update_moves_primary_user_email() {
        let store = MemoryStore::new();
        let root = identity(&super_admin(&store));
        let created = create_company(&store, &root, acme(), Utc::now())
            .unwrap()
            .value;

        let body = CompanyUpdateBody {
            email: Some("desk@acme.io".into()),
            primary_contact: Some("Road Runner".into()),
            ..Default::default()
        };
        let updated = update_company(&store, &root, created.company.id, body, Utc::now())
            .unwrap()
            .value;
        assert_eq!(updated.email, "desk@acme.io");

        let user = store
            .find_user(created.primary_user.id)
            .unwrap()
            .unwrap();
        assert_eq!(user.email, "desk@acme.io");
        assert_eq!(user.first_name, "Road");
        assert_eq!(user.last_name, "Runner");
    }

    #[test]
    fn test_delete_blocked_then_cascades() {
        let store = MemoryStore::new();
        let root_user = super_admin(&store);
        let root = identity(&root_user);
        let created = create_company(&store, &root, acme(), Utc::now())
            .unwrap()
            .value;
        let now = Utc::now();
        let request = ServiceRequest {
            id: Uuid::new_v4(),
            service_queue_id: "SR-260101-ABCDE".into(),
            client: "Jordan".into(),
            company_id: created.company.id,
            task_status: TaskStatus::New,
            service_request_narrative: "Renew".into(),
            service_queue_category: RequestCategory::Renewal,
            assigned_to_id: None,
            assigned_by_id: root_user.id,
            due_date: None,
            modified_by_id: None,
            created_at: now,
            updated_at: now,
        };
        store.insert_request(&request).unwrap();

        let err = delete_company(&store, &root, created.company.id).unwrap_err();
        assert!(matches!(err, ApiError::Blocked(_)));

        store.delete_request(request.id).unwrap();
        let removed = delete_company(&store, &root, created.company.id)
            .unwrap()
            .value;
        assert_eq!(removed, vec![created.primary_user.id]);
        assert!(store.find_user(created.primary_user.id).unwrap().is_none());
        assert!(store.find_company(created.company.id).unwrap().is_none());
    }

    #[test]
    fn test_regenerate_code_changes_code() {
        let store = MemoryStore::new();
        let root = identity(&super_admin(&store));
        let created = create_company(&store, &root, acme(), Utc::now())
            .unwrap()
            .value;
        let refreshed = regenerate_code(&store, &root, created.company.id)
            .unwrap()
            .value;
        assert_eq!(refreshed.company_code.len(), COMPANY_CODE_LEN);
        assert!(store
            .find_company_by_code(&refreshed.company_code)
            .unwrap()
            .is_some());
        assert!(matches!(
            regenerate_code(&store, &root, Uuid::new_v4()),
            Err(ApiError::NotFound("Company"))
        ));
    }
}
