pub mod attachments;
pub mod workflow;

use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::Response,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::core::error::{ApiError, ApiResult};
use crate::core::scope::RequestScope;
use crate::core::shared::models::{
    ApiResponse, RequestAttachment, RequestCategory, RequestNote, ServiceRequest, TaskStatus,
};
use crate::core::shared::state::AppState;
use crate::core::shared::utils::{parse_datetime, parse_datetime_upper};
use crate::core::store::{RequestFilter, RequestRow};
use crate::security::auth_api::{
    AnyRole, AuthenticatedUser, RequestAssigners, RequestCreators, RequireRole, SuperAdminOnly,
};

use attachments::{CreatedRequest, MultipartForm};
use workflow::{NewRequest, RequestEdit};

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 200;

/// Distinguishes an absent field from an explicit `null`.
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub status: Option<String>,
    pub client: Option<String>,
    pub assigned_to: Option<Uuid>,
    pub company_id: Option<Uuid>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub search: Option<String>,
    #[serde(default)]
    pub overdue: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequestBody {
    #[serde(default)]
    pub client: String,
    #[serde(default, alias = "serviceRequestNarrative")]
    pub narrative: String,
    #[serde(default, alias = "serviceQueueCategory")]
    pub category: String,
    pub due_date: Option<String>,
    pub company_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequestBody {
    pub client: Option<String>,
    #[serde(alias = "serviceRequestNarrative")]
    pub narrative: Option<String>,
    #[serde(alias = "serviceQueueCategory")]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignBody {
    pub assigned_to_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    #[serde(alias = "taskStatus")]
    pub status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteBody {
    #[serde(default, alias = "content")]
    pub note_content: String,
    #[serde(default)]
    pub is_internal: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListedRequest {
    #[serde(flatten)]
    pub row: RequestRow,
    pub overdue: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPage {
    pub items: Vec<ListedRequest>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDetail {
    #[serde(flatten)]
    pub request: ServiceRequest,
    pub company_name: Option<String>,
    pub overdue: bool,
    pub notes: Vec<RequestNote>,
    pub attachments: Vec<RequestAttachment>,
}

#[derive(Debug, Serialize)]
pub struct CategoryOption {
    pub value: RequestCategory,
    pub label: &'static str,
}

fn parse_status(raw: &str) -> ApiResult<TaskStatus> {
    raw.parse()
        .map_err(|e: String| ApiError::field("status", e))
}

fn parse_category(raw: &str) -> ApiResult<RequestCategory> {
    raw.parse()
        .map_err(|e: String| ApiError::field("category", e))
}

fn parse_due_date(raw: &str) -> ApiResult<DateTime<Utc>> {
    parse_datetime(raw)
        .ok_or_else(|| ApiError::field("dueDate", "Expected an RFC 3339 timestamp or YYYY-MM-DD"))
}

fn scope_for(state: &AppState, user: &AuthenticatedUser) -> ApiResult<RequestScope> {
    RequestScope::for_user(state.store.as_ref(), user)
}

impl ListQuery {
    fn into_filter(self, now: DateTime<Utc>) -> ApiResult<RequestFilter> {
        let created_from = match self.from.as_deref() {
            Some(raw) => Some(
                parse_datetime(raw).ok_or_else(|| ApiError::field("from", "Invalid date"))?,
            ),
            None => None,
        };
        let created_to = match self.to.as_deref() {
            Some(raw) => Some(
                parse_datetime_upper(raw).ok_or_else(|| ApiError::field("to", "Invalid date"))?,
            ),
            None => None,
        };
        Ok(RequestFilter {
            status: self.status.as_deref().map(parse_status).transpose()?,
            client: self.client.filter(|c| !c.trim().is_empty()),
            assigned_to: self.assigned_to,
            company_id: self.company_id,
            created_from,
            created_to,
            search: self
                .search
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            overdue_at: self.overdue.then_some(now),
            limit: self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            offset: self.offset.unwrap_or(0).max(0),
        })
    }
}

pub async fn list_requests(
    State(state): State<Arc<AppState>>,
    user: RequireRole<AnyRole>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ApiResponse<RequestPage>>> {
    let now = Utc::now();
    let scope = scope_for(&state, &user)?;
    let filter = query.into_filter(now)?;
    let rows = state.store.list_requests(&scope, &filter)?;
    let items = rows
        .into_iter()
        .map(|row| ListedRequest {
            overdue: row.request.is_overdue(now),
            row,
        })
        .collect();
    Ok(Json(ApiResponse::ok(RequestPage {
        items,
        limit: filter.limit,
        offset: filter.offset,
    })))
}

pub async fn create_request(
    State(state): State<Arc<AppState>>,
    user: RequireRole<RequestCreators>,
    Json(body): Json<CreateRequestBody>,
) -> ApiResult<(StatusCode, Json<ApiResponse<ServiceRequest>>)> {
    let input = NewRequest {
        category: parse_category(&body.category)?,
        due_date: body.due_date.as_deref().map(parse_due_date).transpose()?,
        client: body.client,
        narrative: body.narrative,
        company_id: body.company_id,
    };
    let outcome = workflow::create_request(state.store.as_ref(), &user, input, Utc::now())?;
    let request = state.dispatcher.complete(outcome);
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(request).with_message("Service request created")),
    ))
}

fn new_request_from_form(form: &MultipartForm) -> ApiResult<NewRequest> {
    let company_id = match form.text("companyId") {
        Some(raw) => Some(
            Uuid::parse_str(raw.trim())
                .map_err(|_| ApiError::field("companyId", "Invalid company id"))?,
        ),
        None => None,
    };
    Ok(NewRequest {
        client: form.text("client").unwrap_or_default().to_string(),
        narrative: form
            .text("narrative")
            .or_else(|| form.text("serviceRequestNarrative"))
            .unwrap_or_default()
            .to_string(),
        category: parse_category(
            form.text("category")
                .or_else(|| form.text("serviceQueueCategory"))
                .unwrap_or_default(),
        )?,
        due_date: form.text("dueDate").map(parse_due_date).transpose()?,
        company_id,
    })
}

pub async fn create_request_with_files(
    State(state): State<Arc<AppState>>,
    user: RequireRole<RequestCreators>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<ApiResponse<CreatedRequest>>)> {
    let form = attachments::read_multipart(multipart).await?;
    let input = new_request_from_form(&form)?;
    let outcome =
        attachments::create_with_files(&state, &user, input, form.files, Utc::now()).await?;
    let created = state.dispatcher.complete(outcome);
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(created).with_message("Service request created")),
    ))
}

pub async fn get_request(
    State(state): State<Arc<AppState>>,
    user: RequireRole<AnyRole>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<RequestDetail>>> {
    let scope = scope_for(&state, &user)?;
    let store = state.store.as_ref();
    let request = scope.load_request(store, id)?;
    let notes = workflow::visible_notes(store, &user, &scope, id)?;
    let attachments = store.list_attachments(id)?;
    let company_name = store.find_company(request.company_id)?.map(|c| c.company_name);
    Ok(Json(ApiResponse::ok(RequestDetail {
        overdue: request.is_overdue(Utc::now()),
        request,
        company_name,
        notes,
        attachments,
    })))
}

pub async fn update_request(
    State(state): State<Arc<AppState>>,
    user: RequireRole<AnyRole>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateRequestBody>,
) -> ApiResult<Json<ApiResponse<ServiceRequest>>> {
    let scope = scope_for(&state, &user)?;
    let due_date = match body.due_date {
        Some(Some(raw)) if !raw.trim().is_empty() => Some(Some(parse_due_date(&raw)?)),
        Some(_) => Some(None),
        None => None,
    };
    let edit = RequestEdit {
        client: body.client,
        narrative: body.narrative,
        category: body.category.as_deref().map(parse_category).transpose()?,
        due_date,
    };
    let outcome =
        workflow::edit_request(state.store.as_ref(), &user, &scope, id, edit, Utc::now())?;
    Ok(Json(ApiResponse::ok(state.dispatcher.complete(outcome))))
}

pub async fn assign_request(
    State(state): State<Arc<AppState>>,
    user: RequireRole<RequestAssigners>,
    Path(id): Path<Uuid>,
    Json(body): Json<AssignBody>,
) -> ApiResult<Json<ApiResponse<ServiceRequest>>> {
    let scope = scope_for(&state, &user)?;
    let outcome = workflow::assign_request(
        state.store.as_ref(),
        &user,
        &scope,
        id,
        body.assigned_to_id,
        Utc::now(),
    )?;
    Ok(Json(
        ApiResponse::ok(state.dispatcher.complete(outcome)).with_message("Assignment updated"),
    ))
}

pub async fn change_status(
    State(state): State<Arc<AppState>>,
    user: RequireRole<AnyRole>,
    Path(id): Path<Uuid>,
    Json(body): Json<StatusBody>,
) -> ApiResult<Json<ApiResponse<ServiceRequest>>> {
    let scope = scope_for(&state, &user)?;
    let status = parse_status(&body.status)?;
    let outcome =
        workflow::change_status(state.store.as_ref(), &user, &scope, id, status, Utc::now())?;
    Ok(Json(
        ApiResponse::ok(state.dispatcher.complete(outcome)).with_message("Status updated"),
    ))
}

pub async fn delete_request(
    State(state): State<Arc<AppState>>,
    user: RequireRole<SuperAdminOnly>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<serde_json::Value>>> {
    let outcome = workflow::delete_request(state.store.as_ref(), &user, &RequestScope::All, id)?;
    let removed = state.dispatcher.complete(outcome);
    for attachment in &removed {
        if let Err(e) = state.files.delete(id, &attachment.stored_name).await {
            tracing::warn!("Could not remove blob {}: {e}", attachment.stored_name);
        }
    }
    Ok(Json(
        ApiResponse::ok(serde_json::json!({ "id": id, "attachmentsRemoved": removed.len() }))
            .with_message("Service request deleted"),
    ))
}

pub async fn list_notes(
    State(state): State<Arc<AppState>>,
    user: RequireRole<AnyRole>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Vec<RequestNote>>>> {
    let scope = scope_for(&state, &user)?;
    let notes = workflow::visible_notes(state.store.as_ref(), &user, &scope, id)?;
    Ok(Json(ApiResponse::ok(notes)))
}

pub async fn add_note(
    State(state): State<Arc<AppState>>,
    user: RequireRole<AnyRole>,
    Path(id): Path<Uuid>,
    Json(body): Json<NoteBody>,
) -> ApiResult<(StatusCode, Json<ApiResponse<RequestNote>>)> {
    let scope = scope_for(&state, &user)?;
    let outcome = workflow::add_note(
        state.store.as_ref(),
        &user,
        &scope,
        id,
        &body.note_content,
        body.is_internal,
        Utc::now(),
    )?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(state.dispatcher.complete(outcome))),
    ))
}

pub async fn list_attachments(
    State(state): State<Arc<AppState>>,
    user: RequireRole<AnyRole>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Vec<RequestAttachment>>>> {
    let scope = scope_for(&state, &user)?;
    Ok(Json(ApiResponse::ok(attachments::list_attachments(
        &state, &scope, id,
    )?)))
}

pub async fn upload_attachments(
    State(state): State<Arc<AppState>>,
    user: RequireRole<AnyRole>,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<ApiResponse<Vec<RequestAttachment>>>)> {
    let scope = scope_for(&state, &user)?;
    let form = attachments::read_multipart(multipart).await?;
    let outcome =
        attachments::add_attachments(&state, &user, &scope, id, form.files, Utc::now()).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(state.dispatcher.complete(outcome))),
    ))
}

pub async fn download_attachment(
    State(state): State<Arc<AppState>>,
    user: RequireRole<AnyRole>,
    Path((id, file_name)): Path<(Uuid, String)>,
) -> ApiResult<Response> {
    let scope = scope_for(&state, &user)?;
    let (attachment, reader) = attachments::load_download(&state, &scope, id, &file_name).await?;

    let content_type = attachments::mime_type_for(&attachment.file_name);
    let ascii_name: String = attachment
        .file_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();
    let disposition = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii_name,
        urlencoding::encode(&attachment.file_name)
    );

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_DISPOSITION, disposition)
        .header(header::CONTENT_LENGTH, attachment.file_size)
        .body(Body::from_stream(ReaderStream::new(reader)))
        .map_err(ApiError::internal)
}

pub async fn list_categories(_user: AuthenticatedUser) -> Json<ApiResponse<Vec<CategoryOption>>> {
    let options = RequestCategory::ALL
        .iter()
        .map(|&value| CategoryOption {
            value,
            label: value.label(),
        })
        .collect();
    Json(ApiResponse::ok(options))
}

pub fn configure_request_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/requests", get(list_requests).post(create_request))
        .route("/api/requests/upload", post(create_request_with_files))
        .route("/api/requests/categories", get(list_categories))
        .route(
            "/api/requests/:id",
            get(get_request).put(update_request).delete(delete_request),
        )
        .route("/api/requests/:id/assign", put(assign_request))
        .route("/api/requests/:id/status", put(change_status))
        .route("/api/requests/:id/notes", get(list_notes).post(add_note))
        .route(
            "/api/requests/:id/attachments",
            get(list_attachments).post(upload_attachments),
        )
        .route(
            "/api/requests/:id/attachments/:file_name/download",
            get(download_attachment),
        )
}
