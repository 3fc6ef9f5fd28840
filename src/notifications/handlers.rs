use axum::{
    extract::{Path, Query, State},
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::error::{ApiError, ApiResult};
use crate::core::shared::models::{ActivityLog, ApiResponse, Notification, Role};
use crate::core::shared::state::AppState;
use crate::core::store::ActivityFilter;
use crate::security::auth_api::{AnyRole, AuthenticatedUser, CompanyManagers, RequireRole};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCount {
    pub unread: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkedRead {
    pub updated: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityQuery {
    pub company_id: Option<Uuid>,
    pub request_id: Option<Uuid>,
    pub limit: Option<i64>,
}

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    user: RequireRole<AnyRole>,
    Query(query): Query<InboxQuery>,
) -> ApiResult<Json<ApiResponse<Vec<Notification>>>> {
    let items =
        state
            .store
            .list_notifications(user.user_id, query.unread_only, clamp_limit(query.limit))?;
    Ok(Json(ApiResponse::ok(items)))
}

pub async fn unread_count(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> ApiResult<Json<ApiResponse<UnreadCount>>> {
    let unread = state.store.count_unread(user.user_id)?;
    Ok(Json(ApiResponse::ok(UnreadCount { unread })))
}

pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<MarkedRead>>> {
    if !state.store.mark_notification_read(user.user_id, id)? {
        return Err(ApiError::NotFound("Notification"));
    }
    Ok(Json(ApiResponse::ok(MarkedRead { updated: 1 })))
}

pub async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> ApiResult<Json<ApiResponse<MarkedRead>>> {
    let updated = state.store.mark_all_read(user.user_id)?;
    Ok(Json(ApiResponse::ok(MarkedRead { updated })))
}

/// super_admin reads everything (optionally one company); customer_admin is
/// pinned to their own company whatever the query says.
pub async fn list_activity(
    State(state): State<Arc<AppState>>,
    guard: RequireRole<CompanyManagers>,
    Query(query): Query<ActivityQuery>,
) -> ApiResult<Json<ApiResponse<Vec<ActivityLog>>>> {
    let company_id = match guard.role {
        Role::SuperAdmin => query.company_id,
        _ => {
            let own = guard
                .company_id
                .ok_or_else(|| ApiError::Forbidden("Account is not linked to a company".into()))?;
            Some(own)
        }
    };
    let filter = ActivityFilter {
        company_id,
        request_id: query.request_id,
        limit: clamp_limit(query.limit),
    };
    Ok(Json(ApiResponse::ok(state.store.list_activity(&filter)?)))
}

pub fn configure_notification_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/unread-count", get(unread_count))
        .route("/api/notifications/read-all", put(mark_all_read))
        .route("/api/notifications/:id/read", put(mark_read))
        .route("/api/activity", get(list_activity))
}
