//! Dashboard reports over service requests.
//!
//! Every figure is derived on read from the caller's scoped requests; the
//! aggregation functions take `now` so the same data always yields the same
//! report.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::error::{ApiError, ApiResult};
use crate::core::scope::RequestScope;
use crate::core::shared::models::{ApiResponse, ServiceRequest, TaskStatus};
use crate::core::shared::state::AppState;
use crate::security::auth_api::{AnyRole, RequireRole};

pub const TRAILING_MONTHS: u32 = 12;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub new: i64,
    pub open: i64,
    pub in_progress: i64,
    pub closed: i64,
}

impl StatusCounts {
    fn add(&mut self, status: TaskStatus) {
        *self.slot(status) += 1;
    }

    fn slot(&mut self, status: TaskStatus) -> &mut i64 {
        match status {
            TaskStatus::New => &mut self.new,
            TaskStatus::Open => &mut self.open,
            TaskStatus::InProgress => &mut self.in_progress,
            TaskStatus::Closed => &mut self.closed,
        }
    }

    pub fn get(&self, status: TaskStatus) -> i64 {
        match status {
            TaskStatus::New => self.new,
            TaskStatus::Open => self.open,
            TaskStatus::InProgress => self.in_progress,
            TaskStatus::Closed => self.closed,
        }
    }

    pub fn total(&self) -> i64 {
        self.new + self.open + self.in_progress + self.closed
    }

    pub fn wip(&self) -> i64 {
        self.open + self.in_progress
    }
}

impl<'a> FromIterator<&'a ServiceRequest> for StatusCounts {
    fn from_iter<I: IntoIterator<Item = &'a ServiceRequest>>(iter: I) -> Self {
        let mut counts = Self::default();
        for request in iter {
            counts.add(request.task_status);
        }
        counts
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    #[serde(flatten)]
    pub counts: StatusCounts,
    pub total: i64,
    pub wip: i64,
    pub past_due: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyChange {
    pub status: TaskStatus,
    pub current: i64,
    pub previous: i64,
    pub change_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyReport {
    pub current_start: DateTime<Utc>,
    pub previous_start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub statuses: Vec<WeeklyChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthBucket {
    /// `YYYY-MM`.
    pub month: String,
    #[serde(flatten)]
    pub counts: StatusCounts,
    pub total: i64,
}

pub fn summary(requests: &[ServiceRequest], now: DateTime<Utc>) -> Summary {
    let counts: StatusCounts = requests.iter().collect();
    Summary {
        counts,
        total: counts.total(),
        wip: counts.wip(),
        past_due: requests.iter().filter(|r| r.is_overdue(now)).count() as i64,
    }
}

/// Previous 0 and current > 0 reads as 100%; both 0 as 0%.
pub fn percent_change(previous: i64, current: i64) -> f64 {
    if previous == 0 {
        return if current > 0 { 100.0 } else { 0.0 };
    }
    let change = (current - previous) as f64 / previous as f64 * 100.0;
    (change * 10.0).round() / 10.0
}

/// Requests created in the last 7 days against the 7 days before, bucketed
/// by their current status.
pub fn weekly(requests: &[ServiceRequest], now: DateTime<Utc>) -> WeeklyReport {
    let current_start = now - Duration::days(7);
    let previous_start = now - Duration::days(14);

    let current: StatusCounts = requests
        .iter()
        .filter(|r| r.created_at >= current_start && r.created_at < now)
        .collect();
    let previous: StatusCounts = requests
        .iter()
        .filter(|r| r.created_at >= previous_start && r.created_at < current_start)
        .collect();

    let statuses = TaskStatus::ALL
        .iter()
        .map(|&status| WeeklyChange {
            status,
            current: current.get(status),
            previous: previous.get(status),
            change_percent: percent_change(previous.get(status), current.get(status)),
        })
        .collect();

    WeeklyReport {
        current_start,
        previous_start,
        end: now,
        statuses,
    }
}

/// First day of the month `back` months before the one containing `now`.
fn month_start(now: DateTime<Utc>, back: u32) -> Option<NaiveDate> {
    let index = now.year() * 12 + now.month0() as i32 - back as i32;
    NaiveDate::from_ymd_opt(index.div_euclid(12), index.rem_euclid(12) as u32 + 1, 1)
}

/// Twelve calendar months ending with the current one, oldest first.
pub fn monthly(requests: &[ServiceRequest], now: DateTime<Utc>) -> Vec<MonthBucket> {
    (0..TRAILING_MONTHS)
        .rev()
        .filter_map(|back| month_start(now, back))
        .map(|start| {
            let counts: StatusCounts = requests
                .iter()
                .filter(|r| {
                    r.created_at.year() == start.year() && r.created_at.month() == start.month()
                })
                .collect();
            MonthBucket {
                month: start.format("%Y-%m").to_string(),
                total: counts.total(),
                counts,
            }
        })
        .collect()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportQuery {
    pub company_id: Option<Uuid>,
}

/// Loads the caller's requests on the blocking pool.
async fn load_scoped(
    state: &Arc<AppState>,
    user: &RequireRole<AnyRole>,
    query: ReportQuery,
) -> ApiResult<Vec<ServiceRequest>> {
    let store = Arc::clone(&state.store);
    let user = (**user).clone();
    tokio::task::spawn_blocking(move || -> ApiResult<Vec<ServiceRequest>> {
        let scope = RequestScope::for_user(store.as_ref(), &user)?;
        Ok(store.scoped_requests(&scope, query.company_id)?)
    })
    .await
    .map_err(ApiError::internal)?
}

pub async fn handle_summary(
    State(state): State<Arc<AppState>>,
    user: RequireRole<AnyRole>,
    Query(query): Query<ReportQuery>,
) -> ApiResult<Json<ApiResponse<Summary>>> {
    let requests = load_scoped(&state, &user, query).await?;
    Ok(Json(ApiResponse::ok(summary(&requests, Utc::now()))))
}

pub async fn handle_weekly(
    State(state): State<Arc<AppState>>,
    user: RequireRole<AnyRole>,
    Query(query): Query<ReportQuery>,
) -> ApiResult<Json<ApiResponse<WeeklyReport>>> {
    let requests = load_scoped(&state, &user, query).await?;
    Ok(Json(ApiResponse::ok(weekly(&requests, Utc::now()))))
}

pub async fn handle_monthly(
    State(state): State<Arc<AppState>>,
    user: RequireRole<AnyRole>,
    Query(query): Query<ReportQuery>,
) -> ApiResult<Json<ApiResponse<Vec<MonthBucket>>>> {
    let requests = load_scoped(&state, &user, query).await?;
    Ok(Json(ApiResponse::ok(monthly(&requests, Utc::now()))))
}

pub fn configure_report_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/reports/summary", get(handle_summary))
        .route("/api/reports/weekly", get(handle_weekly))
        .route("/api/reports/monthly", get(handle_monthly))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared::models::RequestCategory;
    use chrono::TimeZone;

    fn request(status: TaskStatus, created: DateTime<Utc>, due: Option<DateTime<Utc>>) -> ServiceRequest {
        ServiceRequest {
            id: Uuid::new_v4(),
            service_queue_id: format!("SR-{}", Uuid::new_v4().simple()),
            client: "Jordan".into(),
            company_id: Uuid::nil(),
            task_status: status,
            service_request_narrative: "Billing question".into(),
            service_queue_category: RequestCategory::Billing,
            assigned_to_id: None,
            assigned_by_id: Uuid::nil(),
            due_date: due,
            modified_by_id: None,
            created_at: created,
            updated_at: created,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_summary_counts_past_due_excluding_closed() {
        let now = now();
        let past = now - Duration::days(2);
        let requests = vec![
            request(TaskStatus::New, past, Some(past)),
            request(TaskStatus::Open, past, None),
            request(TaskStatus::InProgress, past, Some(now + Duration::days(1))),
            request(TaskStatus::Closed, past, Some(past)),
        ];
        let report = summary(&requests, now);
        assert_eq!(report.total, 4);
        assert_eq!(report.wip, 2);
        assert_eq!(report.past_due, 1);
        assert_eq!(report.counts.closed, 1);
        assert_eq!(summary(&requests, now), report);
    }

    #[test]
    fn test_percent_change_edges() {
        assert_eq!(percent_change(0, 0), 0.0);
        assert_eq!(percent_change(0, 3), 100.0);
        assert_eq!(percent_change(4, 2), -50.0);
        assert_eq!(percent_change(3, 4), 33.3);
    }

    #[test]
    fn test_weekly_splits_windows() {
        let now = now();
        let requests = vec![
            request(TaskStatus::New, now - Duration::days(1), None),
            request(TaskStatus::New, now - Duration::days(3), None),
            request(TaskStatus::New, now - Duration::days(9), None),
            request(TaskStatus::Closed, now - Duration::days(10), None),
            request(TaskStatus::Closed, now - Duration::days(30), None),
        ];
        let report = weekly(&requests, now);
        let new = &report.statuses[0];
        assert_eq!((new.current, new.previous), (2, 1));
        assert_eq!(new.change_percent, 100.0);
        let closed = &report.statuses[3];
        assert_eq!((closed.current, closed.previous), (0, 1));
        assert_eq!(closed.change_percent, -100.0);
        let open = &report.statuses[1];
        assert_eq!(open.change_percent, 0.0);
    }

    #[test]
    fn test_monthly_spans_twelve_months_oldest_first() {
        let now = now();
        let requests = vec![
            request(TaskStatus::Open, Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(), None),
            request(TaskStatus::Closed, Utc.with_ymd_and_hms(2025, 4, 30, 23, 0, 0).unwrap(), None),
            request(TaskStatus::Closed, Utc.with_ymd_and_hms(2025, 3, 31, 0, 0, 0).unwrap(), None),
        ];
        let buckets = monthly(&requests, now);
        assert_eq!(buckets.len(), 12);
        assert_eq!(buckets[0].month, "2025-04");
        assert_eq!(buckets[11].month, "2026-03");
        assert_eq!(buckets[0].counts.closed, 1);
        assert_eq!(buckets[11].counts.open, 1);
        assert_eq!(buckets.iter().map(|b| b.total).sum::<i64>(), 2);
    }

    #[test]
    fn test_month_start_crosses_year_boundary() {
        let jan = Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap();
        assert_eq!(
            month_start(jan, 1),
            NaiveDate::from_ymd_opt(2025, 12, 1)
        );
    }
}
