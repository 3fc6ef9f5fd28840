use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use super::enums::{ActivityType, RequestCategory, Role, TaskStatus};
pub use super::schema;

use super::schema::{
    activity_logs, agents, companies, notifications, request_attachments, request_notes,
    service_requests, users,
};

/// Tenant root. Owns users and service requests by foreign key.
#[derive(
    Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable, Insertable, AsChangeset,
)]
#[diesel(table_name = companies)]
#[diesel(treat_none_as_null = true)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub id: Uuid,
    pub company_name: String,
    pub company_code: String,
    pub primary_contact: String,
    pub phone: Option<String>,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(
    Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable, Insertable, AsChangeset,
)]
#[diesel(table_name = users)]
#[diesel(treat_none_as_null = true)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub login_code: Option<String>,
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub role: Role,
    pub company_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// One-to-one extension of a `User` whose role is `agent`.
#[derive(
    Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable, Insertable, AsChangeset,
)]
#[diesel(table_name = agents)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub assigned_company_ids: Vec<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn services_company(&self, company_id: Uuid) -> bool {
        self.assigned_company_ids.contains(&company_id)
    }
}

#[derive(
    Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable, Insertable, AsChangeset,
)]
#[diesel(table_name = service_requests)]
#[diesel(treat_none_as_null = true)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRequest {
    pub id: Uuid,
    pub service_queue_id: String,
    pub client: String,
    pub company_id: Uuid,
    pub task_status: TaskStatus,
    pub service_request_narrative: String,
    pub service_queue_category: RequestCategory,
    pub assigned_to_id: Option<Uuid>,
    pub assigned_by_id: Uuid,
    pub due_date: Option<DateTime<Utc>>,
    pub modified_by_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceRequest {
    /// Derived, never stored: past its due date and not closed.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        match self.due_date {
            Some(due) => due < now && self.task_status != TaskStatus::Closed,
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = request_notes)]
#[serde(rename_all = "camelCase")]
pub struct RequestNote {
    pub id: Uuid,
    pub request_id: Uuid,
    pub author_id: Uuid,
    pub note_content: String,
    pub is_internal: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = request_attachments)]
#[serde(rename_all = "camelCase")]
pub struct RequestAttachment {
    pub id: Uuid,
    pub request_id: Uuid,
    /// Original name as uploaded, used for display and download.
    pub file_name: String,
    /// Collision-free name the blob is stored under.
    pub stored_name: String,
    pub file_path: String,
    pub file_size: i64,
    pub mime_type: String,
    pub uploaded_by_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = activity_logs)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLog {
    pub id: Uuid,
    pub activity_type: ActivityType,
    pub description: String,
    pub actor_id: Option<Uuid>,
    pub company_id: Option<Uuid>,
    pub request_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl ActivityLog {
    pub fn new(activity_type: ActivityType, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            activity_type,
            description: description.into(),
            actor_id: None,
            company_id: None,
            request_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_actor(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn with_company(mut self, company_id: Uuid) -> Self {
        self.company_id = Some(company_id);
        self
    }

    pub fn with_request(mut self, request_id: Uuid) -> Self {
        self.request_id = Some(request_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = notifications)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(user_id: Uuid, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            title: title.into(),
            message: message.into(),
            link: None,
            is_read: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }
}

/// Envelope for successful JSON responses.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn request(status: TaskStatus, due: Option<DateTime<Utc>>) -> ServiceRequest {
        let now = Utc::now();
        ServiceRequest {
            id: Uuid::new_v4(),
            service_queue_id: "SR-260101-AAAAA".into(),
            client: "Jane Roe".into(),
            company_id: Uuid::new_v4(),
            task_status: status,
            service_request_narrative: "Add vehicle to policy".into(),
            service_queue_category: RequestCategory::PolicyChange,
            assigned_to_id: None,
            assigned_by_id: Uuid::new_v4(),
            due_date: due,
            modified_by_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_overdue_requires_past_due_and_not_closed() {
        let now = Utc::now();
        let yesterday = now - Duration::days(1);
        let tomorrow = now + Duration::days(1);

        assert!(request(TaskStatus::Open, Some(yesterday)).is_overdue(now));
        assert!(request(TaskStatus::New, Some(yesterday)).is_overdue(now));
        assert!(!request(TaskStatus::Closed, Some(yesterday)).is_overdue(now));
        assert!(!request(TaskStatus::Open, Some(tomorrow)).is_overdue(now));
        assert!(!request(TaskStatus::Open, None).is_overdue(now));
    }

    #[test]
    fn test_password_hash_is_never_serialized() {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            first_name: "Root".into(),
            last_name: "Admin".into(),
            email: "root@example.com".into(),
            login_code: None,
            password_hash: Some("$argon2id$secret".into()),
            role: Role::SuperAdmin,
            company_id: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("passwordHash").is_none());
        assert_eq!(json["role"], "super_admin");
    }
}
