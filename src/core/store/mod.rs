//! Persistence seam.
//!
//! Handlers and workflow code only ever talk to `dyn Store`. `PgStore` is the
//! production implementation; `MemoryStore` enforces the same constraints in
//! process for tests and `memory://` demos.

pub mod memory;
pub mod postgres;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::core::scope::RequestScope;
use crate::core::shared::models::{
    ActivityLog, Agent, Company, Notification, RequestAttachment, RequestNote, Role,
    ServiceRequest, TaskStatus, User,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Columns carrying a uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniqueField {
    CompanyCode,
    CompanyEmail,
    Email,
    LoginCode,
    ServiceQueueId,
    AgentUser,
    StoredName,
}

impl UniqueField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CompanyCode => "company_code",
            Self::CompanyEmail => "company_email",
            Self::Email => "email",
            Self::LoginCode => "login_code",
            Self::ServiceQueueId => "service_queue_id",
            Self::AgentUser => "agent_user",
            Self::StoredName => "stored_name",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::CompanyCode => "company code",
            Self::CompanyEmail => "company email",
            Self::Email => "email",
            Self::LoginCode => "login code",
            Self::ServiceQueueId => "service queue id",
            Self::AgentUser => "agent user",
            Self::StoredName => "attachment name",
        }
    }

    /// Maps the constraint names declared in the initial migration.
    pub fn from_constraint(name: &str) -> Option<Self> {
        match name {
            "companies_company_code_key" => Some(Self::CompanyCode),
            "companies_email_key" => Some(Self::CompanyEmail),
            "users_email_key" => Some(Self::Email),
            "users_login_code_key" => Some(Self::LoginCode),
            "service_requests_service_queue_id_key" => Some(Self::ServiceQueueId),
            "agents_user_id_key" => Some(Self::AgentUser),
            "request_attachments_stored_key" => Some(Self::StoredName),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("unique constraint violated on {}", .0.as_str())]
    UniqueViolation(UniqueField),

    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("database error: {0}")]
    Database(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<diesel::result::Error> for StoreError {
    fn from(err: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};
        match err {
            Error::NotFound => Self::NotFound,
            Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                match info.constraint_name().and_then(UniqueField::from_constraint) {
                    Some(field) => Self::UniqueViolation(field),
                    None => Self::Database(info.message().to_string()),
                }
            }
            Error::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, info) => {
                Self::ForeignKeyViolation(info.message().to_string())
            }
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<diesel::r2d2::PoolError> for StoreError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub status: Option<TaskStatus>,
    /// Case-insensitive substring of `client`.
    pub client: Option<String>,
    pub assigned_to: Option<Uuid>,
    /// Narrows within the caller's scope; never widens it.
    pub company_id: Option<Uuid>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    /// Matched against queue id, client, narrative and company name.
    pub search: Option<String>,
    /// When set, only requests overdue at this instant.
    pub overdue_at: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

/// A listed request joined with its company's display name.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRow {
    #[serde(flatten)]
    pub request: ServiceRequest,
    pub company_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub company_id: Option<Uuid>,
    /// Empty means every role.
    pub roles: Vec<Role>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    pub company_id: Option<Uuid>,
    pub request_id: Option<Uuid>,
    pub limit: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompanyDeletion {
    /// Ids of the users removed with the company.
    Deleted(Vec<Uuid>),
    HasRequests(i64),
    NotFound,
}

/// The query interface the service desk runs against.
///
/// Methods that touch more than one row of dependent data are atomic in
/// every implementation.
pub trait Store: Send + Sync {
    fn ping(&self) -> StoreResult<()>;

    // companies
    fn insert_company_with_user(&self, company: &Company, primary: &User) -> StoreResult<()>;
    fn update_company_with_user(&self, company: &Company, primary: Option<&User>)
        -> StoreResult<()>;
    fn update_company_code(&self, company_id: Uuid, code: &str) -> StoreResult<()>;
    fn find_company(&self, id: Uuid) -> StoreResult<Option<Company>>;
    fn find_company_by_code(&self, code: &str) -> StoreResult<Option<Company>>;
    fn list_companies(&self, search: Option<&str>) -> StoreResult<Vec<Company>>;
    /// Refuses while requests exist; otherwise removes the company, its users,
    /// and the company id from every agent's assignment list.
    fn delete_company(&self, id: Uuid) -> StoreResult<CompanyDeletion>;

    // users
    fn insert_user(&self, user: &User) -> StoreResult<()>;
    fn update_user(&self, user: &User) -> StoreResult<()>;
    fn update_login_code(&self, user_id: Uuid, code: &str) -> StoreResult<()>;
    fn find_user(&self, id: Uuid) -> StoreResult<Option<User>>;
    fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    fn find_user_by_login_code(&self, code: &str) -> StoreResult<Option<User>>;
    fn list_users(&self, filter: &UserFilter) -> StoreResult<Vec<User>>;
    fn count_users_with_role(&self, role: Role) -> StoreResult<i64>;
    /// Whether the user created requests or wrote notes or attachments.
    fn user_has_authored_records(&self, user_id: Uuid) -> StoreResult<bool>;
    fn delete_user(&self, id: Uuid) -> StoreResult<bool>;

    // agents
    fn insert_agent_with_user(&self, agent: &Agent, user: &User) -> StoreResult<()>;
    fn update_agent_with_user(&self, agent: &Agent, user: &User) -> StoreResult<()>;
    fn find_agent(&self, id: Uuid) -> StoreResult<Option<Agent>>;
    fn find_agent_by_user(&self, user_id: Uuid) -> StoreResult<Option<Agent>>;
    fn list_agents(&self) -> StoreResult<Vec<(Agent, User)>>;
    /// Unassigns the agent's requests, then removes the agent and its user.
    fn delete_agent(&self, id: Uuid) -> StoreResult<bool>;

    // service requests
    fn insert_request(&self, request: &ServiceRequest) -> StoreResult<()>;
    fn update_request(&self, request: &ServiceRequest) -> StoreResult<()>;
    fn find_request(&self, id: Uuid) -> StoreResult<Option<ServiceRequest>>;
    fn list_requests(
        &self,
        scope: &RequestScope,
        filter: &RequestFilter,
    ) -> StoreResult<Vec<RequestRow>>;
    /// Every request in scope, unpaginated, for reporting.
    fn scoped_requests(
        &self,
        scope: &RequestScope,
        company_id: Option<Uuid>,
    ) -> StoreResult<Vec<ServiceRequest>>;
    /// Removes the request with its notes and attachment rows, returning the
    /// attachments so their blobs can be cleaned up.
    fn delete_request(&self, id: Uuid) -> StoreResult<Vec<RequestAttachment>>;

    // notes
    fn insert_note(&self, note: &RequestNote) -> StoreResult<()>;
    fn list_notes(&self, request_id: Uuid, include_internal: bool)
        -> StoreResult<Vec<RequestNote>>;

    // attachments
    fn insert_attachment(&self, attachment: &RequestAttachment) -> StoreResult<()>;
    fn list_attachments(&self, request_id: Uuid) -> StoreResult<Vec<RequestAttachment>>;
    fn find_attachment(
        &self,
        request_id: Uuid,
        stored_name: &str,
    ) -> StoreResult<Option<RequestAttachment>>;

    // activity
    fn insert_activity(&self, entry: &ActivityLog) -> StoreResult<()>;
    fn list_activity(&self, filter: &ActivityFilter) -> StoreResult<Vec<ActivityLog>>;

    // notifications
    fn insert_notification(&self, notification: &Notification) -> StoreResult<()>;
    fn list_notifications(
        &self,
        user_id: Uuid,
        unread_only: bool,
        limit: i64,
    ) -> StoreResult<Vec<Notification>>;
    fn count_unread(&self, user_id: Uuid) -> StoreResult<i64>;
    fn mark_notification_read(&self, user_id: Uuid, id: Uuid) -> StoreResult<bool>;
    fn mark_all_read(&self, user_id: Uuid) -> StoreResult<usize>;
}
