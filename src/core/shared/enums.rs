//! Database enum types for the service desk schema.
//!
//! Each enum is stored as its snake_case name in a `VARCHAR` column, so the
//! database stays readable from `psql` while the Rust side only ever sees the
//! closed set of variants.

use diesel::deserialize::{self, FromSql};
use diesel::pg::{Pg, PgValue};
use diesel::serialize::{self, Output, ToSql};
use diesel::sql_types::Text;
use diesel::{AsExpression, FromSqlRow};
use serde::{Deserialize, Serialize};
use std::io::Write;

macro_rules! text_column_enum {
    ($name:ident) => {
        impl ToSql<Text, Pg> for $name {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
                out.write_all(self.as_str().as_bytes())?;
                Ok(serialize::IsNull::No)
            }
        }

        impl FromSql<Text, Pg> for $name {
            fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
                let value = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
                value.parse::<$name>().map_err(Into::into)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// ============================================================================
// ROLE
// ============================================================================

/// Role carried by every user and every session token.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Agent,
    CustomerAdmin,
    Customer,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::SuperAdmin,
        Role::Agent,
        Role::CustomerAdmin,
        Role::Customer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::Agent => "agent",
            Self::CustomerAdmin => "customer_admin",
            Self::Customer => "customer",
        }
    }

    /// Roles that belong to exactly one company.
    pub fn is_tenant_bound(&self) -> bool {
        matches!(self, Self::CustomerAdmin | Self::Customer)
    }

    pub fn is_customer_facing(&self) -> bool {
        self.is_tenant_bound()
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "super_admin" | "superadmin" => Ok(Self::SuperAdmin),
            "agent" => Ok(Self::Agent),
            "customer_admin" => Ok(Self::CustomerAdmin),
            "customer" => Ok(Self::Customer),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

text_column_enum!(Role);

// ============================================================================
// TASK STATUS
// ============================================================================

/// Lifecycle state of a service request.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    New,
    Open,
    InProgress,
    Closed,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::New
    }
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::New,
        TaskStatus::Open,
        TaskStatus::InProgress,
        TaskStatus::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Closed => "closed",
        }
    }

    /// Position in the intended new -> open -> in_progress -> closed order.
    pub fn rank(&self) -> u8 {
        match self {
            Self::New => 0,
            Self::Open => 1,
            Self::InProgress => 2,
            Self::Closed => 3,
        }
    }

    /// Work in progress: open or in_progress.
    pub fn is_wip(&self) -> bool {
        matches!(self, Self::Open | Self::InProgress)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::New => "New",
            Self::Open => "Open",
            Self::InProgress => "In Progress",
            Self::Closed => "Closed",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "new" => Ok(Self::New),
            "open" => Ok(Self::Open),
            "in_progress" | "in-progress" | "inprogress" => Ok(Self::InProgress),
            "closed" => Ok(Self::Closed),
            _ => Err(format!("Unknown task status: {}", s)),
        }
    }
}

text_column_enum!(TaskStatus);

// ============================================================================
// SERVICE QUEUE CATEGORY
// ============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum RequestCategory {
    PolicyChange,
    NewBusiness,
    Renewal,
    Claims,
    Billing,
    CertificateRequest,
    Cancellation,
    GeneralInquiry,
}

impl RequestCategory {
    pub const ALL: [RequestCategory; 8] = [
        RequestCategory::PolicyChange,
        RequestCategory::NewBusiness,
        RequestCategory::Renewal,
        RequestCategory::Claims,
        RequestCategory::Billing,
        RequestCategory::CertificateRequest,
        RequestCategory::Cancellation,
        RequestCategory::GeneralInquiry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PolicyChange => "policy_change",
            Self::NewBusiness => "new_business",
            Self::Renewal => "renewal",
            Self::Claims => "claims",
            Self::Billing => "billing",
            Self::CertificateRequest => "certificate_request",
            Self::Cancellation => "cancellation",
            Self::GeneralInquiry => "general_inquiry",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::PolicyChange => "Policy Change",
            Self::NewBusiness => "New Business",
            Self::Renewal => "Renewal",
            Self::Claims => "Claims",
            Self::Billing => "Billing",
            Self::CertificateRequest => "Certificate Request",
            Self::Cancellation => "Cancellation",
            Self::GeneralInquiry => "General Inquiry",
        }
    }
}

impl std::str::FromStr for RequestCategory {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        Self::ALL
            .iter()
            .find(|c| c.as_str() == normalized)
            .copied()
            .ok_or_else(|| format!("Unknown service queue category: {}", s))
    }
}

text_column_enum!(RequestCategory);

// ============================================================================
// ACTIVITY TYPES
// ============================================================================

/// Audit trail event kinds written to `activity_logs`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    RequestCreated,
    RequestUpdated,
    RequestAssigned,
    StatusChanged,
    RequestReopened,
    RequestDeleted,
    NoteAdded,
    AttachmentAdded,
    CompanyCreated,
    CompanyUpdated,
    CompanyDeleted,
    UserCreated,
    UserUpdated,
    UserDeleted,
    AgentCreated,
    AgentUpdated,
    AgentDeleted,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestCreated => "request_created",
            Self::RequestUpdated => "request_updated",
            Self::RequestAssigned => "request_assigned",
            Self::StatusChanged => "status_changed",
            Self::RequestReopened => "request_reopened",
            Self::RequestDeleted => "request_deleted",
            Self::NoteAdded => "note_added",
            Self::AttachmentAdded => "attachment_added",
            Self::CompanyCreated => "company_created",
            Self::CompanyUpdated => "company_updated",
            Self::CompanyDeleted => "company_deleted",
            Self::UserCreated => "user_created",
            Self::UserUpdated => "user_updated",
            Self::UserDeleted => "user_deleted",
            Self::AgentCreated => "agent_created",
            Self::AgentUpdated => "agent_updated",
            Self::AgentDeleted => "agent_deleted",
        }
    }

    const ALL: [ActivityType; 17] = [
        Self::RequestCreated,
        Self::RequestUpdated,
        Self::RequestAssigned,
        Self::StatusChanged,
        Self::RequestReopened,
        Self::RequestDeleted,
        Self::NoteAdded,
        Self::AttachmentAdded,
        Self::CompanyCreated,
        Self::CompanyUpdated,
        Self::CompanyDeleted,
        Self::UserCreated,
        Self::UserUpdated,
        Self::UserDeleted,
        Self::AgentCreated,
        Self::AgentUpdated,
        Self::AgentDeleted,
    ];
}

impl std::str::FromStr for ActivityType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|a| a.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown activity type: {}", s))
    }
}

text_column_enum!(ActivityType);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_str() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
        }
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn test_status_rank_is_monotonic() {
        let ranks: Vec<u8> = TaskStatus::ALL.iter().map(|s| s.rank()).collect();
        assert_eq!(ranks, vec![0, 1, 2, 3]);
        assert!(TaskStatus::Open.is_wip());
        assert!(TaskStatus::InProgress.is_wip());
        assert!(!TaskStatus::New.is_wip());
    }

    #[test]
    fn test_category_parse_accepts_labels() {
        assert_eq!(
            "Certificate Request".parse::<RequestCategory>(),
            Ok(RequestCategory::CertificateRequest)
        );
        assert_eq!("claims".parse::<RequestCategory>(), Ok(RequestCategory::Claims));
        assert!("lunch".parse::<RequestCategory>().is_err());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }
}
