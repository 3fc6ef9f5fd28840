//! Post-commit side effects.
//!
//! Workflow operations never write audit rows, inbox entries or emails
//! themselves. They return an `Outcome` whose `events` the handler passes to
//! `NotificationDispatcher::dispatch` once the primary write has succeeded.
//! Every step here is best effort: failures are logged and dropped.

pub mod email;
pub mod handlers;

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::shared::models::{
    ActivityLog, ActivityType, Company, Notification, RequestNote, ServiceRequest, TaskStatus,
    User,
};
use crate::core::store::Store;
use email::{Mailer, OutgoingEmail, TemplateRenderer};

pub use handlers::configure_notification_routes;

/// Result of a workflow operation plus the side effects it asks for.
#[derive(Debug)]
#[must_use]
pub struct Outcome<T> {
    pub value: T,
    pub events: Vec<WorkflowEvent>,
}

impl<T> Outcome<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            events: Vec::new(),
        }
    }

    pub fn with_event(mut self, event: WorkflowEvent) -> Self {
        self.events.push(event);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    RequestCreated {
        request: ServiceRequest,
        actor_id: Uuid,
    },
    RequestUpdated {
        request: ServiceRequest,
        actor_id: Uuid,
    },
    RequestAssigned {
        request: ServiceRequest,
        actor_id: Uuid,
    },
    StatusChanged {
        request: ServiceRequest,
        actor_id: Uuid,
        from: TaskStatus,
    },
    RequestDeleted {
        request: ServiceRequest,
        actor_id: Uuid,
    },
    NoteAdded {
        request: ServiceRequest,
        note: RequestNote,
    },
    AttachmentsAdded {
        request: ServiceRequest,
        actor_id: Uuid,
        file_names: Vec<String>,
    },
    CompanyCreated {
        company: Company,
        primary: User,
        actor_id: Uuid,
    },
    CompanyUpdated {
        company: Company,
        actor_id: Uuid,
    },
    CompanyDeleted {
        company: Company,
        actor_id: Uuid,
    },
    UserCreated {
        user: User,
        actor_id: Uuid,
    },
    UserUpdated {
        user: User,
        actor_id: Uuid,
    },
    UserDeleted {
        user: User,
        actor_id: Uuid,
    },
    LoginCodeIssued {
        user: User,
        actor_id: Uuid,
    },
    AgentCreated {
        user: User,
        actor_id: Uuid,
    },
    AgentUpdated {
        user: User,
        actor_id: Uuid,
    },
    AgentDeleted {
        user: User,
        actor_id: Uuid,
    },
}

/// Inbox and email content for request events.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub template: &'static str,
    pub title: String,
    pub message: String,
    pub link: String,
    pub vars: BTreeMap<&'static str, String>,
}

impl WorkflowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RequestCreated { .. } => "request_created",
            Self::RequestUpdated { .. } => "request_updated",
            Self::RequestAssigned { .. } => "request_assigned",
            Self::StatusChanged { .. } => "status_changed",
            Self::RequestDeleted { .. } => "request_deleted",
            Self::NoteAdded { .. } => "note_added",
            Self::AttachmentsAdded { .. } => "attachment_added",
            Self::CompanyCreated { .. } => "company_created",
            Self::CompanyUpdated { .. } => "company_updated",
            Self::CompanyDeleted { .. } => "company_deleted",
            Self::UserCreated { .. } => "user_created",
            Self::UserUpdated { .. } => "user_updated",
            Self::UserDeleted { .. } => "user_deleted",
            Self::LoginCodeIssued { .. } => "login_code_issued",
            Self::AgentCreated { .. } => "agent_created",
            Self::AgentUpdated { .. } => "agent_updated",
            Self::AgentDeleted { .. } => "agent_deleted",
        }
    }

    fn actor_id(&self) -> Uuid {
        match self {
            Self::NoteAdded { note, .. } => note.author_id,
            Self::RequestCreated { actor_id, .. }
            | Self::RequestUpdated { actor_id, .. }
            | Self::RequestAssigned { actor_id, .. }
            | Self::StatusChanged { actor_id, .. }
            | Self::RequestDeleted { actor_id, .. }
            | Self::AttachmentsAdded { actor_id, .. }
            | Self::CompanyCreated { actor_id, .. }
            | Self::CompanyUpdated { actor_id, .. }
            | Self::CompanyDeleted { actor_id, .. }
            | Self::UserCreated { actor_id, .. }
            | Self::UserUpdated { actor_id, .. }
            | Self::UserDeleted { actor_id, .. }
            | Self::LoginCodeIssued { actor_id, .. }
            | Self::AgentCreated { actor_id, .. }
            | Self::AgentUpdated { actor_id, .. }
            | Self::AgentDeleted { actor_id, .. } => *actor_id,
        }
    }

    /// Audit row for the event. Deleted rows are described but not
    /// referenced, since the reference would dangle.
    pub fn activity(&self) -> ActivityLog {
        let actor = self.actor_id();
        let on_request = |kind: ActivityType, request: &ServiceRequest, text: String| {
            ActivityLog::new(kind, text)
                .with_actor(actor)
                .with_company(request.company_id)
                .with_request(request.id)
        };
        match self {
            Self::RequestCreated { request, .. } => on_request(
                ActivityType::RequestCreated,
                request,
                format!(
                    "Service request {} created for {}",
                    request.service_queue_id, request.client
                ),
            ),
            Self::RequestUpdated { request, .. } => on_request(
                ActivityType::RequestUpdated,
                request,
                format!("Service request {} updated", request.service_queue_id),
            ),
            Self::RequestAssigned { request, .. } => on_request(
                ActivityType::RequestAssigned,
                request,
                match request.assigned_to_id {
                    Some(_) => format!("Service request {} assigned", request.service_queue_id),
                    None => format!("Service request {} unassigned", request.service_queue_id),
                },
            ),
            Self::StatusChanged { request, from, .. } => {
                let kind = if request.task_status.rank() < from.rank() {
                    ActivityType::RequestReopened
                } else {
                    ActivityType::StatusChanged
                };
                on_request(
                    kind,
                    request,
                    format!(
                        "Service request {} moved from {} to {}",
                        request.service_queue_id,
                        from.label(),
                        request.task_status.label()
                    ),
                )
            }
            Self::RequestDeleted { request, .. } => {
                ActivityLog::new(
                    ActivityType::RequestDeleted,
                    format!("Service request {} deleted", request.service_queue_id),
                )
                .with_actor(actor)
                .with_company(request.company_id)
            }
            Self::NoteAdded { request, note } => on_request(
                ActivityType::NoteAdded,
                request,
                if note.is_internal {
                    format!("Internal note added to {}", request.service_queue_id)
                } else {
                    format!("Note added to {}", request.service_queue_id)
                },
            ),
            Self::AttachmentsAdded {
                request,
                file_names,
                ..
            } => on_request(
                ActivityType::AttachmentAdded,
                request,
                format!(
                    "{} attached to {}",
                    file_names.join(", "),
                    request.service_queue_id
                ),
            ),
            Self::CompanyCreated { company, .. } => ActivityLog::new(
                ActivityType::CompanyCreated,
                format!("Company {} created", company.company_name),
            )
            .with_actor(actor)
            .with_company(company.id),
            Self::CompanyUpdated { company, .. } => ActivityLog::new(
                ActivityType::CompanyUpdated,
                format!("Company {} updated", company.company_name),
            )
            .with_actor(actor)
            .with_company(company.id),
            Self::CompanyDeleted { company, .. } => ActivityLog::new(
                ActivityType::CompanyDeleted,
                format!("Company {} deleted", company.company_name),
            )
            .with_actor(actor),
            Self::UserCreated { user, .. } => {
                user_activity(ActivityType::UserCreated, "created", user, actor, "User")
            }
            Self::UserUpdated { user, .. } => {
                user_activity(ActivityType::UserUpdated, "updated", user, actor, "User")
            }
            Self::LoginCodeIssued { user, .. } => user_activity(
                ActivityType::UserUpdated,
                "issued a new login code",
                user,
                actor,
                "User",
            ),
            Self::UserDeleted { user, .. } => {
                user_activity(ActivityType::UserDeleted, "deleted", user, actor, "User")
            }
            Self::AgentCreated { user, .. } => {
                user_activity(ActivityType::AgentCreated, "created", user, actor, "Agent")
            }
            Self::AgentUpdated { user, .. } => {
                user_activity(ActivityType::AgentUpdated, "updated", user, actor, "Agent")
            }
            Self::AgentDeleted { user, .. } => {
                user_activity(ActivityType::AgentDeleted, "deleted", user, actor, "Agent")
            }
        }
    }

    /// Inbox recipients before role filtering: never the actor, no repeats.
    pub fn recipients(&self) -> Vec<Uuid> {
        let actor = self.actor_id();
        let candidates: Vec<Option<Uuid>> = match self {
            Self::RequestCreated { request, .. } | Self::RequestAssigned { request, .. } => {
                vec![request.assigned_to_id]
            }
            Self::StatusChanged { request, .. }
            | Self::NoteAdded { request, .. }
            | Self::AttachmentsAdded { request, .. } => {
                vec![request.assigned_to_id, Some(request.assigned_by_id)]
            }
            _ => Vec::new(),
        };
        let mut out: Vec<Uuid> = Vec::new();
        for id in candidates.into_iter().flatten() {
            if id != actor && !out.contains(&id) {
                out.push(id);
            }
        }
        out
    }

    /// Internal notes must not reach customer-facing roles.
    pub fn hidden_from_customers(&self) -> bool {
        matches!(self, Self::NoteAdded { note, .. } if note.is_internal)
    }

    pub fn notice(&self, base_url: &str) -> Option<Notice> {
        let (request, title, message) = match self {
            Self::RequestCreated { request, .. } => (
                request,
                format!("New service request {}", request.service_queue_id),
                format!(
                    "{} opened a {} request: {}",
                    request.client,
                    request.service_queue_category.label(),
                    excerpt(&request.service_request_narrative)
                ),
            ),
            Self::RequestAssigned { request, .. } => (
                request,
                format!("Service request {} assigned to you", request.service_queue_id),
                format!("You are now responsible for the request from {}.", request.client),
            ),
            Self::StatusChanged { request, from, .. } => (
                request,
                format!("Service request {} is {}", request.service_queue_id, request.task_status.label()),
                format!(
                    "Status changed from {} to {}.",
                    from.label(),
                    request.task_status.label()
                ),
            ),
            Self::NoteAdded { request, note } => (
                request,
                format!("New note on {}", request.service_queue_id),
                excerpt(&note.note_content),
            ),
            Self::AttachmentsAdded {
                request,
                file_names,
                ..
            } => (
                request,
                format!("New attachment on {}", request.service_queue_id),
                format!("Files added: {}", file_names.join(", ")),
            ),
            _ => return None,
        };
        let link = format!("{}/requests/{}", base_url, request.id);
        let vars = BTreeMap::from([
            ("service_queue_id", request.service_queue_id.clone()),
            ("client", request.client.clone()),
            ("status", request.task_status.label().to_string()),
            ("category", request.service_queue_category.label().to_string()),
            ("title", title.clone()),
            ("message", message.clone()),
            ("link", link.clone()),
        ]);
        Some(Notice {
            template: self.name(),
            title,
            message,
            link,
            vars,
        })
    }

    /// The user who should receive a welcome email carrying their login code.
    pub fn welcome_target(&self) -> Option<&User> {
        match self {
            Self::CompanyCreated { primary, .. } => Some(primary),
            Self::UserCreated { user, .. }
            | Self::AgentCreated { user, .. }
            | Self::LoginCodeIssued { user, .. } => Some(user),
            _ => None,
        }
    }
}

fn user_activity(
    kind: ActivityType,
    verb: &str,
    user: &User,
    actor: Uuid,
    label: &str,
) -> ActivityLog {
    let entry = ActivityLog::new(kind, format!("{label} {} {verb}", user.email)).with_actor(actor);
    match user.company_id {
        Some(company_id) => entry.with_company(company_id),
        None => entry,
    }
}

fn excerpt(text: &str) -> String {
    const MAX: usize = 160;
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(MAX).collect();
        format!("{}...", cut.trim_end())
    }
}

const WELCOME_TEMPLATE: &str = "Hello {{first_name}},

An account has been set up for you ({{email}}, role {{role}}).

Your login code is: {{login_code}}

Sign in at {{app_url}}

Keep this code private; it works like a password.";

const NOTICE_TEMPLATE: &str = "{{title}}

{{message}}

Client: {{client}}
Status: {{status}}

Open the request: {{link}}";

/// Runs side effects off the request path.
#[derive(Clone)]
pub struct NotificationDispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn Store>,
    mailer: Arc<dyn Mailer>,
    templates: TemplateRenderer,
    base_url: String,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        mailer: Arc<dyn Mailer>,
        templates: TemplateRenderer,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                mailer,
                templates,
                base_url: base_url.into(),
            }),
        }
    }

    /// Fire and forget. The handle is only useful to tests that want to wait.
    pub fn dispatch(&self, events: Vec<WorkflowEvent>) -> Option<JoinHandle<()>> {
        if events.is_empty() {
            return None;
        }
        let this = self.clone();
        Some(tokio::spawn(async move { this.deliver(events).await }))
    }

    /// Dispatches the outcome's events and hands back its value.
    pub fn complete<T>(&self, outcome: Outcome<T>) -> T {
        self.dispatch(outcome.events);
        outcome.value
    }

    pub async fn deliver(&self, events: Vec<WorkflowEvent>) {
        for event in events {
            debug!("Dispatching {}", event.name());
            self.record_activity(&event);
            self.notify_recipients(&event).await;
            self.send_welcome(&event).await;
        }
    }

    fn record_activity(&self, event: &WorkflowEvent) {
        if let Err(e) = self.inner.store.insert_activity(&event.activity()) {
            warn!("Failed to record {} activity: {e}", event.name());
        }
    }

    async fn notify_recipients(&self, event: &WorkflowEvent) {
        let Some(notice) = event.notice(&self.inner.base_url) else {
            return;
        };
        for user_id in event.recipients() {
            let user = match self.inner.store.find_user(user_id) {
                Ok(Some(user)) if user.is_active => user,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Could not load notification recipient {user_id}: {e}");
                    continue;
                }
            };
            if event.hidden_from_customers() && user.role.is_customer_facing() {
                continue;
            }

            let inbox = Notification::new(user.id, notice.title.clone(), notice.message.clone())
                .with_link(notice.link.clone());
            if let Err(e) = self.inner.store.insert_notification(&inbox) {
                warn!("Failed to store notification for {}: {e}", user.email);
            }

            let mut vars = notice.vars.clone();
            vars.insert("first_name", user.first_name.clone());
            let body = self
                .inner
                .templates
                .render(notice.template, &vars, NOTICE_TEMPLATE)
                .await;
            self.send(OutgoingEmail {
                to: user.email.clone(),
                subject: notice.title.clone(),
                body,
            })
            .await;
        }
    }

    async fn send_welcome(&self, event: &WorkflowEvent) {
        let Some(user) = event.welcome_target() else {
            return;
        };
        let Some(code) = user.login_code.clone() else {
            return;
        };
        let vars = BTreeMap::from([
            ("first_name", user.first_name.clone()),
            ("email", user.email.clone()),
            ("role", user.role.as_str().to_string()),
            ("login_code", code),
            ("app_url", self.inner.base_url.clone()),
        ]);
        let body = self
            .inner
            .templates
            .render("welcome", &vars, WELCOME_TEMPLATE)
            .await;
        self.send(OutgoingEmail {
            to: user.email.clone(),
            subject: "Your service desk access".to_string(),
            body,
        })
        .await;
    }

    async fn send(&self, email: OutgoingEmail) {
        if let Err(e) = self.inner.mailer.send(&email).await {
            warn!("Email to {} failed: {e}", email.to);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared::models::RequestCategory;
    use chrono::Utc;

    fn request(assigned_to: Option<Uuid>, assigned_by: Uuid) -> ServiceRequest {
        let now = Utc::now();
        ServiceRequest {
            id: Uuid::new_v4(),
            service_queue_id: "SR-260101-QWERT".into(),
            client: "Pat Doe".into(),
            company_id: Uuid::new_v4(),
            task_status: TaskStatus::Open,
            service_request_narrative: "Please renew the fleet policy".into(),
            service_queue_category: RequestCategory::Renewal,
            assigned_to_id: assigned_to,
            assigned_by_id: assigned_by,
            due_date: None,
            modified_by_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn note(request: &ServiceRequest, author: Uuid, internal: bool) -> RequestNote {
        RequestNote {
            id: Uuid::new_v4(),
            request_id: request.id,
            author_id: author,
            note_content: "Called the carrier".into(),
            is_internal: internal,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_status_change_notifies_both_parties_except_actor() {
        let assignee = Uuid::new_v4();
        let creator = Uuid::new_v4();
        let r = request(Some(assignee), creator);

        let by_assignee = WorkflowEvent::StatusChanged {
            request: r.clone(),
            actor_id: assignee,
            from: TaskStatus::New,
        };
        assert_eq!(by_assignee.recipients(), vec![creator]);

        let by_admin = WorkflowEvent::StatusChanged {
            request: r,
            actor_id: Uuid::new_v4(),
            from: TaskStatus::New,
        };
        assert_eq!(by_admin.recipients(), vec![assignee, creator]);
    }

    #[test]
    fn test_self_assigned_creator_gets_single_entry() {
        let same = Uuid::new_v4();
        let r = request(Some(same), same);
        let event = WorkflowEvent::NoteAdded {
            note: note(&r, Uuid::new_v4(), false),
            request: r,
        };
        assert_eq!(event.recipients(), vec![same]);
    }

    #[test]
    fn test_note_author_is_excluded() {
        let assignee = Uuid::new_v4();
        let creator = Uuid::new_v4();
        let r = request(Some(assignee), creator);
        let event = WorkflowEvent::NoteAdded {
            note: note(&r, creator, true),
            request: r,
        };
        assert_eq!(event.recipients(), vec![assignee]);
        assert!(event.hidden_from_customers());
    }

    #[test]
    fn test_backward_move_is_logged_as_reopen() {
        let mut r = request(None, Uuid::new_v4());
        r.task_status = TaskStatus::Open;
        let event = WorkflowEvent::StatusChanged {
            request: r,
            actor_id: Uuid::new_v4(),
            from: TaskStatus::Closed,
        };
        assert_eq!(event.activity().activity_type, ActivityType::RequestReopened);
    }

    #[test]
    fn test_deleted_request_activity_has_no_request_reference() {
        let r = request(None, Uuid::new_v4());
        let event = WorkflowEvent::RequestDeleted {
            request: r.clone(),
            actor_id: Uuid::new_v4(),
        };
        let entry = event.activity();
        assert_eq!(entry.request_id, None);
        assert_eq!(entry.company_id, Some(r.company_id));
    }

    #[test]
    fn test_notice_links_to_request() {
        let r = request(Some(Uuid::new_v4()), Uuid::new_v4());
        let event = WorkflowEvent::RequestAssigned {
            request: r.clone(),
            actor_id: Uuid::new_v4(),
        };
        let notice = event.notice("https://desk.example").unwrap();
        assert_eq!(notice.link, format!("https://desk.example/requests/{}", r.id));
        assert_eq!(notice.template, "request_assigned");
        assert!(notice.title.contains("SR-260101-QWERT"));
    }

    #[test]
    fn test_excerpt_truncates_long_text() {
        let long = "x".repeat(400);
        let short = excerpt(&long);
        assert!(short.ends_with("..."));
        assert_eq!(short.chars().count(), 163);
    }
}
