//! In-process store with the same uniqueness and cascade rules as the
//! Postgres schema.

use chrono::Utc;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{
    ActivityFilter, CompanyDeletion, RequestFilter, RequestRow, Store, StoreError, StoreResult,
    UniqueField, UserFilter,
};
use crate::core::scope::RequestScope;
use crate::core::shared::models::{
    ActivityLog, Agent, Company, Notification, RequestAttachment, RequestNote, Role,
    ServiceRequest, User,
};

#[derive(Debug, Default, Clone)]
struct Tables {
    companies: Vec<Company>,
    users: Vec<User>,
    agents: Vec<Agent>,
    requests: Vec<ServiceRequest>,
    notes: Vec<RequestNote>,
    attachments: Vec<RequestAttachment>,
    activity: Vec<ActivityLog>,
    notifications: Vec<Notification>,
}

impl Tables {
    fn check_company(&self, company: &Company) -> StoreResult<()> {
        for other in self.companies.iter().filter(|c| c.id != company.id) {
            if other.company_code == company.company_code {
                return Err(StoreError::UniqueViolation(UniqueField::CompanyCode));
            }
            if other.email == company.email {
                return Err(StoreError::UniqueViolation(UniqueField::CompanyEmail));
            }
        }
        Ok(())
    }

    fn check_user(&self, user: &User) -> StoreResult<()> {
        for other in self.users.iter().filter(|u| u.id != user.id) {
            if other.email == user.email {
                return Err(StoreError::UniqueViolation(UniqueField::Email));
            }
            if user.login_code.is_some() && other.login_code == user.login_code {
                return Err(StoreError::UniqueViolation(UniqueField::LoginCode));
            }
        }
        if let Some(company_id) = user.company_id {
            if !self.companies.iter().any(|c| c.id == company_id) {
                return Err(StoreError::ForeignKeyViolation(
                    "users.company_id references a missing company".into(),
                ));
            }
        }
        Ok(())
    }

    fn check_request(&self, request: &ServiceRequest) -> StoreResult<()> {
        if self
            .requests
            .iter()
            .any(|r| r.id != request.id && r.service_queue_id == request.service_queue_id)
        {
            return Err(StoreError::UniqueViolation(UniqueField::ServiceQueueId));
        }
        if !self.companies.iter().any(|c| c.id == request.company_id) {
            return Err(StoreError::ForeignKeyViolation(
                "service_requests.company_id references a missing company".into(),
            ));
        }
        Ok(())
    }

    fn upsert_user(&mut self, user: &User) -> StoreResult<()> {
        let slot = self
            .users
            .iter_mut()
            .find(|u| u.id == user.id)
            .ok_or(StoreError::NotFound)?;
        *slot = user.clone();
        Ok(())
    }

    fn request_has_assignee(&self, user_id: Uuid) -> impl Iterator<Item = usize> + '_ {
        self.requests
            .iter()
            .enumerate()
            .filter(move |(_, r)| r.assigned_to_id == Some(user_id))
            .map(|(i, _)| i)
    }

    fn remove_user(&mut self, id: Uuid) -> bool {
        let before = self.users.len();
        self.users.retain(|u| u.id != id);
        if self.users.len() == before {
            return false;
        }
        self.agents.retain(|a| a.user_id != id);
        self.notifications.retain(|n| n.user_id != id);
        let assigned: Vec<usize> = self.request_has_assignee(id).collect();
        for i in assigned {
            self.requests[i].assigned_to_id = None;
        }
        for request in self.requests.iter_mut() {
            if request.modified_by_id == Some(id) {
                request.modified_by_id = None;
            }
        }
        for entry in self.activity.iter_mut() {
            if entry.actor_id == Some(id) {
                entry.actor_id = None;
            }
        }
        true
    }
}

fn contains_ci(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}

fn in_scope(scope: &RequestScope, request: &ServiceRequest) -> bool {
    scope.permits(request)
}

/// Mutex-guarded tables. Multi-row writes work on a copy and swap it in, so a
/// failure half way leaves nothing behind.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Database("memory store lock poisoned".into()))
    }

    fn transaction<T>(&self, f: impl FnOnce(&mut Tables) -> StoreResult<T>) -> StoreResult<T> {
        let mut guard = self.lock()?;
        let mut working = guard.clone();
        let value = f(&mut working)?;
        *guard = working;
        Ok(value)
    }
}

impl Store for MemoryStore {
    fn ping(&self) -> StoreResult<()> {
        self.lock().map(|_| ())
    }

    fn insert_company_with_user(&self, company: &Company, primary: &User) -> StoreResult<()> {
        self.transaction(|t| {
            t.check_company(company)?;
            t.companies.push(company.clone());
            t.check_user(primary)?;
            t.users.push(primary.clone());
            Ok(())
        })
    }

    fn update_company_with_user(
        &self,
        company: &Company,
        primary: Option<&User>,
    ) -> StoreResult<()> {
        self.transaction(|t| {
            t.check_company(company)?;
            let slot = t
                .companies
                .iter_mut()
                .find(|c| c.id == company.id)
                .ok_or(StoreError::NotFound)?;
            *slot = company.clone();
            if let Some(user) = primary {
                t.check_user(user)?;
                t.upsert_user(user)?;
            }
            Ok(())
        })
    }

    fn update_company_code(&self, company_id: Uuid, code: &str) -> StoreResult<()> {
        self.transaction(|t| {
            let mut company = t
                .companies
                .iter()
                .find(|c| c.id == company_id)
                .cloned()
                .ok_or(StoreError::NotFound)?;
            company.company_code = code.to_string();
            company.updated_at = Utc::now();
            t.check_company(&company)?;
            if let Some(slot) = t.companies.iter_mut().find(|c| c.id == company_id) {
                *slot = company;
            }
            Ok(())
        })
    }

    fn find_company(&self, id: Uuid) -> StoreResult<Option<Company>> {
        Ok(self.lock()?.companies.iter().find(|c| c.id == id).cloned())
    }

    fn find_company_by_code(&self, code: &str) -> StoreResult<Option<Company>> {
        Ok(self
            .lock()?
            .companies
            .iter()
            .find(|c| c.company_code == code)
            .cloned())
    }

    fn list_companies(&self, search: Option<&str>) -> StoreResult<Vec<Company>> {
        let tables = self.lock()?;
        let needle = search.map(str::to_lowercase);
        let mut rows: Vec<Company> = tables
            .companies
            .iter()
            .filter(|c| match &needle {
                Some(n) => {
                    contains_ci(&c.company_name, n)
                        || contains_ci(&c.company_code, n)
                        || contains_ci(&c.email, n)
                }
                None => true,
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.company_name.cmp(&b.company_name));
        Ok(rows)
    }

    fn delete_company(&self, id: Uuid) -> StoreResult<CompanyDeletion> {
        self.transaction(|t| {
            if !t.companies.iter().any(|c| c.id == id) {
                return Ok(CompanyDeletion::NotFound);
            }
            let requests = t.requests.iter().filter(|r| r.company_id == id).count() as i64;
            if requests > 0 {
                return Ok(CompanyDeletion::HasRequests(requests));
            }
            let user_ids: Vec<Uuid> = t
                .users
                .iter()
                .filter(|u| u.company_id == Some(id))
                .map(|u| u.id)
                .collect();
            for user_id in &user_ids {
                t.remove_user(*user_id);
            }
            for agent in t.agents.iter_mut() {
                if agent.services_company(id) {
                    agent.assigned_company_ids.retain(|c| *c != id);
                    agent.updated_at = Utc::now();
                }
            }
            for entry in t.activity.iter_mut() {
                if entry.company_id == Some(id) {
                    entry.company_id = None;
                }
            }
            t.companies.retain(|c| c.id != id);
            Ok(CompanyDeletion::Deleted(user_ids))
        })
    }

    fn insert_user(&self, user: &User) -> StoreResult<()> {
        self.transaction(|t| {
            t.check_user(user)?;
            t.users.push(user.clone());
            Ok(())
        })
    }

    fn update_user(&self, user: &User) -> StoreResult<()> {
        self.transaction(|t| {
            t.check_user(user)?;
            t.upsert_user(user)
        })
    }

    fn update_login_code(&self, user_id: Uuid, code: &str) -> StoreResult<()> {
        self.transaction(|t| {
            let mut user = t
                .users
                .iter()
                .find(|u| u.id == user_id)
                .cloned()
                .ok_or(StoreError::NotFound)?;
            user.login_code = Some(code.to_string());
            user.updated_at = Utc::now();
            t.check_user(&user)?;
            t.upsert_user(&user)
        })
    }

    fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.lock()?.users.iter().find(|u| u.id == id).cloned())
    }

    fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self.lock()?.users.iter().find(|u| u.email == email).cloned())
    }

    fn find_user_by_login_code(&self, code: &str) -> StoreResult<Option<User>> {
        Ok(self
            .lock()?
            .users
            .iter()
            .find(|u| u.login_code.as_deref() == Some(code))
            .cloned())
    }

    fn list_users(&self, filter: &UserFilter) -> StoreResult<Vec<User>> {
        let tables = self.lock()?;
        let needle = filter.search.as_deref().map(str::to_lowercase);
        let mut rows: Vec<User> = tables
            .users
            .iter()
            .filter(|u| filter.company_id.map_or(true, |c| u.company_id == Some(c)))
            .filter(|u| filter.roles.is_empty() || filter.roles.contains(&u.role))
            .filter(|u| match &needle {
                Some(n) => {
                    contains_ci(&u.first_name, n)
                        || contains_ci(&u.last_name, n)
                        || contains_ci(&u.email, n)
                }
                None => true,
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    fn count_users_with_role(&self, role: Role) -> StoreResult<i64> {
        Ok(self.lock()?.users.iter().filter(|u| u.role == role).count() as i64)
    }

    fn user_has_authored_records(&self, user_id: Uuid) -> StoreResult<bool> {
        let t = self.lock()?;
        Ok(t.requests.iter().any(|r| r.assigned_by_id == user_id)
            || t.notes.iter().any(|n| n.author_id == user_id)
            || t.attachments.iter().any(|a| a.uploaded_by_id == user_id))
    }

    fn delete_user(&self, id: Uuid) -> StoreResult<bool> {
        self.transaction(|t| Ok(t.remove_user(id)))
    }

    fn insert_agent_with_user(&self, agent: &Agent, user: &User) -> StoreResult<()> {
        self.transaction(|t| {
            t.check_user(user)?;
            t.users.push(user.clone());
            if t.agents.iter().any(|a| a.user_id == agent.user_id) {
                return Err(StoreError::UniqueViolation(UniqueField::AgentUser));
            }
            t.agents.push(agent.clone());
            Ok(())
        })
    }

    fn update_agent_with_user(&self, agent: &Agent, user: &User) -> StoreResult<()> {
        self.transaction(|t| {
            let slot = t
                .agents
                .iter_mut()
                .find(|a| a.id == agent.id)
                .ok_or(StoreError::NotFound)?;
            *slot = agent.clone();
            t.check_user(user)?;
            t.upsert_user(user)
        })
    }

    fn find_agent(&self, id: Uuid) -> StoreResult<Option<Agent>> {
        Ok(self.lock()?.agents.iter().find(|a| a.id == id).cloned())
    }

    fn find_agent_by_user(&self, user_id: Uuid) -> StoreResult<Option<Agent>> {
        Ok(self
            .lock()?
            .agents
            .iter()
            .find(|a| a.user_id == user_id)
            .cloned())
    }

    fn list_agents(&self) -> StoreResult<Vec<(Agent, User)>> {
        let t = self.lock()?;
        let mut rows: Vec<(Agent, User)> = t
            .agents
            .iter()
            .filter_map(|agent| {
                t.users
                    .iter()
                    .find(|u| u.id == agent.user_id)
                    .map(|user| (agent.clone(), user.clone()))
            })
            .collect();
        rows.sort_by(|(_, a), (_, b)| {
            (a.last_name.as_str(), a.first_name.as_str())
                .cmp(&(b.last_name.as_str(), b.first_name.as_str()))
        });
        Ok(rows)
    }

    fn delete_agent(&self, id: Uuid) -> StoreResult<bool> {
        self.transaction(|t| {
            let Some(agent) = t.agents.iter().find(|a| a.id == id).cloned() else {
                return Ok(false);
            };
            let now = Utc::now();
            for request in t.requests.iter_mut() {
                if request.assigned_to_id == Some(agent.user_id) {
                    request.assigned_to_id = None;
                    request.updated_at = now;
                }
            }
            t.agents.retain(|a| a.id != id);
            t.remove_user(agent.user_id);
            Ok(true)
        })
    }

    fn insert_request(&self, request: &ServiceRequest) -> StoreResult<()> {
        self.transaction(|t| {
            t.check_request(request)?;
            t.requests.push(request.clone());
            Ok(())
        })
    }

    fn update_request(&self, request: &ServiceRequest) -> StoreResult<()> {
        self.transaction(|t| {
            t.check_request(request)?;
            let slot = t
                .requests
                .iter_mut()
                .find(|r| r.id == request.id)
                .ok_or(StoreError::NotFound)?;
            *slot = request.clone();
            Ok(())
        })
    }

    fn find_request(&self, id: Uuid) -> StoreResult<Option<ServiceRequest>> {
        Ok(self.lock()?.requests.iter().find(|r| r.id == id).cloned())
    }

    fn list_requests(
        &self,
        scope: &RequestScope,
        filter: &RequestFilter,
    ) -> StoreResult<Vec<RequestRow>> {
        let t = self.lock()?;
        let company_name = |id: Uuid| {
            t.companies
                .iter()
                .find(|c| c.id == id)
                .map(|c| c.company_name.clone())
                .unwrap_or_default()
        };
        let client = filter.client.as_deref().map(str::to_lowercase);
        let search = filter.search.as_deref().map(str::to_lowercase);

        let mut rows: Vec<RequestRow> = t
            .requests
            .iter()
            .filter(|r| in_scope(scope, r))
            .filter(|r| filter.status.map_or(true, |s| r.task_status == s))
            .filter(|r| client.as_deref().map_or(true, |c| contains_ci(&r.client, c)))
            .filter(|r| filter.assigned_to.map_or(true, |a| r.assigned_to_id == Some(a)))
            .filter(|r| filter.company_id.map_or(true, |c| r.company_id == c))
            .filter(|r| filter.created_from.map_or(true, |from| r.created_at >= from))
            .filter(|r| filter.created_to.map_or(true, |to| r.created_at <= to))
            .filter(|r| filter.overdue_at.map_or(true, |now| r.is_overdue(now)))
            .map(|r| RequestRow {
                request: r.clone(),
                company_name: company_name(r.company_id),
            })
            .filter(|row| match search.as_deref() {
                Some(n) => {
                    contains_ci(&row.request.service_queue_id, n)
                        || contains_ci(&row.request.client, n)
                        || contains_ci(&row.request.service_request_narrative, n)
                        || contains_ci(&row.company_name, n)
                }
                None => true,
            })
            .collect();

        rows.sort_by(|a, b| b.request.created_at.cmp(&a.request.created_at));
        Ok(rows
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }

    fn scoped_requests(
        &self,
        scope: &RequestScope,
        company_id: Option<Uuid>,
    ) -> StoreResult<Vec<ServiceRequest>> {
        let t = self.lock()?;
        let mut rows: Vec<ServiceRequest> = t
            .requests
            .iter()
            .filter(|r| in_scope(scope, r))
            .filter(|r| company_id.map_or(true, |c| r.company_id == c))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    fn delete_request(&self, id: Uuid) -> StoreResult<Vec<RequestAttachment>> {
        self.transaction(|t| {
            if !t.requests.iter().any(|r| r.id == id) {
                return Err(StoreError::NotFound);
            }
            let attachments: Vec<RequestAttachment> = t
                .attachments
                .iter()
                .filter(|a| a.request_id == id)
                .cloned()
                .collect();
            t.attachments.retain(|a| a.request_id != id);
            t.notes.retain(|n| n.request_id != id);
            for entry in t.activity.iter_mut() {
                if entry.request_id == Some(id) {
                    entry.request_id = None;
                }
            }
            t.requests.retain(|r| r.id != id);
            Ok(attachments)
        })
    }

    fn insert_note(&self, note: &RequestNote) -> StoreResult<()> {
        self.transaction(|t| {
            if !t.requests.iter().any(|r| r.id == note.request_id) {
                return Err(StoreError::ForeignKeyViolation(
                    "request_notes.request_id references a missing request".into(),
                ));
            }
            t.notes.push(note.clone());
            Ok(())
        })
    }

    fn list_notes(&self, request_id: Uuid, include_internal: bool) -> StoreResult<Vec<RequestNote>> {
        let mut rows: Vec<RequestNote> = self
            .lock()?
            .notes
            .iter()
            .filter(|n| n.request_id == request_id)
            .filter(|n| include_internal || !n.is_internal)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    fn insert_attachment(&self, attachment: &RequestAttachment) -> StoreResult<()> {
        self.transaction(|t| {
            if !t.requests.iter().any(|r| r.id == attachment.request_id) {
                return Err(StoreError::ForeignKeyViolation(
                    "request_attachments.request_id references a missing request".into(),
                ));
            }
            if t.attachments.iter().any(|a| {
                a.request_id == attachment.request_id && a.stored_name == attachment.stored_name
            }) {
                return Err(StoreError::UniqueViolation(UniqueField::StoredName));
            }
            t.attachments.push(attachment.clone());
            Ok(())
        })
    }

    fn list_attachments(&self, request_id: Uuid) -> StoreResult<Vec<RequestAttachment>> {
        let mut rows: Vec<RequestAttachment> = self
            .lock()?
            .attachments
            .iter()
            .filter(|a| a.request_id == request_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    fn find_attachment(
        &self,
        request_id: Uuid,
        stored_name: &str,
    ) -> StoreResult<Option<RequestAttachment>> {
        Ok(self
            .lock()?
            .attachments
            .iter()
            .find(|a| a.request_id == request_id && a.stored_name == stored_name)
            .cloned())
    }

    fn insert_activity(&self, entry: &ActivityLog) -> StoreResult<()> {
        self.lock()?.activity.push(entry.clone());
        Ok(())
    }

    fn list_activity(&self, filter: &ActivityFilter) -> StoreResult<Vec<ActivityLog>> {
        let mut rows: Vec<ActivityLog> = self
            .lock()?
            .activity
            .iter()
            .filter(|a| filter.company_id.map_or(true, |c| a.company_id == Some(c)))
            .filter(|a| filter.request_id.map_or(true, |r| a.request_id == Some(r)))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(filter.limit.max(0) as usize);
        Ok(rows)
    }

    fn insert_notification(&self, notification: &Notification) -> StoreResult<()> {
        let mut t = self.lock()?;
        if !t.users.iter().any(|u| u.id == notification.user_id) {
            return Err(StoreError::ForeignKeyViolation(
                "notifications.user_id references a missing user".into(),
            ));
        }
        t.notifications.push(notification.clone());
        Ok(())
    }

    fn list_notifications(
        &self,
        user_id: Uuid,
        unread_only: bool,
        limit: i64,
    ) -> StoreResult<Vec<Notification>> {
        let mut rows: Vec<Notification> = self
            .lock()?
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && (!unread_only || !n.is_read))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    fn count_unread(&self, user_id: Uuid) -> StoreResult<i64> {
        Ok(self
            .lock()?
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && !n.is_read)
            .count() as i64)
    }

    fn mark_notification_read(&self, user_id: Uuid, id: Uuid) -> StoreResult<bool> {
        let mut t = self.lock()?;
        match t
            .notifications
            .iter_mut()
            .find(|n| n.id == id && n.user_id == user_id)
        {
            Some(n) => {
                n.is_read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn mark_all_read(&self, user_id: Uuid) -> StoreResult<usize> {
        let mut t = self.lock()?;
        let mut changed = 0;
        for n in t
            .notifications
            .iter_mut()
            .filter(|n| n.user_id == user_id && !n.is_read)
        {
            n.is_read = true;
            changed += 1;
        }
        Ok(changed)
    }
}
