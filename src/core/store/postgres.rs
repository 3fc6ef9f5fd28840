use chrono::Utc;
use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, PooledConnection};
use std::collections::HashMap;
use uuid::Uuid;

use super::{
    ActivityFilter, CompanyDeletion, RequestFilter, RequestRow, Store, StoreError, StoreResult,
    UserFilter,
};
use crate::core::scope::RequestScope;
use crate::core::shared::models::{
    ActivityLog, Agent, Company, Notification, RequestAttachment, RequestNote, Role,
    ServiceRequest, TaskStatus, User,
};
use crate::core::shared::schema::{
    activity_logs, agents, companies, notifications, request_attachments, request_notes,
    service_requests, users,
};
use crate::core::shared::utils::{like_pattern, DbPool};

type PgPooled = PooledConnection<ConnectionManager<PgConnection>>;

/// Diesel-backed store over an r2d2 Postgres pool.
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> StoreResult<PgPooled> {
        Ok(self.pool.get()?)
    }
}

fn expect_row(affected: usize) -> StoreResult<()> {
    if affected == 0 {
        Err(StoreError::NotFound)
    } else {
        Ok(())
    }
}

type BoxedRequests<'a> = service_requests::BoxedQuery<'a, diesel::pg::Pg>;

fn scoped(query: BoxedRequests<'static>, scope: &RequestScope) -> BoxedRequests<'static> {
    match scope {
        RequestScope::All => query,
        RequestScope::Agent {
            user_id,
            company_ids,
        } => query.filter(
            service_requests::company_id
                .eq_any(company_ids.clone())
                .or(service_requests::assigned_to_id
                    .assume_not_null()
                    .eq(*user_id)),
        ),
        RequestScope::Company(company_id) => {
            query.filter(service_requests::company_id.eq(*company_id))
        }
    }
}

impl Store for PgStore {
    fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn()?;
        diesel::sql_query("SELECT 1").execute(&mut conn)?;
        Ok(())
    }

    fn insert_company_with_user(&self, company: &Company, primary: &User) -> StoreResult<()> {
        let mut conn = self.conn()?;
        conn.transaction::<_, StoreError, _>(|conn| {
            diesel::insert_into(companies::table)
                .values(company)
                .execute(conn)?;
            diesel::insert_into(users::table).values(primary).execute(conn)?;
            Ok(())
        })
    }

    fn update_company_with_user(
        &self,
        company: &Company,
        primary: Option<&User>,
    ) -> StoreResult<()> {
        let mut conn = self.conn()?;
        conn.transaction::<_, StoreError, _>(|conn| {
            expect_row(
                diesel::update(companies::table.find(company.id))
                    .set(company)
                    .execute(conn)?,
            )?;
            if let Some(user) = primary {
                expect_row(diesel::update(users::table.find(user.id)).set(user).execute(conn)?)?;
            }
            Ok(())
        })
    }

    fn update_company_code(&self, company_id: Uuid, code: &str) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let affected = diesel::update(companies::table.find(company_id))
            .set((
                companies::company_code.eq(code),
                companies::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;
        expect_row(affected)
    }

    fn find_company(&self, id: Uuid) -> StoreResult<Option<Company>> {
        let mut conn = self.conn()?;
        Ok(companies::table
            .find(id)
            .select(Company::as_select())
            .first(&mut conn)
            .optional()?)
    }

    fn find_company_by_code(&self, code: &str) -> StoreResult<Option<Company>> {
        let mut conn = self.conn()?;
        Ok(companies::table
            .filter(companies::company_code.eq(code))
            .select(Company::as_select())
            .first(&mut conn)
            .optional()?)
    }

    fn list_companies(&self, search: Option<&str>) -> StoreResult<Vec<Company>> {
        let mut conn = self.conn()?;
        let mut query = companies::table.select(Company::as_select()).into_boxed();
        if let Some(term) = search {
            let pattern = like_pattern(term);
            query = query.filter(
                companies::company_name
                    .ilike(pattern.clone())
                    .or(companies::company_code.ilike(pattern.clone()))
                    .or(companies::email.ilike(pattern)),
            );
        }
        Ok(query
            .order(companies::company_name.asc())
            .load(&mut conn)?)
    }

    fn delete_company(&self, id: Uuid) -> StoreResult<CompanyDeletion> {
        let mut conn = self.conn()?;
        conn.transaction::<_, StoreError, _>(|conn| {
            let found: i64 = companies::table.find(id).count().get_result(conn)?;
            if found == 0 {
                return Ok(CompanyDeletion::NotFound);
            }
            let requests: i64 = service_requests::table
                .filter(service_requests::company_id.eq(id))
                .count()
                .get_result(conn)?;
            if requests > 0 {
                return Ok(CompanyDeletion::HasRequests(requests));
            }

            let user_ids: Vec<Uuid> = users::table
                .filter(users::company_id.eq(id))
                .select(users::id)
                .load(conn)?;
            diesel::delete(users::table.filter(users::company_id.eq(id))).execute(conn)?;

            let servicing: Vec<Agent> = agents::table
                .filter(agents::assigned_company_ids.contains(vec![id]))
                .select(Agent::as_select())
                .load(conn)?;
            for agent in servicing {
                let remaining: Vec<Uuid> = agent
                    .assigned_company_ids
                    .into_iter()
                    .filter(|company_id| *company_id != id)
                    .collect();
                diesel::update(agents::table.find(agent.id))
                    .set((
                        agents::assigned_company_ids.eq(remaining),
                        agents::updated_at.eq(Utc::now()),
                    ))
                    .execute(conn)?;
            }

            diesel::delete(companies::table.find(id)).execute(conn)?;
            Ok(CompanyDeletion::Deleted(user_ids))
        })
    }

    fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut conn = self.conn()?;
        diesel::insert_into(users::table).values(user).execute(&mut conn)?;
        Ok(())
    }

    fn update_user(&self, user: &User) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let affected = diesel::update(users::table.find(user.id))
            .set(user)
            .execute(&mut conn)?;
        expect_row(affected)
    }

    fn update_login_code(&self, user_id: Uuid, code: &str) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let affected = diesel::update(users::table.find(user_id))
            .set((users::login_code.eq(code), users::updated_at.eq(Utc::now())))
            .execute(&mut conn)?;
        expect_row(affected)
    }

    fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let mut conn = self.conn()?;
        Ok(users::table
            .find(id)
            .select(User::as_select())
            .first(&mut conn)
            .optional()?)
    }

    fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let mut conn = self.conn()?;
        Ok(users::table
            .filter(users::email.eq(email))
            .select(User::as_select())
            .first(&mut conn)
            .optional()?)
    }

    fn find_user_by_login_code(&self, code: &str) -> StoreResult<Option<User>> {
        let mut conn = self.conn()?;
        Ok(users::table
            .filter(users::login_code.eq(code))
            .select(User::as_select())
            .first(&mut conn)
            .optional()?)
    }

    fn list_users(&self, filter: &UserFilter) -> StoreResult<Vec<User>> {
        let mut conn = self.conn()?;
        let mut query = users::table.select(User::as_select()).into_boxed();
        if let Some(company_id) = filter.company_id {
            query = query.filter(users::company_id.eq(company_id));
        }
        if !filter.roles.is_empty() {
            query = query.filter(users::role.eq_any(filter.roles.clone()));
        }
        if let Some(term) = &filter.search {
            let pattern = like_pattern(term);
            query = query.filter(
                users::first_name
                    .ilike(pattern.clone())
                    .or(users::last_name.ilike(pattern.clone()))
                    .or(users::email.ilike(pattern)),
            );
        }
        Ok(query.order(users::created_at.desc()).load(&mut conn)?)
    }

    fn count_users_with_role(&self, role: Role) -> StoreResult<i64> {
        let mut conn = self.conn()?;
        Ok(users::table
            .filter(users::role.eq(role))
            .count()
            .get_result(&mut conn)?)
    }

    fn user_has_authored_records(&self, user_id: Uuid) -> StoreResult<bool> {
        let mut conn = self.conn()?;
        let created: bool = diesel::select(exists(
            service_requests::table.filter(service_requests::assigned_by_id.eq(user_id)),
        ))
        .get_result(&mut conn)?;
        if created {
            return Ok(true);
        }
        let noted: bool = diesel::select(exists(
            request_notes::table.filter(request_notes::author_id.eq(user_id)),
        ))
        .get_result(&mut conn)?;
        if noted {
            return Ok(true);
        }
        Ok(diesel::select(exists(
            request_attachments::table.filter(request_attachments::uploaded_by_id.eq(user_id)),
        ))
        .get_result(&mut conn)?)
    }

    fn delete_user(&self, id: Uuid) -> StoreResult<bool> {
        let mut conn = self.conn()?;
        let affected = diesel::delete(users::table.find(id)).execute(&mut conn)?;
        Ok(affected > 0)
    }

    fn insert_agent_with_user(&self, agent: &Agent, user: &User) -> StoreResult<()> {
        let mut conn = self.conn()?;
        conn.transaction::<_, StoreError, _>(|conn| {
            diesel::insert_into(users::table).values(user).execute(conn)?;
            diesel::insert_into(agents::table).values(agent).execute(conn)?;
            Ok(())
        })
    }

    fn update_agent_with_user(&self, agent: &Agent, user: &User) -> StoreResult<()> {
        let mut conn = self.conn()?;
        conn.transaction::<_, StoreError, _>(|conn| {
            expect_row(diesel::update(agents::table.find(agent.id)).set(agent).execute(conn)?)?;
            expect_row(diesel::update(users::table.find(user.id)).set(user).execute(conn)?)?;
            Ok(())
        })
    }

    fn find_agent(&self, id: Uuid) -> StoreResult<Option<Agent>> {
        let mut conn = self.conn()?;
        Ok(agents::table
            .find(id)
            .select(Agent::as_select())
            .first(&mut conn)
            .optional()?)
    }

    fn find_agent_by_user(&self, user_id: Uuid) -> StoreResult<Option<Agent>> {
        let mut conn = self.conn()?;
        Ok(agents::table
            .filter(agents::user_id.eq(user_id))
            .select(Agent::as_select())
            .first(&mut conn)
            .optional()?)
    }

    fn list_agents(&self) -> StoreResult<Vec<(Agent, User)>> {
        let mut conn = self.conn()?;
        Ok(agents::table
            .inner_join(users::table)
            .select((Agent::as_select(), User::as_select()))
            .order((users::last_name.asc(), users::first_name.asc()))
            .load(&mut conn)?)
    }

    fn delete_agent(&self, id: Uuid) -> StoreResult<bool> {
        let mut conn = self.conn()?;
        conn.transaction::<_, StoreError, _>(|conn| {
            let Some(agent) = agents::table
                .find(id)
                .select(Agent::as_select())
                .first(conn)
                .optional()?
            else {
                return Ok(false);
            };
            diesel::update(
                service_requests::table
                    .filter(service_requests::assigned_to_id.eq(agent.user_id)),
            )
            .set((
                service_requests::assigned_to_id.eq(None::<Uuid>),
                service_requests::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?;
            diesel::delete(agents::table.find(id)).execute(conn)?;
            diesel::delete(users::table.find(agent.user_id)).execute(conn)?;
            Ok(true)
        })
    }

    fn insert_request(&self, request: &ServiceRequest) -> StoreResult<()> {
        let mut conn = self.conn()?;
        diesel::insert_into(service_requests::table)
            .values(request)
            .execute(&mut conn)?;
        Ok(())
    }

    fn update_request(&self, request: &ServiceRequest) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let affected = diesel::update(service_requests::table.find(request.id))
            .set(request)
            .execute(&mut conn)?;
        expect_row(affected)
    }

    fn find_request(&self, id: Uuid) -> StoreResult<Option<ServiceRequest>> {
        let mut conn = self.conn()?;
        Ok(service_requests::table
            .find(id)
            .select(ServiceRequest::as_select())
            .first(&mut conn)
            .optional()?)
    }

    fn list_requests(
        &self,
        scope: &RequestScope,
        filter: &RequestFilter,
    ) -> StoreResult<Vec<RequestRow>> {
        let mut conn = self.conn()?;

        let mut ids = scoped(service_requests::table.into_boxed(), scope);
        if let Some(status) = filter.status {
            ids = ids.filter(service_requests::task_status.eq(status));
        }
        if let Some(client) = &filter.client {
            ids = ids.filter(service_requests::client.ilike(like_pattern(client)));
        }
        if let Some(assignee) = filter.assigned_to {
            ids = ids.filter(service_requests::assigned_to_id.eq(assignee));
        }
        if let Some(company_id) = filter.company_id {
            ids = ids.filter(service_requests::company_id.eq(company_id));
        }
        if let Some(from) = filter.created_from {
            ids = ids.filter(service_requests::created_at.ge(from));
        }
        if let Some(to) = filter.created_to {
            ids = ids.filter(service_requests::created_at.le(to));
        }
        if let Some(now) = filter.overdue_at {
            ids = ids.filter(
                service_requests::due_date
                    .assume_not_null()
                    .lt(now)
                    .and(service_requests::task_status.ne(TaskStatus::Closed)),
            );
        }
        if let Some(term) = &filter.search {
            let pattern = like_pattern(term);
            let matching_companies: Vec<Uuid> = companies::table
                .filter(companies::company_name.ilike(pattern.clone()))
                .select(companies::id)
                .load(&mut conn)?;
            ids = ids.filter(
                service_requests::service_queue_id
                    .ilike(pattern.clone())
                    .or(service_requests::client.ilike(pattern.clone()))
                    .or(service_requests::service_request_narrative.ilike(pattern))
                    .or(service_requests::company_id.eq_any(matching_companies)),
            );
        }

        let requests: Vec<ServiceRequest> = ids
            .select(ServiceRequest::as_select())
            .order(service_requests::created_at.desc())
            .limit(filter.limit)
            .offset(filter.offset)
            .load(&mut conn)?;

        let company_ids: Vec<Uuid> = requests.iter().map(|r| r.company_id).collect();
        let names: HashMap<Uuid, String> = companies::table
            .filter(companies::id.eq_any(company_ids))
            .select((companies::id, companies::company_name))
            .load::<(Uuid, String)>(&mut conn)?
            .into_iter()
            .collect();

        Ok(requests
            .into_iter()
            .map(|request| RequestRow {
                company_name: names.get(&request.company_id).cloned().unwrap_or_default(),
                request,
            })
            .collect())
    }

    fn scoped_requests(
        &self,
        scope: &RequestScope,
        company_id: Option<Uuid>,
    ) -> StoreResult<Vec<ServiceRequest>> {
        let mut conn = self.conn()?;
        let mut query = scoped(service_requests::table.into_boxed(), scope);
        if let Some(company_id) = company_id {
            query = query.filter(service_requests::company_id.eq(company_id));
        }
        Ok(query
            .select(ServiceRequest::as_select())
            .order(service_requests::created_at.asc())
            .load(&mut conn)?)
    }

    fn delete_request(&self, id: Uuid) -> StoreResult<Vec<RequestAttachment>> {
        let mut conn = self.conn()?;
        conn.transaction::<_, StoreError, _>(|conn| {
            let attachments: Vec<RequestAttachment> = request_attachments::table
                .filter(request_attachments::request_id.eq(id))
                .select(RequestAttachment::as_select())
                .load(conn)?;
            diesel::delete(request_notes::table.filter(request_notes::request_id.eq(id)))
                .execute(conn)?;
            diesel::delete(
                request_attachments::table.filter(request_attachments::request_id.eq(id)),
            )
            .execute(conn)?;
            expect_row(diesel::delete(service_requests::table.find(id)).execute(conn)?)?;
            Ok(attachments)
        })
    }

    fn insert_note(&self, note: &RequestNote) -> StoreResult<()> {
        let mut conn = self.conn()?;
        diesel::insert_into(request_notes::table)
            .values(note)
            .execute(&mut conn)?;
        Ok(())
    }

    fn list_notes(&self, request_id: Uuid, include_internal: bool) -> StoreResult<Vec<RequestNote>> {
        let mut conn = self.conn()?;
        let mut query = request_notes::table
            .filter(request_notes::request_id.eq(request_id))
            .select(RequestNote::as_select())
            .into_boxed();
        if !include_internal {
            query = query.filter(request_notes::is_internal.eq(false));
        }
        Ok(query
            .order(request_notes::created_at.asc())
            .load(&mut conn)?)
    }

    fn insert_attachment(&self, attachment: &RequestAttachment) -> StoreResult<()> {
        let mut conn = self.conn()?;
        diesel::insert_into(request_attachments::table)
            .values(attachment)
            .execute(&mut conn)?;
        Ok(())
    }

    fn list_attachments(&self, request_id: Uuid) -> StoreResult<Vec<RequestAttachment>> {
        let mut conn = self.conn()?;
        Ok(request_attachments::table
            .filter(request_attachments::request_id.eq(request_id))
            .select(RequestAttachment::as_select())
            .order(request_attachments::created_at.asc())
            .load(&mut conn)?)
    }

    fn find_attachment(
        &self,
        request_id: Uuid,
        stored_name: &str,
    ) -> StoreResult<Option<RequestAttachment>> {
        let mut conn = self.conn()?;
        Ok(request_attachments::table
            .filter(request_attachments::request_id.eq(request_id))
            .filter(request_attachments::stored_name.eq(stored_name))
            .select(RequestAttachment::as_select())
            .first(&mut conn)
            .optional()?)
    }

    fn insert_activity(&self, entry: &ActivityLog) -> StoreResult<()> {
        let mut conn = self.conn()?;
        diesel::insert_into(activity_logs::table)
            .values(entry)
            .execute(&mut conn)?;
        Ok(())
    }

    fn list_activity(&self, filter: &ActivityFilter) -> StoreResult<Vec<ActivityLog>> {
        let mut conn = self.conn()?;
        let mut query = activity_logs::table
            .select(ActivityLog::as_select())
            .into_boxed();
        if let Some(company_id) = filter.company_id {
            query = query.filter(activity_logs::company_id.eq(company_id));
        }
        if let Some(request_id) = filter.request_id {
            query = query.filter(activity_logs::request_id.eq(request_id));
        }
        Ok(query
            .order(activity_logs::created_at.desc())
            .limit(filter.limit)
            .load(&mut conn)?)
    }

    fn insert_notification(&self, notification: &Notification) -> StoreResult<()> {
        let mut conn = self.conn()?;
        diesel::insert_into(notifications::table)
            .values(notification)
            .execute(&mut conn)?;
        Ok(())
    }

    fn list_notifications(
        &self,
        user_id: Uuid,
        unread_only: bool,
        limit: i64,
    ) -> StoreResult<Vec<Notification>> {
        let mut conn = self.conn()?;
        let mut query = notifications::table
            .filter(notifications::user_id.eq(user_id))
            .select(Notification::as_select())
            .into_boxed();
        if unread_only {
            query = query.filter(notifications::is_read.eq(false));
        }
        Ok(query
            .order(notifications::created_at.desc())
            .limit(limit)
            .load(&mut conn)?)
    }

    fn count_unread(&self, user_id: Uuid) -> StoreResult<i64> {
        let mut conn = self.conn()?;
        Ok(notifications::table
            .filter(notifications::user_id.eq(user_id))
            .filter(notifications::is_read.eq(false))
            .count()
            .get_result(&mut conn)?)
    }

    fn mark_notification_read(&self, user_id: Uuid, id: Uuid) -> StoreResult<bool> {
        let mut conn = self.conn()?;
        let affected = diesel::update(
            notifications::table
                .filter(notifications::id.eq(id))
                .filter(notifications::user_id.eq(user_id)),
        )
        .set(notifications::is_read.eq(true))
        .execute(&mut conn)?;
        Ok(affected > 0)
    }

    fn mark_all_read(&self, user_id: Uuid) -> StoreResult<usize> {
        let mut conn = self.conn()?;
        Ok(diesel::update(
            notifications::table
                .filter(notifications::user_id.eq(user_id))
                .filter(notifications::is_read.eq(false)),
        )
        .set(notifications::is_read.eq(true))
        .execute(&mut conn)?)
    }
}
