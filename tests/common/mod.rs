#![allow(dead_code)]

use anyhow::anyhow;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use servicedesk::core::config::AppConfig;
use servicedesk::core::shared::models::{Agent, Company, Role, User};
use servicedesk::core::shared::state::AppState;
use servicedesk::core::store::{MemoryStore, Store};
use servicedesk::file::{BlobReader, FileStore, FileStoreError, LocalFileStore};
use servicedesk::main_module::build_router;
use servicedesk::notifications::email::{Mailer, OutgoingEmail, TemplateRenderer};
use servicedesk::notifications::NotificationDispatcher;
use servicedesk::security::jwt::SessionPayload;

pub const BOUNDARY: &str = "servicedesk-test-boundary";

#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<OutgoingEmail>>,
}

impl RecordingMailer {
    pub fn sent_to(&self, to: &str) -> Vec<OutgoingEmail> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.to == to)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &OutgoingEmail) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

pub struct FailingMailer;

#[async_trait]
impl Mailer for FailingMailer {
    async fn send(&self, _email: &OutgoingEmail) -> anyhow::Result<()> {
        Err(anyhow!("smtp relay unreachable"))
    }
}

/// Local storage whose `put` number `fail_at` (1-based) fails.
pub struct FlakyFileStore {
    inner: LocalFileStore,
    fail_at: usize,
    puts: AtomicUsize,
}

#[async_trait]
impl FileStore for FlakyFileStore {
    async fn put(
        &self,
        request_id: Uuid,
        stored_name: &str,
        bytes: &[u8],
    ) -> Result<String, FileStoreError> {
        if self.puts.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_at {
            return Err(FileStoreError::Io(std::io::Error::other("disk full")));
        }
        self.inner.put(request_id, stored_name, bytes).await
    }

    async fn open(
        &self,
        request_id: Uuid,
        stored_name: &str,
    ) -> Result<BlobReader, FileStoreError> {
        self.inner.open(request_id, stored_name).await
    }

    async fn delete(&self, request_id: Uuid, stored_name: &str) -> Result<(), FileStoreError> {
        self.inner.delete(request_id, stored_name).await
    }
}

pub struct TestApp {
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
    pub router: Router,
    pub uploads: TempDir,
}

pub struct Response {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    pub bytes: Vec<u8>,
}

impl Response {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.bytes).unwrap_or(Value::Null)
    }
}

impl TestApp {
    pub fn new() -> (Self, Arc<RecordingMailer>) {
        let mailer = Arc::new(RecordingMailer::default());
        (Self::with_mailer(mailer.clone()), mailer)
    }

    pub fn with_mailer(mailer: Arc<dyn Mailer>) -> Self {
        Self::build(mailer, None)
    }

    pub fn with_failing_put(fail_at: usize) -> (Self, Arc<RecordingMailer>) {
        let mailer = Arc::new(RecordingMailer::default());
        (Self::build(mailer.clone(), Some(fail_at)), mailer)
    }

    fn build(mailer: Arc<dyn Mailer>, fail_at: Option<usize>) -> Self {
        let uploads = tempfile::tempdir().unwrap();
        let vars: HashMap<&str, String> = HashMap::from([
            ("DATABASE_URL", "memory://".to_string()),
            ("APP_URL", "https://desk.example.com".to_string()),
            ("JWT_SECRET", "integration-test-secret-0123456789abcdef".to_string()),
            ("UPLOAD_DIR", uploads.path().display().to_string()),
        ]);
        let config = AppConfig::from_lookup(|key| vars.get(key).cloned()).unwrap();

        let store = Arc::new(MemoryStore::new());
        let dyn_store: Arc<dyn Store> = store.clone();
        let dispatcher = NotificationDispatcher::new(
            dyn_store.clone(),
            mailer,
            TemplateRenderer::new(None),
            config.server.base_url.clone(),
        );
        let local = LocalFileStore::new(uploads.path());
        let files: Arc<dyn FileStore> = match fail_at {
            Some(fail_at) => Arc::new(FlakyFileStore {
                inner: local,
                fail_at,
                puts: AtomicUsize::new(0),
            }),
            None => Arc::new(local),
        };
        let state = Arc::new(AppState::new(config, dyn_store, files, dispatcher));
        let router = build_router(state.clone());
        Self {
            state,
            store,
            router,
            uploads,
        }
    }

    pub fn token_for(&self, user: &User) -> String {
        self.state
            .sessions
            .issue(&SessionPayload::from(user))
            .unwrap()
    }

    pub async fn request(&self, req: Request<Body>) -> Response {
        let response = self.router.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        Response {
            status,
            headers,
            bytes,
        }
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        user: Option<&User>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", self.token_for(user)));
        }
        let req = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.request(req).await;
        (response.status, response.json())
    }

    pub async fn get(&self, uri: &str, user: &User) -> (StatusCode, Value) {
        self.send(Method::GET, uri, Some(user), None).await
    }

    pub async fn post(&self, uri: &str, user: &User, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(user), Some(body)).await
    }

    pub async fn put(&self, uri: &str, user: &User, body: Value) -> (StatusCode, Value) {
        self.send(Method::PUT, uri, Some(user), Some(body)).await
    }

    pub async fn delete(&self, uri: &str, user: &User) -> (StatusCode, Value) {
        self.send(Method::DELETE, uri, Some(user), None).await
    }

    pub async fn upload(
        &self,
        uri: &str,
        user: &User,
        fields: &[(&str, &str)],
        files: &[(&str, &[u8])],
    ) -> Response {
        let req = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token_for(user)))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(fields, files)))
            .unwrap();
        self.request(req).await
    }

    pub fn super_admin(&self) -> User {
        let user = user("root@desk.io", Role::SuperAdmin, None);
        self.store.insert_user(&user).unwrap();
        user
    }

    /// A company whose primary contact is its customer_admin.
    pub fn company(&self, name: &str) -> (Company, User) {
        let now = Utc::now();
        let slug = name.to_lowercase();
        let company = Company {
            id: Uuid::new_v4(),
            company_name: name.to_string(),
            company_code: unique_code(7),
            primary_contact: format!("{name} Admin"),
            phone: None,
            email: format!("admin@{slug}.com"),
            created_at: now,
            updated_at: now,
        };
        let admin = user(&company.email, Role::CustomerAdmin, Some(company.id));
        self.store.insert_company_with_user(&company, &admin).unwrap();
        (company, admin)
    }

    pub fn customer(&self, company: &Company, local: &str) -> User {
        let slug = company.company_name.to_lowercase();
        let user = user(&format!("{local}@{slug}.com"), Role::Customer, Some(company.id));
        self.store.insert_user(&user).unwrap();
        user
    }

    pub fn agent(&self, email: &str, companies: Vec<Uuid>) -> User {
        let now = Utc::now();
        let user = user(email, Role::Agent, None);
        let agent = Agent {
            id: Uuid::new_v4(),
            user_id: user.id,
            assigned_company_ids: companies,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_agent_with_user(&agent, &user).unwrap();
        user
    }

    /// Every blob file currently under the upload directory.
    pub fn stored_blobs(&self) -> Vec<std::path::PathBuf> {
        fn walk(dir: &Path, out: &mut Vec<std::path::PathBuf>) {
            for entry in std::fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    walk(&path, out);
                } else {
                    out.push(path);
                }
            }
        }
        let mut out = Vec::new();
        walk(self.uploads.path(), &mut out);
        out
    }

    /// Waits for the background dispatcher to write inbox rows.
    pub async fn wait_for_unread(&self, user_id: Uuid, at_least: i64) -> i64 {
        let mut count = 0;
        for _ in 0..100 {
            count = self.store.count_unread(user_id).unwrap();
            if count >= at_least {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        count
    }
}

fn unique_code(len: usize) -> String {
    Uuid::new_v4()
        .simple()
        .to_string()
        .to_uppercase()
        .chars()
        .take(len)
        .collect()
}

pub fn user(email: &str, role: Role, company_id: Option<Uuid>) -> User {
    let now = Utc::now();
    User {
        id: Uuid::new_v4(),
        first_name: "Test".to_string(),
        last_name: role.as_str().to_string(),
        email: email.to_string(),
        login_code: Some(unique_code(8)),
        password_hash: None,
        role,
        company_id,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

pub fn multipart_body(fields: &[(&str, &str)], files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    for (file_name, bytes) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}
