use std::sync::Arc;

use crate::core::config::AppConfig;
use crate::core::store::Store;
use crate::file::FileStore;
use crate::notifications::NotificationDispatcher;
use crate::security::jwt::SessionManager;

/// Shared by every handler through `State<Arc<AppState>>`.
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn Store>,
    pub sessions: Arc<SessionManager>,
    pub files: Arc<dyn FileStore>,
    pub dispatcher: NotificationDispatcher,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn Store>,
        files: Arc<dyn FileStore>,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        let sessions = Arc::new(SessionManager::new(
            &config.session.jwt_secret,
            config.session.ttl_hours,
        ));
        Self {
            config,
            store,
            sessions,
            files,
            dispatcher,
        }
    }

    pub fn secure_cookies(&self) -> bool {
        self.config.is_production()
    }
}
