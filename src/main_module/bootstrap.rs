//! Startup wiring: logging, store selection, shared state, seed admin.

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::core::config::{AppConfig, BootstrapAdmin};
use crate::core::error::set_production_mode;
use crate::core::shared::models::{Role, User};
use crate::core::shared::state::AppState;
use crate::core::shared::utils::{create_conn, normalize_email, run_migrations};
use crate::core::store::{MemoryStore, PgStore, Store};
use crate::file::LocalFileStore;
use crate::notifications::email::{mailer_from_config, TemplateRenderer};
use crate::notifications::NotificationDispatcher;
use crate::security::password::{hash_password, validate_password};

pub const DEFAULT_LOG_FILTER: &str = "info,servicedesk=debug";

pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub fn build_store(config: &AppConfig) -> Result<Arc<dyn Store>> {
    if config.database.is_memory() {
        warn!("Using the in-memory store; data is lost on restart");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let pool = create_conn(&config.database.url, config.database.pool_size)
        .context("Failed to connect to the database")?;
    run_migrations(&pool)?;
    info!("Database ready (pool size {})", config.database.pool_size);
    Ok(Arc::new(PgStore::new(pool)))
}

/// Creates the configured super_admin when none exists yet.
pub fn ensure_super_admin(store: &dyn Store, seed: &BootstrapAdmin) -> Result<bool> {
    if store.count_users_with_role(Role::SuperAdmin)? > 0 {
        return Ok(false);
    }
    validate_password(&seed.password)
        .map_err(|e| anyhow::anyhow!("BOOTSTRAP_ADMIN_PASSWORD rejected: {e}"))?;
    let now = Utc::now();
    let admin = User {
        id: Uuid::new_v4(),
        first_name: "System".to_string(),
        last_name: "Administrator".to_string(),
        email: normalize_email(&seed.email),
        login_code: None,
        password_hash: Some(hash_password(&seed.password)?),
        role: Role::SuperAdmin,
        company_id: None,
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    store.insert_user(&admin)?;
    info!("Created bootstrap super_admin {}", admin.email);
    Ok(true)
}

pub fn build_app_state(config: AppConfig, store: Arc<dyn Store>) -> Arc<AppState> {
    set_production_mode(config.is_production());
    let files = Arc::new(LocalFileStore::new(config.storage.upload_dir.clone()));
    let mailer = mailer_from_config(&config.email);
    let templates = TemplateRenderer::new(config.email.template_dir.clone());
    let dispatcher = NotificationDispatcher::new(
        Arc::clone(&store),
        mailer,
        templates,
        config.server.base_url.clone(),
    );
    Arc::new(AppState::new(config, store, files, dispatcher))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_admin_created_once() {
        let store = MemoryStore::new();
        let seed = BootstrapAdmin {
            email: "Root@Desk.io".into(),
            password: "first-login-2026".into(),
        };
        assert!(ensure_super_admin(&store, &seed).unwrap());
        assert!(!ensure_super_admin(&store, &seed).unwrap());

        let admin = store.find_user_by_email("root@desk.io").unwrap().unwrap();
        assert_eq!(admin.role, Role::SuperAdmin);
        assert!(admin.password_hash.is_some());
    }

    #[test]
    fn test_weak_bootstrap_password_rejected() {
        let store = MemoryStore::new();
        let seed = BootstrapAdmin {
            email: "root@desk.io".into(),
            password: "short".into(),
        };
        assert!(ensure_super_admin(&store, &seed).is_err());
        assert_eq!(store.count_users_with_role(Role::SuperAdmin).unwrap(), 0);
    }
}
