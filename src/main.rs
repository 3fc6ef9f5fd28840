use anyhow::Result;
use tracing::{info, warn};

use servicedesk::core::config::AppConfig;
use servicedesk::main_module::{
    build_app_state, build_store, ensure_super_admin, init_logging, run_axum_server,
};

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Failed to read .env: {e}");
        }
    }
    init_logging();
    info!("Starting servicedesk {}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::from_env()?;
    let store = build_store(&config)?;

    if let Some(seed) = &config.bootstrap_admin {
        if let Err(e) = ensure_super_admin(store.as_ref(), seed) {
            warn!("Bootstrap admin not created: {e}");
        }
    }

    let state = build_app_state(config, store);
    run_axum_server(state).await?;
    info!("Server stopped");
    Ok(())
}
