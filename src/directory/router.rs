use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::core::shared::state::AppState;

use super::agents;
use super::companies;
use super::users;

pub fn configure_directory_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/companies",
            get(companies::list_companies).post(companies::create_company_handler),
        )
        .route(
            "/api/companies/:id",
            get(companies::get_company)
                .put(companies::update_company_handler)
                .delete(companies::delete_company_handler),
        )
        .route(
            "/api/companies/:id/regenerate-code",
            post(companies::regenerate_code_handler),
        )
        .route(
            "/api/users",
            get(users::list_users_handler).post(users::create_user_handler),
        )
        .route(
            "/api/users/:id",
            get(users::get_user_handler)
                .put(users::update_user_handler)
                .delete(users::delete_user_handler),
        )
        .route(
            "/api/users/:id/regenerate-login-code",
            post(users::regenerate_login_code_handler),
        )
        .route(
            "/api/agents",
            get(agents::list_agents).post(agents::create_agent_handler),
        )
        .route(
            "/api/agents/:id",
            get(agents::get_agent)
                .put(agents::update_agent_handler)
                .delete(agents::delete_agent_handler),
        )
}
