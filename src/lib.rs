pub mod analytics;
pub mod auth;
pub mod core;
pub mod directory;
pub mod file;
pub mod main_module;
pub mod notifications;
pub mod security;
pub mod tickets;
