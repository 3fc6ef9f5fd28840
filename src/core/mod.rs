pub mod codes;
pub mod config;
pub mod error;
pub mod scope;
pub mod shared;
pub mod store;
