pub mod enums;
pub mod models;
pub mod schema;
pub mod state;
pub mod utils;

pub use enums::*;

pub use models::ApiResponse;
pub use utils::{create_conn, DbPool};
